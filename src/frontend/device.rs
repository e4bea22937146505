//! Tuner hardware abstraction.
//!
//! The pool talks to hardware exclusively through [`TunerBackend`],
//! [`TunerHandles`] and [`StreamSource`]; the Linux DVB character-device
//! implementation lives behind `cfg(target_os = "linux")` and tests run
//! against in-memory fakes.

use std::io;
use std::time::Duration;

use crate::error::FrontendError;
use crate::tune::Tune;

use super::lnb::LnbConfig;

/// Result of one blocking read attempt on a tuner's transport stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes of transport stream data were read.
    Data(usize),
    /// The poll timeout elapsed without data.
    TimedOut,
    /// The device signalled end of stream.
    Closed,
}

/// Blocking transport stream reader for one tuned frontend.
///
/// Implementations are driven from a dedicated thread; `read_chunk` may
/// block up to the configured timeout.
pub trait StreamSource: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;
}

/// Open device handles of one attached frontend.
///
/// All methods may block on hardware and must only be called from the
/// worker thread, never from the control path.
pub trait TunerHandles: Send {
    /// Issue the full tune sequence for a transponder.
    fn tune(&mut self, tune: &Tune, lnb: &LnbConfig) -> Result<(), FrontendError>;

    /// Arm the demultiplexer to pass the whole transport stream.
    /// `None` keeps the driver's default buffer size.
    fn configure_demux(&mut self, buffer_size: Option<usize>) -> Result<(), FrontendError>;

    /// Open the transport stream output of the tuned frontend.
    fn open_stream(&mut self, read_timeout: Duration) -> Result<Box<dyn StreamSource>, FrontendError>;
}

/// Factory for tuner handles, one per platform.
pub trait TunerBackend: Send + Sync {
    /// Query the delivery systems an adapter/frontend pair supports,
    /// as raw `fe_delivery_system` codes. May block.
    fn probe(&self, adapter: u32, frontend: u32) -> Result<Vec<u8>, FrontendError>;

    /// Open the frontend and demux devices. May block.
    fn open(&self, adapter: u32, frontend: u32) -> Result<Box<dyn TunerHandles>, FrontendError>;
}

/// The tuner backend for the running platform, if one exists.
pub fn platform_backend() -> Result<Box<dyn TunerBackend>, FrontendError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxBackend))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(FrontendError::NoBackend)
    }
}

#[cfg(target_os = "linux")]
pub mod linux {
    //! Linux DVB API (v5) backend.

    use std::fs::{File, OpenOptions};
    use std::io::{self, Read};
    use std::os::fd::{AsFd, AsRawFd};
    use std::os::unix::fs::OpenOptionsExt;
    use std::time::Duration;

    use nix::libc;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    use crate::error::FrontendError;
    use crate::frontend::lnb::LnbConfig;
    use crate::tune::Tune;

    use super::{ReadOutcome, StreamSource, TunerBackend, TunerHandles};

    /// Pseudo-PID selecting the full transport stream on the demux.
    const PID_PASS_ALL: u16 = 0x2000;

    // fe_property commands (linux/dvb/frontend.h).
    const DTV_TUNE: u32 = 1;
    const DTV_CLEAR: u32 = 2;
    const DTV_FREQUENCY: u32 = 3;
    const DTV_INVERSION: u32 = 6;
    const DTV_SYMBOL_RATE: u32 = 8;
    const DTV_INNER_FEC: u32 = 9;
    const DTV_VOLTAGE: u32 = 10;
    const DTV_TONE: u32 = 11;
    const DTV_DELIVERY_SYSTEM: u32 = 17;
    const DTV_ENUM_DELSYS: u32 = 44;

    const INVERSION_AUTO: u32 = 2;
    const FEC_AUTO: u32 = 9;
    const SEC_VOLTAGE_13: u32 = 0;
    const SEC_VOLTAGE_18: u32 = 1;
    const SEC_TONE_ON: u32 = 0;
    const SEC_TONE_OFF: u32 = 1;

    // dmx_pes_filter_params fields (linux/dvb/dmx.h).
    const DMX_IN_FRONTEND: u32 = 0;
    const DMX_OUT_TS_TAP: u32 = 2;
    const DMX_PES_OTHER: u32 = 20;
    const DMX_IMMEDIATE_START: u32 = 4;

    #[repr(C)]
    #[allow(dead_code)]
    struct DvbFrontendInfo {
        name: [u8; 128],
        fe_type: u32,
        frequency_min: u32,
        frequency_max: u32,
        frequency_stepsize: u32,
        frequency_tolerance: u32,
        symbol_rate_min: u32,
        symbol_rate_max: u32,
        symbol_rate_tolerance: u32,
        notifier_delay: u32,
        caps: u32,
    }

    #[repr(C, packed)]
    #[derive(Clone, Copy)]
    #[allow(dead_code)]
    struct DtvPropertyBuffer {
        data: [u8; 32],
        len: u32,
        reserved1: [u32; 3],
        reserved2: usize,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    union DtvPropertyData {
        data: u32,
        buffer: DtvPropertyBuffer,
    }

    #[repr(C, packed)]
    #[derive(Clone, Copy)]
    #[allow(dead_code)]
    struct DtvProperty {
        cmd: u32,
        reserved: [u32; 3],
        u: DtvPropertyData,
        result: i32,
    }

    impl DtvProperty {
        fn new(cmd: u32, value: u32) -> Self {
            DtvProperty {
                cmd,
                reserved: [0; 3],
                u: DtvPropertyData { data: value },
                result: 0,
            }
        }
    }

    #[repr(C)]
    struct DtvProperties {
        num: u32,
        props: *mut DtvProperty,
    }

    nix::ioctl_read!(fe_get_info, b'o', 61, DvbFrontendInfo);
    nix::ioctl_write_ptr!(fe_set_property, b'o', 82, DtvProperties);
    nix::ioctl_read!(fe_get_property, b'o', 83, DtvProperties);

    #[repr(C)]
    struct DmxPesFilterParams {
        pid: u16,
        input: u32,
        output: u32,
        pes_type: u32,
        flags: u32,
    }

    nix::ioctl_write_ptr!(dmx_set_pes_filter, b'o', 44, DmxPesFilterParams);
    nix::ioctl_write_int_bad!(dmx_set_buffer_size, nix::request_code_none!(b'o', 45));

    fn frontend_path(adapter: u32, frontend: u32) -> String {
        format!("/dev/dvb/adapter{adapter}/frontend{frontend}")
    }

    fn demux_path(adapter: u32, frontend: u32) -> String {
        format!("/dev/dvb/adapter{adapter}/demux{frontend}")
    }

    fn dvr_path(adapter: u32, frontend: u32) -> String {
        format!("/dev/dvb/adapter{adapter}/dvr{frontend}")
    }

    fn open_rw(path: &str) -> Result<File, FrontendError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| FrontendError::Open {
                device: path.to_owned(),
                source,
            })
    }

    /// Backend using `/dev/dvb/adapterN/{frontend,demux,dvr}M`.
    pub struct LinuxBackend;

    impl TunerBackend for LinuxBackend {
        fn probe(&self, adapter: u32, frontend: u32) -> Result<Vec<u8>, FrontendError> {
            let path = frontend_path(adapter, frontend);
            let device = open_rw(&path)?;
            let fd = device.as_raw_fd();

            let mut info = DvbFrontendInfo {
                name: [0; 128],
                fe_type: 0,
                frequency_min: 0,
                frequency_max: 0,
                frequency_stepsize: 0,
                frequency_tolerance: 0,
                symbol_rate_min: 0,
                symbol_rate_max: 0,
                symbol_rate_tolerance: 0,
                notifier_delay: 0,
                caps: 0,
            };
            unsafe { fe_get_info(fd, &mut info) }.map_err(|e| FrontendError::Probe {
                adapter,
                frontend,
                reason: format!("FE_GET_INFO: {e}"),
            })?;
            let name_len = info.name.iter().position(|&b| b == 0).unwrap_or(128);
            log::info!(
                "adapter{}/frontend{}: {}",
                adapter,
                frontend,
                String::from_utf8_lossy(&info.name[..name_len])
            );

            let mut prop = [DtvProperty::new(DTV_ENUM_DELSYS, 0)];
            let mut props = DtvProperties {
                num: 1,
                props: prop.as_mut_ptr(),
            };
            unsafe { fe_get_property(fd, &mut props) }.map_err(|e| FrontendError::Probe {
                adapter,
                frontend,
                reason: format!("DTV_ENUM_DELSYS: {e}"),
            })?;
            let buffer = unsafe { prop[0].u.buffer };
            let len = (buffer.len as usize).min(buffer.data.len());
            Ok(buffer.data[..len].to_vec())
        }

        fn open(&self, adapter: u32, frontend: u32) -> Result<Box<dyn TunerHandles>, FrontendError> {
            let fe = open_rw(&frontend_path(adapter, frontend))?;
            let demux = open_rw(&demux_path(adapter, frontend))?;
            Ok(Box::new(LinuxTuner {
                adapter,
                frontend,
                fe,
                demux,
            }))
        }
    }

    struct LinuxTuner {
        adapter: u32,
        frontend: u32,
        fe: File,
        demux: File,
    }

    impl TunerHandles for LinuxTuner {
        fn tune(&mut self, tune: &Tune, lnb: &LnbConfig) -> Result<(), FrontendError> {
            let voltage = if tune.horizontal {
                SEC_VOLTAGE_18
            } else {
                SEC_VOLTAGE_13
            };
            let tone = if lnb.high_band(tune.frequency) {
                SEC_TONE_ON
            } else {
                SEC_TONE_OFF
            };
            let mut prop = [
                DtvProperty::new(DTV_CLEAR, 0),
                DtvProperty::new(DTV_DELIVERY_SYSTEM, tune.delivery_system.code()),
                DtvProperty::new(DTV_SYMBOL_RATE, tune.symbol_rate),
                DtvProperty::new(DTV_INNER_FEC, FEC_AUTO),
                DtvProperty::new(DTV_INVERSION, INVERSION_AUTO),
                DtvProperty::new(DTV_FREQUENCY, lnb.tuner_frequency(tune.frequency)),
                DtvProperty::new(DTV_VOLTAGE, voltage),
                DtvProperty::new(DTV_TONE, tone),
                DtvProperty::new(DTV_TUNE, 0),
            ];
            let props = DtvProperties {
                num: prop.len() as u32,
                props: prop.as_mut_ptr(),
            };
            unsafe { fe_set_property(self.fe.as_raw_fd(), &props) }
                .map_err(|e| FrontendError::Tune(format!("FE_SET_PROPERTY: {e}")))?;
            log::debug!(
                "adapter{}/frontend{}: tuned {} kHz, {} sym/s",
                self.adapter,
                self.frontend,
                tune.frequency,
                tune.symbol_rate
            );
            Ok(())
        }

        fn configure_demux(&mut self, buffer_size: Option<usize>) -> Result<(), FrontendError> {
            let fd = self.demux.as_raw_fd();
            if let Some(size) = buffer_size {
                unsafe { dmx_set_buffer_size(fd, size as libc::c_int) }
                    .map_err(|e| FrontendError::Demux(format!("DMX_SET_BUFFER_SIZE: {e}")))?;
            }
            let filter = DmxPesFilterParams {
                pid: PID_PASS_ALL,
                input: DMX_IN_FRONTEND,
                output: DMX_OUT_TS_TAP,
                pes_type: DMX_PES_OTHER,
                flags: DMX_IMMEDIATE_START,
            };
            unsafe { dmx_set_pes_filter(fd, &filter) }
                .map_err(|e| FrontendError::Demux(format!("DMX_SET_PES_FILTER: {e}")))?;
            Ok(())
        }

        fn open_stream(
            &mut self,
            read_timeout: Duration,
        ) -> Result<Box<dyn StreamSource>, FrontendError> {
            let path = dvr_path(self.adapter, self.frontend);
            let dvr = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&path)
                .map_err(|source| FrontendError::Open {
                    device: path,
                    source,
                })?;
            let timeout_ms = read_timeout.as_millis().min(u16::MAX as u128) as u16;
            Ok(Box::new(DvrStream { dvr, timeout_ms }))
        }
    }

    struct DvrStream {
        dvr: File,
        timeout_ms: u16,
    }

    impl StreamSource for DvrStream {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
            let mut fds = [PollFd::new(self.dvr.as_fd(), PollFlags::POLLIN)];
            let ready = poll(&mut fds, PollTimeout::from(self.timeout_ms))
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            if ready == 0 {
                return Ok(ReadOutcome::TimedOut);
            }
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if !revents.contains(PollFlags::POLLIN) {
                return Ok(ReadOutcome::Closed);
            }
            match self.dvr.read(buf) {
                Ok(0) => Ok(ReadOutcome::Closed),
                Ok(n) => Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::TimedOut),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(ReadOutcome::TimedOut),
                Err(e) => Err(e),
            }
        }
    }
}
