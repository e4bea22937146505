//! Frontend pool management.
//!
//! Tuner hardware setup blocks for noticeable stretches, so the pool keeps
//! every blocking operation on one dedicated worker thread and hands
//! results back as [`GatewayEvent`]s. The control path only ever touches
//! the idle set (the pool's single lock) and per-frontend bookkeeping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{FrontendError, SubscribeError};
use crate::event::GatewayEvent;
use crate::remux::TransponderId;
use crate::tune::{DeliverySystem, Tune};

use super::device::{ReadOutcome, StreamSource, TunerBackend, TunerHandles};
use super::lnb::LnbConfig;

/// Index into the pool's frontend table. The table never shrinks, so an id
/// stays valid for the process lifetime.
pub type FrontendId = usize;

/// Bytes requested per blocking read on the transport stream device.
const READ_CHUNK: usize = 348 * 188;

/// Lifecycle of one pooled frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendState {
    /// In the idle set, ready to be acquired.
    Idle,
    /// Handed to the worker thread, tune in flight.
    Tuning,
    /// Tuned and streaming, reader thread running.
    Active,
    /// Released while the tune was still in flight; the completion
    /// recycles it back to idle.
    Stale,
}

/// Output of the worker thread's tune sequence.
pub struct TunedDevice {
    pub handles: Box<dyn TunerHandles>,
    pub stream: Box<dyn StreamSource>,
}

/// How a tune completion was resolved against the frontend's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneOutcome {
    /// The frontend is active and its reader thread is running.
    Ready,
    /// The tune failed; the frontend is back in the idle set.
    Failed,
    /// The frontend was released mid-tune and has been recycled.
    Recycled,
}

/// Pool-wide tunables.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Kernel buffer size for the demux pass-through filter.
    /// Zero keeps the driver's default.
    pub demux_buffer_size: usize,
    /// How long a reader blocks before reporting a read timeout.
    pub read_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            demux_buffer_size: 2 * 1024 * 1024,
            read_timeout: Duration::from_secs(2),
        }
    }
}

struct Frontend {
    adapter: u32,
    device: u32,
    lnb: LnbConfig,
    systems: Vec<DeliverySystem>,
    state: FrontendState,
    handles: Option<Box<dyn TunerHandles>>,
    stop: Option<Arc<AtomicBool>>,
    reader: Option<thread::JoinHandle<()>>,
}

enum Work {
    Tune {
        index: FrontendId,
        transponder: TransponderId,
        tune: Tune,
        lnb: LnbConfig,
        adapter: u32,
        device: u32,
    },
    Close {
        index: FrontendId,
        handles: Box<dyn TunerHandles>,
    },
    Shutdown,
}

/// Owns all attached frontends and the worker thread that sets them up.
pub struct FrontendPool {
    frontends: Vec<Frontend>,
    idle: Arc<Mutex<VecDeque<FrontendId>>>,
    backend: Arc<dyn TunerBackend>,
    work_tx: mpsc::Sender<Work>,
    events: UnboundedSender<GatewayEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FrontendPool {
    /// Create an empty pool and start its worker thread.
    pub fn new(
        backend: Arc<dyn TunerBackend>,
        events: UnboundedSender<GatewayEvent>,
        options: PoolOptions,
    ) -> std::io::Result<Self> {
        let (work_tx, work_rx) = mpsc::channel();
        let idle = Arc::new(Mutex::new(VecDeque::new()));
        let worker = {
            let backend = Arc::clone(&backend);
            let events = events.clone();
            let idle = Arc::clone(&idle);
            thread::Builder::new()
                .name("fe-worker".into())
                .spawn(move || worker_loop(backend, work_rx, idle, events, options))?
        };
        Ok(FrontendPool {
            frontends: Vec::new(),
            idle,
            backend,
            work_tx,
            events,
            worker: Some(worker),
        })
    }

    /// Probe and attach one adapter/frontend pair.
    ///
    /// Blocks on the capability probe, so this belongs in startup, not on
    /// the control path.
    pub fn add_frontend(
        &mut self,
        adapter: u32,
        device: u32,
        lnb: LnbConfig,
    ) -> Result<FrontendId, FrontendError> {
        let codes = self.backend.probe(adapter, device)?;
        let systems: Vec<DeliverySystem> = codes
            .iter()
            .filter_map(|&c| DeliverySystem::from_code(c as u32))
            .collect();
        if systems.is_empty() {
            return Err(FrontendError::Unsupported {
                adapter,
                frontend: device,
            });
        }
        let id = self.frontends.len();
        log::info!("attached adapter{adapter}/frontend{device} as fe{id}, systems {systems:?}");
        self.frontends.push(Frontend {
            adapter,
            device,
            lnb,
            systems,
            state: FrontendState::Idle,
            handles: None,
            stop: None,
            reader: None,
        });
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push_back(id);
        Ok(id)
    }

    /// Number of attached frontends.
    pub fn len(&self) -> usize {
        self.frontends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frontends.is_empty()
    }

    /// Current lifecycle state of a frontend.
    pub fn state(&self, id: FrontendId) -> FrontendState {
        self.frontends[id].state
    }

    /// Take an idle frontend supporting the tune's delivery system and
    /// queue the tune on the worker thread.
    ///
    /// Returns immediately; the result arrives later as
    /// [`GatewayEvent::TuneComplete`].
    pub fn acquire(
        &mut self,
        tune: &Tune,
        transponder: TransponderId,
    ) -> Result<FrontendId, SubscribeError> {
        let id = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            let pos = idle
                .iter()
                .position(|&i| self.frontends[i].systems.contains(&tune.delivery_system));
            match pos {
                Some(pos) => idle.remove(pos).ok_or(SubscribeError::NoFrontend(tune.delivery_system))?,
                None => return Err(SubscribeError::NoFrontend(tune.delivery_system)),
            }
        };

        let fe = &mut self.frontends[id];
        fe.state = FrontendState::Tuning;
        log::debug!(
            "fe{id}: tuning to {} kHz for transponder {transponder:?}",
            tune.frequency
        );
        if self
            .work_tx
            .send(Work::Tune {
                index: id,
                transponder,
                tune: *tune,
                lnb: fe.lnb,
                adapter: fe.adapter,
                device: fe.device,
            })
            .is_err()
        {
            log::error!("fe{id}: worker thread is gone, cannot tune");
            fe.state = FrontendState::Idle;
            self.idle.lock().unwrap_or_else(|e| e.into_inner()).push_back(id);
            return Err(SubscribeError::NoFrontend(tune.delivery_system));
        }
        Ok(id)
    }

    /// Resolve a [`GatewayEvent::TuneComplete`] against the frontend's
    /// current state.
    pub fn complete_tune(
        &mut self,
        id: FrontendId,
        transponder: TransponderId,
        result: Result<TunedDevice, FrontendError>,
    ) -> TuneOutcome {
        match self.frontends[id].state {
            FrontendState::Stale => {
                // Released while the tune was in flight. The worker
                // closes the handles and re-idles the frontend; a failed
                // stale tune left nothing open, so re-idle it here.
                log::debug!("fe{id}: stale tune recycled");
                self.frontends[id].state = FrontendState::Idle;
                match result {
                    Ok(device) => {
                        let _ = self.work_tx.send(Work::Close {
                            index: id,
                            handles: device.handles,
                        });
                    }
                    Err(_) => self.idle.lock().unwrap_or_else(|e| e.into_inner()).push_back(id),
                }
                TuneOutcome::Recycled
            }
            FrontendState::Tuning => match result {
                Ok(device) => self.start_reader(id, transponder, device),
                Err(e) => {
                    log::warn!("fe{id}: tune failed: {e}");
                    self.recycle(id);
                    TuneOutcome::Failed
                }
            },
            state => {
                log::error!("fe{id}: unexpected tune completion in state {state:?}");
                TuneOutcome::Recycled
            }
        }
    }

    /// Return a frontend to the pool.
    ///
    /// Active frontends stop their reader and get their handles closed on
    /// the worker thread; frontends still tuning are marked stale and
    /// recycled when their completion arrives.
    pub fn release(&mut self, id: FrontendId) {
        let fe = &mut self.frontends[id];
        match fe.state {
            FrontendState::Active => {
                if let Some(stop) = fe.stop.take() {
                    stop.store(true, Ordering::Relaxed);
                }
                // The reader may be blocked in poll for up to the read
                // timeout; it is detached rather than joined here.
                fe.reader.take();
                fe.state = FrontendState::Idle;
                log::debug!("fe{id}: released");
                // The worker appends to the idle set once the handles
                // are closed, so a subsequent tune of the same device
                // cannot overtake the close.
                match fe.handles.take() {
                    Some(handles) => {
                        let _ = self.work_tx.send(Work::Close { index: id, handles });
                    }
                    None => self.recycle(id),
                }
            }
            FrontendState::Tuning => {
                log::debug!("fe{id}: released mid-tune, marking stale");
                fe.state = FrontendState::Stale;
            }
            state => {
                log::warn!("fe{id}: release in state {state:?} ignored");
            }
        }
    }

    fn recycle(&mut self, id: FrontendId) {
        self.frontends[id].state = FrontendState::Idle;
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push_back(id);
    }

    fn start_reader(
        &mut self,
        id: FrontendId,
        transponder: TransponderId,
        device: TunedDevice,
    ) -> TuneOutcome {
        let stop = Arc::new(AtomicBool::new(false));
        let events = self.events.clone();
        let thread_stop = Arc::clone(&stop);
        let spawn = thread::Builder::new()
            .name(format!("dvr-{id}"))
            .spawn(move || read_loop(device.stream, transponder, events, thread_stop));
        match spawn {
            Ok(handle) => {
                let fe = &mut self.frontends[id];
                fe.handles = Some(device.handles);
                fe.stop = Some(stop);
                fe.reader = Some(handle);
                fe.state = FrontendState::Active;
                log::info!("fe{id}: active for transponder {transponder:?}");
                TuneOutcome::Ready
            }
            Err(e) => {
                log::error!("fe{id}: failed to spawn reader: {e}");
                self.frontends[id].state = FrontendState::Idle;
                let _ = self.work_tx.send(Work::Close {
                    index: id,
                    handles: device.handles,
                });
                TuneOutcome::Failed
            }
        }
    }
}

impl Drop for FrontendPool {
    fn drop(&mut self) {
        for fe in &mut self.frontends {
            if let Some(stop) = fe.stop.take() {
                stop.store(true, Ordering::Relaxed);
            }
        }
        let _ = self.work_tx.send(Work::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    backend: Arc<dyn TunerBackend>,
    work_rx: mpsc::Receiver<Work>,
    idle: Arc<Mutex<VecDeque<FrontendId>>>,
    events: UnboundedSender<GatewayEvent>,
    options: PoolOptions,
) {
    while let Ok(work) = work_rx.recv() {
        match work {
            Work::Tune {
                index,
                transponder,
                tune,
                lnb,
                adapter,
                device,
            } => {
                let result = tune_device(&*backend, adapter, device, &tune, &lnb, &options);
                if events
                    .send(GatewayEvent::TuneComplete {
                        frontend: index,
                        transponder,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Work::Close { index, handles } => {
                drop(handles);
                idle.lock().unwrap_or_else(|e| e.into_inner()).push_back(index);
            }
            Work::Shutdown => break,
        }
    }
    log::debug!("frontend worker stopped");
}

fn tune_device(
    backend: &dyn TunerBackend,
    adapter: u32,
    device: u32,
    tune: &Tune,
    lnb: &LnbConfig,
    options: &PoolOptions,
) -> Result<TunedDevice, FrontendError> {
    let mut handles = backend.open(adapter, device)?;
    handles.tune(tune, lnb)?;
    let buffer_size = (options.demux_buffer_size != 0).then_some(options.demux_buffer_size);
    handles.configure_demux(buffer_size)?;
    let stream = handles.open_stream(options.read_timeout)?;
    Ok(TunedDevice { handles, stream })
}

fn read_loop(
    mut stream: Box<dyn StreamSource>,
    transponder: TransponderId,
    events: UnboundedSender<GatewayEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    while !stop.load(Ordering::Relaxed) {
        match stream.read_chunk(&mut buf) {
            Ok(ReadOutcome::Data(n)) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if events
                    .send(GatewayEvent::Stream { transponder, chunk })
                    .is_err()
                {
                    break;
                }
            }
            Ok(ReadOutcome::TimedOut) => {
                // The retry logic will release this frontend either way,
                // so the reader winds down after reporting.
                let _ = events.send(GatewayEvent::ReadTimeout { transponder });
                break;
            }
            Ok(ReadOutcome::Closed) => break,
            Err(e) => {
                log::error!("transponder {transponder:?}: stream read failed: {e}");
                let _ = events.send(GatewayEvent::ReadTimeout { transponder });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::device::mock::MockBackend;
    use crate::tune::DeliverySystem;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn tune() -> Tune {
        Tune {
            delivery_system: DeliverySystem::DvbS2,
            frequency: 11_747_000,
            symbol_rate: 27_500_000,
            horizontal: true,
            sid: 100,
        }
    }

    fn pool_with(
        backend: MockBackend,
    ) -> (FrontendPool, UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = unbounded_channel();
        let mut pool =
            FrontendPool::new(Arc::new(backend), tx, PoolOptions::default()).unwrap();
        pool.add_frontend(0, 0, LnbConfig::default()).unwrap();
        (pool, rx)
    }

    fn expect_tune_complete(
        rx: &mut UnboundedReceiver<GatewayEvent>,
    ) -> (FrontendId, TransponderId, Result<TunedDevice, FrontendError>) {
        loop {
            match rx.blocking_recv().expect("event channel closed") {
                GatewayEvent::TuneComplete {
                    frontend,
                    transponder,
                    result,
                } => return (frontend, transponder, result),
                _ => continue,
            }
        }
    }

    #[test]
    fn acquire_tunes_and_activates() {
        let backend = MockBackend::new(vec![5, 6]);
        let state = Arc::clone(&backend.state);
        let (mut pool, mut rx) = pool_with(backend);

        let tid = TransponderId(1);
        let id = pool.acquire(&tune(), tid).unwrap();
        assert_eq!(pool.state(id), FrontendState::Tuning);

        let (fe, transponder, result) = expect_tune_complete(&mut rx);
        assert_eq!(fe, id);
        assert_eq!(transponder, tid);
        assert_eq!(pool.complete_tune(fe, transponder, result), TuneOutcome::Ready);
        assert_eq!(pool.state(id), FrontendState::Active);
        let state = state.lock().unwrap();
        assert_eq!(state.tunes.len(), 1);
        assert_eq!(
            state.demux_buffer_sizes,
            vec![Some(PoolOptions::default().demux_buffer_size)]
        );
    }

    #[test]
    fn zero_demux_buffer_size_keeps_driver_default() {
        let backend = MockBackend::new(vec![6]);
        let state = Arc::clone(&backend.state);
        let (tx, mut rx) = unbounded_channel();
        let options = PoolOptions {
            demux_buffer_size: 0,
            ..PoolOptions::default()
        };
        let mut pool = FrontendPool::new(Arc::new(backend), tx, options).unwrap();
        pool.add_frontend(0, 0, LnbConfig::default()).unwrap();

        pool.acquire(&tune(), TransponderId(1)).unwrap();
        let (fe, transponder, result) = expect_tune_complete(&mut rx);
        assert_eq!(pool.complete_tune(fe, transponder, result), TuneOutcome::Ready);
        assert_eq!(state.lock().unwrap().demux_buffer_sizes, vec![None]);
    }

    #[test]
    fn acquire_requires_matching_delivery_system() {
        // Backend only does DVB-S.
        let backend = MockBackend::new(vec![5]);
        let (mut pool, _rx) = pool_with(backend);
        assert!(matches!(
            pool.acquire(&tune(), TransponderId(1)),
            Err(SubscribeError::NoFrontend(DeliverySystem::DvbS2))
        ));
    }

    #[test]
    fn probe_rejects_unsupported_hardware() {
        let backend = MockBackend::new(vec![3]);
        let (tx, _rx) = unbounded_channel();
        let mut pool =
            FrontendPool::new(Arc::new(backend), tx, PoolOptions::default()).unwrap();
        assert!(matches!(
            pool.add_frontend(0, 0, LnbConfig::default()),
            Err(FrontendError::Unsupported { .. })
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn release_returns_frontend_to_idle() {
        let backend = MockBackend::new(vec![6]);
        let (mut pool, mut rx) = pool_with(backend);

        let tid = TransponderId(1);
        let id = pool.acquire(&tune(), tid).unwrap();
        let (fe, transponder, result) = expect_tune_complete(&mut rx);
        pool.complete_tune(fe, transponder, result);

        pool.release(id);
        assert_eq!(pool.state(id), FrontendState::Idle);
        // Acquirable again once the worker has closed the old handles.
        let mut attempts = 0;
        let reacquired = loop {
            match pool.acquire(&tune(), TransponderId(2)) {
                Ok(id) => break id,
                Err(_) => {
                    attempts += 1;
                    assert!(attempts < 500, "frontend never became idle");
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
        };
        assert_eq!(reacquired, id);
    }

    #[test]
    fn release_mid_tune_marks_stale_and_recycles() {
        let backend = MockBackend::new(vec![6]);
        let (mut pool, mut rx) = pool_with(backend);

        let tid = TransponderId(1);
        let id = pool.acquire(&tune(), tid).unwrap();
        pool.release(id);
        assert_eq!(pool.state(id), FrontendState::Stale);

        let (fe, transponder, result) = expect_tune_complete(&mut rx);
        assert_eq!(
            pool.complete_tune(fe, transponder, result),
            TuneOutcome::Recycled
        );
        assert_eq!(pool.state(id), FrontendState::Idle);
    }

    #[test]
    fn failed_tune_recycles_frontend() {
        let mut backend = MockBackend::new(vec![6]);
        backend.fail_tune = true;
        let (mut pool, mut rx) = pool_with(backend);

        let id = pool.acquire(&tune(), TransponderId(1)).unwrap();
        let (fe, transponder, result) = expect_tune_complete(&mut rx);
        assert!(result.is_err());
        assert_eq!(
            pool.complete_tune(fe, transponder, result),
            TuneOutcome::Failed
        );
        assert_eq!(pool.state(id), FrontendState::Idle);
    }

    #[test]
    fn reader_thread_forwards_stream_data() {
        let backend = MockBackend::new(vec![6]);
        let state = Arc::clone(&backend.state);
        let (mut pool, mut rx) = pool_with(backend);

        state
            .lock()
            .unwrap()
            .chunks
            .push_back(vec![0x47; TS_CHUNK]);

        let tid = TransponderId(9);
        pool.acquire(&tune(), tid).unwrap();
        let (fe, transponder, result) = expect_tune_complete(&mut rx);
        pool.complete_tune(fe, transponder, result);

        match rx.blocking_recv().unwrap() {
            GatewayEvent::Stream { transponder, chunk } => {
                assert_eq!(transponder, tid);
                assert_eq!(chunk.len(), TS_CHUNK);
            }
            _ => panic!("expected stream event"),
        }
    }

    const TS_CHUNK: usize = 188 * 4;
}
