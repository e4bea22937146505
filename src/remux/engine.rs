//! The remux engine: transponder sharing, PID fan-out and per-subscriber
//! PAT synthesis.
//!
//! The engine is single-writer. It lives inside the reactor task and is
//! only ever driven from there, so no field needs a lock; worker and
//! reader threads reach it exclusively through [`GatewayEvent`]s.

use std::collections::HashMap;

use crate::error::SubscribeError;
use crate::event::GatewayEvent;
use crate::frontend::pool::{FrontendId, FrontendPool, TuneOutcome};
use crate::tune::Tune;

use super::packet::{ts_payload, TsHeader, TS_PACKET_SIZE};
use super::pat::{build_program_pat, packetize_section, PatTable};
use super::pmt::PmtTable;
use super::psi::{PsiSection, SectionAssembler};
use super::{table_id, EPG_PID, MAX_PID};

/// How many silent intervals a transponder may ride out over its
/// lifetime before its subscribers are torn down. The counter never
/// resets, bounding total retunes against flapping hardware.
pub const MAX_TRANSPONDER_RETRIES: u32 = 64;

/// Handle for one shared transponder. Stays unique for the process
/// lifetime; a stale id is simply unknown to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransponderId(pub u64);

/// Handle for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// Receives the remuxed single-program stream, one TS packet at a time.
pub type DataCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Invoked at most once when the engine kills a subscriber (retry budget
/// exhausted or no frontend left). Not invoked on `unsubscribe`.
pub type TeardownCallback = Box<dyn FnOnce() + Send>;

struct Subscriber {
    sid: u16,
    transponder: TransponderId,
    /// Continuity counter of the synthesized PAT, private per subscriber.
    pat_cc: u8,
    data_cb: DataCallback,
    teardown_cb: Option<TeardownCallback>,
}

/// Per-PID routing state.
#[derive(Default)]
struct PidSlot {
    /// Subscribers receiving this PID verbatim.
    watchers: Vec<SubscriberId>,
    /// Whether PSI sections on this PID are assembled and parsed.
    parse: bool,
    last_cc: Option<u8>,
    assembler: SectionAssembler,
}

struct TransponderContext {
    tune: Tune,
    frontend: Option<FrontendId>,
    retries: u32,
    /// Transport stream id of the uplink, from the last PAT seen.
    tsid: u16,
    members: Vec<SubscriberId>,
    pids: Vec<PidSlot>,
}

impl TransponderContext {
    fn new(tune: Tune, frontend: FrontendId) -> Self {
        let mut pids: Vec<PidSlot> = Vec::with_capacity(MAX_PID);
        pids.resize_with(MAX_PID, PidSlot::default);
        // The PAT is always parsed.
        pids[0].parse = true;
        TransponderContext {
            tune,
            frontend: Some(frontend),
            retries: 0,
            tsid: 0,
            members: Vec::new(),
            pids,
        }
    }

    fn handle_chunk(&mut self, chunk: &[u8], subscribers: &mut HashMap<SubscriberId, Subscriber>) {
        if chunk.len() % TS_PACKET_SIZE != 0 {
            log::warn!("dropping unaligned chunk of {} bytes", chunk.len());
            return;
        }
        for packet in chunk.chunks_exact(TS_PACKET_SIZE) {
            self.handle_packet(packet, subscribers);
        }
    }

    fn handle_packet(&mut self, packet: &[u8], subscribers: &mut HashMap<SubscriberId, Subscriber>) {
        let header = match TsHeader::parse(packet) {
            Ok(h) => h,
            Err(e) => {
                log::trace!("bad TS packet: {e}");
                return;
            }
        };
        if header.transport_error {
            return;
        }
        let pid = header.pid as usize;
        if pid >= MAX_PID - 1 {
            // Null packets and out-of-range PIDs are never forwarded.
            return;
        }

        let slot = &mut self.pids[pid];
        for &sub_id in &slot.watchers {
            if let Some(sub) = subscribers.get_mut(&sub_id) {
                (sub.data_cb)(packet);
            }
        }
        if !slot.parse {
            return;
        }
        let payload = match ts_payload(packet, &header) {
            Some(p) => p,
            None => return,
        };

        // The continuity counter only advances on payload-carrying
        // packets; an unchanged value marks a duplicate.
        if slot.last_cc == Some(header.continuity_counter) {
            return;
        }
        if let Some(last) = slot.last_cc {
            if (last + 1) & 0x0F != header.continuity_counter {
                log::debug!("continuity break on pid {pid}, resetting assembler");
                slot.assembler.reset();
            }
        }
        slot.last_cc = Some(header.continuity_counter);

        let sections = slot.assembler.push(payload, header.payload_unit_start);
        for section in sections {
            self.handle_section(header.pid, &section, subscribers);
        }
    }

    fn handle_section(
        &mut self,
        pid: u16,
        section: &[u8],
        subscribers: &mut HashMap<SubscriberId, Subscriber>,
    ) {
        let psi = match PsiSection::parse(section) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("unparsable section on pid {pid}: {e}");
                return;
            }
        };
        if !psi.verify_crc(section) {
            log::debug!("CRC mismatch on pid {pid}, table 0x{:02x}", psi.header.table_id);
            return;
        }
        match psi.header.table_id {
            table_id::PAT if pid == 0 => self.handle_pat(&psi, subscribers),
            table_id::PMT => self.handle_pmt(pid, &psi, subscribers),
            _ => {}
        }
    }

    /// Wire every member to its program based on a fresh uplink PAT and
    /// send each of them its synthesized single-program PAT.
    fn handle_pat(&mut self, psi: &PsiSection, subscribers: &mut HashMap<SubscriberId, Subscriber>) {
        let pat = match PatTable::parse(psi) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("ignoring PAT: {e}");
                return;
            }
        };
        // Every announced PMT PID is parsed, whether or not anyone is
        // subscribed to its program yet.
        for entry in &pat.programs {
            self.pids[entry.pmt_pid as usize].parse = true;
        }

        let members = self.members.clone();
        for &sub_id in &members {
            let sub = match subscribers.get_mut(&sub_id) {
                Some(s) => s,
                None => continue,
            };
            let entry = match pat.programs.iter().find(|e| e.program_number == sub.sid) {
                Some(e) => e,
                None => {
                    log::trace!("sid {} not in PAT", sub.sid);
                    continue;
                }
            };
            add_watcher(&mut self.pids[entry.pmt_pid as usize], sub_id);

            let section = build_program_pat(sub.sid, entry.pmt_pid);
            for packet in packetize_section(&section, 0, &mut sub.pat_cc) {
                (sub.data_cb)(&packet);
            }
        }

        // EPG data goes to every member, including those whose service
        // is absent from the current PAT.
        for &sub_id in &members {
            add_watcher(&mut self.pids[EPG_PID as usize], sub_id);
        }
        if self.tsid != pat.transport_stream_id {
            log::debug!("transport stream id is now {}", pat.transport_stream_id);
            self.tsid = pat.transport_stream_id;
        }
    }

    /// Register the program's elementary and PCR PIDs for every member
    /// subscribed to this program.
    fn handle_pmt(
        &mut self,
        pid: u16,
        psi: &PsiSection,
        subscribers: &mut HashMap<SubscriberId, Subscriber>,
    ) {
        let pmt = match PmtTable::parse(psi) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("ignoring PMT on pid {pid}: {e}");
                return;
            }
        };
        let watchers = self.pids[pid as usize].watchers.clone();
        for sub_id in watchers {
            let sid = match subscribers.get(&sub_id) {
                Some(s) => s.sid,
                None => continue,
            };
            if sid != pmt.program_number {
                continue;
            }
            for &es in &pmt.elementary_pids {
                if (es as usize) < MAX_PID - 1 {
                    add_watcher(&mut self.pids[es as usize], sub_id);
                }
            }
            if (pmt.pcr_pid as usize) < MAX_PID - 1 {
                add_watcher(&mut self.pids[pmt.pcr_pid as usize], sub_id);
            }
        }
    }
}

fn add_watcher(slot: &mut PidSlot, id: SubscriberId) {
    if !slot.watchers.contains(&id) {
        slot.watchers.push(id);
    }
}

/// Shares tuned transponders between subscribers and remuxes each one a
/// single-program stream.
pub struct RemuxEngine {
    transponders: HashMap<TransponderId, TransponderContext>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    pool: FrontendPool,
    next_transponder: u64,
    next_subscriber: u64,
    max_retries: u32,
}

impl RemuxEngine {
    pub fn new(pool: FrontendPool, max_retries: u32) -> Self {
        RemuxEngine {
            transponders: HashMap::new(),
            subscribers: HashMap::new(),
            pool,
            next_transponder: 0,
            next_subscriber: 0,
            max_retries,
        }
    }

    /// The frontend pool, for attaching hardware at startup.
    pub fn pool_mut(&mut self) -> &mut FrontendPool {
        &mut self.pool
    }

    pub fn transponder_count(&self) -> usize {
        self.transponders.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Attach a subscriber for one service.
    ///
    /// Joins an existing transponder when the physical parameters match,
    /// otherwise acquires a frontend and starts a tune. The subscriber
    /// starts receiving data once the uplink PAT next repeats.
    pub fn subscribe(
        &mut self,
        tune: Tune,
        data_cb: DataCallback,
        teardown_cb: TeardownCallback,
    ) -> Result<SubscriberId, SubscribeError> {
        let existing = self
            .transponders
            .iter()
            .find(|(_, ctx)| ctx.tune.same_transponder(&tune))
            .map(|(&tid, _)| tid);
        let tid = match existing {
            Some(tid) => tid,
            None => {
                let tid = TransponderId(self.next_transponder);
                let frontend = self.pool.acquire(&tune, tid)?;
                self.next_transponder += 1;
                self.transponders
                    .insert(tid, TransponderContext::new(tune, frontend));
                tid
            }
        };

        let sub_id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.insert(
            sub_id,
            Subscriber {
                sid: tune.sid,
                transponder: tid,
                pat_cc: 0,
                data_cb,
                teardown_cb: Some(teardown_cb),
            },
        );
        if let Some(ctx) = self.transponders.get_mut(&tid) {
            ctx.members.push(sub_id);
        }
        log::info!("subscriber {sub_id:?}: sid {} on transponder {tid:?}", tune.sid);
        Ok(sub_id)
    }

    /// Detach a subscriber. The teardown callback is not invoked; the
    /// caller initiated this and cleans up on its own.
    ///
    /// The last subscriber leaving a transponder releases its frontend.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        let sub = match self.subscribers.remove(&id) {
            Some(s) => s,
            None => return,
        };
        let tid = sub.transponder;
        if let Some(ctx) = self.transponders.get_mut(&tid) {
            ctx.members.retain(|&m| m != id);
            for slot in ctx.pids.iter_mut() {
                slot.watchers.retain(|&w| w != id);
            }
            if ctx.members.is_empty() {
                if let Some(fe) = ctx.frontend.take() {
                    self.pool.release(fe);
                }
                self.transponders.remove(&tid);
                log::info!("transponder {tid:?}: last subscriber left, torn down");
            }
        }
    }

    /// Process transport stream bytes read from a transponder's frontend.
    pub fn feed(&mut self, tid: TransponderId, chunk: &[u8]) {
        if let Some(ctx) = self.transponders.get_mut(&tid) {
            ctx.handle_chunk(chunk, &mut self.subscribers);
        }
    }

    /// React to a silent interval on a transponder: hand the frontend
    /// back and retune, or tear the transponder down once the retry
    /// budget is spent.
    pub fn notify_timeout(&mut self, tid: TransponderId) {
        let ctx = match self.transponders.get_mut(&tid) {
            Some(c) => c,
            None => return,
        };
        if let Some(fe) = ctx.frontend.take() {
            self.pool.release(fe);
        }
        ctx.retries += 1;
        if ctx.retries > self.max_retries {
            log::warn!(
                "transponder {tid:?}: still silent after {} retunes, giving up",
                self.max_retries
            );
            self.teardown_transponder(tid);
            return;
        }
        let attempt = ctx.retries;
        let tune = ctx.tune;
        log::info!(
            "transponder {tid:?}: read timeout, retuning (attempt {attempt}/{})",
            self.max_retries
        );
        match self.pool.acquire(&tune, tid) {
            Ok(fe) => {
                if let Some(ctx) = self.transponders.get_mut(&tid) {
                    ctx.frontend = Some(fe);
                }
            }
            Err(e) => {
                log::warn!("transponder {tid:?}: cannot retune: {e}");
                self.teardown_transponder(tid);
            }
        }
    }

    /// Apply one event from the worker or a reader thread.
    pub fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::TuneComplete {
                frontend,
                transponder,
                result,
            } => match self.pool.complete_tune(frontend, transponder, result) {
                TuneOutcome::Ready | TuneOutcome::Recycled => {}
                TuneOutcome::Failed => {
                    // The pool already recycled the frontend; drop our
                    // reference before running the retry logic.
                    if let Some(ctx) = self.transponders.get_mut(&transponder) {
                        if ctx.frontend == Some(frontend) {
                            ctx.frontend = None;
                        }
                    }
                    self.notify_timeout(transponder);
                }
            },
            GatewayEvent::Stream { transponder, chunk } => self.feed(transponder, &chunk),
            GatewayEvent::ReadTimeout { transponder } => self.notify_timeout(transponder),
        }
    }

    fn teardown_transponder(&mut self, tid: TransponderId) {
        let ctx = match self.transponders.remove(&tid) {
            Some(c) => c,
            None => return,
        };
        if let Some(fe) = ctx.frontend {
            self.pool.release(fe);
        }
        for sub_id in ctx.members {
            if let Some(mut sub) = self.subscribers.remove(&sub_id) {
                if let Some(teardown) = sub.teardown_cb.take() {
                    teardown();
                }
            }
        }
    }
}
