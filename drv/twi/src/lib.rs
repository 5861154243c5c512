// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two-wire bus driver.
//!
//! One driver task per node, multiplexing the shared two-wire bus for every
//! other task. Clients hand it [`BusInfo`] jobs:
//!
//! - master jobs (`MT`, optionally `|MR`) queue up FIFO and run one at a
//!   time once the bus goes quiet;
//! - slave jobs (`SR`, optionally `|ST` and/or `|GC`) sit in the *pool*
//!   until a remote master addresses this node with their service byte;
//! - `MT|SR` compounds run the master side first, then migrate into the
//!   pool to wait for the reply.
//!
//! Mastering and slaving are mutually exclusive: before transmitting, the
//! driver turns off slave-address acknowledgement and samples the bus for
//! [`QUIESCENT_CHECKS`] consecutive idle reads. A busy bus, a lost
//! arbitration, or a NACK from the peer all end in a clock-driven back-off
//! and a bounded number of retries; the retry budget for each condition is
//! in the constants below, and the final surfaced codes follow the error
//! taxonomy (`HostDown`, `NoDev`, `Access`, `Refused`).
//!
//! Incoming slave traffic starts with the four-byte command prefix
//! [service, sender-task, token-hi, token-lo]. The pool is searched twice:
//! first for a listener whose pre-posted rx prefix matches the sender
//! exactly (targeted reply routing), then for one accepting `ANY`. The
//! match, rx fill and slave-transmit handoff run in interrupt context
//! (they gate the wire-level acknowledge); the resulting `REPLY_INFO` to
//! the listener's owner is deferred to task context through the
//! `SLAVE_COMPLETE` doorbell. Pool reshuffles -- registration, migration,
//! cancellation -- run only in task context.
//!
//! A master job addressed to this node's own address never touches the
//! wire: the frame is served against the local pool, handoff included, and
//! both completions post synchronously with the same payloads a remote
//! round trip would produce.

#![cfg_attr(not(test), no_std)]

use abi::{Addr, AlarmInfo, BusInfo, Code, Frame, Mode, Op, TaskId, Token, DATA_SIZE, PREFIX};
use heapless::{Deque, Vec};
use kern::{Body, Fabric, Message, NoMsg, Task};
use trace::TraceBuf;

/// Consecutive idle samples required before claiming the bus.
pub const QUIESCENT_CHECKS: u8 = 3;

/// Retries after an address or data NACK before giving up.
pub const MAX_NACK_RETRIES: u8 = 3;

/// Attempts to claim a busy bus before `HostDown`.
pub const MAX_TRANSMIT_ATTEMPTS: u8 = 5;

/// Back-off before re-trying a busy bus.
pub const TRANSMIT_DELAY_MS: u32 = 100;

/// Back-off before re-trying a NACKed transaction.
pub const RETRY_DELAY_MS: u32 = 25;

/// Back-off after losing arbitration. Not counted against any budget.
pub const ARBITRATION_DELAY_MS: u32 = 10;

/// Master queue depth.
pub const MASTER_SLOTS: usize = 8;

/// Slave pool capacity.
pub const POOL_SLOTS: usize = 8;

/// Token under which the driver schedules its own back-off alarms.
const BACKOFF_TOKEN: Token = Token(0xB0FF);

/// Hardware-level outcome of one master transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WireStatus {
    /// Transaction ran to the stop condition.
    Done,
    /// The peer never acknowledged its address.
    AddrNack,
    /// The peer acknowledged its address but rejected a data byte.
    DataNack,
    /// Another master won the bus mid-transaction.
    ArbLost,
    /// Illegal start/stop observed; the transaction is unrecoverable.
    BusFault,
}

#[derive(Clone, Debug)]
pub struct MasterOutcome {
    pub status: WireStatus,
    /// Bytes read back in the master-receive phase, if any.
    pub rx: Vec<u8, DATA_SIZE>,
}

/// The bus interface as the driver sees it. The byte-level transaction
/// engine lives below this trait (hardware or simulation); completion is
/// signalled by posting a `MASTER_COMPLETE` doorbell to the driver task and
/// parking the outcome here.
pub trait WirePort {
    /// One sample of the bus-idle line.
    fn bus_idle(&mut self) -> bool;
    /// Enables or disables slave-address acknowledgement (and general-call
    /// matching).
    fn set_slave(&mut self, ack: bool, gc: bool);
    /// Begins a master transaction.
    fn transmit(&mut self, frame: Frame);
    /// Collects the outcome of the last transaction, once.
    fn take_outcome(&mut self) -> Option<MasterOutcome>;
}

/// Why an incoming slave transaction was not served. The wire layer maps
/// these onto the acknowledge bits the remote master observes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveRefusal {
    /// Slave acknowledgement was off (no listeners, or we are mastering).
    Unaddressed,
    /// No listener accepted the request.
    Rejected,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Job(u8),
    ClaimBusy(u8),
    Transmit(u8),
    Status(WireStatus),
    Retry(u8),
    Migrate,
    Loopback,
    SlaveServe(u8),
    Unroutable(u8),
    Overflow(u8),
    Cancel(u16),
}

static TRACE: TraceBuf<Trace, 32> = TraceBuf::new(Trace::None);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    /// Waiting out a back-off alarm before re-trying the front job.
    Backoff,
    /// A master transaction is on the wire.
    Mastering,
}

#[derive(Clone, Debug)]
struct Pending {
    owner: TaskId,
    info: BusInfo,
    nack_retries: u8,
    attempts: u8,
}

/// The driver task.
pub struct Twi<W> {
    port: W,
    own: Addr,
    state: State,
    queue: Deque<Pending, MASTER_SLOTS>,
    pool: Vec<Pending, POOL_SLOTS>,
    /// Served listeners parked between the interrupt-context match and the
    /// task-context REPLY_INFO.
    finished: Vec<Pending, POOL_SLOTS>,
    /// Unroutable requests seen in interrupt context, reported from task
    /// context.
    unroutable: u8,
    slave_enabled: bool,
}

impl<W: WirePort> Twi<W> {
    pub fn new(port: W, own: Addr) -> Self {
        Self {
            port,
            own,
            state: State::Idle,
            queue: Deque::new(),
            pool: Vec::new(),
            finished: Vec::new(),
            unroutable: 0,
            slave_enabled: false,
        }
    }

    pub fn port_mut(&mut self) -> &mut W {
        &mut self.port
    }

    pub fn own_addr(&self) -> Addr {
        self.own
    }

    /// Reconciles slave-address acknowledgement with the pool contents.
    /// Runs in task context only.
    fn update_slave_ctl(&mut self) {
        let ack = !self.pool.is_empty() && self.state != State::Mastering;
        let gc = ack && self.pool.iter().any(|p| p.info.mode.contains(Mode::GC));
        self.port.set_slave(ack, gc);
        self.slave_enabled = ack;
    }

    fn complete_master(&self, fabric: Fabric, mut p: Pending, code: Code) {
        p.info.result = code;
        fabric.post(Message::new(
            TaskId::TWI,
            p.owner,
            Op::MasterComplete,
            Body::Bus(p.info),
        ));
    }

    fn backoff(&mut self, fabric: Fabric, delay_ms: u32) {
        self.state = State::Backoff;
        self.update_slave_ctl();
        fabric.post(Message::new(
            TaskId::TWI,
            TaskId::CLK,
            Op::SetAlarm,
            Body::Alarm(AlarmInfo::once(BACKOFF_TOKEN, delay_ms)),
        ));
    }

    fn frame_for(&self, p: &Pending) -> Frame {
        let prefix = if p.info.prefix == [0; PREFIX] {
            [p.owner.0, p.info.token.hi(), p.info.token.lo()]
        } else {
            p.info.prefix
        };
        Frame {
            to: p.info.peer,
            from: self.own,
            service: p.info.mcmd,
            prefix,
            data: p.info.tx.clone(),
            read_len: if p.info.mode.contains(Mode::MR) {
                p.info.rx_want
            } else {
                0
            },
        }
    }

    /// Advances the master side: claims the bus for the front job, or goes
    /// idle. Loopback jobs complete synchronously in here.
    fn start_next(&mut self, fabric: Fabric) {
        loop {
            let Some(front) = self.queue.front() else {
                self.state = State::Idle;
                self.update_slave_ctl();
                return;
            };

            if front.info.peer == self.own {
                let p = self.queue.pop_front().unwrap();
                self.run_loopback(fabric, p);
                continue;
            }

            // Stop acknowledging our slave address while we master.
            self.port.set_slave(false, false);
            self.slave_enabled = false;

            let quiet = (0..QUIESCENT_CHECKS).all(|_| self.port.bus_idle());
            if !quiet {
                let front = self.queue.front_mut().unwrap();
                front.attempts += 1;
                TRACE.record(Trace::ClaimBusy(front.attempts));
                if front.attempts > MAX_TRANSMIT_ATTEMPTS {
                    let p = self.queue.pop_front().unwrap();
                    self.complete_master(fabric, p, Code::HostDown);
                    continue;
                }
                self.backoff(fabric, TRANSMIT_DELAY_MS);
                return;
            }

            let frame = self.frame_for(self.queue.front().unwrap());
            TRACE.record(Trace::Transmit(frame.service));
            self.port.transmit(frame);
            self.state = State::Mastering;
            return;
        }
    }

    /// A master transaction to our own address: serve it against the local
    /// pool, no wire traffic, both completions synchronous.
    fn run_loopback(&mut self, fabric: Fabric, p: Pending) {
        TRACE.record(Trace::Loopback);
        let frame = self.frame_for(&p);
        // Loopback bypasses the address-acknowledge hardware, so serve
        // directly against the pool. A refusal surfaces as the same code a
        // remote master would end up with, minus the retry delays.
        match self.match_and_serve(&frame) {
            Ok(read) => self.finish_master_ok(fabric, p, read),
            Err(_) => self.complete_master(fabric, p, Code::Access),
        }
        // Deliver the slave-side completions without waiting for the
        // doorbell; we are already in task context.
        self.drain_finished(fabric);
    }

    /// Completes a successful master transaction: stores read bytes,
    /// migrates MT|SR compounds into the pool, replies to the owner.
    fn finish_master_ok(&mut self, fabric: Fabric, mut p: Pending, read: Vec<u8, DATA_SIZE>) {
        if p.info.mode.contains(Mode::MR) {
            p.info.rx.clear();
            // Read length is bounded by rx_want, which fits the buffer.
            let _ = p.info.rx.extend_from_slice(&read);
        }
        if p.info.mode.contains(Mode::SR) {
            // Send-then-listen: the info moves into the pool to wait for
            // the reply; the owner learns the send half is done.
            p.info.result = Code::Success;
            let owner = p.owner;
            match self.pool.push(p) {
                Ok(()) => {
                    TRACE.record(Trace::Migrate);
                    self.update_slave_ctl();
                    fabric.post(Message::new(
                        TaskId::TWI,
                        owner,
                        Op::MasterComplete,
                        Body::Result(Code::Success),
                    ));
                }
                Err(p) => self.complete_master(fabric, p, Code::NoMem),
            }
        } else {
            self.complete_master(fabric, p, Code::Success);
        }
    }

    /// Handles a parked hardware outcome (MASTER_COMPLETE doorbell).
    fn master_event(&mut self, fabric: Fabric) {
        let Some(outcome) = self.port.take_outcome() else {
            return;
        };
        if self.state != State::Mastering || self.queue.is_empty() {
            return;
        }
        TRACE.record(Trace::Status(outcome.status));
        self.state = State::Idle;

        match outcome.status {
            WireStatus::Done => {
                let p = self.queue.pop_front().unwrap();
                self.finish_master_ok(fabric, p, outcome.rx);
            }
            WireStatus::AddrNack | WireStatus::DataNack => {
                let front = self.queue.front_mut().unwrap();
                front.nack_retries += 1;
                TRACE.record(Trace::Retry(front.nack_retries));
                if front.nack_retries > MAX_NACK_RETRIES {
                    let p = self.queue.pop_front().unwrap();
                    let code = if outcome.status == WireStatus::AddrNack {
                        Code::NoDev
                    } else {
                        Code::Access
                    };
                    self.complete_master(fabric, p, code);
                } else {
                    return self.backoff(fabric, RETRY_DELAY_MS);
                }
            }
            WireStatus::ArbLost => {
                return self.backoff(fabric, ARBITRATION_DELAY_MS);
            }
            WireStatus::BusFault => {
                let p = self.queue.pop_front().unwrap();
                self.complete_master(fabric, p, Code::Refused);
            }
        }
        self.start_next(fabric);
    }

    /// Searches the pool for a listener accepting this frame and serves it:
    /// fills its rx buffer, runs the slave-transmit handoff if the master
    /// wants bytes back, and parks the listener for task-context delivery.
    ///
    /// Returns the bytes for the read phase (empty for write-only).
    fn match_and_serve(&mut self, frame: &Frame) -> Result<Vec<u8, DATA_SIZE>, SlaveRefusal> {
        let candidate = |p: &Pending| {
            p.info.scmd == frame.service
                && (!frame.is_general_call() || p.info.mode.contains(Mode::GC))
        };
        // Targeted listeners outrank generic acceptors.
        let found = self
            .pool
            .iter()
            .position(|p| candidate(p) && p.info.rx.as_slice() == &frame.prefix[..])
            .or_else(|| {
                self.pool
                    .iter()
                    .position(|p| candidate(p) && p.info.accepts_any())
            });
        let Some(index) = found else {
            TRACE.record(Trace::Unroutable(frame.service));
            self.unroutable = self.unroutable.saturating_add(1);
            return Err(SlaveRefusal::Rejected);
        };

        let needs_st = frame.read_len > 0;
        {
            let p = &self.pool[index];
            if needs_st && (!p.info.mode.contains(Mode::ST) || p.info.handoff.is_none()) {
                TRACE.record(Trace::Unroutable(frame.service));
                self.unroutable = self.unroutable.saturating_add(1);
                return Err(SlaveRefusal::Rejected);
            }
        }

        let mut p = self.pool.swap_remove(index);
        TRACE.record(Trace::SlaveServe(frame.service));

        let limit = match p.info.rx_limit {
            0 => DATA_SIZE,
            n => usize::from(n),
        };
        // Deliver the command prefix and body in wire order.
        p.info.rx.clear();
        if frame.data.len() > limit
            || p.info.rx.extend_from_slice(&frame.prefix).is_err()
            || p.info.rx.extend_from_slice(&frame.data).is_err()
        {
            TRACE.record(Trace::Overflow(frame.service));
            p.info.result = Code::BadExchange;
            let _ = self.finished.push(p);
            return Err(SlaveRefusal::Rejected);
        }
        p.info.result = Code::Success;

        let mut read = Vec::new();
        if needs_st {
            let handoff = p.info.handoff.unwrap();
            let code = handoff(&mut p.info);
            if code.is_success() {
                let want = usize::from(frame.read_len).min(DATA_SIZE);
                for i in 0..want {
                    let byte = p.info.tx.get(i).copied().unwrap_or(0xFF);
                    let _ = read.push(byte);
                }
            } else {
                // The wire still has to clock something out.
                for _ in 0..usize::from(frame.read_len).min(DATA_SIZE) {
                    let _ = read.push(0xFF);
                }
                p.info.result = code;
            }
        }

        let _ = self.finished.push(p);
        Ok(read)
    }

    /// Interrupt entry: a remote master is addressing us. Returns the bytes
    /// to clock out in the read phase, or the refusal for the wire layer to
    /// turn into a NACK. Posts the `SLAVE_COMPLETE` doorbell that triggers
    /// task-context delivery.
    pub fn slave_frame(
        &mut self,
        fabric: Fabric,
        frame: &Frame,
    ) -> Result<Vec<u8, DATA_SIZE>, SlaveRefusal> {
        if !self.slave_enabled {
            return Err(SlaveRefusal::Unaddressed);
        }
        let served = self.match_and_serve(frame);
        fabric.post(Message::new(
            TaskId::TWI,
            TaskId::TWI,
            Op::SlaveComplete,
            Body::Empty,
        ));
        served
    }

    /// Task-context half of slave completion: return served listeners to
    /// their owners and report unroutable traffic.
    fn drain_finished(&mut self, fabric: Fabric) {
        while let Some(p) = self.finished.pop() {
            fabric.post(Message::new(
                TaskId::TWI,
                p.owner,
                Op::ReplyInfo,
                Body::Bus(p.info),
            ));
        }
        if self.unroutable > 0 {
            self.unroutable = 0;
            fabric.post(Message::new(
                TaskId::TWI,
                TaskId::SYS,
                Op::ReplyResult,
                Body::Result(Code::BadRequest),
            ));
        }
        self.update_slave_ctl();
    }

    fn accept_job(&mut self, fabric: Fabric, owner: TaskId, info: BusInfo) {
        TRACE.record(Trace::Job(info.mode.bits()));
        let p = Pending {
            owner,
            info,
            nack_retries: 0,
            attempts: 0,
        };
        if !p.info.mode.is_legal() {
            if p.info.mode.is_master() {
                return self.complete_master(fabric, p, Code::Inval);
            }
            return self.reply_info_err(fabric, p, Code::Inval);
        }

        if p.info.mode.is_master() {
            match self.queue.push_back(p) {
                Ok(()) => {
                    if self.state == State::Idle {
                        self.start_next(fabric);
                    }
                }
                Err(p) => self.complete_master(fabric, p, Code::NoMem),
            }
        } else {
            match self.pool.push(p) {
                Ok(()) => self.update_slave_ctl(),
                Err(p) => self.reply_info_err(fabric, p, Code::NoMem),
            }
        }
    }

    fn reply_info_err(&self, fabric: Fabric, mut p: Pending, code: Code) {
        p.info.result = code;
        fabric.post(Message::new(
            TaskId::TWI,
            p.owner,
            Op::ReplyInfo,
            Body::Bus(p.info),
        ));
    }

    /// CANCEL by (owner, token): `Busy` for the job on the wire, the info
    /// back with `Success` when withdrawable, `NotFound` otherwise.
    fn cancel(&mut self, fabric: Fabric, owner: TaskId, token: Token) {
        TRACE.record(Trace::Cancel(token.0));
        let matches =
            |p: &Pending| p.owner == owner && p.info.token == token;

        let front_hit = self.queue.front().map(matches).unwrap_or(false);
        if front_hit && self.state == State::Mastering {
            fabric.post(Message::new(
                TaskId::TWI,
                owner,
                Op::ReplyInfo,
                Body::Result(Code::Busy),
            ));
            return;
        }

        if self.queue.iter().any(matches) {
            // Rebuild the deque without the canceled entry; depth is single
            // digits.
            let mut keep: Deque<Pending, MASTER_SLOTS> = Deque::new();
            let mut canceled = None;
            while let Some(p) = self.queue.pop_front() {
                if canceled.is_none() && matches(&p) {
                    canceled = Some(p);
                } else {
                    let _ = keep.push_back(p);
                }
            }
            self.queue = keep;
            return self.reply_info_ok(fabric, canceled.unwrap());
        }

        if let Some(index) = self.pool.iter().position(matches) {
            let p = self.pool.swap_remove(index);
            self.update_slave_ctl();
            return self.reply_info_ok(fabric, p);
        }

        fabric.post(Message::new(
            TaskId::TWI,
            owner,
            Op::ReplyInfo,
            Body::Result(Code::NotFound),
        ));
    }

    fn reply_info_ok(&self, fabric: Fabric, mut p: Pending) {
        p.info.result = Code::Success;
        fabric.post(Message::new(
            TaskId::TWI,
            p.owner,
            Op::ReplyInfo,
            Body::Bus(p.info),
        ));
    }

    /// Pool listeners currently registered. For diagnostics and tests.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Master jobs queued or in flight.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl<W: WirePort> Task for Twi<W> {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                self.update_slave_ctl();
                fabric.post(msg.result_reply(TaskId::TWI, Code::Success));
                Ok(())
            }
            (Op::Job, Body::Bus(info)) => {
                self.accept_job(fabric, msg.sender, info.clone());
                Ok(())
            }
            (Op::Cancel, Body::Cancel(token)) => {
                self.cancel(fabric, msg.sender, *token);
                Ok(())
            }
            (Op::MasterComplete, Body::Empty) => {
                self.master_event(fabric);
                Ok(())
            }
            (Op::SlaveComplete, Body::Empty) => {
                self.drain_finished(fabric);
                Ok(())
            }
            (Op::Alarm, Body::Alarm(info)) if info.token == BACKOFF_TOKEN => {
                if self.state == State::Backoff {
                    self.state = State::Idle;
                    self.start_next(fabric);
                }
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}
