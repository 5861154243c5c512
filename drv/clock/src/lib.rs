// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The alarm clock service.
//!
//! Many concurrent software timers, multiplexed onto one hardware counter
//! running in overflow-interrupt mode. Clients lend the clock an
//! [`AlarmInfo`] with `SET_ALARM` (or `PERIODIC_ALARM`); the clock keeps
//! pending jobs in a list ordered by absolute expiry, programs the counter
//! window to end at the head's expiry (capped at [`STEP_SIZE`]), and on
//! each overflow posts `ALARM` back to every owner whose time has come.
//!
//! Absolute expiries are kept small by opportunistic renormalization: when
//! the running tick count grows past a threshold, the whole list and the
//! count are shifted down together during an insert. A long-lived quiet
//! list is never renormalized, which is fine -- the threshold leaves half
//! the tick range as headroom.
//!
//! The pending list is the one piece of state shared with interrupt
//! context: [`Clock::on_overflow`] runs from the counter's overflow
//! interrupt, so the platform glue must keep it and the task-context
//! `receive` mutually excluded (on a single-core part, by running both
//! under the interrupt-disable critical section the node already uses for
//! its ISR entry points).

#![cfg_attr(not(test), no_std)]

use abi::{AlarmInfo, Code, Op, TaskId, Token};
use kern::{Body, Fabric, Message, NoMsg, Task};

/// Ticks per full counter rollover: an 8-bit counter prescaled to 1 kHz.
pub const STEP_SIZE: u32 = 256;

/// One tick is one millisecond at the chosen prescale.
pub const TICKS_PER_MS: u32 = 1;

/// Minimum separation enforced between adjacent expiries, so one overflow
/// never has to deliver two alarms.
pub const SPACING: u32 = 2;

/// Longest representable delay. Beyond this the clock answers
/// `ALARM(Inval)` immediately.
pub const MAX_MILLIS: u32 = 1 << 24;

/// Renormalization threshold for the absolute tick count.
const RENORM_AT: u32 = 1 << 30;

/// Pending job slots. Exhaustion answers `ALARM(NoMem)`.
pub const MAX_ALARMS: usize = 16;

/// The hardware counter as the clock sees it.
///
/// The counter counts up and interrupts on overflow; `set_window` restarts
/// it so the next overflow lands after `window` ticks (at most
/// [`STEP_SIZE`]), and `elapsed` reads how far into the current window it
/// has counted.
pub trait CounterPort {
    fn set_window(&mut self, window: u32);
    fn elapsed(&self) -> u32;
    fn stop(&mut self);
}

#[derive(Clone, Debug)]
struct Job {
    owner: TaskId,
    info: AlarmInfo,
    expiry: u32,
    next: Option<u8>,
}

/// The clock task.
pub struct Clock<C> {
    port: C,
    jobs: [Option<Job>; MAX_ALARMS],
    head: Option<u8>,
    active: bool,
    /// Absolute tick time at which the current counter window ends.
    ticks: u32,
    /// Length of the current counter window.
    window: u32,
}

impl<C: CounterPort> Clock<C> {
    pub fn new(port: C) -> Self {
        const NONE: Option<Job> = None;
        Self {
            port,
            jobs: [NONE; MAX_ALARMS],
            head: None,
            active: false,
            ticks: 0,
            window: 0,
        }
    }

    pub fn port_mut(&mut self) -> &mut C {
        &mut self.port
    }

    /// Current absolute time in ticks.
    fn now(&self) -> u32 {
        if self.active {
            self.ticks - self.window + self.port.elapsed()
        } else {
            self.ticks
        }
    }

    fn free_slot(&self) -> Option<u8> {
        self.jobs.iter().position(|j| j.is_none()).map(|i| i as u8)
    }

    /// Shifts every absolute value down when the tick count has grown
    /// large. Only run while no overflow can be in progress.
    fn renormalize(&mut self) {
        if self.ticks < RENORM_AT {
            return;
        }
        let base = self.now();
        for job in self.jobs.iter_mut().flatten() {
            job.expiry = job.expiry.saturating_sub(base);
        }
        self.ticks -= base;
    }

    /// Inserts a job in expiry order and re-establishes the SPACING
    /// invariant downstream of it. Returns true if the job became the new
    /// head.
    fn link_sorted(&mut self, slot: u8) {
        let expiry = self.jobs[slot as usize].as_ref().unwrap().expiry;

        // Find the last node that expires at or before the newcomer, so
        // coincident jobs keep their submission order.
        let mut prev: Option<u8> = None;
        let mut cur = self.head;
        while let Some(i) = cur {
            let job = self.jobs[i as usize].as_ref().unwrap();
            if job.expiry > expiry {
                break;
            }
            prev = Some(i);
            cur = job.next;
        }
        match prev {
            Some(p) => {
                let follow = self.jobs[p as usize].as_ref().unwrap().next;
                self.jobs[slot as usize].as_mut().unwrap().next = follow;
                self.jobs[p as usize].as_mut().unwrap().next = Some(slot);
            }
            None => {
                let follow = self.head;
                self.jobs[slot as usize].as_mut().unwrap().next = follow;
                self.head = Some(slot);
            }
        }

        // Push later entries forward so adjacent expiries stay SPACING
        // apart.
        let mut cursor = self.head;
        let mut floor = 0u32;
        while let Some(i) = cursor {
            let job = self.jobs[i as usize].as_mut().unwrap();
            if job.expiry < floor {
                job.expiry = floor;
            }
            floor = job.expiry + SPACING;
            cursor = job.next;
        }
    }

    /// Programs the counter for the current head, from absolute time
    /// `from`.
    fn program(&mut self, from: u32) {
        match self.head {
            Some(i) => {
                let expiry = self.jobs[i as usize].as_ref().unwrap().expiry;
                let window = expiry.saturating_sub(from).clamp(1, STEP_SIZE);
                self.port.set_window(window);
                self.window = window;
                self.ticks = from + window;
                self.active = true;
            }
            None => {
                self.port.stop();
                self.window = 0;
                self.active = false;
            }
        }
    }

    /// Schedules `info` for `msg.sender`. On error the info goes straight
    /// back in an `ALARM` reply carrying the code.
    fn set_alarm(&mut self, fabric: Fabric, owner: TaskId, info: AlarmInfo, periodic: bool) {
        let mut info = info;
        if periodic && (info.period_ms == 0 || info.period_ms > MAX_MILLIS) {
            return self.bounce(fabric, owner, info, Code::Inval);
        }
        if !periodic {
            info.period_ms = 0;
        }
        if info.delay_ms > MAX_MILLIS {
            return self.bounce(fabric, owner, info, Code::Inval);
        }
        let Some(slot) = self.free_slot() else {
            return self.bounce(fabric, owner, info, Code::NoMem);
        };

        self.renormalize();
        let now = self.now();
        let delay_ms = if info.delay_ms == 0 && periodic {
            info.period_ms
        } else {
            info.delay_ms
        };
        let expiry = now + delay_ms * TICKS_PER_MS;

        self.jobs[slot as usize] = Some(Job {
            owner,
            info,
            expiry,
            next: None,
        });
        self.link_sorted(slot);
        if self.head == Some(slot) {
            self.program(now);
        }
    }

    fn bounce(&self, fabric: Fabric, owner: TaskId, mut info: AlarmInfo, code: Code) {
        info.result = code;
        fabric.post(Message::new(TaskId::CLK, owner, Op::Alarm, Body::Alarm(info)));
    }

    /// Unlinks the job identified by (owner, token), if still pending.
    fn unlink(&mut self, owner: TaskId, token: Token) -> Option<AlarmInfo> {
        let mut at = self.head;
        let mut prev: Option<u8> = None;
        while let Some(i) = at {
            let job = self.jobs[i as usize].as_ref().unwrap();
            if job.owner == owner && job.info.token == token {
                let next = job.next;
                match prev {
                    Some(p) => self.jobs[p as usize].as_mut().unwrap().next = next,
                    None => self.head = next,
                }
                // A canceled head leaves the programmed window alone; the
                // overflow handler just finds nothing due and moves on.
                return self.jobs[i as usize].take().map(|j| j.info);
            }
            prev = at;
            at = job.next;
        }
        None
    }

    /// Overflow interrupt entry: deliver everything due, then rearm.
    pub fn on_overflow(&mut self, fabric: Fabric) {
        if !self.active {
            return;
        }
        let now = self.ticks;
        self.window = 0;

        while let Some(i) = self.head {
            let job = self.jobs[i as usize].as_ref().unwrap();
            if job.expiry > now {
                break;
            }
            self.head = job.next;
            let mut job = self.jobs[i as usize].take().unwrap();
            let mut fired = job.info;
            fired.result = Code::Success;
            fabric.post(Message::new(
                TaskId::CLK,
                job.owner,
                Op::Alarm,
                Body::Alarm(fired),
            ));
            if job.info.period_ms != 0 {
                // Re-arm relative to the nominal expiry, not delivery.
                job.expiry += job.info.period_ms * TICKS_PER_MS;
                job.next = None;
                self.jobs[i as usize] = Some(job);
                self.link_sorted(i);
            }
        }
        self.program(now);
    }

    /// Number of jobs currently pending.
    pub fn pending(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_some()).count()
    }
}

impl<C: CounterPort> Task for Clock<C> {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                // The counter stays off until the first job arrives.
                fabric.post(msg.result_reply(TaskId::CLK, Code::Success));
                Ok(())
            }
            (Op::SetAlarm, Body::Alarm(info)) => {
                self.set_alarm(fabric, msg.sender, *info, false);
                Ok(())
            }
            (Op::PeriodicAlarm, Body::Alarm(info)) => {
                self.set_alarm(fabric, msg.sender, *info, true);
                Ok(())
            }
            (Op::Cancel, Body::Cancel(token)) => {
                let reply = match self.unlink(msg.sender, *token) {
                    Some(mut info) => {
                        info.result = Code::Success;
                        Body::Alarm(info)
                    }
                    None => Body::Result(Code::NotFound),
                };
                fabric.post(Message::new(
                    TaskId::CLK,
                    msg.sender,
                    Op::ReplyInfo,
                    reply,
                ));
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}
