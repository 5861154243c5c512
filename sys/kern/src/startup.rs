// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Two-phase startup.
//!
//! Phase one is static: the reset path configures pins, bus registers and
//! the like before the dispatch loop starts (in this codebase, that is the
//! construction of the node's ports and task values). Phase two is dynamic:
//! once interrupts are live, the node posts itself `INIT` for the SYS task,
//! which walks the per-node inittab and fires `INIT` at each named task in
//! order, advancing when the task answers `REPLY_RESULT`. A task typically
//! answers once its bus listener is registered, so a node that finishes the
//! cascade is reachable from its peers.

use abi::{Code, Op, TaskId};
use trace::TraceBuf;

use crate::msg::{Body, Message};
use crate::queue::Fabric;
use crate::task::{NoMsg, Task};

use crate::Kernel;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    InitSent(u8),
    InitFailed(u8, Code),
    Done,
    Report(u8, Code),
}

static TRACE: TraceBuf<Trace, 16> = TraceBuf::new(Trace::None);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    /// Waiting for inittab[.0] to answer its INIT.
    Walking(usize),
}

/// The SYS task: runs the init cascade and soaks up error reports that have
/// no better home (a driver noticing an unroutable bus request, for
/// example).
pub struct SysInit {
    inittab: &'static [TaskId],
    state: State,
    /// Entries that answered INIT with an error. The walk continues past
    /// them; a node with a dead service is still better off running.
    pub failures: u32,
    /// Unsolicited error reports received while idle.
    pub reports: u32,
}

impl SysInit {
    pub fn new(inittab: &'static [TaskId]) -> Self {
        Self {
            inittab,
            state: State::Idle,
            failures: 0,
            reports: 0,
        }
    }

    /// True once the cascade has finished (or never started).
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    fn fire(&mut self, fabric: Fabric, index: usize) {
        match self.inittab.get(index) {
            Some(&target) => {
                TRACE.record(Trace::InitSent(target.0));
                self.state = State::Walking(index);
                fabric.post(Message::new(TaskId::SYS, target, Op::Init, Body::Empty));
            }
            None => {
                TRACE.record(Trace::Done);
                self.state = State::Idle;
            }
        }
    }
}

impl Task for SysInit {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                self.fire(fabric, 0);
                Ok(())
            }
            (Op::ReplyResult, Body::Result(code)) => {
                match self.state {
                    State::Walking(index) => {
                        if !code.is_success() {
                            TRACE.record(Trace::InitFailed(msg.sender.0, *code));
                            self.failures += 1;
                        }
                        self.fire(fabric, index + 1);
                    }
                    State::Idle => {
                        TRACE.record(Trace::Report(msg.sender.0, *code));
                        self.reports += 1;
                    }
                }
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}

/// Posts the kick-off INIT that starts the cascade. Call once, after
/// interrupts are enabled and before entering the dispatch loop.
pub fn start(kernel: &Kernel) {
    kernel.fabric().post(Message::new(
        TaskId::SYS,
        TaskId::SYS,
        Op::Init,
        Body::Empty,
    ));
}
