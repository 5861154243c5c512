// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The dispatch loop.

use crate::queue::Fabric;
use crate::task::TaskTable;

/// The dispatcher. One per node; owns nothing but the fabric handle.
pub struct Kernel {
    fabric: Fabric,
}

impl Kernel {
    pub fn new(fabric: Fabric) -> Self {
        Self { fabric }
    }

    pub fn fabric(&self) -> Fabric {
        self.fabric
    }

    /// Dispatches at most one message. Returns false if the queue was
    /// empty.
    ///
    /// An unknown receiver, `TaskId::NONE`, or a `NoMsg` rejection from the
    /// receive function all count the message as lost; the loop itself
    /// never stops for them.
    pub fn step(&mut self, tasks: &mut dyn TaskTable) -> bool {
        let Some(msg) = self.fabric.take() else {
            return false;
        };

        let accepted = match tasks.task(msg.receiver) {
            Some(task) => task.receive(self.fabric, &msg).is_ok(),
            None => false,
        };
        if !accepted {
            self.fabric.note_lost();
        }
        self.fabric.note_cycle();
        true
    }

    /// Dispatches until the queue goes quiet. Returns the number of
    /// messages handled. This is the workhorse for hosted runs and tests;
    /// firmware mains use [`Kernel::run_forever`].
    pub fn run_until_idle(&mut self, tasks: &mut dyn TaskTable) -> u32 {
        let mut n = 0;
        while self.step(tasks) {
            n += 1;
        }
        n
    }

    /// The firmware main loop: dispatch forever, invoking `idle` (typically
    /// a wait-for-interrupt) whenever the queue runs dry.
    pub fn run_forever(&mut self, tasks: &mut dyn TaskTable, idle: fn()) -> ! {
        loop {
            if !self.step(tasks) {
                idle();
            }
        }
    }
}
