// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bounded message queue and its shared handle.
//!
//! One queue per node, logically split into two priority classes. The
//! *urgent* class carries everything an interrupt handler posts (alarm
//! expiries, bus completions, ring notifications); the *normal* class
//! carries everything posted from task context. Delivery drains urgent
//! before normal, FIFO within each class, so a completion that would
//! unblock a suspended task is never stranded behind a backlog of fresh
//! task-level work.
//!
//! Overflow policy is deliberate: the offending message is dropped and
//! counted, and nobody is told. Producers respect the one-in-flight rule
//! per info block, which bounds the steady-state depth by (tasks x
//! services); a overflow in practice means something broke that rule.

use core::cell::RefCell;

use abi::Op;
use critical_section::Mutex;
use heapless::Deque;

use crate::msg::Message;

/// Urgent-class capacity. Sized to the worst burst the interrupt sources
/// can produce between two dispatch steps.
pub const URGENT_SLOTS: usize = 16;

/// Normal-class capacity.
pub const NORMAL_SLOTS: usize = 32;

/// Dispatch statistics, readable at any time through a [`Fabric`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    /// Messages dispatched since reset.
    pub cycle_count: u32,
    /// Messages dropped: queue overflow, unknown receiver, or a receive
    /// function that rejected the opcode.
    pub lost_msgs: u32,
    /// High-water mark of the combined queue depth.
    pub queue_depth: u32,
}

/// The queue proper. Accessed through [`SharedQueue`]; exposed for tests.
pub struct Queue {
    urgent: Deque<Message, URGENT_SLOTS>,
    normal: Deque<Message, NORMAL_SLOTS>,
    counters: Counters,
}

impl Queue {
    pub const fn new() -> Self {
        Self {
            urgent: Deque::new(),
            normal: Deque::new(),
            counters: Counters {
                cycle_count: 0,
                lost_msgs: 0,
                queue_depth: 0,
            },
        }
    }

    /// Enqueues by class. On overflow the message is dropped and counted.
    pub fn post(&mut self, msg: Message) {
        let res = if msg.op.is_urgent() {
            self.urgent.push_back(msg).map_err(|_| ())
        } else {
            self.normal.push_back(msg).map_err(|_| ())
        };
        match res {
            Ok(()) => {
                let depth = (self.urgent.len() + self.normal.len()) as u32;
                if depth > self.counters.queue_depth {
                    self.counters.queue_depth = depth;
                }
            }
            Err(()) => self.counters.lost_msgs += 1,
        }
    }

    /// Takes the next message: urgent first, FIFO within class.
    pub fn take(&mut self) -> Option<Message> {
        self.urgent.pop_front().or_else(|| self.normal.pop_front())
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

/// The queue wrapped for cross-context use. Lives in a static; interrupt
/// handlers and the dispatch loop both reach it through a [`Fabric`].
pub struct SharedQueue {
    inner: Mutex<RefCell<Queue>>,
}

impl SharedQueue {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Queue::new())),
        }
    }
}

/// Cheap, copyable handle on the node's shared queue.
///
/// This is the only capability a task needs to talk to its peers, so it is
/// what the dispatch loop passes into every `receive` call.
#[derive(Copy, Clone)]
pub struct Fabric {
    queue: &'static SharedQueue,
}

impl Fabric {
    pub fn new(queue: &'static SharedQueue) -> Self {
        Self { queue }
    }

    /// Posts a message. Safe from interrupt context; the class is chosen by
    /// the opcode. Overflow drops and counts.
    pub fn post(&self, msg: Message) {
        critical_section::with(|cs| self.queue.inner.borrow_ref_mut(cs).post(msg))
    }

    pub fn take(&self) -> Option<Message> {
        critical_section::with(|cs| self.queue.inner.borrow_ref_mut(cs).take())
    }

    pub fn counters(&self) -> Counters {
        critical_section::with(|cs| self.queue.inner.borrow_ref(cs).counters())
    }

    pub(crate) fn note_cycle(&self) {
        critical_section::with(|cs| {
            self.queue.inner.borrow_ref_mut(cs).counters.cycle_count += 1;
        })
    }

    pub(crate) fn note_lost(&self) {
        critical_section::with(|cs| {
            self.queue.inner.borrow_ref_mut(cs).counters.lost_msgs += 1;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Body;
    use abi::{Code, TaskId};

    fn normal(n: u32) -> Message {
        Message::new(TaskId(9), TaskId(10), Op::Start, Body::Ioctl {
            op: abi::IoctlOp::Consumer,
            arg: n,
        })
    }

    fn urgent(n: u32) -> Message {
        Message::new(TaskId::CLK, TaskId(10), Op::Alarm, Body::Ioctl {
            op: abi::IoctlOp::Consumer,
            arg: n,
        })
    }

    #[test]
    fn urgent_before_normal_fifo_within_class() {
        let mut q = Queue::new();
        q.post(normal(1));
        q.post(urgent(2));
        q.post(normal(3));
        q.post(urgent(4));

        let order: Vec<_> = core::iter::from_fn(|| q.take())
            .map(|m| match m.body {
                Body::Ioctl { arg, .. } => arg,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, [2, 4, 1, 3]);
    }

    #[test]
    fn overflow_counts_one_per_drop() {
        let mut q = Queue::new();
        for i in 0..NORMAL_SLOTS as u32 {
            q.post(normal(i));
        }
        assert_eq!(q.counters().lost_msgs, 0);
        q.post(normal(98));
        q.post(normal(99));
        assert_eq!(q.counters().lost_msgs, 2);

        // Urgent class is unaffected by a full normal class.
        q.post(urgent(1));
        assert_eq!(q.counters().lost_msgs, 2);

        // No delivered message repeats.
        let mut seen = 0;
        while q.take().is_some() {
            seen += 1;
        }
        assert_eq!(seen, NORMAL_SLOTS + 1);
    }

    #[test]
    fn depth_high_water() {
        let mut q = Queue::new();
        q.post(normal(0));
        q.post(urgent(1));
        q.post(normal(2));
        q.take();
        q.post(normal(3));
        assert_eq!(q.counters().queue_depth, 3);

        let mut result_msg = normal(4);
        result_msg.body = Body::Result(Code::Success);
        q.post(result_msg);
        assert_eq!(q.counters().queue_depth, 4);
    }
}
