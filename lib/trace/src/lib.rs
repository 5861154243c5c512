// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event histories for the node services.
//!
//! A [`TraceBuf`] keeps the last N events of one service's state machine
//! for a debugger to read out of RAM when a node wedges. Events are the
//! service's own small `Copy` enum, so each slot is self-describing; a run
//! of identical consecutive events collapses into a single slot with a
//! count, so a retry loop cannot wipe out the history around it. Each slot
//! remembers the sequence number of the first event in its run, which
//! lines the history up against the kernel's dispatch counters when
//! reconstructing a failure.
//!
//! Buffers live in statics and are fed from interrupt and task context
//! alike. Like the message queue and the byte rings, they are shared state
//! between the two contexts, and every access runs inside a critical
//! section -- there is no separate claim mechanism to contend on.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;

use critical_section::Mutex;

/// One recorded run of identical events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot<T> {
    /// Sequence number of the first event in the run, counting from 1.
    pub seq: u32,
    /// Events collapsed into this slot. Zero marks a slot never written.
    pub count: u32,
    pub event: T,
}

struct Inner<T, const N: usize> {
    /// Next slot to overwrite.
    head: usize,
    /// Events recorded since reset, collapsed repeats included.
    seq: u32,
    slots: [Slot<T>; N],
}

/// A fixed-size event history.
pub struct TraceBuf<T, const N: usize> {
    inner: Mutex<RefCell<Inner<T, N>>>,
}

impl<T: Copy + PartialEq, const N: usize> TraceBuf<T, N> {
    /// `fill` seeds the unwritten slots; any value works, the zero count
    /// marks them empty.
    pub const fn new(fill: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                head: 0,
                seq: 0,
                slots: [Slot {
                    seq: 0,
                    count: 0,
                    event: fill,
                }; N],
            })),
        }
    }

    /// Records one event, collapsing an immediate repeat into the previous
    /// slot.
    pub fn record(&self, event: T) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.seq = inner.seq.wrapping_add(1);
            let seq = inner.seq;

            let last = (inner.head + N - 1) % N;
            let prev = &mut inner.slots[last];
            if prev.count != 0 && prev.event == event {
                prev.count = prev.count.saturating_add(1);
                return;
            }

            let head = inner.head;
            inner.slots[head] = Slot {
                seq,
                count: 1,
                event,
            };
            inner.head = (head + 1) % N;
        })
    }

    /// Events recorded since reset, collapsed repeats included.
    pub fn total(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).seq)
    }

    /// The most recent slot, once anything has been recorded.
    pub fn last(&self) -> Option<Slot<T>> {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            let slot = inner.slots[(inner.head + N - 1) % N];
            (slot.count != 0).then_some(slot)
        })
    }

    /// Runs `visit` over every written slot, oldest first.
    pub fn read(&self, mut visit: impl FnMut(&Slot<T>)) {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            for i in 0..N {
                let slot = &inner.slots[(inner.head + i) % N];
                if slot.count != 0 {
                    visit(slot);
                }
            }
        })
    }
}
