// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared byte rings and the pull-style `NOT_EMPTY` capability.
//!
//! A [`SharedRing`] sits between one byte producer (a UART receive
//! interrupt, a stream secretary) and one consumer task. The producer pushes
//! bytes in; when the ring goes from empty to non-empty the producer is told
//! to post `NOT_EMPTY` to the consumer, carrying a [`ByteSource`] -- a small
//! capability the consumer polls with [`ByteSource::take`] until it returns
//! `WouldBlock`.
//!
//! Switching consumers empties the ring and bumps an internal generation
//! number, so a `ByteSource` hoarded by the previous consumer goes stale:
//! it will only ever return `WouldBlock` again. The ring lives in a static
//! and is safe to feed from interrupt context; every access runs inside a
//! critical section.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;

use abi::{Code, TaskId};
use critical_section::Mutex;
use heapless::Deque;

/// Ring capacity in bytes. Plenty for a serial line at the supported rates;
/// a stream secretary never pushes more than one frame body at a time.
pub const RING_SIZE: usize = 64;

struct State {
    buf: Deque<u8, RING_SIZE>,
    consumer: TaskId,
    generation: u8,
    lost: u32,
}

/// A byte ring shared between one producer context and one consumer task.
pub struct SharedRing {
    inner: Mutex<RefCell<State>>,
}

/// What the producer should do after a push.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Byte stored; the consumer already knows there is data.
    Stored,
    /// Byte stored and the ring just became non-empty: post `NOT_EMPTY`
    /// with this source to this task.
    Notify(TaskId, ByteSource),
    /// Ring full; the byte was dropped and counted.
    Dropped,
}

impl SharedRing {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(State {
                buf: Deque::new(),
                consumer: TaskId::NONE,
                generation: 0,
                lost: 0,
            })),
        }
    }

    /// Stores one byte. On the empty-to-non-empty transition, returns the
    /// consumer to notify; at most one such notification is outstanding
    /// until the consumer drains back to empty.
    pub fn push(&'static self, byte: u8) -> PushOutcome {
        critical_section::with(|cs| {
            let mut st = self.inner.borrow_ref_mut(cs);
            let was_empty = st.buf.is_empty();
            if st.buf.push_back(byte).is_err() {
                st.lost = st.lost.wrapping_add(1);
                return PushOutcome::Dropped;
            }
            if was_empty && st.consumer != TaskId::NONE {
                PushOutcome::Notify(
                    st.consumer,
                    ByteSource {
                        ring: self,
                        generation: st.generation,
                    },
                )
            } else {
                PushOutcome::Stored
            }
        })
    }

    /// Installs a new consumer. The ring is emptied and the generation
    /// advances, so sources held by the previous consumer go stale; the
    /// next byte received re-arms the new consumer.
    pub fn set_consumer(&self, task: TaskId) {
        critical_section::with(|cs| {
            let mut st = self.inner.borrow_ref_mut(cs);
            while st.buf.pop_front().is_some() {}
            st.generation = st.generation.wrapping_add(1);
            st.consumer = task;
        })
    }

    pub fn consumer(&self) -> TaskId {
        critical_section::with(|cs| self.inner.borrow_ref(cs).consumer)
    }

    /// A fresh source for the current generation.
    pub fn source(&'static self) -> ByteSource {
        critical_section::with(|cs| ByteSource {
            ring: self,
            generation: self.inner.borrow_ref(cs).generation,
        })
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).buf.is_empty())
    }

    /// Bytes dropped on the floor because the ring was full.
    pub fn lost(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).lost)
    }
}

/// Pull capability handed to a consumer in a `NOT_EMPTY` message.
///
/// The consumer may keep this across messages and poll it lazily; it goes
/// stale (permanently `WouldBlock`) when the ring's consumer changes.
#[derive(Copy, Clone)]
pub struct ByteSource {
    ring: &'static SharedRing,
    generation: u8,
}

impl ByteSource {
    /// Pulls the next byte, or `WouldBlock` if the ring is empty or this
    /// source predates a consumer switch.
    pub fn take(&self) -> Result<u8, Code> {
        critical_section::with(|cs| {
            let mut st = self.ring.inner.borrow_ref_mut(cs);
            if st.generation != self.generation {
                return Err(Code::WouldBlock);
            }
            st.buf.pop_front().ok_or(Code::WouldBlock)
        })
    }
}

impl PartialEq for ByteSource {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.ring, other.ring) && self.generation == other.generation
    }
}

impl Eq for ByteSource {}

impl core::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ByteSource")
            .field("generation", &self.generation)
            .finish()
    }
}
