// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The node kernel: message fabric, dispatch loop, task contract.
//!
//! Every node firmware is one single-threaded, interrupt-driven program
//! built around this crate. Interrupt handlers format [`Message`]s and post
//! them to the shared [`queue`](crate::queue); the main loop pulls one
//! message at a time and hands it to the receiving task's `receive`
//! function. Tasks never block -- they advance their private state machine
//! one step per message and return, issuing any outgoing requests
//! synchronously along the way.
//!
//! # Design principles
//!
//! 1. Static configuration: the task set, the queue capacity, and every
//!    service's storage take a single shape chosen at build time.
//! 2. One shared object per concern: the message queue is the only thing an
//!    interrupt context and the task context both touch, and it is only
//!    touched inside a critical section.
//! 3. Run-to-completion: one message, one `receive` call, no reentry.

#![cfg_attr(not(test), no_std)]

pub mod msg;
pub mod queue;
pub mod sched;
pub mod startup;
pub mod task;

pub use msg::{Body, Message};
pub use queue::{Fabric, Queue, SharedQueue};
pub use sched::Kernel;
pub use startup::SysInit;
pub use task::{NoMsg, Task, TaskTable};
