// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task contract.

use abi::TaskId;

use crate::msg::Message;
use crate::queue::Fabric;

/// Rejection returned by a receive function: "I do not accept this opcode
/// in any state." The scheduler counts it as a lost message. A recognized
/// opcode that merely arrives at an awkward time is *not* a `NoMsg` -- the
/// task absorbs it (usually by replying with an error) and returns `Ok`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoMsg;

/// A stateful, cooperative message consumer.
///
/// `receive` must return promptly. It may post any number of outgoing
/// messages through the fabric, but it must never wait for a condition that
/// only a later message can clear -- it suspends instead, by recording a
/// waiting state in its own private data and returning.
pub trait Task {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg>;
}

/// The node's build-time dispatch table: maps a task id to the task value.
///
/// Implementations are a `match` over the node's fixed task set. Returning
/// `None` (unknown id, or `TaskId::NONE`) makes the scheduler count the
/// message as lost.
pub trait TaskTable {
    fn task(&mut self, id: TaskId) -> Option<&mut dyn Task>;
}
