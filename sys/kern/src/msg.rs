// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message layout.
//!
//! A message is a small value: addressing, an opcode, and one payload
//! variant. The queue holds messages by value and they move -- nothing in a
//! message is a reference into another task's state. Info blocks travel
//! inside the payload: the requesting task moves its record in, the service
//! moves it back in the reply, and ownership is never shared.

use abi::{AlarmInfo, BusInfo, Code, IoctlOp, Op, TaskId, Token, DATA_SIZE};
use bytering::ByteSource;
use heapless::Vec;

/// Message payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Empty,
    /// A small control code plus one parameter word.
    Ioctl { op: IoctlOp, arg: u32 },
    /// A bare result code.
    Result(Code),
    /// Withdraw the job identified by (sender, token).
    Cancel(Token),
    /// An alarm clock info block, on its way in or back.
    Alarm(AlarmInfo),
    /// A bus info block, on its way in or back.
    Bus(BusInfo),
    /// A run of raw bytes (serial writer traffic).
    Data(Vec<u8, DATA_SIZE>),
    /// A pull capability for a byte ring that just became non-empty.
    Chars(ByteSource),
}

/// One unit of work for the dispatch loop.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub sender: TaskId,
    pub receiver: TaskId,
    pub op: Op,
    pub body: Body,
}

impl Message {
    pub fn new(sender: TaskId, receiver: TaskId, op: Op, body: Body) -> Self {
        Self {
            sender,
            receiver,
            op,
            body,
        }
    }

    /// A `REPLY_RESULT` carrying `code`, addressed back at this message's
    /// sender.
    pub fn result_reply(&self, from: TaskId, code: Code) -> Message {
        Message::new(from, self.sender, Op::ReplyResult, Body::Result(code))
    }
}
