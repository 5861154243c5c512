// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The memory-peek secretary.
//!
//! Serves `MEMZ_REQUEST`: a remote peer names an address and a length, and
//! the requested bytes stream back in the *same* bus transaction through
//! the slave-transmit handoff -- no second exchange. What is peekable is
//! decided at build time by the node's registered [`Window`]s; anything
//! outside them answers `NoRegion` padding instead of bytes.
//!
//! Like every secretary, this task owns exactly one pool listener and
//! re-registers it after each completed request.

#![cfg_attr(not(test), no_std)]

use abi::{peek, service, BusInfo, Code, Mode, Op, PeekRequest, TaskId, Token, Window, DATA_SIZE};
use kern::{Body, Fabric, Message, NoMsg, Task};
use zerocopy::FromBytes;

const LISTEN_TOKEN: Token = Token(0x4D5A);

/// The handoff the bus driver runs when the master turns the transaction
/// around to read. Runs in interrupt context; it only touches the job.
fn serve_peek(info: &mut BusInfo) -> Code {
    let Ok((req, _)) = PeekRequest::read_from_prefix(info.rx_body()) else {
        return Code::Inval;
    };
    let len = usize::from(req.len);
    if len > DATA_SIZE {
        return Code::TooBig;
    }
    let Some(windows) = info.windows else {
        return Code::NoRegion;
    };
    match peek(windows, req.addr.get(), len) {
        Some(bytes) => {
            info.tx.clear();
            // Length checked against DATA_SIZE above.
            let _ = info.tx.extend_from_slice(bytes);
            Code::Success
        }
        None => Code::NoRegion,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Offline,
    Listening,
}

/// The memory-peek task.
pub struct Memz {
    windows: &'static [Window],
    state: State,
    /// Requests served since reset, including failed lookups.
    pub served: u32,
}

impl Memz {
    pub fn new(windows: &'static [Window]) -> Self {
        Self {
            windows,
            state: State::Offline,
            served: 0,
        }
    }

    fn register(&mut self, fabric: Fabric) {
        let mut listener = BusInfo::listener(LISTEN_TOKEN, service::MEMZ_REQUEST);
        listener.mode = Mode::SR | Mode::ST;
        listener.handoff = Some(serve_peek);
        listener.windows = Some(self.windows);
        fabric.post(Message::new(
            TaskId::MEMZ,
            TaskId::TWI,
            Op::Job,
            Body::Bus(listener),
        ));
        self.state = State::Listening;
    }
}

impl Task for Memz {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                self.register(fabric);
                fabric.post(msg.result_reply(TaskId::MEMZ, Code::Success));
                Ok(())
            }
            // The listener coming back: the reply already went out inside
            // the transaction (or the exchange failed), so in either case
            // the only work left is to listen again.
            (Op::ReplyInfo, Body::Bus(_)) => {
                self.served += 1;
                self.register(fabric);
                Ok(())
            }
            // Registration itself bounced; stay down rather than spin.
            (Op::ReplyInfo, Body::Result(_)) => {
                self.state = State::Offline;
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}
