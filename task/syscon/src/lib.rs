// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The remote console secretary.
//!
//! Lets one node type at another node's command parser. The request frame
//! carries the command line inline -- `[client-node, bytes...]` -- so
//! unlike the stream secretaries there is no fetch leg: the bytes go
//! straight into the console ring, the configured parser task is woken
//! through `NOT_EMPTY`, and a `{count, code}` reply goes back to the
//! client's waiting listener.

#![cfg_attr(not(test), no_std)]

use abi::{service, Addr, BusInfo, Code, Op, StreamReply, TaskId, Token, PREFIX};
use bytering::{PushOutcome, SharedRing};
use kern::{Body, Fabric, Message, NoMsg, Task};
use zerocopy::IntoBytes;

const LISTEN_TOKEN: Token = Token(0x5C00);
const REPLY_TOKEN: Token = Token(0x5C01);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Listening,
    Replying,
}

/// The console secretary.
pub struct SysCon {
    ring: &'static SharedRing,
    /// The command parser fed by incoming console traffic.
    consumer: TaskId,
    phase: Phase,
    pub served: u32,
}

impl SysCon {
    pub fn new(ring: &'static SharedRing, consumer: TaskId) -> Self {
        Self {
            ring,
            consumer,
            phase: Phase::Listening,
            served: 0,
        }
    }

    fn register(&mut self, fabric: Fabric) {
        let listener = BusInfo::listener(LISTEN_TOKEN, service::SYSCON_REQUEST);
        fabric.post(Message::new(
            TaskId::SYSCON,
            TaskId::TWI,
            Op::Job,
            Body::Bus(listener),
        ));
        self.phase = Phase::Listening;
    }

    /// The requester's routing triple and node address, if the rx buffer
    /// came back with both intact.
    fn route(info: &BusInfo) -> Option<([u8; PREFIX], Addr)> {
        let prefix: [u8; PREFIX] = info.rx.get(..PREFIX)?.try_into().ok()?;
        let client = info.rx_body().first().copied()?;
        Some((prefix, Addr(client)))
    }

    /// Master-transmits `{count, code}` back at the waiting client.
    fn reply(&mut self, fabric: Fabric, client: Addr, prefix: [u8; PREFIX], count: u8, code: Code) {
        let mut job = BusInfo::master(REPLY_TOKEN, client, service::SYSCON_REPLY);
        job.prefix = prefix;
        let reply = StreamReply {
            count,
            code: code as u8,
        };
        let _ = job.tx.extend_from_slice(reply.as_bytes());
        fabric.post(Message::new(TaskId::SYSCON, TaskId::TWI, Op::Job, Body::Bus(job)));
        self.phase = Phase::Replying;
    }

    fn serve(&mut self, fabric: Fabric, info: &BusInfo) {
        let Some((prefix, client)) = Self::route(info) else {
            // Empty request: no client byte, nobody to answer.
            return self.register(fabric);
        };
        let line = &info.rx_body()[1..];

        let mut count: u8 = 0;
        let mut code = Code::Success;
        for byte in line {
            match self.ring.push(*byte) {
                PushOutcome::Notify(task, source) => {
                    fabric.post(Message::new(
                        TaskId::SYSCON,
                        task,
                        Op::NotEmpty,
                        Body::Chars(source),
                    ));
                    count += 1;
                }
                PushOutcome::Stored => count += 1,
                PushOutcome::Dropped => {
                    code = Code::NoMem;
                    break;
                }
            }
        }

        self.reply(fabric, client, prefix, count, code);
    }

    /// A failed exchange whose client is still waiting gets the bad news;
    /// one that no longer names a client can only be re-registered.
    fn refuse(&mut self, fabric: Fabric, info: &BusInfo) {
        match Self::route(info) {
            Some((prefix, client)) => self.reply(fabric, client, prefix, 0, info.result),
            None => self.register(fabric),
        }
    }
}

impl Task for SysCon {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                self.ring.set_consumer(self.consumer);
                self.register(fabric);
                fabric.post(msg.result_reply(TaskId::SYSCON, Code::Success));
                Ok(())
            }
            (Op::ReplyInfo, Body::Bus(info)) => {
                if self.phase == Phase::Listening {
                    match info.result {
                        Code::Success => self.serve(fabric, info),
                        // The client is still waiting on these; answer
                        // before listening again.
                        Code::Access | Code::Again | Code::BadExchange => {
                            self.refuse(fabric, info)
                        }
                        // Listener was discarded some other way.
                        _ => self.register(fabric),
                    }
                }
                Ok(())
            }
            (Op::ReplyInfo, Body::Result(_)) => Ok(()),
            (Op::MasterComplete, Body::Bus(info)) => {
                if self.phase == Phase::Replying && info.token == REPLY_TOKEN {
                    self.served += 1;
                    self.register(fabric);
                }
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}
