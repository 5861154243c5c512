// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The stream secretaries: remote output (OSTREAM) and input (ISTREAM).
//!
//! Both serve the same exchange, differing only in where the payload ends
//! up:
//!
//! 1. a remote client master-transmits `{node, addr, len}` naming a span
//!    of its own peek windows;
//! 2. the secretary fetches the payload with a memory-peek master read
//!    back at the client's node;
//! 3. OSTREAM hands the bytes to the local serial writer; ISTREAM feeds
//!    them byte-by-byte to its configured consumer task through the
//!    `NOT_EMPTY` pull protocol;
//! 4. a `{count, code}` reply is master-transmitted back, routed to the
//!    client's waiting listener by the command prefix it sent;
//! 5. the secretary re-registers its listener and goes back to sleep.
//!
//! A request longer than the scratch buffer answers `NoMem` straight away,
//! without fetching anything or touching the output side.

#![cfg_attr(not(test), no_std)]

use abi::{
    service, Addr, BusInfo, Code, Mode, Op, PeekRequest, StreamReply, StreamRequest, TaskId,
    Token, DATA_SIZE, PREFIX,
};
use bytering::{PushOutcome, SharedRing};
use heapless::Vec;
use kern::{Body, Fabric, Message, NoMsg, Task};
use zerocopy::byteorder::big_endian::U16 as U16BE;
use zerocopy::{FromBytes, IntoBytes};

/// One request mid-flight through a secretary.
#[derive(Clone, Debug)]
struct Exchange {
    /// The requesting node, for the fetch and the reply.
    client: Addr,
    /// The requester's routing triple, echoed in the reply frame.
    reply_prefix: [u8; PREFIX],
    /// Where in the client's windows the payload lives.
    peek_addr: u16,
    want: u8,
    data: Vec<u8, DATA_SIZE>,
    count: u8,
    code: Code,
}

/// What tells the two secretaries apart.
struct Profile {
    task: TaskId,
    listen_scmd: u8,
    reply_mcmd: u8,
    listen_token: Token,
    fetch_token: Token,
    reply_token: Token,
}

const OSTREAM_PROFILE: Profile = Profile {
    task: TaskId::OSTREAM,
    listen_scmd: service::OSTREAM_REQUEST,
    reply_mcmd: service::OSTREAM_REPLY,
    listen_token: Token(0x0A70),
    fetch_token: Token(0x0A71),
    reply_token: Token(0x0A72),
};

const ISTREAM_PROFILE: Profile = Profile {
    task: TaskId::ISTREAM,
    listen_scmd: service::ISTREAM_REQUEST,
    reply_mcmd: service::ISTREAM_REPLY,
    listen_token: Token(0x0A68),
    fetch_token: Token(0x0A69),
    reply_token: Token(0x0A6A),
};

fn register(fabric: Fabric, p: &Profile) {
    let listener = BusInfo::listener(p.listen_token, p.listen_scmd);
    fabric.post(Message::new(p.task, TaskId::TWI, Op::Job, Body::Bus(listener)));
}

/// Decodes a served listener into an exchange. The rx buffer may come
/// back short (an overflowed exchange, for one), so everything is length
/// checked.
fn parse_request(info: &BusInfo) -> Result<Exchange, Code> {
    let prefix: [u8; PREFIX] = info
        .rx
        .get(..PREFIX)
        .ok_or(Code::Inval)?
        .try_into()
        .map_err(|_| Code::Inval)?;
    let (req, _) = StreamRequest::read_from_prefix(info.rx_body()).map_err(|_| Code::Inval)?;
    Ok(Exchange {
        client: Addr(req.node),
        reply_prefix: prefix,
        peek_addr: req.addr.get(),
        want: req.len,
        data: Vec::new(),
        count: 0,
        code: Code::Success,
    })
}

/// Master read of the payload out of the client's peek windows.
fn fetch(fabric: Fabric, p: &Profile, ex: &Exchange) {
    let mut job = BusInfo::master(p.fetch_token, ex.client, service::MEMZ_REQUEST);
    job.mode = Mode::MT | Mode::MR;
    job.rx_want = ex.want;
    let req = PeekRequest {
        addr: U16BE::new(ex.peek_addr),
        len: ex.want,
    };
    let _ = job.tx.extend_from_slice(req.as_bytes());
    fabric.post(Message::new(p.task, TaskId::TWI, Op::Job, Body::Bus(job)));
}

/// Master-transmits the final `{count, code}` back at the client.
fn send_reply(fabric: Fabric, p: &Profile, ex: &Exchange) {
    let mut job = BusInfo::master(p.reply_token, ex.client, p.reply_mcmd);
    job.prefix = ex.reply_prefix;
    let reply = StreamReply {
        count: ex.count,
        code: ex.code as u8,
    };
    let _ = job.tx.extend_from_slice(reply.as_bytes());
    fabric.post(Message::new(p.task, TaskId::TWI, Op::Job, Body::Bus(job)));
}

#[derive(Clone, Debug)]
enum Phase {
    Listening,
    Fetching(Exchange),
    /// OSTREAM only: payload handed to the serial writer, waiting for its
    /// result.
    Writing(Exchange),
    Replying,
}

/// Shared receive logic up to the point the payload is in hand. Returns
/// the message back if the secretary-specific half should look at it.
fn listener_step(fabric: Fabric, p: &Profile, phase: &mut Phase, info: &BusInfo) {
    if !matches!(phase, Phase::Listening) {
        return;
    }
    if info.result.is_success() {
        match parse_request(info) {
            Ok(mut ex) => {
                if usize::from(ex.want) > DATA_SIZE {
                    ex.code = Code::NoMem;
                    send_reply(fabric, p, &ex);
                    *phase = Phase::Replying;
                } else {
                    fetch(fabric, p, &ex);
                    *phase = Phase::Fetching(ex);
                }
            }
            Err(_) => {
                // No client address to answer; all we can do is listen
                // again.
                register(fabric, p);
            }
        }
    } else {
        match (info.result, parse_request(info)) {
            // The client is still waiting on these; give it the bad news.
            (Code::Access | Code::Again | Code::BadExchange, Ok(mut ex)) => {
                ex.code = info.result;
                send_reply(fabric, p, &ex);
                *phase = Phase::Replying;
            }
            // Listener was discarded some other way; re-register.
            _ => register(fabric, p),
        }
    }
}

/// Shared handling of master-job completions around the fetch and reply.
/// Returns the fetched exchange when the payload arrived intact.
fn master_step(
    fabric: Fabric,
    p: &Profile,
    phase: &mut Phase,
    served: &mut u32,
    info: &BusInfo,
) -> Option<Exchange> {
    match core::mem::replace(phase, Phase::Listening) {
        Phase::Fetching(mut ex) if info.token == p.fetch_token => {
            if info.result.is_success() {
                ex.data.clear();
                let _ = ex.data.extend_from_slice(&info.rx);
                // The caller decides the next phase (write out, or feed
                // and reply).
                return Some(ex);
            }
            ex.code = info.result;
            ex.count = 0;
            send_reply(fabric, p, &ex);
            *phase = Phase::Replying;
            None
        }
        Phase::Replying if info.token == p.reply_token => {
            *served += 1;
            register(fabric, p);
            *phase = Phase::Listening;
            None
        }
        other => {
            *phase = other;
            None
        }
    }
}

/// The remote output stream secretary: remote bytes out the local serial
/// line.
pub struct OStream {
    phase: Phase,
    pub served: u32,
}

impl OStream {
    pub fn new() -> Self {
        Self {
            phase: Phase::Listening,
            served: 0,
        }
    }
}

impl Default for OStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for OStream {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        let p = &OSTREAM_PROFILE;
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                self.phase = Phase::Listening;
                register(fabric, p);
                fabric.post(msg.result_reply(p.task, Code::Success));
                Ok(())
            }
            (Op::ReplyInfo, Body::Bus(info)) => {
                listener_step(fabric, p, &mut self.phase, info);
                Ok(())
            }
            (Op::ReplyInfo, Body::Result(_)) => Ok(()),
            (Op::MasterComplete, Body::Bus(info)) => {
                if let Some(ex) = master_step(fabric, p, &mut self.phase, &mut self.served, info)
                {
                    // Payload in hand: push it at the serial writer and
                    // wait for its verdict.
                    let mut data = Vec::new();
                    let _ = data.extend_from_slice(&ex.data);
                    fabric.post(Message::new(p.task, TaskId::SER, Op::Job, Body::Data(data)));
                    self.phase = Phase::Writing(ex);
                }
                Ok(())
            }
            (Op::ReplyResult, Body::Result(code)) => {
                match core::mem::replace(&mut self.phase, Phase::Listening) {
                    Phase::Writing(mut ex) => {
                        ex.count = if code.is_success() {
                            ex.data.len() as u8
                        } else {
                            0
                        };
                        ex.code = *code;
                        send_reply(fabric, p, &ex);
                        self.phase = Phase::Replying;
                    }
                    other => self.phase = other,
                }
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}

/// The remote input stream secretary: remote bytes into a local consumer
/// task, through the `NOT_EMPTY` pull protocol.
pub struct IStream {
    ring: &'static SharedRing,
    consumer: TaskId,
    phase: Phase,
    pub served: u32,
}

impl IStream {
    pub fn new(ring: &'static SharedRing, consumer: TaskId) -> Self {
        Self {
            ring,
            consumer,
            phase: Phase::Listening,
            served: 0,
        }
    }

    /// Feeds the fetched payload to the consumer; stops counting at the
    /// first dropped byte.
    fn feed(&mut self, fabric: Fabric, ex: &mut Exchange) {
        for byte in ex.data.iter() {
            match self.ring.push(*byte) {
                PushOutcome::Notify(task, source) => {
                    fabric.post(Message::new(
                        TaskId::ISTREAM,
                        task,
                        Op::NotEmpty,
                        Body::Chars(source),
                    ));
                    ex.count += 1;
                }
                PushOutcome::Stored => ex.count += 1,
                PushOutcome::Dropped => {
                    ex.code = Code::NoMem;
                    break;
                }
            }
        }
    }
}

impl Task for IStream {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        let p = &ISTREAM_PROFILE;
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                self.ring.set_consumer(self.consumer);
                self.phase = Phase::Listening;
                register(fabric, p);
                fabric.post(msg.result_reply(p.task, Code::Success));
                Ok(())
            }
            (Op::ReplyInfo, Body::Bus(info)) => {
                listener_step(fabric, p, &mut self.phase, info);
                Ok(())
            }
            (Op::ReplyInfo, Body::Result(_)) => Ok(()),
            (Op::MasterComplete, Body::Bus(info)) => {
                if let Some(mut ex) =
                    master_step(fabric, p, &mut self.phase, &mut self.served, info)
                {
                    self.feed(fabric, &mut ex);
                    send_reply(fabric, p, &ex);
                    self.phase = Phase::Replying;
                }
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}
