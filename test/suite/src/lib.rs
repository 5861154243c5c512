// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared scaffolding for the end-to-end tests: a bench of application
//! tasks that plug into a node's [`ExtraTasks`] hook, and builders for
//! simulated nodes.
//!
//! The bench tasks are deliberately the kinds of task the production
//! nodes hang off the kernel: a serial command parser (`Inp`), a job sink
//! it triggers (`Dmp`), a bus client driving requests at remote
//! secretaries (`StreamClient`), and a byte sink consuming stream input
//! (`Sink`).

use abi::{service, Addr, AlarmInfo, BusInfo, Code, Mode, Op, TaskId, Token, Window};
use bytering::ByteSource;
use kern::{Body, Fabric, Message, NoMsg, SharedQueue, Task};
use node::{Config, ExtraTasks, Node, Rings, INITTAB};
use sim::{FakeCounter, FakeUart, FakeWire, SimNode};

pub const INP: TaskId = TaskId(9);
pub const DMP: TaskId = TaskId(10);
pub const CLIENT: TaskId = TaskId(11);
pub const SINK: TaskId = TaskId(12);

/// A serial command parser in the style of the nodes' console tasks:
/// digits accumulate a value, `d` fires a dump job at [`DMP`], newline
/// clears the accumulator.
#[derive(Default)]
pub struct Inp {
    source: Option<ByteSource>,
    pub inval: u32,
    pub last_dump: Option<u32>,
}

impl Inp {
    fn consume(&mut self, fabric: Fabric) {
        let Some(source) = self.source else {
            return;
        };
        while let Ok(byte) = source.take() {
            match byte {
                b'0'..=b'9' => {
                    self.inval = self.inval * 10 + u32::from(byte - b'0');
                }
                b'd' => {
                    self.last_dump = Some(self.inval);
                    fabric.post(Message::new(INP, DMP, Op::Job, Body::Empty));
                }
                b'\n' => self.inval = 0,
                _ => {}
            }
        }
    }
}

impl Task for Inp {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::NotEmpty, Body::Chars(source)) => {
                self.source = Some(*source);
                self.consume(fabric);
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}

/// Counts the dump jobs the parser fires.
#[derive(Default)]
pub struct Dmp {
    pub jobs: u32,
}

impl Task for Dmp {
    fn receive(&mut self, _fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match msg.op {
            Op::Job => {
                self.jobs += 1;
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}

/// What the client should do when it gets `START`.
#[derive(Copy, Clone, Debug)]
pub enum Plan {
    /// Plain master write of one byte under an arbitrary service.
    Probe { peer: Addr, service: u8 },
    /// Master write-read against the peer's memory-peek service.
    Peek { peer: Addr, addr: u16, len: u8 },
    /// Stream request: ask the peer's ISTREAM/OSTREAM to pull `len`
    /// bytes out of our own windows at `addr`.
    Stream {
        peer: Addr,
        request: u8,
        reply: u8,
        addr: u16,
        len: u8,
    },
    /// Remote console line.
    Console { peer: Addr, line: &'static [u8] },
}

const PEEK_TOKEN: Token = Token(0x0100);
const EXCHANGE_TOKEN: Token = Token(0x0101);

/// A bus client driving one planned request, recording everything that
/// comes back.
pub struct StreamClient {
    own: Addr,
    pub plan: Option<Plan>,
    pub peek_result: Option<(Code, Vec<u8>)>,
    /// Result of the send half of a request (MT|SR migration ack).
    pub send_result: Option<Code>,
    /// The `{count, code}` reply routed back to our listener.
    pub reply: Option<(u8, Code)>,
    pub alarms: Vec<AlarmInfo>,
}

impl StreamClient {
    pub fn new(own: Addr) -> Self {
        Self {
            own,
            plan: None,
            peek_result: None,
            send_result: None,
            reply: None,
            alarms: Vec::new(),
        }
    }

    fn launch(&mut self, fabric: Fabric) {
        match self.plan {
            None => {}
            Some(Plan::Probe { peer, service }) => {
                let mut job = BusInfo::master(PEEK_TOKEN, peer, service);
                job.tx.extend_from_slice(&[0]).unwrap();
                fabric.post(Message::new(CLIENT, TaskId::TWI, Op::Job, Body::Bus(job)));
            }
            Some(Plan::Peek { peer, addr, len }) => {
                let mut job = BusInfo::master(PEEK_TOKEN, peer, service::MEMZ_REQUEST);
                job.mode = Mode::MT | Mode::MR;
                job.rx_want = len;
                job.tx
                    .extend_from_slice(&[(addr >> 8) as u8, addr as u8, len])
                    .unwrap();
                fabric.post(Message::new(CLIENT, TaskId::TWI, Op::Job, Body::Bus(job)));
            }
            Some(Plan::Stream {
                peer,
                request,
                reply,
                addr,
                len,
            }) => {
                let mut job = BusInfo::master(EXCHANGE_TOKEN, peer, request);
                job.mode = Mode::MT | Mode::SR;
                job.scmd = reply;
                job.rx.clear();
                job.rx
                    .extend_from_slice(&[
                        CLIENT.0,
                        EXCHANGE_TOKEN.hi(),
                        EXCHANGE_TOKEN.lo(),
                    ])
                    .unwrap();
                job.tx
                    .extend_from_slice(&[self.own.0, (addr >> 8) as u8, addr as u8, len])
                    .unwrap();
                fabric.post(Message::new(CLIENT, TaskId::TWI, Op::Job, Body::Bus(job)));
            }
            Some(Plan::Console { peer, line }) => {
                let mut job = BusInfo::master(EXCHANGE_TOKEN, peer, service::SYSCON_REQUEST);
                job.mode = Mode::MT | Mode::SR;
                job.scmd = service::SYSCON_REPLY;
                job.rx.clear();
                job.rx
                    .extend_from_slice(&[
                        CLIENT.0,
                        EXCHANGE_TOKEN.hi(),
                        EXCHANGE_TOKEN.lo(),
                    ])
                    .unwrap();
                job.tx.extend_from_slice(&[self.own.0]).unwrap();
                job.tx.extend_from_slice(line).unwrap();
                fabric.post(Message::new(CLIENT, TaskId::TWI, Op::Job, Body::Bus(job)));
            }
        }
    }
}

impl Task for StreamClient {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Start, _) => {
                self.launch(fabric);
                Ok(())
            }
            (Op::Alarm, Body::Alarm(info)) => {
                self.alarms.push(*info);
                Ok(())
            }
            (Op::MasterComplete, Body::Bus(info)) => {
                self.peek_result = Some((info.result, info.rx.to_vec()));
                Ok(())
            }
            (Op::MasterComplete, Body::Result(code)) => {
                self.send_result = Some(*code);
                Ok(())
            }
            (Op::ReplyInfo, Body::Bus(info)) => {
                let body = info.rx_body();
                if let [count, code] = body {
                    self.reply = Some((*count, Code::from_wire(*code)));
                }
                Ok(())
            }
            // Ioctl acknowledgements, cancel confirmations and the like.
            (Op::ReplyResult, Body::Result(_)) => Ok(()),
            (Op::ReplyInfo, Body::Alarm(_)) => Ok(()),
            (Op::ReplyInfo, Body::Result(_)) => Ok(()),
            _ => Err(NoMsg),
        }
    }
}

/// Collects everything an input stream feeds it.
#[derive(Default)]
pub struct Sink {
    pub bytes: Vec<u8>,
}

impl Task for Sink {
    fn receive(&mut self, _fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::NotEmpty, Body::Chars(source)) => {
                while let Ok(byte) = source.take() {
                    self.bytes.push(byte);
                }
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}

/// The bench task set hung off one node.
pub struct Bench {
    pub inp: Inp,
    pub dmp: Dmp,
    pub client: StreamClient,
    pub sink: Sink,
}

impl Bench {
    pub fn new(own: Addr) -> Self {
        Self {
            inp: Inp::default(),
            dmp: Dmp::default(),
            client: StreamClient::new(own),
            sink: Sink::default(),
        }
    }
}

impl ExtraTasks for Bench {
    fn task(&mut self, id: TaskId) -> Option<&mut dyn Task> {
        match id {
            INP => Some(&mut self.inp),
            DMP => Some(&mut self.dmp),
            CLIENT => Some(&mut self.client),
            SINK => Some(&mut self.sink),
            _ => None,
        }
    }
}

/// Builds a simulated node with the bench task set and the given peek
/// windows.
pub fn bench_node(addr: Addr, windows: &'static [Window]) -> SimNode<Bench> {
    let queue: &'static SharedQueue = Box::leak(Box::new(SharedQueue::new()));
    let rings: &'static Rings = Box::leak(Box::new(Rings::new()));
    let config = Config {
        addr,
        inittab: INITTAB,
        baud: abi::Baud::B115200,
        serial_consumer: INP,
        istream_consumer: SINK,
        console_consumer: INP,
        windows,
    };
    Node::new(
        &config,
        queue,
        rings,
        FakeCounter::default(),
        FakeWire::default(),
        FakeUart::default(),
        Bench::new(addr),
    )
}

/// Posts `START` to the node's client task.
pub fn start_client(node: &SimNode<Bench>) {
    node.fabric()
        .post(Message::new(TaskId::SYS, CLIENT, Op::Start, Body::Empty));
}
