// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Two simulated nodes on one bus: a gateway probing a storage node.
//!
//! Runs the init cascade on both nodes, then has a probe task on the
//! gateway set a timer, peek its own node (loopback) and peek the storage
//! node across the wire, printing what comes back.

use abi::{addr, service, AlarmInfo, BusInfo, Code, Mode, Op, TaskId, Token, Window};
use kern::{Body, Fabric, Message, NoMsg, SharedQueue, Task};
use node::{Config, ExtraTasks, Node, Rings, INITTAB};
use sim::{FakeCounter, FakeUart, FakeWire, Harness, SimNode};

const PROBE: TaskId = TaskId(9);

static STORAGE_REGS: [u8; 8] = [0x26, 0x07, 0x19, 0x12, 0x34, 0x56, 0x00, 0x5A];
static STORAGE_WINDOWS: [Window; 1] = [Window {
    base: 0x0200,
    data: &STORAGE_REGS,
}];

static GATEWAY_BANNER: [u8; 4] = *b"gate";
static GATEWAY_WINDOWS: [Window; 1] = [Window {
    base: 0x0100,
    data: &GATEWAY_BANNER,
}];

/// The gateway's probe task: one timer, one loopback peek, one remote
/// peek.
#[derive(Default)]
struct Probe {
    active: bool,
}

impl Probe {
    fn peek(&self, fabric: Fabric, token: u16, peer: abi::Addr, addr: u16, len: u8) {
        let mut job = BusInfo::master(Token(token), peer, service::MEMZ_REQUEST);
        job.mode = Mode::MT | Mode::MR;
        job.rx_want = len;
        job.tx
            .extend_from_slice(&[(addr >> 8) as u8, addr as u8, len])
            .unwrap();
        fabric.post(Message::new(PROBE, TaskId::TWI, Op::Job, Body::Bus(job)));
    }
}

impl Task for Probe {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Start, _) => {
                self.active = true;
                fabric.post(Message::new(
                    PROBE,
                    TaskId::CLK,
                    Op::SetAlarm,
                    Body::Alarm(AlarmInfo::once(Token(1), 100)),
                ));
                self.peek(fabric, 2, addr::GATEWAY, 0x0100, 4);
                self.peek(fabric, 3, addr::UTC, 0x0200, 4);
                Ok(())
            }
            (Op::Alarm, Body::Alarm(info)) => {
                println!("probe: alarm fired ({:?})", info.result);
                Ok(())
            }
            (Op::MasterComplete, Body::Bus(info)) => {
                let what = match info.token {
                    Token(2) => "loopback peek",
                    _ => "remote peek",
                };
                if info.result == Code::Success {
                    println!("probe: {what} -> {:02x?}", &info.rx[..]);
                } else {
                    println!("probe: {what} failed ({:?})", info.result);
                }
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}

impl ExtraTasks for Probe {
    fn task(&mut self, id: TaskId) -> Option<&mut dyn Task> {
        (id == PROBE).then_some(self as &mut dyn Task)
    }
}

static GATEWAY_QUEUE: SharedQueue = SharedQueue::new();
static GATEWAY_RINGS: Rings = Rings::new();
static STORAGE_QUEUE: SharedQueue = SharedQueue::new();
static STORAGE_RINGS: Rings = Rings::new();

fn main() {
    let gateway_config = Config {
        addr: addr::GATEWAY,
        inittab: INITTAB,
        baud: abi::Baud::B115200,
        serial_consumer: PROBE,
        istream_consumer: PROBE,
        console_consumer: PROBE,
        windows: &GATEWAY_WINDOWS,
    };
    let storage_config = Config {
        addr: addr::UTC,
        inittab: INITTAB,
        baud: abi::Baud::B115200,
        serial_consumer: TaskId::NONE,
        istream_consumer: TaskId::NONE,
        console_consumer: TaskId::NONE,
        windows: &STORAGE_WINDOWS,
    };

    let gateway: SimNode<Probe> = Node::new(
        &gateway_config,
        &GATEWAY_QUEUE,
        &GATEWAY_RINGS,
        FakeCounter::default(),
        FakeWire::default(),
        FakeUart::default(),
        Probe::default(),
    );
    let storage: SimNode<Probe> = Node::new(
        &storage_config,
        &STORAGE_QUEUE,
        &STORAGE_RINGS,
        FakeCounter::default(),
        FakeWire::default(),
        FakeUart::default(),
        Probe::default(),
    );

    let mut bus: Harness<Probe> = Harness::new();
    let g = bus.add(addr::GATEWAY, gateway);
    let s = bus.add(addr::UTC, storage);

    bus.node(g).start();
    bus.node(s).start();
    bus.run_ms(10);
    println!(
        "gateway up: {}, storage up: {} (listeners: {}/{})",
        bus.node(g).is_up(),
        bus.node(s).is_up(),
        bus.node(g).tasks.twi.pool_len(),
        bus.node(s).tasks.twi.pool_len(),
    );

    let fabric = bus.node(g).fabric();
    fabric.post(Message::new(TaskId::SYS, PROBE, Op::Start, Body::Empty));
    bus.run_ms(150);

    let c = bus.node(g).counters();
    println!(
        "gateway counters: {} dispatched, {} lost, depth {}",
        c.cycle_count, c.lost_msgs, c.queue_depth
    );
}
