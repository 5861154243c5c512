// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated hardware for hosted runs and end-to-end tests.
//!
//! Three fakes stand in for the ports a real board provides -- a windowed
//! counter, a frame-level wire, a capturing UART -- plus a [`Harness`]
//! that owns several nodes, carries frames between them with the right
//! wire-level verdicts (absent peer: address NACK; refused request: data
//! NACK), and advances simulated time one millisecond at a time.
//!
//! This crate is host-only; nothing in it ships on a node.

use abi::{Addr, Baud, Code, Frame, DATA_SIZE};
use drv_clock::CounterPort;
use drv_serial::UartPort;
use drv_twi::{MasterOutcome, SlaveRefusal, WirePort, WireStatus};
use node::{ExtraTasks, Node};

/// The hardware counter: counts up to a programmed window, overflow is
/// polled by the harness.
#[derive(Debug, Default)]
pub struct FakeCounter {
    pub window: u32,
    pub elapsed: u32,
    pub running: bool,
}

impl CounterPort for FakeCounter {
    fn set_window(&mut self, window: u32) {
        self.window = window;
        self.elapsed = 0;
        self.running = true;
    }

    fn elapsed(&self) -> u32 {
        self.elapsed
    }

    fn stop(&mut self) {
        self.running = false;
    }
}

/// The wire: transmitted frames sit in `pending` until the harness picks
/// them up; the outcome is parked for the driver's doorbell.
#[derive(Debug, Default)]
pub struct FakeWire {
    pub pending: Option<Frame>,
    outcome: Option<MasterOutcome>,
    pub slave_ack: bool,
    pub gc: bool,
    /// Scripted bus activity: while true, the bus never reads idle.
    pub busy: bool,
    /// Master transactions started, for retry-budget assertions.
    pub tx_count: u32,
}

impl FakeWire {
    pub fn complete(&mut self, outcome: MasterOutcome) {
        self.outcome = Some(outcome);
    }
}

impl WirePort for FakeWire {
    fn bus_idle(&mut self) -> bool {
        !self.busy
    }

    fn set_slave(&mut self, ack: bool, gc: bool) {
        self.slave_ack = ack;
        self.gc = gc;
    }

    fn transmit(&mut self, frame: Frame) {
        self.tx_count += 1;
        self.pending = Some(frame);
    }

    fn take_outcome(&mut self) -> Option<MasterOutcome> {
        self.outcome.take()
    }
}

/// The UART: captures writes, remembers the configured rate.
#[derive(Debug, Default)]
pub struct FakeUart {
    pub written: Vec<u8>,
    pub baud: Option<Baud>,
}

impl UartPort for FakeUart {
    fn set_baud(&mut self, baud: Baud) {
        self.baud = Some(baud);
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Code> {
        self.written.extend_from_slice(bytes);
        Ok(())
    }
}

/// A node on simulated hardware.
pub type SimNode<X = ()> = Node<FakeCounter, FakeWire, FakeUart, X>;

/// Several simulated nodes sharing one bus.
pub struct Harness<X = ()> {
    pub nodes: Vec<(Addr, SimNode<X>)>,
}

impl<X: ExtraTasks> Harness<X> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Adds a node; returns its index.
    pub fn add(&mut self, addr: Addr, node: SimNode<X>) -> usize {
        self.nodes.push((addr, node));
        self.nodes.len() - 1
    }

    pub fn node(&mut self, index: usize) -> &mut SimNode<X> {
        &mut self.nodes[index].1
    }

    /// Runs every node's dispatch loop and moves frames across the bus
    /// until the whole network goes quiet. Time does not advance; pending
    /// back-off alarms stay pending.
    pub fn pump(&mut self) {
        loop {
            let mut progress = false;
            for (_, node) in self.nodes.iter_mut() {
                if node.run_until_idle() > 0 {
                    progress = true;
                }
            }

            for i in 0..self.nodes.len() {
                let Some(frame) = self.nodes[i].1.tasks.twi.port_mut().pending.take() else {
                    continue;
                };
                progress = true;
                let outcome = self.deliver(i, &frame);
                let node = &mut self.nodes[i].1;
                node.tasks.twi.port_mut().complete(outcome);
                node.twi_master_done();
            }

            if !progress {
                break;
            }
        }
    }

    /// Carries one frame to its destination and synthesizes the master's
    /// wire-level outcome.
    fn deliver(&mut self, from: usize, frame: &Frame) -> MasterOutcome {
        let empty = heapless::Vec::new();
        if frame.is_general_call() {
            // Nobody NACKs a general call; interested nodes take it,
            // everyone else ignores it.
            for j in 0..self.nodes.len() {
                if j != from {
                    let _ = self.nodes[j].1.twi_slave_frame(frame);
                }
            }
            return MasterOutcome {
                status: WireStatus::Done,
                rx: empty,
            };
        }

        let target = self
            .nodes
            .iter()
            .position(|(addr, _)| *addr == frame.to);
        let Some(j) = target else {
            return MasterOutcome {
                status: WireStatus::AddrNack,
                rx: empty,
            };
        };
        match self.nodes[j].1.twi_slave_frame(frame) {
            Ok(read) => MasterOutcome {
                status: WireStatus::Done,
                rx: read,
            },
            Err(SlaveRefusal::Unaddressed) => MasterOutcome {
                status: WireStatus::AddrNack,
                rx: empty,
            },
            Err(SlaveRefusal::Rejected) => MasterOutcome {
                status: WireStatus::DataNack,
                rx: empty,
            },
        }
    }

    /// Advances one millisecond of simulated time on every node's counter,
    /// then settles the network.
    pub fn tick(&mut self) {
        self.pump();
        for i in 0..self.nodes.len() {
            let node = &mut self.nodes[i].1;
            let counter = node.tasks.clk.port_mut();
            if !counter.running {
                continue;
            }
            counter.elapsed += 1;
            if counter.elapsed >= counter.window {
                node.counter_overflow();
            }
        }
        self.pump();
    }

    /// Runs `ms` milliseconds of bus and clock activity.
    pub fn run_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.tick();
        }
        self.pump();
    }
}

impl<X: ExtraTasks> Default for Harness<X> {
    fn default() -> Self {
        Self::new()
    }
}

/// Rx bytes of a master read, as the harness hands them back.
pub type ReadBytes = heapless::Vec<u8, DATA_SIZE>;
