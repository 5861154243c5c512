// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The node runtime: the standard task set wired to one kernel.
//!
//! Every node on the bus runs this composition -- supervisor, clock, bus
//! driver, serial mux, and the four secretaries -- plus whatever per-node
//! tasks (command parsers, device drivers) the application hangs off the
//! [`ExtraTasks`] hook. Per-node variation is entirely in the [`Config`]
//! value and the extra task set, both fixed at build time.
//!
//! The interrupt surface is the four `Node` methods named `uart_rx`,
//! `counter_overflow`, `twi_master_done` and `twi_slave_frame`. They are
//! the *only* routines an interrupt handler may call, and the platform
//! glue must invoke them under its interrupt-disable critical section;
//! everything else belongs to the dispatch loop.

#![cfg_attr(not(test), no_std)]

use abi::{Addr, Baud, Frame, TaskId, Window, DATA_SIZE};
use bytering::SharedRing;
use drv_clock::{Clock, CounterPort};
use drv_serial::{SerialMux, UartPort};
use drv_twi::{SlaveRefusal, Twi, WirePort};
use heapless::Vec;
use kern::queue::Counters;
use kern::{Fabric, Kernel, SharedQueue, SysInit, Task, TaskTable};
use task_memz::Memz;
use task_stream::{IStream, OStream};
use task_syscon::SysCon;

/// Hook for the application's own tasks. Ids from [`TaskId::FIRST_APP`] up
/// are routed here.
pub trait ExtraTasks {
    fn task(&mut self, id: TaskId) -> Option<&mut dyn Task>;
}

/// A node with no application tasks.
impl ExtraTasks for () {
    fn task(&mut self, _id: TaskId) -> Option<&mut dyn Task> {
        None
    }
}

/// Build-time description of one node.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// This node's bus address.
    pub addr: Addr,
    /// Dynamic-init order; see [`kern::startup`].
    pub inittab: &'static [TaskId],
    pub baud: Baud,
    /// First consumer of the serial line (usually the command parser).
    pub serial_consumer: TaskId,
    /// Consumer fed by the input stream secretary.
    pub istream_consumer: TaskId,
    /// Parser fed by the remote console secretary.
    pub console_consumer: TaskId,
    /// Memory spans the peek service exposes.
    pub windows: &'static [Window],
}

/// The standard inittab: every core service, drivers before secretaries so
/// the listeners land in a live pool.
pub const INITTAB: &[TaskId] = &[
    TaskId::CLK,
    TaskId::TWI,
    TaskId::SER,
    TaskId::MEMZ,
    TaskId::OSTREAM,
    TaskId::ISTREAM,
    TaskId::SYSCON,
];

/// The byte rings a node shares between producers and consumers. Lives in
/// a static next to the node's [`SharedQueue`].
pub struct Rings {
    pub serial: SharedRing,
    pub istream: SharedRing,
    pub console: SharedRing,
}

impl Rings {
    pub const fn new() -> Self {
        Self {
            serial: SharedRing::new(),
            istream: SharedRing::new(),
            console: SharedRing::new(),
        }
    }
}

impl Default for Rings {
    fn default() -> Self {
        Self::new()
    }
}

/// The dispatch table: the fixed task set plus the application hook.
pub struct NodeTasks<C, W, U, X> {
    pub sys: SysInit,
    pub clk: Clock<C>,
    pub twi: Twi<W>,
    pub ser: SerialMux<U>,
    pub memz: Memz,
    pub ostream: OStream,
    pub istream: IStream,
    pub syscon: SysCon,
    pub extra: X,
}

impl<C, W, U, X> TaskTable for NodeTasks<C, W, U, X>
where
    C: CounterPort,
    W: WirePort,
    U: UartPort,
    X: ExtraTasks,
{
    fn task(&mut self, id: TaskId) -> Option<&mut dyn Task> {
        match id {
            TaskId::SYS => Some(&mut self.sys),
            TaskId::CLK => Some(&mut self.clk),
            TaskId::TWI => Some(&mut self.twi),
            TaskId::SER => Some(&mut self.ser),
            TaskId::MEMZ => Some(&mut self.memz),
            TaskId::OSTREAM => Some(&mut self.ostream),
            TaskId::ISTREAM => Some(&mut self.istream),
            TaskId::SYSCON => Some(&mut self.syscon),
            other => self.extra.task(other),
        }
    }
}

/// One node: kernel plus task set.
pub struct Node<C, W, U, X = ()> {
    kernel: Kernel,
    serial_ring: &'static SharedRing,
    pub tasks: NodeTasks<C, W, U, X>,
}

impl<C, W, U, X> Node<C, W, U, X>
where
    C: CounterPort,
    W: WirePort,
    U: UartPort,
    X: ExtraTasks,
{
    /// Static startup: bind the ports and build the task set. Dynamic
    /// startup happens through [`Node::start`] and the dispatch loop.
    pub fn new(
        config: &Config,
        queue: &'static SharedQueue,
        rings: &'static Rings,
        counter: C,
        wire: W,
        uart: U,
        extra: X,
    ) -> Self {
        let fabric = Fabric::new(queue);
        Self {
            kernel: Kernel::new(fabric),
            serial_ring: &rings.serial,
            tasks: NodeTasks {
                sys: SysInit::new(config.inittab),
                clk: Clock::new(counter),
                twi: Twi::new(wire, config.addr),
                ser: SerialMux::new(
                    uart,
                    &rings.serial,
                    config.serial_consumer,
                    config.baud,
                ),
                memz: Memz::new(config.windows),
                ostream: OStream::new(),
                istream: IStream::new(&rings.istream, config.istream_consumer),
                syscon: SysCon::new(&rings.console, config.console_consumer),
                extra,
            },
        }
    }

    pub fn fabric(&self) -> Fabric {
        self.kernel.fabric()
    }

    pub fn counters(&self) -> Counters {
        self.kernel.fabric().counters()
    }

    /// Posts the INIT that kicks off the cascade. Call once, with
    /// interrupts live, before entering the dispatch loop.
    pub fn start(&mut self) {
        kern::startup::start(&self.kernel);
    }

    pub fn step(&mut self) -> bool {
        let Self { kernel, tasks, .. } = self;
        kernel.step(tasks)
    }

    pub fn run_until_idle(&mut self) -> u32 {
        let Self { kernel, tasks, .. } = self;
        kernel.run_until_idle(tasks)
    }

    pub fn run_forever(&mut self, idle: fn()) -> ! {
        let Self { kernel, tasks, .. } = self;
        kernel.run_forever(tasks, idle)
    }

    // --- interrupt surface -------------------------------------------

    /// UART receive interrupt.
    pub fn uart_rx(&self, byte: u8) {
        drv_serial::isr_rx(self.serial_ring, self.kernel.fabric(), byte);
    }

    /// Counter overflow interrupt.
    pub fn counter_overflow(&mut self) {
        let fabric = self.kernel.fabric();
        self.tasks.clk.on_overflow(fabric);
    }

    /// Bus master-transaction completion interrupt. The outcome itself is
    /// parked in the wire port; this just rings the driver's doorbell.
    pub fn twi_master_done(&mut self) {
        self.kernel.fabric().post(kern::Message::new(
            TaskId::TWI,
            TaskId::TWI,
            abi::Op::MasterComplete,
            kern::Body::Empty,
        ));
    }

    /// Bus slave-transaction interrupt: a remote master addressed us.
    pub fn twi_slave_frame(&mut self, frame: &Frame) -> Result<Vec<u8, DATA_SIZE>, SlaveRefusal> {
        let fabric = self.kernel.fabric();
        self.tasks.twi.slave_frame(fabric, frame)
    }

    /// True once the init cascade has completed.
    pub fn is_up(&self) -> bool {
        self.tasks.sys.is_idle()
    }

    /// Convenience for tests and diagnostics.
    pub fn lost_msgs(&self) -> u32 {
        self.counters().lost_msgs
    }
}
