// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The serial-line driver: input multiplexer and byte writer.
//!
//! Received bytes land in a shared ring from the UART interrupt (see
//! [`isr_rx`]); the configured consumer task is told about the first byte of
//! every burst through the `NOT_EMPTY` protocol and pulls the rest itself.
//! Exactly one task consumes the line at a time: `SET_IOCTL(Consumer)`
//! switches it, emptying the ring so the new consumer starts clean and the
//! old consumer's pull capability goes stale.
//!
//! The transmit side is a plain byte sink: a `JOB` carrying `Data` writes
//! the bytes to the line and answers `REPLY_RESULT`. The output stream
//! secretary is its main customer.

#![cfg_attr(not(test), no_std)]

use abi::{Baud, Code, IoctlOp, Op, TaskId};
use bytering::{PushOutcome, SharedRing};
use kern::{Body, Fabric, Message, NoMsg, Task};

/// The UART as this driver sees it. Receive is interrupt-driven and comes
/// in through [`isr_rx`]; this trait carries the control and transmit
/// sides.
pub trait UartPort {
    fn set_baud(&mut self, baud: Baud);
    /// Queues bytes for transmission. 8-N-1 framing is fixed.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Code>;
}

/// The serial driver task.
pub struct SerialMux<U> {
    port: U,
    ring: &'static SharedRing,
    default_consumer: TaskId,
    default_baud: Baud,
}

impl<U: UartPort> SerialMux<U> {
    pub fn new(
        port: U,
        ring: &'static SharedRing,
        default_consumer: TaskId,
        default_baud: Baud,
    ) -> Self {
        Self {
            port,
            ring,
            default_consumer,
            default_baud,
        }
    }

    pub fn port_mut(&mut self) -> &mut U {
        &mut self.port
    }
}

impl<U: UartPort> Task for SerialMux<U> {
    fn receive(&mut self, fabric: Fabric, msg: &Message) -> Result<(), NoMsg> {
        match (msg.op, &msg.body) {
            (Op::Init, _) => {
                self.port.set_baud(self.default_baud);
                self.ring.set_consumer(self.default_consumer);
                fabric.post(msg.result_reply(TaskId::SER, Code::Success));
                Ok(())
            }
            (Op::SetIoctl, Body::Ioctl { op: IoctlOp::Consumer, arg }) => {
                self.ring.set_consumer(TaskId(*arg as u8));
                fabric.post(msg.result_reply(TaskId::SER, Code::Success));
                Ok(())
            }
            (Op::SetIoctl, Body::Ioctl { op: IoctlOp::Baudrate, arg }) => {
                let code = match num_traits::FromPrimitive::from_u32(*arg) {
                    Some(baud) => {
                        self.port.set_baud(baud);
                        Code::Success
                    }
                    None => Code::Inval,
                };
                fabric.post(msg.result_reply(TaskId::SER, code));
                Ok(())
            }
            (Op::Job, Body::Data(bytes)) => {
                let code = match self.port.write(bytes) {
                    Ok(()) => Code::Success,
                    Err(e) => e,
                };
                fabric.post(msg.result_reply(TaskId::SER, code));
                Ok(())
            }
            _ => Err(NoMsg),
        }
    }
}

/// UART receive interrupt entry: store the byte, and wake the consumer on
/// the empty-to-non-empty transition.
pub fn isr_rx(ring: &'static SharedRing, fabric: Fabric, byte: u8) {
    if let PushOutcome::Notify(task, source) = ring.push(byte) {
        fabric.post(Message::new(
            TaskId::SER,
            task,
            Op::NotEmpty,
            Body::Chars(source),
        ));
    }
}
