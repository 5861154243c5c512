// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared vocabulary for all nodes on the instrument bus.
//!
//! Every node firmware is built from the same kernel and service substrate;
//! this crate holds the definitions those pieces must agree on: task
//! identifiers, the closed opcode set, result codes, bus addresses and
//! service bytes, and the "info block" records that tasks lend to services
//! when requesting asynchronous work.
//!
//! Nothing in here does anything -- it is pure data, shared between the
//! kernel, the drivers, and the secretaries.

#![cfg_attr(not(test), no_std)]

use heapless::Vec;
use zerocopy::byteorder::big_endian::U16 as U16BE;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Names a task within one node.
///
/// Identifiers are small, dense, and assigned from the fixed table below at
/// build time. Zero is reserved to mean "no task"; `ANY` is a wildcard used
/// in routing prefixes to accept requests from any sender.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct TaskId(pub u8);

impl TaskId {
    /// "No task." Dispatching to this id counts as a lost message.
    pub const NONE: Self = Self(0);
    /// System supervisor; runs the init cascade and absorbs error reports.
    pub const SYS: Self = Self(1);
    /// Alarm clock service.
    pub const CLK: Self = Self(2);
    /// Two-wire bus driver.
    pub const TWI: Self = Self(3);
    /// Serial-line input multiplexer.
    pub const SER: Self = Self(4);
    /// Memory-peek secretary.
    pub const MEMZ: Self = Self(5);
    /// Output stream secretary.
    pub const OSTREAM: Self = Self(6);
    /// Input stream secretary.
    pub const ISTREAM: Self = Self(7);
    /// Remote console secretary.
    pub const SYSCON: Self = Self(8);

    /// First identifier available for per-node tasks (parsers, device
    /// drivers). Everything from here up to `ANY` is the application's.
    pub const FIRST_APP: u8 = 9;

    /// Wildcard sender, used as the first suffix byte of a listener's rx
    /// buffer to accept a request from anyone.
    pub const ANY: Self = Self(0xFF);
}

/// The closed set of message opcodes shared by every task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Op {
    Init,
    Start,
    Stop,
    Update,
    SetIoctl,
    SetAlarm,
    PeriodicAlarm,
    Cancel,
    Job,
    ReplyResult,
    ReplyInfo,
    ReplyData,
    Alarm,
    Eoc,
    NotEmpty,
    NotBusy,
    AdcReady,
    ButtonChange,
    MasterComplete,
    SlaveComplete,
    ReadyRequest,
}

impl Op {
    /// True for opcodes that originate in interrupt context. The queue
    /// delivers these ahead of everything posted from task context, so a
    /// completion is never stranded behind a flood of new work.
    pub fn is_urgent(self) -> bool {
        matches!(
            self,
            Op::Alarm
                | Op::Eoc
                | Op::NotEmpty
                | Op::NotBusy
                | Op::AdcReady
                | Op::ButtonChange
                | Op::MasterComplete
                | Op::SlaveComplete
        )
    }
}

/// Result codes carried by every reply.
///
/// The set mirrors the errno family the services were designed around; the
/// analogue is noted per variant. Codes cross the wire as single bytes
/// (hence `FromPrimitive`), so the discriminants are part of the bus ABI.
#[derive(Copy, Clone, Debug, Eq, PartialEq, num_derive::FromPrimitive)]
#[repr(u8)]
pub enum Code {
    /// EOK.
    Success = 0,
    /// EAGAIN: temporary condition, retry later.
    Again = 1,
    /// ENOMEM: allocation or pool slot unavailable.
    NoMem = 2,
    /// EACCES: the peer rejected a byte of the request.
    Access = 3,
    /// EBUSY: resource mid-operation; try again once it settles.
    Busy = 4,
    /// EINVAL: request malformed or out of range.
    Inval = 5,
    /// ENODEV: the addressed peer never answered.
    NoDev = 6,
    /// ESRCH: no such pending job.
    NotFound = 7,
    /// EBADE: listener buffer too small for the exchange.
    BadExchange = 8,
    /// EBADRQC: no listener registered for the requested service.
    BadRequest = 9,
    /// ECONNABORTED: slave-side transaction torn down mid-flight.
    Aborted = 10,
    /// ECONNREFUSED: master-side transaction torn down mid-flight.
    Refused = 11,
    /// EHOSTDOWN: the bus never went quiet enough to transmit.
    HostDown = 12,
    /// ENOMSG: opcode not accepted in any state.
    NoMsg = 13,
    /// EWOULDBLOCK: byte source empty; not an error.
    WouldBlock = 14,
    /// ENOSYS: operation recognized but unimplemented.
    Unimplemented = 15,
    /// E2BIG: payload exceeds what the service can carry.
    TooBig = 16,
    /// ENXIO: address outside every registered window.
    NoRegion = 17,
}

impl Code {
    /// Decodes a code byte received off the wire. Unknown bytes collapse to
    /// `Inval` rather than being invented.
    pub fn from_wire(byte: u8) -> Self {
        num_traits::FromPrimitive::from_u8(byte).unwrap_or(Code::Inval)
    }

    pub fn is_success(self) -> bool {
        self == Code::Success
    }
}

/// Correlation handle for an outstanding job.
///
/// A task picks a token for each info block it owns; the (owner, token) pair
/// identifies the job to the service for cancellation, and the token's two
/// bytes ride in the bus command prefix so replies can be routed back.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct Token(pub u16);

impl Token {
    pub fn hi(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn lo(self) -> u8 {
        self.0 as u8
    }

    pub fn from_bytes(hi: u8, lo: u8) -> Self {
        Self(u16::from(hi) << 8 | u16::from(lo))
    }
}

/// A 7-bit bus node address.
///
/// The read/write direction bit is a wire-level detail below this type; an
/// `Addr` is just the role identity of a node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct Addr(pub u8);

/// The general-call address; slave jobs with `Mode::GC` also match it.
pub const GENERAL_CALL: Addr = Addr(0x00);

/// Documented role addresses for the reference network.
pub mod addr {
    use super::Addr;

    /// UTC clock and storage node.
    pub const UTC: Addr = Addr(0x34);
    pub const AUX: Addr = Addr(0x36);
    /// Character LCD node.
    pub const LCD: Addr = Addr(0x38);
    pub const SPARE: Addr = Addr(0x3A);
    /// Serial gateway node.
    pub const GATEWAY: Addr = Addr(0x3C);
    /// SPI OLED node.
    pub const OLED: Addr = Addr(0x3E);
    /// Barometer node.
    pub const BARO: Addr = Addr(0x40);
    /// TWI OLED node.
    pub const TWI_OLED: Addr = Addr(0x42);
}

/// Service bytes: the flat 8-bit namespace (128..=177) that the leading byte
/// of every bus request is drawn from. Each slave listener registers exactly
/// one of these.
pub mod service {
    pub const FIRST: u8 = 128;
    pub const LAST: u8 = 177;

    pub const UTC_REQUEST: u8 = 143;
    pub const MEMZ_REQUEST: u8 = 144;
    pub const SYSCON_REQUEST: u8 = 160;
    pub const SYSCON_REPLY: u8 = 161;
    pub const ISTREAM_REQUEST: u8 = 168;
    pub const ISTREAM_REPLY: u8 = 169;
    pub const OSTREAM_REQUEST: u8 = 170;
    pub const OSTREAM_REPLY: u8 = 171;
}

/// Control codes for `SET_IOCTL`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IoctlOp {
    /// Switch the serial mux's consumer task. The argument is a raw task id.
    Consumer,
    /// Switch the serial line's baud rate. The argument is a `Baud`
    /// discriminant.
    Baudrate,
}

/// The enumerated serial line rates.
#[derive(Copy, Clone, Debug, Eq, PartialEq, num_derive::FromPrimitive)]
#[repr(u8)]
pub enum Baud {
    B9600 = 0,
    B19200 = 1,
    B38400 = 2,
    B57600 = 3,
    B115200 = 4,
    B230400 = 5,
}

impl Baud {
    pub fn bits_per_sec(self) -> u32 {
        match self {
            Baud::B9600 => 9_600,
            Baud::B19200 => 19_200,
            Baud::B38400 => 38_400,
            Baud::B57600 => 57_600,
            Baud::B115200 => 115_200,
            Baud::B230400 => 230_400,
        }
    }
}

bitflags::bitflags! {
    /// Bus job mode mask.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Mode: u8 {
        /// Master transmit.
        const MT = 1 << 0;
        /// Master receive (combined with MT: write-then-read).
        const MR = 1 << 1;
        /// Slave receive: sit in the pool and accept matching requests.
        const SR = 1 << 2;
        /// Slave transmit: serve a read phase via the handoff callback.
        const ST = 1 << 3;
        /// Also match the general-call address.
        const GC = 1 << 4;
    }
}

impl Mode {
    /// Checks the mask against the combinations the driver implements.
    ///
    /// MT|SR is the send-then-listen compound: the info runs as a master
    /// job first and migrates into the slave pool when that completes.
    pub fn is_legal(self) -> bool {
        self == Mode::MT
            || self == Mode::SR
            || self == Mode::MT.union(Mode::MR)
            || self == Mode::MT.union(Mode::SR)
            || self == Mode::SR.union(Mode::ST)
            || self == Mode::GC.union(Mode::SR)
            || self == Mode::GC.union(Mode::SR).union(Mode::ST)
    }

    pub fn is_master(self) -> bool {
        self.contains(Mode::MT)
    }

    pub fn is_slave(self) -> bool {
        self.intersects(Mode::SR)
    }
}

/// Number of command-prefix bytes at the head of every slave-side
/// transaction: the service byte plus the three routing bytes.
pub const FBC: usize = 4;

/// Routing bytes that follow the service byte: sender task id, then the
/// sender's token, high byte first.
pub const PREFIX: usize = FBC - 1;

/// Capacity of an info block's data buffers, and the largest request body a
/// frame can carry.
pub const DATA_SIZE: usize = 32;

/// Capacity of a listener's rx buffer: the routing prefix plus a full body.
pub const RX_SIZE: usize = PREFIX + DATA_SIZE;

/// A readable region registered with the memory-peek service.
///
/// This stands in for raw address peeking: a node decides at build time
/// which spans of its memory are visible, and requests outside every window
/// fail with `NoRegion`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window {
    /// Address of the first byte as seen by remote peers.
    pub base: u16,
    pub data: &'static [u8],
}

impl Window {
    /// Resolves `[addr, addr + len)` within this window, if fully covered.
    pub fn slice(&self, addr: u16, len: usize) -> Option<&'static [u8]> {
        let off = addr.checked_sub(self.base)? as usize;
        self.data.get(off..off.checked_add(len)?)
    }
}

/// Looks an address range up across a node's registered windows.
pub fn peek(windows: &[Window], addr: u16, len: usize) -> Option<&'static [u8]> {
    windows.iter().find_map(|w| w.slice(addr, len))
}

/// Callback run by the bus driver when a slave-transmit phase begins: the
/// listener fills `tx` from its received request before the bytes go out in
/// the same transaction.
pub type Handoff = fn(&mut BusInfo) -> Code;

/// Alarm clock info block.
///
/// The owning task lends this to the clock with `SET_ALARM` (or
/// `PERIODIC_ALARM`); it comes back in the `ALARM` message when the delay
/// elapses. One request at a time per token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AlarmInfo {
    pub token: Token,
    pub delay_ms: u32,
    /// Zero for a one-shot alarm; otherwise the alarm re-arms itself this
    /// many milliseconds after each expiry until cancelled.
    pub period_ms: u32,
    pub result: Code,
}

impl AlarmInfo {
    pub fn once(token: Token, delay_ms: u32) -> Self {
        Self {
            token,
            delay_ms,
            period_ms: 0,
            result: Code::Success,
        }
    }

    pub fn every(token: Token, period_ms: u32) -> Self {
        Self {
            token,
            delay_ms: period_ms,
            period_ms,
            result: Code::Success,
        }
    }
}

/// Bus driver info block.
///
/// Master jobs fill `peer`, `mcmd`, `tx` and (for MT|MR) `rx_want`. Slave
/// jobs fill `scmd` and pre-fill `rx` with the three routing bytes they are
/// willing to accept -- a specific [task, token-hi, token-lo] triple for a
/// targeted reply, or `TaskId::ANY` in the first byte to accept anyone.
/// On completion `rx` holds the received bytes in wire order and `result`
/// holds the outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusInfo {
    pub token: Token,
    pub peer: Addr,
    pub mode: Mode,
    /// Leading service byte of the master transmission.
    pub mcmd: u8,
    /// Service byte this job listens for in the slave pool.
    pub scmd: u8,
    /// Routing triple for the master transmission. All zeros (no task is
    /// numbered zero) means "the driver fills in [owner, token]", which is
    /// right for fresh requests; a reply job copies the requester's triple
    /// here so the far end can route it to the waiting listener.
    pub prefix: [u8; PREFIX],
    pub tx: Vec<u8, DATA_SIZE>,
    pub rx: Vec<u8, RX_SIZE>,
    /// Bytes expected back in the master-receive phase.
    pub rx_want: u8,
    /// Largest request body this listener is prepared to take; zero means
    /// the whole buffer. A longer request overflows the listener
    /// (`BadExchange`).
    pub rx_limit: u8,
    pub handoff: Option<Handoff>,
    /// Peek map the handoff resolves requests against.
    pub windows: Option<&'static [Window]>,
    pub result: Code,
}

impl BusInfo {
    pub fn master(token: Token, peer: Addr, mcmd: u8) -> Self {
        Self {
            token,
            peer,
            mode: Mode::MT,
            mcmd,
            scmd: 0,
            prefix: [0; PREFIX],
            tx: Vec::new(),
            rx: Vec::new(),
            rx_want: 0,
            rx_limit: 0,
            handoff: None,
            windows: None,
            result: Code::Success,
        }
    }

    /// Builds a pool listener accepting `scmd` requests from any sender.
    pub fn listener(token: Token, scmd: u8) -> Self {
        let mut info = Self::master(token, GENERAL_CALL, 0);
        info.mode = Mode::SR;
        info.scmd = scmd;
        info.rx.clear();
        // Unwrap safety: RX_SIZE is nonzero.
        info.rx.push(TaskId::ANY.0).unwrap();
        info
    }

    /// Builds a pool listener accepting only the reply to the given
    /// (task, token) request.
    pub fn reply_listener(token: Token, scmd: u8, from: TaskId) -> Self {
        let mut info = Self::listener(token, scmd);
        info.rx.clear();
        info.rx.extend_from_slice(&[from.0, token.hi(), token.lo()]).unwrap();
        info
    }

    /// True if this listener accepts any sender.
    pub fn accepts_any(&self) -> bool {
        self.rx.first() == Some(&TaskId::ANY.0)
    }

    /// Body of a completed slave receive, past the routing prefix.
    pub fn rx_body(&self) -> &[u8] {
        self.rx.get(PREFIX..).unwrap_or(&[])
    }
}

/// One master transaction as observed by the slave side: a write of
/// `data` under `service`/`prefix`, optionally followed by a read of
/// `read_len` bytes back in the same transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub to: Addr,
    pub from: Addr,
    pub service: u8,
    pub prefix: [u8; PREFIX],
    pub data: Vec<u8, DATA_SIZE>,
    pub read_len: u8,
}

impl Frame {
    pub fn is_general_call(&self) -> bool {
        self.to == GENERAL_CALL
    }
}

/// Memory-peek request body.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug)]
#[repr(C)]
pub struct PeekRequest {
    pub addr: U16BE,
    pub len: u8,
}

/// Stream (ISTREAM/OSTREAM) request body. The two-wire protocol never
/// shows a slave the master's address, so the client names its own node
/// here; the secretary fetches the payload by a peek request back to that
/// node, at `addr`/`len` within the client's windows.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug)]
#[repr(C)]
pub struct StreamRequest {
    /// Bus address of the requesting node.
    pub node: u8,
    pub addr: U16BE,
    pub len: u8,
}

/// Stream reply body: how many payload bytes were consumed, and the
/// outcome.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug)]
#[repr(C)]
pub struct StreamReply {
    pub count: u8,
    pub code: u8,
}
