// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stream and console secretary round trips between two nodes.

use abi::{addr, service, Code, Window};
use sim::Harness;
use test_suite::{bench_node, start_client, Bench, Plan};

static PAYLOAD: [u8; 8] = *b"1d\nhello";
static GATEWAY_WINDOWS: [Window; 1] = [Window {
    base: 0x0100,
    data: &PAYLOAD,
}];

static STORAGE_WINDOWS: [Window; 0] = [];

fn network() -> (Harness<Bench>, usize, usize) {
    let mut bus = Harness::new();
    let g = bus.add(addr::GATEWAY, bench_node(addr::GATEWAY, &GATEWAY_WINDOWS));
    let s = bus.add(addr::UTC, bench_node(addr::UTC, &STORAGE_WINDOWS));
    bus.node(g).start();
    bus.node(s).start();
    bus.run_ms(5);
    (bus, g, s)
}

#[test]
fn istream_delivers_bytes_to_remote_consumer() {
    let (mut bus, g, s) = network();
    bus.node(g).tasks.extra.client.plan = Some(Plan::Stream {
        peer: addr::UTC,
        request: service::ISTREAM_REQUEST,
        reply: service::ISTREAM_REPLY,
        addr: 0x0100,
        len: 3,
    });
    start_client(bus.node(g));
    bus.run_ms(50);

    // The storage node's stream consumer got the bytes, in order.
    assert_eq!(&bus.node(s).tasks.extra.sink.bytes, b"1d\n");

    // The gateway's client saw the send complete, then the reply.
    let client = &bus.node(g).tasks.extra.client;
    assert_eq!(client.send_result, Some(Code::Success));
    assert_eq!(client.reply, Some((3, Code::Success)));
}

#[test]
fn ostream_writes_remote_bytes_to_serial() {
    let (mut bus, g, s) = network();
    bus.node(g).tasks.extra.client.plan = Some(Plan::Stream {
        peer: addr::UTC,
        request: service::OSTREAM_REQUEST,
        reply: service::OSTREAM_REPLY,
        addr: 0x0103,
        len: 5,
    });
    start_client(bus.node(g));
    bus.run_ms(50);

    assert_eq!(&bus.node(s).tasks.ser.port_mut().written, b"hello");
    assert_eq!(
        bus.node(g).tasks.extra.client.reply,
        Some((5, Code::Success))
    );
}

#[test]
fn ostream_oversized_request_is_nomem_and_serial_untouched() {
    let (mut bus, g, s) = network();
    bus.node(g).tasks.extra.client.plan = Some(Plan::Stream {
        peer: addr::UTC,
        request: service::OSTREAM_REQUEST,
        reply: service::OSTREAM_REPLY,
        addr: 0x0100,
        len: 200,
    });
    start_client(bus.node(g));
    bus.run_ms(50);

    assert_eq!(
        bus.node(g).tasks.extra.client.reply,
        Some((0, Code::NoMem))
    );
    assert!(bus.node(s).tasks.ser.port_mut().written.is_empty());
}

#[test]
fn console_line_drives_remote_parser() {
    let (mut bus, g, s) = network();
    bus.node(g).tasks.extra.client.plan = Some(Plan::Console {
        peer: addr::UTC,
        line: b"12d\n",
    });
    start_client(bus.node(g));
    bus.run_ms(50);

    // The storage node's parser ran the command: "12d" dumps with 12.
    let inp = &bus.node(s).tasks.extra.inp;
    assert_eq!(inp.last_dump, Some(12));
    assert_eq!(inp.inval, 0);
    assert_eq!(bus.node(s).tasks.extra.dmp.jobs, 1);

    // And the client heard {count = 4, Success}.
    assert_eq!(
        bus.node(g).tasks.extra.client.reply,
        Some((4, Code::Success))
    );
}

#[test]
fn secretaries_re_register_between_requests() {
    let (mut bus, g, s) = network();
    for round in 1..=3u8 {
        bus.node(g).tasks.extra.client.reply = None;
        bus.node(g).tasks.extra.client.plan = Some(Plan::Stream {
            peer: addr::UTC,
            request: service::ISTREAM_REQUEST,
            reply: service::ISTREAM_REPLY,
            addr: 0x0100,
            len: 2,
        });
        start_client(bus.node(g));
        bus.run_ms(50);
        assert_eq!(
            bus.node(g).tasks.extra.client.reply,
            Some((2, Code::Success)),
            "round {round} failed"
        );
    }
    assert_eq!(bus.node(s).tasks.istream.served, 3);
}
