// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The literal end-to-end scenarios: a timed alarm, and a serial command
//! line parsed byte by byte.

use abi::{addr, AlarmInfo, Code, Op, TaskId, Token, Window};
use kern::{Body, Message};
use sim::Harness;
use test_suite::{bench_node, Bench, CLIENT};

static WINDOWS: [Window; 0] = [];

fn single_node() -> (Harness<Bench>, usize) {
    let mut bus = Harness::new();
    let n = bus.add(addr::GATEWAY, bench_node(addr::GATEWAY, &WINDOWS));
    bus.node(n).start();
    bus.run_ms(5);
    assert!(bus.node(n).is_up());
    (bus, n)
}

#[test]
fn alarm_fires_exactly_once_at_its_delay() {
    let (mut bus, n) = single_node();

    bus.node(n).fabric().post(Message::new(
        CLIENT,
        TaskId::CLK,
        Op::SetAlarm,
        Body::Alarm(AlarmInfo::once(Token(7), 100)),
    ));

    // Just short of the deadline: silence.
    bus.run_ms(99);
    assert!(bus.node(n).tasks.extra.client.alarms.is_empty());

    // At the deadline: exactly one ALARM {sender: CLK, result: EOK, our
    // info back}.
    bus.run_ms(2);
    let alarms = &bus.node(n).tasks.extra.client.alarms;
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].token, Token(7));
    assert_eq!(alarms[0].result, Code::Success);

    // And never again.
    bus.run_ms(500);
    assert_eq!(bus.node(n).tasks.extra.client.alarms.len(), 1);
}

#[test]
fn canceled_alarm_never_fires() {
    let (mut bus, n) = single_node();

    bus.node(n).fabric().post(Message::new(
        CLIENT,
        TaskId::CLK,
        Op::SetAlarm,
        Body::Alarm(AlarmInfo::once(Token(7), 100)),
    ));
    bus.run_ms(10);
    bus.node(n).fabric().post(Message::new(
        CLIENT,
        TaskId::CLK,
        Op::Cancel,
        Body::Cancel(Token(7)),
    ));
    bus.run_ms(500);
    assert!(bus.node(n).tasks.extra.client.alarms.is_empty());
}

#[test]
fn serial_line_drives_the_parser() {
    let (mut bus, n) = single_node();

    // "1d\n" arrives on the UART: '1' accumulates, 'd' dumps, newline
    // clears.
    for byte in b"1d\n" {
        bus.node(n).uart_rx(*byte);
    }
    bus.run_ms(2);

    let node = bus.node(n);
    assert_eq!(node.tasks.extra.inp.last_dump, Some(1));
    assert_eq!(node.tasks.extra.inp.inval, 0);
    assert_eq!(node.tasks.extra.dmp.jobs, 1);
    assert_eq!(node.lost_msgs(), 0);
}

#[test]
fn consumer_switch_redirects_the_line() {
    let (mut bus, n) = single_node();

    bus.node(n).uart_rx(b'9');
    bus.run_ms(2);
    assert_eq!(bus.node(n).tasks.extra.inp.inval, 9);

    // Route the line at the stream sink instead.
    bus.node(n).fabric().post(Message::new(
        CLIENT,
        TaskId::SER,
        Op::SetIoctl,
        Body::Ioctl {
            op: abi::IoctlOp::Consumer,
            arg: u32::from(test_suite::SINK.0),
        },
    ));
    bus.run_ms(2);

    for byte in b"zz" {
        bus.node(n).uart_rx(*byte);
    }
    bus.run_ms(2);

    let node = bus.node(n);
    assert_eq!(&node.tasks.extra.sink.bytes, b"zz");
    // The parser state is untouched by the redirected traffic.
    assert_eq!(node.tasks.extra.inp.inval, 9);
}
