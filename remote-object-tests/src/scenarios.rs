// Copyright 2020 Kodebox, Inc.
// This file is part of CodeChain.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::peers::*;
use crate::services::*;
use crossbeam::channel;
use remote_object::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn lookup_waits_for_the_definition() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let client = network.connect(test_config()).unwrap();

    let store = Arc::clone(&client.store);
    let caller = thread::spawn(move || {
        let calc = store.get_exposed_object::<dyn Adder>("calc", true)?;
        calc.add(2, 3)
    });
    thread::sleep(Duration::from_millis(100));
    network.server.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();
    assert_eq!(caller.join().unwrap(), Ok(5));
}

#[test]
fn missing_methods_fail_locally() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let client = network.connect(test_config()).unwrap();
    network.server.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();

    let calc = client.store.get_exposed_object::<dyn Calculator>("calc", true).unwrap();
    assert_eq!(calc.add(4, 5), Ok(9));
    assert_eq!(calc.multiply(4, 5), Err(Error::NotImplemented("calc::multiply".to_owned())));
    assert_eq!(client.store.pending_calls(), 0);
}

#[test]
fn call_to_retired_object_is_never_woken_by_other_returns() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let client = network
        .connect(Config {
            call_timeout: Some(Duration::from_millis(500)),
            ..test_config()
        })
        .unwrap();
    network.server.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();
    let stale = client.store.get_exposed_object::<dyn Adder>("calc", true).unwrap();

    // Replacing "calc" retires the object id the stale proxy points at.
    network.server.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();
    network.server.expose_object::<dyn Adder>("marker", Arc::new(SimpleAdder)).unwrap();
    client.store.get_exposed_object::<dyn Adder>("marker", true).unwrap();
    let fresh = client.store.get_exposed_object::<dyn Adder>("calc", true).unwrap();

    let stale_call = thread::spawn(move || stale.add(1, 1));
    for i in 0..10 {
        assert_eq!(fresh.add(i, 1), Ok(i + 1));
    }
    assert_eq!(stale_call.join().unwrap(), Err(Error::TimedOut));
    assert_eq!(client.store.pending_calls(), 0);
}

#[test]
fn late_client_receives_replay() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    network.server.expose_object::<dyn Adder>("obj1", Arc::new(SimpleAdder)).unwrap();

    let client = network.connect(test_config()).unwrap();
    let obj1 = client.store.get_exposed_object::<dyn Adder>("obj1", true).unwrap();
    assert_eq!(obj1.add(1, 2), Ok(3));
    assert_eq!(client.store.remote_names(), vec!["obj1".to_owned()]);
}

#[test]
fn overloads_reach_distinct_methods() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let client = network.connect(test_config()).unwrap();
    network.server.expose_object::<dyn Setter>("setter", Arc::new(RecordingSetter::default())).unwrap();

    let setter = client.store.get_exposed_object::<dyn Setter>("setter", true).unwrap();
    setter.set_number(3).unwrap();
    setter.set_text("three".to_owned()).unwrap();
    assert_eq!(setter.history(), Ok(vec!["number 3".to_owned(), "text three".to_owned()]));
}

#[test]
fn server_calls_into_each_client() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let first = network.connect(test_config()).unwrap();
    let second = network.connect(test_config()).unwrap();
    first.store.expose_object::<dyn Adder>("first", Arc::new(SimpleAdder)).unwrap();
    second.store.expose_object::<dyn Divider>("second", Arc::new(SimpleDivider)).unwrap();

    let adder = network.server.get_exposed_object::<dyn Adder>("first", true).unwrap();
    let divider = network.server.get_exposed_object::<dyn Divider>("second", true).unwrap();
    assert_eq!(adder.add(20, 22), Ok(42));
    assert_eq!(divider.divide(84, 2), Ok(42));
    assert_eq!(network.server.remote_names(), vec!["first".to_owned(), "second".to_owned()]);
}

#[test]
fn target_error_reaches_the_caller() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let client = network.connect(test_config()).unwrap();
    network.server.expose_object::<dyn Divider>("divider", Arc::new(SimpleDivider)).unwrap();

    let divider = client.store.get_exposed_object::<dyn Divider>("divider", true).unwrap();
    assert_eq!(divider.divide(6, 3), Ok(2));
    assert_eq!(divider.divide(1, 0), Err(MathError::Rpc(Error::Remote("division by zero".to_owned()))));
    assert_eq!(divider.divide(9, 3), Ok(3));
}

#[test]
fn exposed_method_calls_back_into_its_caller() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let client = network.connect(test_config()).unwrap();
    client.store.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();
    network
        .server
        .expose_object::<dyn Relay>("relay", Arc::new(CalcRelay {
            store: Arc::downgrade(&network.server),
        }))
        .unwrap();

    let relay = client.store.get_exposed_object::<dyn Relay>("relay", true).unwrap();
    assert_eq!(relay.add_twice(2, 3), Ok(10));
}

#[test]
fn disconnect_fails_pending_calls() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let client = network.connect(test_config()).unwrap();
    let (entered_send, entered) = channel::unbounded();
    let (release, release_recv) = channel::unbounded();
    network
        .server
        .expose_object::<dyn Gate>("gate", Arc::new(ManualGate {
            entered: entered_send,
            release: release_recv,
            patience: WAIT,
        }))
        .unwrap();
    client.store.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();
    network.server.get_exposed_object::<dyn Adder>("calc", true).unwrap();

    let gate = client.store.get_exposed_object::<dyn Gate>("gate", true).unwrap();
    let caller = thread::spawn(move || gate.pass());
    entered.recv_timeout(WAIT).unwrap();
    client.transport.disconnect();

    assert_eq!(caller.join().unwrap(), Err(Error::Disconnected(client.transport.id())));
    release.send(()).unwrap();
    eventually(|| network.server.remote_names().is_empty());
    assert_eq!(network.hub.connections(), Vec::<ConnectionId>::new());
}

#[test]
fn one_way_calls_keep_their_order() {
    init_logger();
    let network = Network::new(Config {
        server_threads: 4,
        ..test_config()
    })
    .unwrap();
    let client = network.connect(test_config()).unwrap();
    network.server.expose_object::<dyn Setter>("setter", Arc::new(RecordingSetter::default())).unwrap();

    let setter = client.store.get_exposed_object::<dyn Setter>("setter", true).unwrap();
    for i in 0..500 {
        setter.set_number(i).unwrap();
    }
    let expected: Vec<_> = (0..500).map(|i| format!("number {}", i)).collect();
    assert_eq!(setter.history(), Ok(expected));
}

#[test]
fn relay_calls_back_the_client_that_called_it() {
    init_logger();
    let network = Network::new(test_config()).unwrap();
    let plain = network.connect(test_config()).unwrap();
    let offset = network.connect(test_config()).unwrap();
    plain.store.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();
    offset
        .store
        .expose_object::<dyn Adder>("calc", Arc::new(OffsetAdder {
            offset: 100,
        }))
        .unwrap();
    network
        .server
        .expose::<dyn Relay>(Arc::new(CalcRelay {
            store: Arc::downgrade(&network.server),
        }))
        .unwrap();

    let plain_relay = plain.store.get_exposed::<dyn Relay>(true).unwrap();
    let offset_relay = offset.store.get_exposed::<dyn Relay>(true).unwrap();
    assert_eq!(plain_relay.add_twice(2, 3), Ok(10));
    assert_eq!(offset_relay.add_twice(2, 3), Ok(310));
    assert_eq!(plain_relay.add_twice(1, 1), Ok(4));
}
