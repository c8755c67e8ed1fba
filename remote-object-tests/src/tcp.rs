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
use remote_object::transport::tcp::{TcpClient, TcpServer};
use remote_object::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn stores() -> (Arc<TcpServer>, ObjectStore, Arc<ObjectStore>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (listener, server_events) = TcpServer::bind("127.0.0.1:0").unwrap();
    let server = ObjectStore::new(
        Role::Server,
        test_config(),
        types().unwrap(),
        Arc::clone(&listener) as Arc<dyn Transport>,
        server_events,
    );
    let (connection, client_events) = TcpClient::connect(listener.local_addr()).unwrap();
    let client =
        ObjectStore::new(Role::Client, test_config(), types().unwrap(), connection as Arc<dyn Transport>, client_events);
    (listener, server, Arc::new(client))
}

#[test]
fn lookup_waits_for_the_definition() {
    let (_listener, server, client) = stores();

    let store = Arc::clone(&client);
    let caller = thread::spawn(move || {
        let calc = store.get_exposed_object::<dyn Adder>("calc", true)?;
        calc.add(2, 3)
    });
    thread::sleep(Duration::from_millis(100));
    server.expose_object::<dyn Adder>("calc", Arc::new(SimpleAdder)).unwrap();
    assert_eq!(caller.join().unwrap(), Ok(5));
}

#[test]
fn server_calls_the_client() {
    let (_listener, server, client) = stores();
    client.expose_object::<dyn Setter>("setter", Arc::new(RecordingSetter::default())).unwrap();

    let setter = server.get_exposed_object::<dyn Setter>("setter", true).unwrap();
    setter.set_text("over tcp".to_owned()).unwrap();
    assert_eq!(setter.history(), Ok(vec!["text over tcp".to_owned()]));
}
