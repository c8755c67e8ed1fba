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

use super::Endpoint;
use crate::codec::{decode_message, Message, MethodCall};
use crate::transport::{ConnectionId, TransportEvent};
use crate::Result;
use crossbeam::channel::{select, Receiver};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use threadpool::ThreadPool;

/// Inbound calls waiting to run, per connection. A connection has an entry only while
/// one of its calls is running on the pool.
type CallQueues = Arc<Mutex<HashMap<ConnectionId, VecDeque<MethodCall>>>>;

/// Drains transport events until the event channel closes or the store shuts down.
pub(super) fn receiver(endpoint: Arc<Endpoint>, events: Receiver<TransportEvent>, shutdown: Receiver<()>) {
    // Handling calls with threads is just receiver()'s implementation detail.
    let pool = ThreadPool::with_name("remote-object-call".to_owned(), endpoint.config.server_threads.max(1));
    let queues: CallQueues = Default::default();
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => handle_event(&endpoint, &pool, &queues, event),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    log::debug!("Receive loop finished");
}

fn handle_event(endpoint: &Arc<Endpoint>, pool: &ThreadPool, queues: &CallQueues, event: TransportEvent) {
    match event {
        TransportEvent::Connected(connection) => isolate(connection, endpoint.peer_connected(connection)),
        TransportEvent::Disconnected(connection) => isolate(connection, endpoint.peer_disconnected(connection)),
        TransportEvent::Message(connection, data) => match decode_message(&data) {
            Ok(Message::Definitions(definitions)) => {
                isolate(connection, endpoint.definitions_received(connection, definitions))
            }
            Ok(Message::Call(call)) => schedule(endpoint, pool, queues, connection, call),
            Ok(Message::Return(ret)) => isolate(connection, endpoint.return_received(connection, ret)),
            Err(e) => log::warn!("Dropping undecodable message from connection {}: {}", connection, e),
        },
    }
}

/// Calls of one connection run one at a time, in arrival order. Calls of different
/// connections run in parallel, and the receive loop never waits for any of them.
fn schedule(endpoint: &Arc<Endpoint>, pool: &ThreadPool, queues: &CallQueues, connection: ConnectionId, call: MethodCall) {
    {
        let mut queues = queues.lock();
        if let Some(queue) = queues.get_mut(&connection) {
            queue.push_back(call);
            return
        }
        queues.insert(connection, VecDeque::new());
    }
    let endpoint = Arc::clone(endpoint);
    let queues = Arc::clone(queues);
    pool.execute(move || {
        let mut next = Some(call);
        while let Some(call) = next {
            isolate(connection, endpoint.call_received(connection, call));
            let mut queues = queues.lock();
            next = queues.get_mut(&connection).and_then(|x| x.pop_front());
            if next.is_none() {
                queues.remove(&connection);
            }
        }
    });
}

/// A failed message never takes the loop down with it.
fn isolate(connection: ConnectionId, result: Result<()>) {
    if let Err(e) = result {
        log::warn!("Dropped message from connection {}: {}", connection, e);
    }
}
