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

//! In-process transport: one hub (the server side) and any number of clients,
//! connected by channels. Delivery is real cross-thread delivery, so it exercises
//! the same concurrency paths as a socket.

use super::{ConnectionId, Transport, TransportError, TransportEvent};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct Hub {
    server: Sender<TransportEvent>,
    clients: Mutex<HashMap<ConnectionId, Sender<TransportEvent>>>,
    next: AtomicU32,
}

impl Hub {
    fn disconnect(&self, connection: ConnectionId) {
        let client = self.clients.lock().remove(&connection);
        if let Some(client) = client {
            client.send(TransportEvent::Disconnected(connection)).ok();
            self.server.send(TransportEvent::Disconnected(connection)).ok();
        }
    }
}

/// The hosting side. Connection ids start at 1.
pub struct MemoryHub {
    hub: Arc<Hub>,
}

impl MemoryHub {
    pub fn new() -> (Arc<Self>, Receiver<TransportEvent>) {
        let (server, events) = channel::unbounded();
        let hub = Arc::new(Hub {
            server,
            clients: Mutex::new(HashMap::new()),
            next: AtomicU32::new(1),
        });
        (
            Arc::new(MemoryHub {
                hub,
            }),
            events,
        )
    }

    /// Opens a new connection. Both ends see `Connected` before any message.
    pub fn connect(&self) -> (Arc<MemoryClient>, Receiver<TransportEvent>) {
        let id = self.hub.next.fetch_add(1, Ordering::SeqCst);
        let (send, events) = channel::unbounded();
        send.send(TransportEvent::Connected(id)).ok();
        self.hub.clients.lock().insert(id, send);
        self.hub.server.send(TransportEvent::Connected(id)).ok();
        (
            Arc::new(MemoryClient {
                id,
                hub: Arc::clone(&self.hub),
            }),
            events,
        )
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        self.hub.disconnect(connection)
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.hub.clients.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Transport for MemoryHub {
    fn send(&self, connection: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        let client = self.hub.clients.lock().get(&connection).cloned().ok_or(TransportError::Closed(connection))?;
        client.send(TransportEvent::Message(connection, data)).map_err(|_| TransportError::Closed(connection))
    }

    fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let clients: Vec<_> = self.hub.clients.lock().iter().map(|(id, x)| (*id, x.clone())).collect();
        for (id, client) in clients {
            if client.send(TransportEvent::Message(id, data.clone())).is_err() {
                log::debug!("Skipping closed connection {} in broadcast", id);
            }
        }
        Ok(())
    }
}

pub struct MemoryClient {
    id: ConnectionId,
    hub: Arc<Hub>,
}

impl MemoryClient {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn disconnect(&self) {
        self.hub.disconnect(self.id)
    }
}

impl Transport for MemoryClient {
    fn send(&self, _connection: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        self.broadcast(data)
    }

    fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if !self.hub.clients.lock().contains_key(&self.id) {
            return Err(TransportError::Closed(self.id))
        }
        self.hub.server.send(TransportEvent::Message(self.id, data)).map_err(|_| TransportError::Closed(self.id))
    }
}
