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

//! The seam between the object store and whatever moves bytes between peers.
//!
//! A transport delivers whole messages; it does not look inside them. Events for
//! one endpoint arrive on a single channel in the order the transport observed them.

pub mod memory;
pub mod tcp;

use thiserror::Error;

pub type ConnectionId = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Message(ConnectionId, Vec<u8>),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("endpoint is shut down")]
    Shutdown,

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

pub trait Transport: Send + Sync + 'static {
    /// Sends to one hosted connection (server side).
    fn send(&self, connection: ConnectionId, data: Vec<u8>) -> Result<(), TransportError>;

    /// Sends to every connection this end holds. A client holds exactly one.
    fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError>;
}
