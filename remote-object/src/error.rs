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

use crate::codec::CodecError;
use crate::transport::{ConnectionId, TransportError};
use crate::{InvocationId, MethodId, ObjectId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the object store can report to an application.
///
/// Only the usage errors (`NotFound`, `NotImplemented`, `UnregisteredType`, `NameInUse`)
/// and the outcome of a proxy call ever reach application code. The protocol variants
/// (`UnknownObject`, `UnknownMethod`, `UnknownInvocation`) are logged and dropped
/// by the receive loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("cannot find remote object: {0}")]
    NotFound(String),

    #[error("method not implemented by remote object owner: {0}")]
    NotImplemented(String),

    #[error("type is not registered with the type registry: {0}")]
    UnregisteredType(&'static str),

    #[error("name is already bound to a remote object: {0}")]
    NameInUse(String),

    #[error("timed out")]
    TimedOut,

    #[error("connection {0} was closed")]
    Disconnected(ConnectionId),

    #[error("remote invocation failed: {0}")]
    Remote(String),

    #[error("no exposed object with id {0}")]
    UnknownObject(ObjectId),

    #[error("object {object} has no method {method}")]
    UnknownMethod {
        object: ObjectId,
        method: MethodId,
    },

    #[error("no pending invocation with id {0}")]
    UnknownInvocation(InvocationId),

    #[error("all {0} call slots are in use")]
    CallSlotsExhausted(usize),

    #[error("type registry is full")]
    TypeRegistryFull,

    #[error("object id space is exhausted")]
    ObjectIdsExhausted,

    #[error("value conversion failed: {0}")]
    Conversion(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Errors caused by a stale or malformed message from a peer.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::UnknownObject(_) | Error::UnknownMethod { .. } | Error::UnknownInvocation(_))
    }
}
