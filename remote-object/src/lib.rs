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

//! Expose objects by name to the other end of a connection and call them through
//! locally generated proxies.
//!
//! ```ignore
//! use remote_object::*;
//!
//! #[interface]
//! pub trait Adder: Service {
//!     fn add(&self, a: i32, b: i32) -> Result<i32>;
//! }
//!
//! // Endpoint A
//! store_a.expose_object::<dyn Adder>("calc", Arc::new(MyAdder))?;
//!
//! // Endpoint B
//! let calc: Box<dyn Adder> = store_b.get_exposed_object::<dyn Adder>("calc", true)?;
//! assert_eq!(calc.add(2, 3)?, 5);
//! ```

// The generated code refers to this crate by name.
extern crate self as remote_object;

pub mod codec;
mod context;
pub mod correlator;
pub mod descriptor;
mod error;
mod interface;
pub mod local;
pub mod remote;
mod store;
#[cfg(test)]
mod tests;
pub mod transport;
pub mod types;

pub use context::caller;
pub use descriptor::{MethodDescriptor, ObjectDefinition};
pub use error::{Error, Result};
pub use interface::{macro_env, RemoteInterface, Service};
pub use remote::RemoteHandle;
pub use remote_object_macro::interface;
pub use serde_cbor::Value;
pub use store::{ObjectStore, Role};
pub use transport::{ConnectionId, Transport, TransportError, TransportEvent};
pub use types::{TypeCode, TypeRegistry, VOID};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies an object exposed by one endpoint. Not unique across the network.
pub type ObjectId = u16;
/// Index of a method in an exposed object's method table.
pub type MethodId = u16;
/// Identifies a call awaiting its return. 0 means no return is expected.
pub type InvocationId = u16;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Number of inbound call handlers
    pub server_threads: usize,
    /// Maximum outbound calls awaiting a return
    pub call_slots: usize,
    /// How long a proxy call waits for its return. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// How long a blocking lookup waits for a definition. `None` waits forever.
    pub lookup_timeout: Option<Duration>,
}

impl Config {
    pub fn default_setup() -> Self {
        Config {
            server_threads: 4,
            call_slots: 512,
            call_timeout: Some(Duration::from_secs(30)),
            lookup_timeout: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_setup()
    }
}
