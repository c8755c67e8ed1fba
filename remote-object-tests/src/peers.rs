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

//! Stores wired together over the in-memory transport.

use remote_object::transport::memory::{MemoryClient, MemoryHub};
use remote_object::*;
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(10);

/// Every type the test services use.
pub fn types() -> Result<TypeRegistry> {
    let mut types = TypeRegistry::new();
    types.register::<Vec<String>>()?;
    Ok(types)
}

/// Short timeouts so a lost message fails a test instead of hanging it.
pub fn test_config() -> Config {
    Config {
        server_threads: 2,
        call_slots: 64,
        call_timeout: Some(WAIT),
        lookup_timeout: Some(WAIT),
    }
}

/// A server store with clients attached through a memory hub.
pub struct Network {
    pub hub: Arc<MemoryHub>,
    pub server: Arc<ObjectStore>,
}

impl Network {
    pub fn new(config: Config) -> Result<Self> {
        let (hub, events) = MemoryHub::new();
        let server =
            Arc::new(ObjectStore::new(Role::Server, config, types()?, Arc::clone(&hub) as Arc<dyn Transport>, events));
        Ok(Network {
            hub,
            server,
        })
    }

    pub fn connect(&self, config: Config) -> Result<Client> {
        let (transport, events) = self.hub.connect();
        let store =
            ObjectStore::new(Role::Client, config, types()?, Arc::clone(&transport) as Arc<dyn Transport>, events);
        Ok(Client {
            transport,
            store: Arc::new(store),
        })
    }
}

pub struct Client {
    pub transport: Arc<MemoryClient>,
    pub store: Arc<ObjectStore>,
}
