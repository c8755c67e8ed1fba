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

//! Objects exposed by peers, and the handles proxies use to reach them.

use crate::descriptor::{MethodDescriptor, ObjectDefinition};
use crate::store::Endpoint;
use crate::transport::ConnectionId;
use crate::types::TypeRegistry;
use crate::{Error, MethodId, ObjectId, RemoteInterface, Result};
use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_cbor::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maps each local interface method (by declaration index) to the remote method id it binds to.
#[derive(Debug)]
pub struct Resolution {
    pub(crate) local: Vec<MethodDescriptor>,
    pub(crate) remote: Vec<Option<MethodId>>,
}

/// Binds `local` interface methods to `remote` descriptors.
///
/// A local method binds to the first remote method of the same name whose parameters
/// accept the local parameter types, in remote declaration order.
pub fn resolve(remote: &[MethodDescriptor], local: &[MethodDescriptor], types: &TypeRegistry) -> Vec<Option<MethodId>> {
    let mut by_name: HashMap<&str, Vec<(MethodId, &MethodDescriptor)>> = HashMap::new();
    for (i, method) in remote.iter().enumerate() {
        by_name.entry(method.name.as_str()).or_default().push((i as MethodId, method));
    }
    local
        .iter()
        .map(|wanted| {
            by_name.get(wanted.name.as_str())?.iter().find_map(|(id, candidate)| {
                let compatible = candidate.params.len() == wanted.params.len()
                    && candidate.params.iter().zip(wanted.params.iter()).all(|(r, l)| types.is_assignable(*r, *l));
                if compatible {
                    Some(*id)
                } else {
                    None
                }
            })
        })
        .collect()
}

pub struct RemoteObject {
    pub id: ObjectId,
    pub name: String,
    /// The connection the definition arrived on; calls are routed back through it.
    pub connection: ConnectionId,
    pub methods: Vec<MethodDescriptor>,
    resolutions: Mutex<HashMap<TypeId, Arc<Resolution>>>,
}

impl RemoteObject {
    fn new(definition: ObjectDefinition, connection: ConnectionId) -> Self {
        RemoteObject {
            id: definition.id,
            name: definition.name,
            connection,
            methods: definition.methods,
            resolutions: Mutex::new(HashMap::new()),
        }
    }

    /// Resolution against interface `T`, computed once per interface.
    pub fn resolution<T: ?Sized + RemoteInterface>(&self, types: &TypeRegistry) -> Result<Arc<Resolution>> {
        let mut resolutions = self.resolutions.lock();
        if let Some(x) = resolutions.get(&TypeId::of::<T>()) {
            return Ok(Arc::clone(x))
        }
        let local = T::methods(types)?;
        let remote = resolve(&self.methods, &local, types);
        for (method, id) in local.iter().zip(remote.iter()) {
            if id.is_none() {
                log::debug!("{}::{} has no counterpart on the remote object", self.name, method.name);
            }
        }
        let resolution = Arc::new(Resolution {
            local,
            remote,
        });
        resolutions.insert(TypeId::of::<T>(), Arc::clone(&resolution));
        Ok(resolution)
    }
}

#[derive(Default)]
struct Objects {
    by_connection: HashMap<ConnectionId, HashMap<String, Arc<RemoteObject>>>,
    /// The connection that most recently announced each name.
    latest: HashMap<String, ConnectionId>,
}

impl Objects {
    fn get(&self, name: &str) -> Option<Arc<RemoteObject>> {
        let connection = self.latest.get(name)?;
        self.get_from(*connection, name)
    }

    fn get_from(&self, connection: ConnectionId, name: &str) -> Option<Arc<RemoteObject>> {
        self.by_connection.get(&connection)?.get(name).cloned()
    }
}

/// Objects exposed by peers, by connection and by name.
///
/// Several peers of a server may expose the same name. A lookup by name alone finds
/// the most recent announcement still alive.
#[derive(Default)]
pub struct RemoteTable {
    objects: Mutex<Objects>,
    arrived: Condvar,
}

impl RemoteTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records (or overwrites) a peer's object and wakes everyone waiting for a name.
    pub fn insert(&self, definition: ObjectDefinition, connection: ConnectionId) {
        log::debug!("Remote object {:?} (id {}) from connection {}", definition.name, definition.id, connection);
        let object = Arc::new(RemoteObject::new(definition, connection));
        let mut objects = self.objects.lock();
        objects.latest.insert(object.name.clone(), connection);
        objects.by_connection.entry(connection).or_default().insert(object.name.clone(), object);
        self.arrived.notify_all();
    }

    pub fn get(&self, name: &str) -> Option<Arc<RemoteObject>> {
        self.objects.lock().get(name)
    }

    pub fn get_from(&self, connection: ConnectionId, name: &str) -> Option<Arc<RemoteObject>> {
        self.objects.lock().get_from(connection, name)
    }

    /// Waits until `name` is known. `None` timeout waits forever.
    pub fn wait_for(&self, name: &str, timeout: Option<Duration>) -> Option<Arc<RemoteObject>> {
        self.wait_until(timeout, |objects| objects.get(name))
    }

    /// Waits until the peer on `connection` announces `name`.
    pub fn wait_for_from(
        &self,
        connection: ConnectionId,
        name: &str,
        timeout: Option<Duration>,
    ) -> Option<Arc<RemoteObject>> {
        self.wait_until(timeout, |objects| objects.get_from(connection, name))
    }

    fn wait_until(
        &self,
        timeout: Option<Duration>,
        find: impl Fn(&Objects) -> Option<Arc<RemoteObject>>,
    ) -> Option<Arc<RemoteObject>> {
        let deadline = timeout.map(|x| Instant::now() + x);
        let mut objects = self.objects.lock();
        loop {
            if let Some(x) = find(&objects) {
                return Some(x)
            }
            match deadline {
                Some(deadline) => {
                    if self.arrived.wait_until(&mut objects, deadline).timed_out() {
                        return find(&objects)
                    }
                }
                None => self.arrived.wait(&mut objects),
            }
        }
    }

    /// Forgets every object owned by `connection`.
    ///
    /// A name it shared with other peers falls back to one of theirs.
    pub fn remove_connection(&self, connection: ConnectionId) -> usize {
        let mut objects = self.objects.lock();
        let removed = match objects.by_connection.remove(&connection) {
            Some(x) => x,
            None => return 0,
        };
        for name in removed.keys() {
            if objects.latest.get(name) != Some(&connection) {
                continue
            }
            let fallback = objects.by_connection.iter().find(|(_, x)| x.contains_key(name)).map(|(id, _)| *id);
            match fallback {
                Some(other) => objects.latest.insert(name.clone(), other),
                None => objects.latest.remove(name),
            };
        }
        removed.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.lock().latest.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.lock().latest.keys().cloned().collect()
    }
}

/// What a generated proxy holds: a remote object bound to one interface.
pub struct RemoteHandle {
    endpoint: Arc<Endpoint>,
    object: Arc<RemoteObject>,
    resolution: Arc<Resolution>,
}

impl RemoteHandle {
    pub(crate) fn new(endpoint: Arc<Endpoint>, object: Arc<RemoteObject>, resolution: Arc<Resolution>) -> Self {
        RemoteHandle {
            endpoint,
            object,
            resolution,
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object.name
    }

    pub fn encode_arg<T: Serialize + 'static>(&self, value: &T) -> Result<Option<Value>> {
        self.endpoint.types().encode(value)
    }

    /// Calls local interface method `method`.
    ///
    /// Blocks for the return value unless the method returns `()`. Nothing is sent if the
    /// remote object has no matching method.
    pub fn call<R: DeserializeOwned + 'static>(&self, method: usize, args: Vec<Option<Value>>) -> Result<R> {
        let local = &self.resolution.local[method];
        let remote = self.resolution.remote[method]
            .ok_or_else(|| Error::NotImplemented(format!("{}::{}", self.object.name, local.name)))?;
        let value =
            self.endpoint.invoke_remote(self.object.connection, self.object.id, remote, local.needs_return(), args)?;
        self.endpoint.types().decode(value)
    }
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle").field("name", &self.object.name).field("id", &self.object.id).finish()
    }
}
