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

//! The object store: one per network endpoint.
//!
//! A exposes "calc"
//! => A's local registry assigns an id, and A announces the definition.
//! => B records the remote object and wakes anyone waiting for "calc".
//! => B calls a proxy method; the call goes to A with an invocation id if B expects a value.
//! => A invokes the real object and, if asked, sends the return back.
//! => B's correlator hands the value to the blocked caller.

mod receiver;

use crate::codec::{encode_message, Message, MethodCall, MethodReturn, MAX_COUNT};
use crate::context::CallerScope;
use crate::correlator::Correlator;
use crate::descriptor::ObjectDefinition;
use crate::local::{LocalRegistry, Skeleton};
use crate::remote::{RemoteHandle, RemoteObject, RemoteTable};
use crate::transport::{ConnectionId, Transport, TransportError, TransportEvent};
use crate::types::TypeRegistry;
use crate::{Config, Error, MethodId, ObjectId, RemoteInterface, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde_cbor::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A single outbound connection.
    Client,
    /// Many hosted connections.
    Server,
}

/// State shared by the public store, the receive loop and every proxy.
pub(crate) struct Endpoint {
    role: Role,
    config: Config,
    types: Arc<TypeRegistry>,
    transport: Arc<dyn Transport>,
    locals: LocalRegistry,
    remotes: RemoteTable,
    correlator: Correlator,
    /// Held while binding names and announcing them. Keeps the local and remote
    /// tables disjoint, and a replay never overtakes a newer definition.
    naming: Mutex<()>,
    termination: AtomicBool,
}

impl Endpoint {
    pub(crate) fn types(&self) -> &TypeRegistry {
        &self.types
    }

    fn terminate(&self) {
        self.termination.store(true, Ordering::SeqCst);
    }

    fn is_terminating(&self) -> bool {
        self.termination.load(Ordering::SeqCst)
    }

    fn send_to(&self, connection: ConnectionId, message: &Message) -> Result<()> {
        let data = encode_message(message)?;
        match self.role {
            Role::Client => self.transport.broadcast(data)?,
            Role::Server => self.transport.send(connection, data)?,
        }
        Ok(())
    }

    fn announce(&self, to: Option<ConnectionId>, definitions: Vec<ObjectDefinition>) -> Result<()> {
        for chunk in definitions.chunks(MAX_COUNT) {
            let data = encode_message(&Message::Definitions(chunk.to_vec()))?;
            match to {
                Some(connection) => self.transport.send(connection, data)?,
                None => self.transport.broadcast(data)?,
            }
        }
        Ok(())
    }

    /// Sends a call and, if `needs_return`, blocks for its outcome.
    pub(crate) fn invoke_remote(
        &self,
        connection: ConnectionId,
        object: ObjectId,
        method: MethodId,
        needs_return: bool,
        args: Vec<Option<Value>>,
    ) -> Result<Option<Value>> {
        if self.is_terminating() {
            return Err(TransportError::Shutdown.into())
        }
        if !needs_return {
            self.send_to(
                connection,
                &Message::Call(MethodCall {
                    object,
                    method,
                    invocation: 0,
                    args,
                }),
            )?;
            return Ok(None)
        }

        let (invocation, _) = self.correlator.register(connection)?;
        let call = Message::Call(MethodCall {
            object,
            method,
            invocation,
            args,
        });
        if let Err(e) = self.send_to(connection, &call) {
            self.correlator.cancel(invocation);
            return Err(e)
        }
        self.correlator.wait(invocation, self.config.call_timeout)
    }

    fn peer_connected(&self, connection: ConnectionId) -> Result<()> {
        log::debug!("Peer connected on {}", connection);
        let _naming = self.naming.lock();
        let snapshot = self.locals.snapshot();
        if snapshot.is_empty() {
            return Ok(())
        }
        match self.role {
            Role::Server => self.announce(Some(connection), snapshot),
            Role::Client => self.announce(None, snapshot),
        }
    }

    fn peer_disconnected(&self, connection: ConnectionId) -> Result<()> {
        log::debug!("Peer disconnected on {}", connection);
        self.correlator.fail_connection(connection);
        let forgotten = self.remotes.remove_connection(connection);
        if forgotten != 0 {
            log::debug!("Forgot {} remote objects of connection {}", forgotten, connection);
        }
        Ok(())
    }

    fn definitions_received(&self, connection: ConnectionId, definitions: Vec<ObjectDefinition>) -> Result<()> {
        let _naming = self.naming.lock();
        for definition in definitions {
            if self.locals.contains(&definition.name) {
                log::warn!(
                    "Connection {} announced {:?}, which is exposed locally; ignoring it",
                    connection,
                    definition.name
                );
                continue
            }
            self.remotes.insert(definition, connection);
        }
        Ok(())
    }

    fn call_received(&self, connection: ConnectionId, call: MethodCall) -> Result<()> {
        let outcome = {
            let _caller = CallerScope::enter(connection);
            self.locals.invoke(call.object, call.method, call.args, &self.types)
        };
        let result = match outcome {
            Ok(value) => Ok(value),
            Err(e) if e.is_protocol_violation() => return Err(e),
            Err(e) => {
                log::warn!("Method {} of object {} failed: {}", call.method, call.object, e);
                Err(match e {
                    Error::Remote(reason) => reason,
                    e => e.to_string(),
                })
            }
        };
        if call.invocation == 0 {
            return Ok(())
        }
        self.send_to(
            connection,
            &Message::Return(MethodReturn {
                invocation: call.invocation,
                result,
            }),
        )
    }

    fn return_received(&self, connection: ConnectionId, ret: MethodReturn) -> Result<()> {
        self.correlator.complete(connection, ret.invocation, ret.result.map_err(Error::Remote));
        Ok(())
    }
}

/// One endpoint of the RMI protocol.
///
/// It owns a receive thread that drains transport events until the store is dropped.
/// Inbound method calls run on a pool of `Config::server_threads` threads, so an exposed
/// method may itself call remote objects.
pub struct ObjectStore {
    endpoint: Arc<Endpoint>,
    shutdown: Option<Sender<()>>,
    receiver_thread: Option<thread::JoinHandle<()>>,
}

impl ObjectStore {
    pub fn new(
        role: Role,
        config: Config,
        types: TypeRegistry,
        transport: Arc<dyn Transport>,
        events: Receiver<TransportEvent>,
    ) -> Self {
        let endpoint = Arc::new(Endpoint {
            role,
            correlator: Correlator::new(config.call_slots),
            config,
            types: Arc::new(types),
            transport,
            locals: LocalRegistry::new(),
            remotes: RemoteTable::new(),
            naming: Mutex::new(()),
            termination: AtomicBool::new(false),
        });
        let (shutdown, shutdown_recv) = channel::bounded(1);
        let endpoint_ = Arc::clone(&endpoint);
        let receiver_thread = thread::spawn(move || receiver::receiver(endpoint_, events, shutdown_recv));
        ObjectStore {
            endpoint,
            shutdown: Some(shutdown),
            receiver_thread: Some(receiver_thread),
        }
    }

    pub fn role(&self) -> Role {
        self.endpoint.role
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.endpoint.types
    }

    /// Exposes `target` under `name` and announces it to every connected peer.
    ///
    /// Fails if the interface uses an unregistered type, if `name` is bound to a remote
    /// object, or if the announcement cannot be sent. In the last case the object stays
    /// exposed and is announced again to peers that connect later.
    pub fn expose_object<T: ?Sized + RemoteInterface>(&self, name: &str, target: Arc<T>) -> Result<ObjectId> {
        let skeleton = Skeleton::new(target, &self.endpoint.types)?;
        let _naming = self.endpoint.naming.lock();
        if self.endpoint.remotes.contains(name) {
            return Err(Error::NameInUse(name.to_owned()))
        }
        let definition = self.endpoint.locals.expose(name, skeleton)?;
        let id = definition.id;
        log::debug!("Exposed {:?} as object {}", name, id);
        self.endpoint.announce(None, vec![definition])?;
        Ok(id)
    }

    /// Returns a proxy to the object a peer exposed under `name`.
    ///
    /// Without `blocking` an unknown name fails at once. With it, the call waits for the
    /// definition to arrive, up to `Config::lookup_timeout`.
    pub fn get_exposed_object<T: ?Sized + RemoteInterface>(&self, name: &str, blocking: bool) -> Result<Box<T>> {
        let object = match self.endpoint.remotes.get(name) {
            Some(x) => x,
            None if !blocking => return Err(Error::NotFound(name.to_owned())),
            None => self.endpoint.remotes.wait_for(name, self.endpoint.config.lookup_timeout).ok_or(Error::TimedOut)?,
        };
        self.proxy_for(object)
    }

    fn proxy_for<T: ?Sized + RemoteInterface>(&self, object: Arc<RemoteObject>) -> Result<Box<T>> {
        let resolution = object.resolution::<T>(&self.endpoint.types)?;
        Ok(T::proxy(RemoteHandle::new(Arc::clone(&self.endpoint), object, resolution)))
    }

    /// Exposes `target` under the name of its interface, as found by `get_exposed`.
    pub fn expose<T: ?Sized + RemoteInterface>(&self, target: Arc<T>) -> Result<ObjectId> {
        self.expose_object(T::interface_name(), target)
    }

    /// Returns a proxy to the object a peer exposed with `expose`.
    pub fn get_exposed<T: ?Sized + RemoteInterface>(&self, blocking: bool) -> Result<Box<T>> {
        self.get_exposed_object(T::interface_name(), blocking)
    }

    /// Like `get_exposed_object`, but only considers what the peer on `connection` exposed.
    ///
    /// Inside an exposed method, `caller()` gives the connection to call back.
    pub fn get_exposed_object_from<T: ?Sized + RemoteInterface>(
        &self,
        connection: ConnectionId,
        name: &str,
        blocking: bool,
    ) -> Result<Box<T>> {
        let remotes = &self.endpoint.remotes;
        let object = match remotes.get_from(connection, name) {
            Some(x) => x,
            None if !blocking => return Err(Error::NotFound(name.to_owned())),
            None => remotes
                .wait_for_from(connection, name, self.endpoint.config.lookup_timeout)
                .ok_or(Error::TimedOut)?,
        };
        self.proxy_for(object)
    }

    /// The local object exposed with `expose`.
    pub fn local<T: ?Sized + RemoteInterface>(&self) -> Option<Arc<T>> {
        self.local_object(T::interface_name())
    }

    /// The local object exposed under `name`, if it was exposed as a `T`.
    pub fn local_object<T: ?Sized + RemoteInterface>(&self, name: &str) -> Option<Arc<T>> {
        self.endpoint.locals.get::<T>(name)
    }

    pub fn exposed_names(&self) -> Vec<String> {
        let mut names = self.endpoint.locals.names();
        names.sort();
        names
    }

    pub fn remote_names(&self) -> Vec<String> {
        let mut names = self.endpoint.remotes.names();
        names.sort();
        names
    }

    pub fn pending_calls(&self) -> usize {
        self.endpoint.correlator.pending_count()
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        self.endpoint.terminate();
        drop(self.shutdown.take());
        if let Some(receiver_thread) = self.receiver_thread.take() {
            if receiver_thread.join().is_err() {
                log::error!("Receive loop panicked");
            }
        }
        self.endpoint.correlator.close(TransportError::Shutdown.into());
    }
}
