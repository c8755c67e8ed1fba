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

//! Matches method-return messages to the callers blocked on them.

use crate::transport::ConnectionId;
use crate::{Error, InvocationId, Result};
use parking_lot::{Condvar, Mutex};
use serde_cbor::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Outcome = Result<Option<Value>>;

/// A call that expects a return value.
pub struct PendingInvocation {
    connection: ConnectionId,
    slot: Mutex<Option<Outcome>>,
    available: Condvar,
}

impl PendingInvocation {
    fn new(connection: ConnectionId) -> Self {
        PendingInvocation {
            connection,
            slot: Mutex::new(None),
            available: Condvar::new(),
        }
    }

    fn fill(&self, outcome: Outcome) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.available.notify_one();
        }
    }
}

struct Table {
    last: InvocationId,
    pending: HashMap<InvocationId, Arc<PendingInvocation>>,
    /// Set once the endpoint shuts down; every later registration fails with it.
    closed: Option<Error>,
}

pub struct Correlator {
    table: Mutex<Table>,
    slots: usize,
}

impl Correlator {
    pub fn new(slots: usize) -> Self {
        Correlator {
            table: Mutex::new(Table {
                last: 0,
                pending: HashMap::new(),
                closed: None,
            }),
            slots: slots.min(InvocationId::MAX as usize),
        }
    }

    /// Allocates an invocation id for a call sent to `connection`.
    ///
    /// Ids are never 0 and never collide with an invocation that is still pending.
    pub fn register(&self, connection: ConnectionId) -> Result<(InvocationId, Arc<PendingInvocation>)> {
        let mut table = self.table.lock();
        if let Some(e) = &table.closed {
            return Err(e.clone())
        }
        if table.pending.len() >= self.slots {
            return Err(Error::CallSlotsExhausted(self.slots))
        }
        let mut id = table.last;
        loop {
            id = id.wrapping_add(1);
            if id != 0 && !table.pending.contains_key(&id) {
                break
            }
        }
        table.last = id;
        let pending = Arc::new(PendingInvocation::new(connection));
        table.pending.insert(id, Arc::clone(&pending));
        Ok((id, pending))
    }

    /// Delivers the outcome of `id`, which arrived on `connection`.
    ///
    /// Returns for unknown ids, or from a connection the call was not sent to, are
    /// logged and discarded.
    pub fn complete(&self, connection: ConnectionId, id: InvocationId, outcome: Outcome) {
        let pending = self.table.lock().pending.get(&id).cloned();
        match pending {
            Some(pending) if pending.connection == connection => pending.fill(outcome),
            Some(pending) => log::warn!(
                "Return for invocation {} arrived on connection {}, but the call went to {}; discarded",
                id,
                connection,
                pending.connection
            ),
            None => log::warn!("Return for unknown invocation {} discarded", id),
        }
    }

    /// Blocks until `id` completes or `timeout` elapses, then forgets it.
    pub fn wait(&self, id: InvocationId, timeout: Option<Duration>) -> Outcome {
        let pending = self.table.lock().pending.get(&id).cloned().ok_or(Error::UnknownInvocation(id))?;
        let deadline = timeout.map(|x| Instant::now() + x);
        let outcome = {
            let mut slot = pending.slot.lock();
            while slot.is_none() {
                match deadline {
                    Some(deadline) => {
                        if pending.available.wait_until(&mut slot, deadline).timed_out() {
                            break
                        }
                    }
                    None => pending.available.wait(&mut slot),
                }
            }
            slot.take()
        };
        self.forget(id, &pending);
        outcome.unwrap_or(Err(Error::TimedOut))
    }

    /// Drops `id` without waiting, e.g. when the call could not be sent.
    pub fn cancel(&self, id: InvocationId) {
        self.table.lock().pending.remove(&id);
    }

    /// Fails every invocation addressed to `connection`.
    pub fn fail_connection(&self, connection: ConnectionId) {
        let affected: Vec<_> =
            self.table.lock().pending.values().filter(|x| x.connection == connection).cloned().collect();
        for pending in affected {
            pending.fill(Err(Error::Disconnected(connection)));
        }
    }

    /// Fails every pending invocation with `error` and refuses new ones.
    pub fn close(&self, error: Error) {
        let affected: Vec<_> = {
            let mut table = self.table.lock();
            table.closed = Some(error.clone());
            table.pending.values().cloned().collect()
        };
        for pending in affected {
            pending.fill(Err(error.clone()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    fn forget(&self, id: InvocationId, pending: &Arc<PendingInvocation>) {
        let mut table = self.table.lock();
        if table.pending.get(&id).map_or(false, |x| Arc::ptr_eq(x, pending)) {
            table.pending.remove(&id);
        }
    }
}
