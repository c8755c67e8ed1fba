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

//! Objects this endpoint exposes to its peers.

use crate::descriptor::{MethodDescriptor, ObjectDefinition};
use crate::types::TypeRegistry;
use crate::{Error, MethodId, ObjectId, RemoteInterface, Result};
use parking_lot::RwLock;
use serde_cbor::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub(crate) trait Dispatch: Send + Sync {
    fn dispatch(&self, method: MethodId, args: Vec<Option<Value>>, types: &TypeRegistry) -> Result<Option<Value>>;

    /// The exposed `Arc<T>`, for handing the object back to local code.
    fn as_any(&self) -> &dyn Any;
}

struct Exported<T: ?Sized + RemoteInterface> {
    target: Arc<T>,
}

impl<T: ?Sized + RemoteInterface> Dispatch for Exported<T> {
    fn dispatch(&self, method: MethodId, args: Vec<Option<Value>>, types: &TypeRegistry) -> Result<Option<Value>> {
        T::dispatch(&self.target, method, args, types)
    }

    fn as_any(&self) -> &dyn Any {
        &self.target
    }
}

/// A type-erased object ready to be exposed, with its method table.
pub struct Skeleton {
    pub(crate) methods: Vec<MethodDescriptor>,
    pub(crate) raw: Arc<dyn Dispatch>,
}

impl Skeleton {
    /// Fails if a parameter or return type of the interface is not registered.
    pub fn new<T: ?Sized + RemoteInterface>(target: Arc<T>, types: &TypeRegistry) -> Result<Self> {
        Ok(Skeleton {
            methods: T::methods(types)?,
            raw: Arc::new(Exported {
                target,
            }),
        })
    }
}

struct LocalObject {
    id: ObjectId,
    name: String,
    skeleton: Skeleton,
}

impl LocalObject {
    fn definition(&self) -> ObjectDefinition {
        ObjectDefinition {
            id: self.id,
            name: self.name.clone(),
            methods: self.skeleton.methods.clone(),
        }
    }
}

#[derive(Default)]
struct Table {
    next: u32,
    by_id: BTreeMap<ObjectId, Arc<LocalObject>>,
    by_name: HashMap<String, ObjectId>,
}

#[derive(Default)]
pub struct LocalRegistry {
    table: RwLock<Table>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `skeleton` under `name` and returns the definition to announce.
    ///
    /// An object already exposed under `name` is replaced; its id is retired, not reused.
    pub fn expose(&self, name: &str, skeleton: Skeleton) -> Result<ObjectDefinition> {
        let mut table = self.table.write();
        if table.next > ObjectId::MAX as u32 {
            return Err(Error::ObjectIdsExhausted)
        }
        let id = table.next as ObjectId;
        table.next += 1;

        if let Some(old) = table.by_name.remove(name) {
            log::debug!("Object {} replaces object {} as {:?}", id, old, name);
            table.by_id.remove(&old);
        }
        let object = Arc::new(LocalObject {
            id,
            name: name.to_owned(),
            skeleton,
        });
        let definition = object.definition();
        table.by_name.insert(name.to_owned(), id);
        table.by_id.insert(id, object);
        Ok(definition)
    }

    /// Invokes a method of an exposed object.
    ///
    /// Unknown objects and methods are reported as protocol violations. A target that
    /// fails or panics yields `Error::Remote`.
    pub fn invoke(
        &self,
        object: ObjectId,
        method: MethodId,
        args: Vec<Option<Value>>,
        types: &TypeRegistry,
    ) -> Result<Option<Value>> {
        // The table is not locked during the call itself; the target may expose objects.
        let target = self.table.read().by_id.get(&object).cloned().ok_or(Error::UnknownObject(object))?;
        if method as usize >= target.skeleton.methods.len() {
            return Err(Error::UnknownMethod {
                object,
                method,
            })
        }
        let raw = &target.skeleton.raw;
        match catch_unwind(AssertUnwindSafe(|| raw.dispatch(method, args, types))) {
            Ok(result) => result,
            Err(_) => Err(Error::Remote(format!("{}::{} panicked", target.name, target.skeleton.methods[method as usize].name))),
        }
    }

    /// Definitions of every exposed object, in id order.
    pub fn snapshot(&self) -> Vec<ObjectDefinition> {
        self.table.read().by_id.values().map(|x| x.definition()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.read().by_name.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.table.read().by_name.keys().cloned().collect()
    }

    pub fn get<T: ?Sized + RemoteInterface>(&self, name: &str) -> Option<Arc<T>> {
        let table = self.table.read();
        let object = table.by_id.get(table.by_name.get(name)?)?;
        object.skeleton.raw.as_any().downcast_ref::<Arc<T>>().cloned()
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&self, next: u32) {
        self.table.write().next = next;
    }
}
