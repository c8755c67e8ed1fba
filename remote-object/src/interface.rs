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

use crate::descriptor::MethodDescriptor;
use crate::remote::RemoteHandle;
use crate::types::TypeRegistry;
use crate::{MethodId, Result};
use serde_cbor::Value;

/// All interface traits must have this as a supertrait.
pub trait Service: Send + Sync {}

impl<T: ?Sized + Send + Sync> Service for T {}

/// Ties a trait object type (`dyn MyInterface`) to its method table.
///
/// You will never implement this by hand: `#[remote_object::interface]` generates it,
/// together with a proxy type that forwards every method over the network.
/// The method table is explicit: `MethodId`s are the declaration order of the trait's methods.
pub trait RemoteInterface: Service + 'static {
    /// The name an object is exposed under when none is given: the trait's path.
    fn interface_name() -> &'static str;

    /// Descriptors of the trait's methods in declaration order.
    fn methods(types: &TypeRegistry) -> Result<Vec<MethodDescriptor>>;

    /// Invokes method `method` on a local object with already-decoded arguments.
    fn dispatch(target: &Self, method: MethodId, args: Vec<Option<Value>>, types: &TypeRegistry)
        -> Result<Option<Value>>;

    /// Wraps a resolved remote object into a proxy implementing the trait.
    fn proxy(handle: RemoteHandle) -> Box<Self>;
}

/// Support for the generated code. You (application developer) should not refer this!
pub mod macro_env {
    pub use crate::descriptor::MethodDescriptor;
    pub use crate::remote::RemoteHandle;
    pub use crate::types::TypeRegistry;
    pub use crate::{Error, MethodId, RemoteInterface, Result};
    pub use serde_cbor::Value;

    pub fn check_arity(name: &str, args: &[Option<Value>], expected: usize) -> Result<()> {
        if args.len() != expected {
            return Err(Error::Conversion(format!("{} takes {} arguments but {} were sent", name, expected, args.len())))
        }
        Ok(())
    }

    pub fn take_arg<T: serde::de::DeserializeOwned + 'static>(
        args: &mut std::vec::IntoIter<Option<Value>>,
        types: &TypeRegistry,
    ) -> Result<T> {
        types.decode(args.next().flatten())
    }

    /// The failure reported to the caller. An `Error::Remote` is passed on as it is.
    pub fn target_failure<E: std::fmt::Display + 'static>(reason: E) -> Error {
        match (&reason as &dyn std::any::Any).downcast_ref::<Error>() {
            Some(Error::Remote(text)) => Error::Remote(text.clone()),
            _ => Error::Remote(reason.to_string()),
        }
    }
}
