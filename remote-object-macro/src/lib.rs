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

//! `#[interface]` expands a trait into a remote-object interface.

extern crate proc_macro;

mod interface;

use proc_macro::TokenStream;

/// Turns a trait into an interface that can be exposed with `ObjectStore::expose_object`
/// and imported with `ObjectStore::get_exposed_object`.
///
/// Every method must take `&self`, pass its arguments by value and return
/// `Result<T, E>` with `E: From<remote_object::Error> + Display`. A method returning
/// `Result<()>` is called without waiting for the other side.
/// `#[remote(name = "...")]` on a method overrides the name it is announced with.
#[proc_macro_attribute]
pub fn interface(args: TokenStream, input: TokenStream) -> TokenStream {
    match interface::expand(args.into(), input.into()) {
        Ok(x) => x.into(),
        Err(e) => e.to_compile_error().into(),
    }
}
