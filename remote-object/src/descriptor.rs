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

use crate::types::{TypeCode, VOID};
use crate::ObjectId;

/// Signature of one exposed method, as transmitted to the peer.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<TypeCode>,
    pub ret: TypeCode,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, params: Vec<TypeCode>, ret: TypeCode) -> Self {
        MethodDescriptor {
            name: name.into(),
            params,
            ret,
        }
    }

    pub fn needs_return(&self) -> bool {
        self.ret != VOID
    }
}

/// An exposed object as announced to the other end.
/// Method ids are indices into `methods`.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ObjectDefinition {
    pub id: ObjectId,
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}
