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

//! Registry of the types that may cross the wire.
//!
//! Both peers must build their registries identically: codes are handed out in
//! registration order, and method descriptors carry codes, not names.

use crate::codec::CodecError;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_cbor::Value;
use std::any::TypeId;
use std::collections::HashMap;

pub type TypeCode = u16;

/// Code of `()`, meaning "no return value".
pub const VOID: TypeCode = 0;

pub struct TypeRegistry {
    codes: HashMap<TypeId, TypeCode>,
    names: Vec<&'static str>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = TypeRegistry {
            codes: HashMap::new(),
            names: Vec::new(),
        };
        // The order here is part of the protocol.
        registry.insert::<Value>();
        registry.insert::<bool>();
        registry.insert::<i8>();
        registry.insert::<i16>();
        registry.insert::<i32>();
        registry.insert::<i64>();
        registry.insert::<u8>();
        registry.insert::<u16>();
        registry.insert::<u32>();
        registry.insert::<u64>();
        registry.insert::<f32>();
        registry.insert::<f64>();
        registry.insert::<char>();
        registry.insert::<String>();
        registry.insert::<Vec<u8>>();
        registry
    }

    /// Registers `T`, returning its code. Registering a type twice returns the existing code.
    pub fn register<T: Serialize + DeserializeOwned + 'static>(&mut self) -> Result<TypeCode> {
        if let Some(code) = self.codes.get(&TypeId::of::<T>()) {
            return Ok(*code)
        }
        if self.names.len() >= TypeCode::MAX as usize {
            return Err(Error::TypeRegistryFull)
        }
        Ok(self.insert::<T>())
    }

    fn insert<T: 'static>(&mut self) -> TypeCode {
        self.names.push(std::any::type_name::<T>());
        let code = self.names.len() as TypeCode;
        self.codes.insert(TypeId::of::<T>(), code);
        code
    }

    pub fn code_of<T: ?Sized + 'static>(&self) -> Result<TypeCode> {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            return Ok(VOID)
        }
        self.codes.get(&TypeId::of::<T>()).copied().ok_or_else(|| Error::UnregisteredType(std::any::type_name::<T>()))
    }

    pub fn name_of(&self, code: TypeCode) -> Option<&'static str> {
        if code == VOID {
            return Some("()")
        }
        self.names.get(code as usize - 1).copied()
    }

    pub fn any_code(&self) -> TypeCode {
        1
    }

    /// Whether a value declared as `local` may be passed where the remote side declares `remote`.
    pub fn is_assignable(&self, remote: TypeCode, local: TypeCode) -> bool {
        remote == local || (remote == self.any_code() && local != VOID)
    }

    /// Converts a value into its in-message form. CBOR null travels as an absent slot.
    pub fn encode<T: Serialize + ?Sized + 'static>(&self, value: &T) -> Result<Option<Value>> {
        self.code_of::<T>()?;
        match serde_cbor::value::to_value(value).map_err(|e| Error::Conversion(e.to_string()))? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    pub fn decode<T: DeserializeOwned + 'static>(&self, value: Option<Value>) -> Result<T> {
        self.code_of::<T>()?;
        serde_cbor::value::from_value(value.unwrap_or(Value::Null)).map_err(|e| Error::Conversion(e.to_string()))
    }
}

/// Appends one self-delimiting CBOR item.
pub fn write_value(buffer: &mut Vec<u8>, value: &Value) -> std::result::Result<(), CodecError> {
    serde_cbor::to_writer(buffer, value).map_err(|e| CodecError::Value(e.to_string()))
}

/// Reads one CBOR item from the front of `buffer`, returning it with the number of bytes consumed.
pub fn read_value(buffer: &[u8]) -> std::result::Result<(Value, usize), CodecError> {
    let mut deserializer = serde_cbor::Deserializer::from_slice(buffer);
    let value = Value::deserialize(&mut deserializer).map_err(|e| CodecError::Value(e.to_string()))?;
    Ok((value, deserializer.byte_offset()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn builtin_codes_are_stable() {
        let types = TypeRegistry::new();
        assert_eq!(types.code_of::<()>().unwrap(), VOID);
        assert_eq!(types.code_of::<Value>().unwrap(), types.any_code());
        assert_eq!(types.code_of::<i32>().unwrap(), 5);
        assert_eq!(types.code_of::<String>().unwrap(), 14);
        assert_eq!(types.name_of(5), Some("i32"));
    }

    #[test]
    fn unregistered_type_is_rejected() {
        let mut types = TypeRegistry::new();
        assert_eq!(types.encode(&Point { x: 1, y: 2 }), Err(Error::UnregisteredType(std::any::type_name::<Point>())));

        let code = types.register::<Point>().unwrap();
        assert_eq!(types.register::<Point>(), Ok(code));
        assert_eq!(code, types.code_of::<Vec<u8>>().unwrap() + 1);
        let encoded = types.encode(&Point { x: 1, y: 2 }).unwrap();
        assert_eq!(types.decode::<Point>(encoded).unwrap(), Point { x: 1, y: 2 });
    }

    #[test]
    fn null_travels_as_absent() {
        let mut types = TypeRegistry::new();
        types.register::<Option<i32>>().unwrap();
        assert_eq!(types.encode(&None::<i32>).unwrap(), None);
        assert_eq!(types.decode::<Option<i32>>(None).unwrap(), None);
        assert_eq!(types.decode::<()>(None).unwrap(), ());
    }

    #[test]
    fn any_accepts_everything_but_void() {
        let types = TypeRegistry::new();
        let i32_code = types.code_of::<i32>().unwrap();
        assert!(types.is_assignable(types.any_code(), i32_code));
        assert!(!types.is_assignable(types.any_code(), VOID));
        assert!(!types.is_assignable(i32_code, types.any_code()));
        assert!(!types.is_assignable(i32_code, types.code_of::<i64>().unwrap()));
    }

    #[test]
    fn values_are_self_delimiting() {
        let mut buffer = Vec::new();
        write_value(&mut buffer, &Value::Text("abc".to_owned())).unwrap();
        write_value(&mut buffer, &Value::Integer(7)).unwrap();
        let (first, used) = read_value(&buffer).unwrap();
        assert_eq!(first, Value::Text("abc".to_owned()));
        let (second, rest) = read_value(&buffer[used..]).unwrap();
        assert_eq!(second, Value::Integer(7));
        assert_eq!(used + rest, buffer.len());
    }

    #[test]
    fn full_registry_refuses_new_types() {
        let mut types = TypeRegistry::new();
        while types.names.len() < TypeCode::MAX as usize {
            types.names.push("filler");
        }
        assert_eq!(types.register::<Point>(), Err(Error::TypeRegistryFull));
        assert_eq!(types.register::<i32>(), Ok(5));
    }
}
