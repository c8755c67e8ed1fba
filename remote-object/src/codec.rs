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

//! Binary encoding of the three RMI messages.
//!
//! Every payload handed to the transport is one kind byte followed by the body.
//! Integers are big-endian, strings carry a one-byte length, and argument values
//! are single CBOR items (see [`crate::types`]).

use crate::descriptor::{MethodDescriptor, ObjectDefinition};
use crate::types::{read_value, write_value};
use crate::{InvocationId, MethodId, ObjectId};
use serde_cbor::Value;
use std::io::{Cursor, Read};
use thiserror::Error;

const KIND_DEFINITIONS: u8 = 0;
const KIND_CALL: u8 = 1;
const KIND_RETURN: u8 = 2;

const SLOT_ABSENT: u8 = 0;
const SLOT_PRESENT: u8 = 1;
const SLOT_FAILED: u8 = 2;

/// Largest count that fits a one-byte count prefix.
pub const MAX_COUNT: usize = u8::MAX as usize;
pub const MAX_STRING: usize = u8::MAX as usize;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("message ended unexpectedly")]
    UnexpectedEnd,

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("invalid presence byte {0}")]
    InvalidPresence(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("too many {what}: {count}")]
    TooMany {
        what: &'static str,
        count: usize,
    },

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("value encoding: {0}")]
    Value(String),
}

/// A call of `method` on the exposed `object`. `invocation` is 0 when no return is expected.
#[derive(PartialEq, Debug, Clone)]
pub struct MethodCall {
    pub object: ObjectId,
    pub method: MethodId,
    pub invocation: InvocationId,
    /// `None` is an absent slot. `Some(Value::Null)` is sent as an absent slot too and
    /// decodes as `None`.
    pub args: Vec<Option<Value>>,
}

/// The outcome of a call. `Err` carries the failure text of a target method that did not complete.
#[derive(PartialEq, Debug, Clone)]
pub struct MethodReturn {
    pub invocation: InvocationId,
    /// `Ok(Some(Value::Null))` is sent as `Ok(None)`.
    pub result: Result<Option<Value>, String>,
}

#[derive(PartialEq, Debug, Clone)]
pub enum Message {
    Definitions(Vec<ObjectDefinition>),
    Call(MethodCall),
    Return(MethodReturn),
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::new();
    match message {
        Message::Definitions(x) => {
            buffer.push(KIND_DEFINITIONS);
            encode_object_definitions(&mut buffer, x)?;
        }
        Message::Call(x) => {
            buffer.push(KIND_CALL);
            encode_method_call(&mut buffer, x)?;
        }
        Message::Return(x) => {
            buffer.push(KIND_RETURN);
            encode_method_return(&mut buffer, x)?;
        }
    }
    Ok(buffer)
}

pub fn decode_message(data: &[u8]) -> Result<Message, CodecError> {
    let mut cursor = Cursor::new(data);
    let message = match read_u8(&mut cursor)? {
        KIND_DEFINITIONS => Message::Definitions(decode_object_definitions(&mut cursor)?),
        KIND_CALL => Message::Call(decode_method_call(&mut cursor)?),
        KIND_RETURN => Message::Return(decode_method_return(&mut cursor)?),
        kind => return Err(CodecError::UnknownKind(kind)),
    };
    let rest = data.len() - cursor.position() as usize;
    if rest != 0 {
        return Err(CodecError::TrailingBytes(rest))
    }
    Ok(message)
}

pub fn encode_object_definitions(buffer: &mut Vec<u8>, definitions: &[ObjectDefinition]) -> Result<(), CodecError> {
    write_count(buffer, definitions.len(), "object definitions")?;
    for definition in definitions {
        buffer.extend_from_slice(&definition.id.to_be_bytes());
        write_string(buffer, &definition.name);
        write_count(buffer, definition.methods.len(), "methods")?;
        for method in &definition.methods {
            write_string(buffer, &method.name);
            buffer.extend_from_slice(&method.ret.to_be_bytes());
            write_count(buffer, method.params.len(), "parameters")?;
            for param in &method.params {
                buffer.extend_from_slice(&param.to_be_bytes());
            }
        }
    }
    Ok(())
}

pub fn decode_object_definitions(cursor: &mut Cursor<&[u8]>) -> Result<Vec<ObjectDefinition>, CodecError> {
    let count = read_u8(cursor)?;
    let mut definitions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = read_u16(cursor)?;
        let name = read_string(cursor)?;
        let method_count = read_u8(cursor)?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            let name = read_string(cursor)?;
            let ret = read_u16(cursor)?;
            let param_count = read_u8(cursor)?;
            let params = (0..param_count).map(|_| read_u16(cursor)).collect::<Result<Vec<_>, _>>()?;
            methods.push(MethodDescriptor {
                name,
                params,
                ret,
            });
        }
        definitions.push(ObjectDefinition {
            id,
            name,
            methods,
        });
    }
    Ok(definitions)
}

pub fn encode_method_call(buffer: &mut Vec<u8>, call: &MethodCall) -> Result<(), CodecError> {
    buffer.extend_from_slice(&call.object.to_be_bytes());
    buffer.extend_from_slice(&call.method.to_be_bytes());
    buffer.extend_from_slice(&call.invocation.to_be_bytes());
    write_count(buffer, call.args.len(), "arguments")?;
    for arg in &call.args {
        write_slot(buffer, arg.as_ref())?;
    }
    Ok(())
}

pub fn decode_method_call(cursor: &mut Cursor<&[u8]>) -> Result<MethodCall, CodecError> {
    let object = read_u16(cursor)?;
    let method = read_u16(cursor)?;
    let invocation = read_u16(cursor)?;
    let count = read_u8(cursor)?;
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        args.push(match read_u8(cursor)? {
            SLOT_ABSENT => None,
            SLOT_PRESENT => Some(read_cbor(cursor)?),
            x => return Err(CodecError::InvalidPresence(x)),
        });
    }
    Ok(MethodCall {
        object,
        method,
        invocation,
        args,
    })
}

pub fn encode_method_return(buffer: &mut Vec<u8>, ret: &MethodReturn) -> Result<(), CodecError> {
    buffer.extend_from_slice(&ret.invocation.to_be_bytes());
    match &ret.result {
        Ok(value) => write_slot(buffer, value.as_ref())?,
        Err(reason) => {
            buffer.push(SLOT_FAILED);
            write_string(buffer, truncate(reason, MAX_STRING));
        }
    }
    Ok(())
}

pub fn decode_method_return(cursor: &mut Cursor<&[u8]>) -> Result<MethodReturn, CodecError> {
    let invocation = read_u16(cursor)?;
    let result = match read_u8(cursor)? {
        SLOT_ABSENT => Ok(None),
        SLOT_PRESENT => Ok(Some(read_cbor(cursor)?)),
        SLOT_FAILED => Err(read_string(cursor)?),
        x => return Err(CodecError::InvalidPresence(x)),
    };
    Ok(MethodReturn {
        invocation,
        result,
    })
}

fn write_count(buffer: &mut Vec<u8>, count: usize, what: &'static str) -> Result<(), CodecError> {
    if count > MAX_COUNT {
        return Err(CodecError::TooMany {
            what,
            count,
        })
    }
    buffer.push(count as u8);
    Ok(())
}

/// Names that don't fit the length prefix are sent empty.
fn write_string(buffer: &mut Vec<u8>, s: &str) {
    if s.len() > MAX_STRING {
        log::warn!("String of {} bytes is too long to encode; sending it empty", s.len());
        buffer.push(0);
        return
    }
    buffer.push(s.len() as u8);
    buffer.extend_from_slice(s.as_bytes());
}

fn write_slot(buffer: &mut Vec<u8>, value: Option<&Value>) -> Result<(), CodecError> {
    match value {
        None | Some(Value::Null) => buffer.push(SLOT_ABSENT),
        Some(value) => {
            buffer.push(SLOT_PRESENT);
            write_value(buffer, value)?;
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    let mut buf = [0u8; 1];
    cursor.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEnd)?;
    Ok(buf[0])
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, CodecError> {
    let mut buf = [0u8; 2];
    cursor.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEnd)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = read_u8(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|_| CodecError::UnexpectedEnd)?;
    String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8)
}

fn read_cbor(cursor: &mut Cursor<&[u8]>) -> Result<Value, CodecError> {
    let position = cursor.position() as usize;
    let rest = &cursor.get_ref()[position..];
    if rest.is_empty() {
        return Err(CodecError::UnexpectedEnd)
    }
    let (value, used) = read_value(rest)?;
    cursor.set_position((position + used) as u64);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VOID;

    fn definition() -> ObjectDefinition {
        ObjectDefinition {
            id: 0x0102,
            name: "calc".to_owned(),
            methods: vec![
                MethodDescriptor::new("add", vec![5, 5], 5),
                MethodDescriptor::new("reset", vec![], VOID),
            ],
        }
    }

    #[test]
    fn definitions_layout() {
        let mut buffer = Vec::new();
        encode_object_definitions(&mut buffer, &[definition()]).unwrap();
        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            1,                          // definitions
            0x01, 0x02,                 // object id
            4, b'c', b'a', b'l', b'c',  // name
            2,                          // methods
            3, b'a', b'd', b'd', 0, 5, 2, 0, 5, 0, 5,
            5, b'r', b'e', b's', b'e', b't', 0, 0, 0,
        ];
        assert_eq!(buffer, expected);
    }

    #[test]
    fn call_layout_keeps_null_slots() {
        let call = MethodCall {
            object: 3,
            method: 1,
            invocation: 0x0a0b,
            args: vec![None, Some(Value::Integer(2))],
        };
        let mut buffer = Vec::new();
        encode_method_call(&mut buffer, &call).unwrap();
        assert_eq!(&buffer[..8], &[0, 3, 0, 1, 0x0a, 0x0b, 2, SLOT_ABSENT]);
        assert_eq!(buffer[8], SLOT_PRESENT);

        let decoded = decode_message(&encode_message(&Message::Call(call.clone())).unwrap()).unwrap();
        assert_eq!(decoded, Message::Call(call));
    }

    #[test]
    fn messages_survive_the_wire() {
        let messages = vec![
            Message::Definitions(vec![definition(), ObjectDefinition {
                id: 7,
                name: String::new(),
                methods: Vec::new(),
            }]),
            Message::Call(MethodCall {
                object: 0,
                method: 0,
                invocation: 0,
                args: vec![Some(Value::Text("x".to_owned())), Some(Value::Array(vec![Value::Bool(true)]))],
            }),
            Message::Return(MethodReturn {
                invocation: 9,
                result: Ok(Some(Value::Float(1.5))),
            }),
            Message::Return(MethodReturn {
                invocation: 9,
                result: Ok(None),
            }),
            Message::Return(MethodReturn {
                invocation: 10,
                result: Err("boom".to_owned()),
            }),
        ];
        for message in messages {
            let data = encode_message(&message).unwrap();
            assert_eq!(decode_message(&data).unwrap(), message);
        }
    }

    #[test]
    fn long_names_are_sent_empty() {
        let mut long = definition();
        long.name = "n".repeat(300);
        let data = encode_message(&Message::Definitions(vec![long])).unwrap();
        match decode_message(&data).unwrap() {
            Message::Definitions(x) => {
                assert_eq!(x[0].name, "");
                assert_eq!(x[0].methods, definition().methods);
            }
            _ => panic!("wrong message kind"),
        }
    }

    #[test]
    fn long_failure_text_is_truncated() {
        let ret = MethodReturn {
            invocation: 1,
            result: Err("é".repeat(200)),
        };
        let data = encode_message(&Message::Return(ret)).unwrap();
        match decode_message(&data).unwrap() {
            Message::Return(MethodReturn {
                result: Err(reason),
                ..
            }) => assert_eq!(reason, "é".repeat(127)),
            _ => panic!("wrong message kind"),
        }
    }

    #[test]
    fn oversized_counts_are_rejected() {
        let call = MethodCall {
            object: 0,
            method: 0,
            invocation: 0,
            args: vec![None; 256],
        };
        assert_eq!(encode_message(&Message::Call(call)), Err(CodecError::TooMany {
            what: "arguments",
            count: 256
        }));
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert_eq!(decode_message(&[]), Err(CodecError::UnexpectedEnd));
        assert_eq!(decode_message(&[9]), Err(CodecError::UnknownKind(9)));
        assert_eq!(decode_message(&[KIND_CALL, 0, 1, 0, 2]), Err(CodecError::UnexpectedEnd));
        assert_eq!(decode_message(&[KIND_RETURN, 0, 1, 7]), Err(CodecError::InvalidPresence(7)));
        assert_eq!(decode_message(&[KIND_RETURN, 0, 1, 0, 0xff]), Err(CodecError::TrailingBytes(1)));
        assert_eq!(decode_message(&[KIND_DEFINITIONS, 1, 0, 0, 2, 0xff, 0xfe, 0]), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn null_values_travel_as_absent_slots() {
        let call = Message::Call(MethodCall {
            object: 1,
            method: 2,
            invocation: 3,
            args: vec![Some(Value::Null), None],
        });
        let data = encode_message(&call).unwrap();
        assert_eq!(&data[7..], &[2, SLOT_ABSENT, SLOT_ABSENT]);
        assert_eq!(
            decode_message(&data),
            Ok(Message::Call(MethodCall {
                object: 1,
                method: 2,
                invocation: 3,
                args: vec![None, None],
            }))
        );

        let ret = Message::Return(MethodReturn {
            invocation: 3,
            result: Ok(Some(Value::Null)),
        });
        assert_eq!(
            decode_message(&encode_message(&ret).unwrap()),
            Ok(Message::Return(MethodReturn {
                invocation: 3,
                result: Ok(None),
            }))
        );
    }
}
