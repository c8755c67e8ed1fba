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

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use remote_object::*;
use std::fmt;
use std::sync::Weak;
use std::time::Duration;

#[interface]
pub trait Adder: Service {
    fn add(&self, a: i32, b: i32) -> Result<i32>;
}

pub struct SimpleAdder;

impl Adder for SimpleAdder {
    fn add(&self, a: i32, b: i32) -> Result<i32> {
        Ok(a + b)
    }
}

/// Adds, then adds `offset`.
pub struct OffsetAdder {
    pub offset: i32,
}

impl Adder for OffsetAdder {
    fn add(&self, a: i32, b: i32) -> Result<i32> {
        Ok(a + b + self.offset)
    }
}

/// A wider view of an adder. Only the methods the remote object has can be called.
#[interface]
pub trait Calculator: Service {
    fn add(&self, a: i32, b: i32) -> Result<i32>;

    fn multiply(&self, a: i32, b: i32) -> Result<i32>;
}

#[interface]
pub trait Setter: Service {
    #[remote(name = "set")]
    fn set_number(&self, value: i32) -> Result<()>;

    #[remote(name = "set")]
    fn set_text(&self, value: String) -> Result<()>;

    fn history(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct RecordingSetter {
    history: Mutex<Vec<String>>,
}

impl Setter for RecordingSetter {
    fn set_number(&self, value: i32) -> Result<()> {
        self.history.lock().push(format!("number {}", value));
        Ok(())
    }

    fn set_text(&self, value: String) -> Result<()> {
        self.history.lock().push(format!("text {}", value));
        Ok(())
    }

    fn history(&self) -> Result<Vec<String>> {
        Ok(self.history.lock().clone())
    }
}

#[derive(Debug, PartialEq)]
pub enum MathError {
    DivisionByZero,
    Rpc(Error),
}

impl From<Error> for MathError {
    fn from(e: Error) -> Self {
        MathError::Rpc(e)
    }
}

impl fmt::Display for MathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MathError::DivisionByZero => write!(f, "division by zero"),
            MathError::Rpc(e) => e.fmt(f),
        }
    }
}

#[interface]
pub trait Divider: Service {
    fn divide(&self, a: i32, b: i32) -> std::result::Result<i32, MathError>;
}

pub struct SimpleDivider;

impl Divider for SimpleDivider {
    fn divide(&self, a: i32, b: i32) -> std::result::Result<i32, MathError> {
        if b == 0 {
            return Err(MathError::DivisionByZero)
        }
        Ok(a / b)
    }
}

/// Adds by calling the "calc" object of whoever called it.
#[interface]
pub trait Relay: Service {
    fn add_twice(&self, a: i32, b: i32) -> Result<i32>;
}

pub struct CalcRelay {
    pub store: Weak<ObjectStore>,
}

impl Relay for CalcRelay {
    fn add_twice(&self, a: i32, b: i32) -> Result<i32> {
        let store = self.store.upgrade().ok_or(Error::Transport(TransportError::Shutdown))?;
        let connection = caller().ok_or_else(|| Error::NotFound("caller".to_owned()))?;
        let calc = store.get_exposed_object_from::<dyn Adder>(connection, "calc", true)?;
        let once = calc.add(a, b)?;
        log::debug!("Relayed {} + {} = {}", a, b, once);
        calc.add(once, once)
    }
}

/// Blocks each `pass` call until the test lets it through.
#[interface]
pub trait Gate: Service {
    fn pass(&self) -> Result<bool>;
}

pub struct ManualGate {
    pub entered: Sender<()>,
    pub release: Receiver<()>,
    pub patience: Duration,
}

impl Gate for ManualGate {
    fn pass(&self) -> Result<bool> {
        self.entered.send(()).ok();
        Ok(self.release.recv_timeout(self.patience).is_ok())
    }
}
