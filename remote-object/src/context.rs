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

//! Which connection the method running on this thread was called from.

use crate::transport::ConnectionId;
use std::cell::Cell;

thread_local! {
    static CALLER: Cell<Option<ConnectionId>> = Cell::new(None);
}

/// The connection whose call the current thread is serving.
///
/// `None` outside of an exposed method invoked by a peer.
pub fn caller() -> Option<ConnectionId> {
    CALLER.with(|x| x.get())
}

/// Marks the current thread as serving `connection` until dropped.
pub(crate) struct CallerScope {
    previous: Option<ConnectionId>,
}

impl CallerScope {
    pub(crate) fn enter(connection: ConnectionId) -> Self {
        CallerScope {
            previous: CALLER.with(|x| x.replace(Some(connection))),
        }
    }
}

impl Drop for CallerScope {
    fn drop(&mut self) {
        let previous = self.previous;
        CALLER.with(|x| x.set(previous));
    }
}
