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

//! TCP transport. Each message is framed with an 8-byte big-endian length.

use super::{ConnectionId, Transport, TransportError, TransportEvent};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Frames larger than this are treated as a corrupted stream.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// The id a client uses for its single connection.
pub const CLIENT_CONNECTION: ConnectionId = 0;

fn write_frame(stream: &mut TcpStream, data: &[u8]) -> io::Result<()> {
    let size: [u8; 8] = (data.len() as u64).to_be_bytes();
    stream.write_all(&size)?;
    stream.write_all(data)?;
    stream.flush()
}

fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut size_buf = [0u8; 8];
    stream.read_exact(&mut size_buf)?;
    let size = u64::from_be_bytes(size_buf) as usize;
    if size > MAX_FRAME {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("frame of {} bytes", size)))
    }
    let mut result = vec![0u8; size];
    stream.read_exact(&mut result)?;
    Ok(result)
}

fn recv_routine(connection: ConnectionId, mut stream: TcpStream, events: Sender<TransportEvent>) {
    loop {
        match read_frame(&mut stream) {
            Ok(data) => {
                if events.send(TransportEvent::Message(connection, data)).is_err() {
                    break
                }
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    log::debug!("Connection {} closed: {}", connection, e);
                }
                break
            }
        }
    }
}

type Connections = Arc<Mutex<HashMap<ConnectionId, Arc<Mutex<TcpStream>>>>>;

pub struct TcpServer {
    local_addr: SocketAddr,
    connections: Connections,
    terminating: Arc<AtomicBool>,
    acceptor: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TcpServer {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<(Arc<Self>, Receiver<TransportEvent>)> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let (send, recv) = channel::unbounded();
        let connections: Connections = Default::default();
        let terminating = Arc::new(AtomicBool::new(false));

        let connections_ = Arc::clone(&connections);
        let terminating_ = Arc::clone(&terminating);
        let acceptor = thread::Builder::new()
            .name("remote-object-accept".to_owned())
            .spawn(move || accept_routine(listener, connections_, terminating_, send))?;

        Ok((
            Arc::new(TcpServer {
                local_addr,
                connections,
                terminating,
                acceptor: Mutex::new(Some(acceptor)),
            }),
            recv,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listener and every hosted connection.
    pub fn shutdown(&self) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return
        }
        for stream in self.connections.lock().values() {
            stream.lock().shutdown(Shutdown::Both).ok();
        }
        // Wake the acceptor so it observes the flag.
        TcpStream::connect(self.local_addr).ok();
        if let Some(acceptor) = self.acceptor.lock().take() {
            acceptor.join().ok();
        }
    }

    fn stream(&self, connection: ConnectionId) -> Result<Arc<Mutex<TcpStream>>, TransportError> {
        self.connections.lock().get(&connection).cloned().ok_or(TransportError::Closed(connection))
    }
}

fn accept_routine(
    listener: TcpListener,
    connections: Connections,
    terminating: Arc<AtomicBool>,
    events: Sender<TransportEvent>,
) {
    let mut next: ConnectionId = 1;
    for stream in listener.incoming() {
        if terminating.load(Ordering::SeqCst) {
            break
        }
        let stream = match stream {
            Ok(x) => x,
            Err(e) => {
                log::warn!("Failed to accept a connection: {}", e);
                continue
            }
        };
        let connection = next;
        next += 1;
        if let Err(e) = host(connection, stream, &connections, &events) {
            log::warn!("Failed to set up connection {}: {}", connection, e);
        }
    }
}

fn host(
    connection: ConnectionId,
    stream: TcpStream,
    connections: &Connections,
    events: &Sender<TransportEvent>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    connections.lock().insert(connection, Arc::new(Mutex::new(stream)));
    events.send(TransportEvent::Connected(connection)).ok();

    let connections = Arc::clone(connections);
    let events = events.clone();
    thread::Builder::new().name(format!("remote-object-conn-{}", connection)).spawn(move || {
        recv_routine(connection, reader, events.clone());
        connections.lock().remove(&connection);
        events.send(TransportEvent::Disconnected(connection)).ok();
    })?;
    Ok(())
}

impl Transport for TcpServer {
    fn send(&self, connection: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        let stream = self.stream(connection)?;
        let mut guard = stream.lock();
        write_frame(&mut guard, &data).map_err(|_| TransportError::Closed(connection))
    }

    fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let streams: Vec<_> = self.connections.lock().iter().map(|(id, x)| (*id, Arc::clone(x))).collect();
        for (id, stream) in streams {
            if let Err(e) = write_frame(&mut stream.lock(), &data) {
                log::debug!("Skipping connection {} in broadcast: {}", id, e);
            }
        }
        Ok(())
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct TcpClient {
    stream: Mutex<TcpStream>,
}

impl TcpClient {
    /// Connects and reports the connection as `CLIENT_CONNECTION`.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<(Arc<Self>, Receiver<TransportEvent>)> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let (send, recv) = channel::unbounded();
        send.send(TransportEvent::Connected(CLIENT_CONNECTION)).ok();
        thread::Builder::new().name("remote-object-client".to_owned()).spawn(move || {
            recv_routine(CLIENT_CONNECTION, reader, send.clone());
            send.send(TransportEvent::Disconnected(CLIENT_CONNECTION)).ok();
        })?;
        Ok((
            Arc::new(TcpClient {
                stream: Mutex::new(stream),
            }),
            recv,
        ))
    }

    pub fn close(&self) {
        self.stream.lock().shutdown(Shutdown::Both).ok();
    }
}

impl Transport for TcpClient {
    fn send(&self, _connection: ConnectionId, data: Vec<u8>) -> Result<(), TransportError> {
        self.broadcast(data)
    }

    fn broadcast(&self, data: Vec<u8>) -> Result<(), TransportError> {
        write_frame(&mut self.stream.lock(), &data).map_err(|_| TransportError::Closed(CLIENT_CONNECTION))
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn frames_cross_loopback() {
        let (server, server_events) = TcpServer::bind("127.0.0.1:0").unwrap();
        let (client, client_events) = TcpClient::connect(server.local_addr()).unwrap();

        assert_eq!(client_events.recv_timeout(WAIT).unwrap(), TransportEvent::Connected(CLIENT_CONNECTION));
        let connection = match server_events.recv_timeout(WAIT).unwrap() {
            TransportEvent::Connected(x) => x,
            x => panic!("unexpected event {:?}", x),
        };

        let huge_data: Vec<u8> = (0..300).map(|i| (i % 255) as u8).collect();
        client.broadcast(huge_data.clone()).unwrap();
        assert_eq!(server_events.recv_timeout(WAIT).unwrap(), TransportEvent::Message(connection, huge_data.clone()));

        server.send(connection, huge_data.clone()).unwrap();
        assert_eq!(client_events.recv_timeout(WAIT).unwrap(), TransportEvent::Message(CLIENT_CONNECTION, huge_data));

        client.close();
        assert_eq!(server_events.recv_timeout(WAIT).unwrap(), TransportEvent::Disconnected(connection));
        assert_eq!(client_events.recv_timeout(WAIT).unwrap(), TransportEvent::Disconnected(CLIENT_CONNECTION));
    }
}
