//! Per-connection state and the fd-keyed connection table.

use std::collections::HashMap;
use std::os::fd::RawFd;

use bytes::BytesMut;

/// A live client connection: its fd and the growable reassembly buffer
/// recv bytes are appended to until the head parser succeeds.
pub struct ClientConnection {
    fd: RawFd,
    buf: BytesMut,
}

impl ClientConnection {
    pub fn new(fd: RawFd, capacity: usize) -> Self {
        ClientConnection {
            fd,
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Append received bytes. Grows the buffer if necessary.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[..]
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Mapping from socket descriptor to connection state.
///
/// The kernel reuses fds, so an entry must be gone before a later accept
/// can return the same number; close handling removes it first.
#[derive(Default)]
pub struct ConnectionTable {
    conns: HashMap<RawFd, ClientConnection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable {
            conns: HashMap::new(),
        }
    }

    pub fn insert(&mut self, fd: RawFd, capacity: usize) {
        self.conns.insert(fd, ClientConnection::new(fd, capacity));
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<ClientConnection> {
        self.conns.remove(&fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.conns.contains_key(&fd)
    }

    pub fn get(&self, fd: RawFd) -> Option<&ClientConnection> {
        self.conns.get(&fd)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut ClientConnection> {
        self.conns.get_mut(&fd)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Drain all entries, yielding them for teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = ClientConnection> + '_ {
        self.conns.drain().map(|(_, conn)| conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_accumulates() {
        let mut conn = ClientConnection::new(5, 16);
        conn.append(b"GET / ");
        conn.append(b"HTTP/1.1");
        assert_eq!(conn.data(), b"GET / HTTP/1.1");
        conn.clear();
        assert_eq!(conn.data(), b"");
    }

    #[test]
    fn remove_is_idempotent() {
        let mut table = ConnectionTable::new();
        table.insert(7, 16);
        assert!(table.contains(7));
        assert!(table.remove(7).is_some());
        assert!(table.remove(7).is_none());
    }

    #[test]
    fn fd_reuse_after_removal() {
        let mut table = ConnectionTable::new();
        table.insert(9, 16);
        table.get_mut(9).unwrap().append(b"old");
        table.remove(9);
        table.insert(9, 16);
        assert_eq!(table.get(9).unwrap().data(), b"");
    }
}
