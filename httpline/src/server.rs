//! Single-threaded server event loop.
//!
//! One thread owns the ring, the buffer pool, and the connection table,
//! and drives every connection through accept → recv → parse → send →
//! close. The kernel is the only other actor; the enter syscall inside
//! [`Ring::submit_and_wait`] is the sole blocking site.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use slab::Slab;

use crate::buffer::pool::BufferPool;
use crate::completion::{IoRequest, OpKind, key_from, user_data_for};
use crate::config::Config;
use crate::connection::ConnectionTable;
use crate::error::Error;
use crate::http::{self, ParseOutcome};
use crate::metrics;
use crate::ring::{Cqe, Ring};

/// A submission abandoned under back-pressure, retried at the top of the
/// next iteration.
enum DeferredOp {
    Accept,
    Recv(RawFd),
    Send(RawFd, Vec<u8>),
    Close(RawFd),
}

/// What a recv completion decided after re-running the parser.
enum RecvAction {
    MoreData,
    Respond(Vec<u8>),
}

/// Handle returned by [`Server::shutdown_handle`] to trigger graceful
/// shutdown from another thread or a signal handler.
///
/// `stop()` clears the running flag and closes the listening socket.
/// In-flight operations complete normally; the loop exits at the top of
/// its next iteration. A loop parked in `submit_and_wait` wakes on the
/// next completion.
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    listen_fd: RawFd,
    listen_fd_closed: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if !self.listen_fd_closed.swap(true, Ordering::AcqRel) {
            unsafe {
                libc::close(self.listen_fd);
            }
        }
    }
}

/// The HTTP/1.x server: sockets, buffers, in-flight requests, and the
/// dispatch loop.
pub struct Server {
    config: Config,
    ring: Ring,
    pool: BufferPool,
    connections: ConnectionTable,
    requests: Slab<IoRequest>,
    deferred: Vec<DeferredOp>,
    cqe_batch: Vec<Cqe>,
    listen_fd: RawFd,
    running: Arc<AtomicBool>,
    listen_fd_closed: Arc<AtomicBool>,
}

impl Server {
    /// Validate the config, set up the ring, and bind the listener.
    pub fn bind(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let ring = Ring::setup(config.queue_depth)?;
        let pool = BufferPool::new(config.buffer_count, config.buffer_size);
        let listen_fd = create_listener(config.listen, config.backlog)?;

        let depth = config.queue_depth as usize;
        Ok(Server {
            config,
            ring,
            pool,
            connections: ConnectionTable::new(),
            requests: Slab::with_capacity(depth),
            deferred: Vec::new(),
            cqe_batch: Vec::with_capacity(depth * 2),
            listen_fd,
            running: Arc::new(AtomicBool::new(true)),
            listen_fd_closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound listen address (resolves port 0 to the assigned port).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                self.listen_fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_socket_addr(&storage, len)
            .ok_or_else(|| io::Error::other("unsupported address family"))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            listen_fd: self.listen_fd,
            listen_fd_closed: self.listen_fd_closed.clone(),
        }
    }

    /// Run the event loop until [`ShutdownHandle::stop`] is called.
    pub fn run(&mut self) -> Result<(), Error> {
        tracing::info!(listen = %self.config.listen, "server listening");
        self.submit_accept();

        while self.running.load(Ordering::Acquire) {
            self.retry_deferred();

            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let mut batch = mem::take(&mut self.cqe_batch);
            self.ring.drain_cqes(&mut batch);
            for cqe in batch.drain(..) {
                self.on_cqe(cqe);
            }
            self.cqe_batch = batch;

            // Flush SQEs the handlers produced without waiting.
            self.ring.submit()?;
        }

        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        tracing::debug!(
            connections = self.connections.len(),
            sq_dropped = self.ring.sq_dropped(),
            "server teardown"
        );
        for conn in self.connections.drain() {
            unsafe {
                libc::close(conn.fd());
            }
        }
        if !self.listen_fd_closed.swap(true, Ordering::AcqRel) {
            unsafe {
                libc::close(self.listen_fd);
            }
        }
    }

    // ── Completion dispatch ──────────────────────────────────────────

    fn on_cqe(&mut self, cqe: Cqe) {
        metrics::CQE_PROCESSED.increment();

        let Some(key) = key_from(cqe.user_data) else {
            tracing::warn!("completion with zero user_data, skipping");
            return;
        };
        let Some(req) = self.requests.try_remove(key) else {
            tracing::warn!(user_data = cqe.user_data, "completion for unknown request, skipping");
            return;
        };

        if cqe.res < 0 {
            self.on_error(req, cqe.res);
            return;
        }

        match req.op {
            OpKind::Accept => self.on_accept(cqe.res),
            OpKind::Recv => self.on_recv(req.fd, req.buffer_index, cqe.res),
            OpKind::Send => self.on_send(req.fd, req.buffer_index, cqe.res),
            OpKind::Close => self.on_close(req.fd),
        }
    }

    fn on_error(&mut self, req: IoRequest, res: i32) {
        let err = io::Error::from_raw_os_error(-res);
        tracing::warn!(op = ?req.op, fd = req.fd, %err, "operation failed");

        if matches!(req.op, OpKind::Recv | OpKind::Send) {
            self.pool.release(req.buffer_index);
        }
        if self.connections.contains(req.fd) {
            self.submit_close(req.fd);
        }
        // A failed accept (e.g. ECONNABORTED) must not stop the server
        // from accepting.
        if req.op == OpKind::Accept && self.running.load(Ordering::Acquire) {
            self.submit_accept();
        }
    }

    fn on_accept(&mut self, res: i32) {
        let fd = res as RawFd;
        metrics::CONNECTIONS_ACCEPTED.increment();
        tracing::debug!(fd, "connection accepted");

        self.connections.insert(fd, self.config.reassembly_capacity);
        self.submit_recv(fd);
        if self.running.load(Ordering::Acquire) {
            self.submit_accept();
        }
    }

    fn on_recv(&mut self, fd: RawFd, buffer_index: u16, res: i32) {
        if res == 0 {
            // Peer closed before a full head arrived.
            self.pool.release(buffer_index);
            self.submit_close(fd);
            return;
        }

        let n = res as usize;
        metrics::BYTES_RECEIVED.add(n as u64);
        {
            let data = &self.pool.slice(buffer_index)[..n];
            if let Some(conn) = self.connections.get_mut(fd) {
                conn.append(data);
            }
        }
        self.pool.release(buffer_index);

        let action = match self.connections.get(fd) {
            // Entry already torn down (e.g. a prior error); drop the bytes.
            None => return,
            Some(conn) => match http::parse(conn.data()) {
                Ok(ParseOutcome::Incomplete) => RecvAction::MoreData,
                Ok(ParseOutcome::Complete(req)) => {
                    metrics::RESPONSES_OK.increment();
                    RecvAction::Respond(http::format_ok_json(&req, conn.data()))
                }
                Err(err) => {
                    metrics::PARSE_ERRORS.increment();
                    metrics::RESPONSES_BAD_REQUEST.increment();
                    tracing::debug!(fd, %err, "request rejected");
                    RecvAction::Respond(http::BAD_REQUEST.to_vec())
                }
            },
        };

        match action {
            RecvAction::MoreData => self.submit_recv(fd),
            RecvAction::Respond(response) => self.submit_send(fd, response),
        }
    }

    fn on_send(&mut self, fd: RawFd, buffer_index: u16, res: i32) {
        self.pool.release(buffer_index);
        metrics::BYTES_SENT.add(res as u64);

        self.connections.remove(fd);
        self.submit_close(fd);
    }

    fn on_close(&mut self, fd: RawFd) {
        // Idempotent: the entry is usually gone by the time close lands.
        self.connections.remove(fd);
        metrics::CONNECTIONS_CLOSED.increment();
        tracing::debug!(fd, "connection closed");
    }

    // ── Submission with back-pressure ────────────────────────────────

    fn submit_accept(&mut self) {
        let key = self.requests.insert(IoRequest::accept(self.listen_fd));
        if self
            .ring
            .prep_accept(self.listen_fd, user_data_for(key))
            .is_err()
        {
            self.requests.remove(key);
            metrics::SUBMISSIONS_DEFERRED.increment();
            self.deferred.push(DeferredOp::Accept);
            tracing::debug!("submission queue full, accept deferred");
        }
    }

    fn submit_recv(&mut self, fd: RawFd) {
        let Some(index) = self.pool.acquire() else {
            metrics::BUFFER_POOL_EMPTY.increment();
            metrics::SUBMISSIONS_DEFERRED.increment();
            self.deferred.push(DeferredOp::Recv(fd));
            tracing::debug!(fd, "buffer pool empty, recv deferred");
            return;
        };
        let len = self.pool.buffer_size() as u32;
        let ptr = self.pool.as_mut_ptr(index);
        let key = self.requests.insert(IoRequest::recv(fd, index));
        if self.ring.prep_recv(fd, ptr, len, user_data_for(key)).is_err() {
            self.requests.remove(key);
            self.pool.release(index);
            metrics::SUBMISSIONS_DEFERRED.increment();
            self.deferred.push(DeferredOp::Recv(fd));
            tracing::debug!(fd, "submission queue full, recv deferred");
        }
    }

    fn submit_send(&mut self, fd: RawFd, response: Vec<u8>) {
        if response.len() > self.pool.buffer_size() {
            tracing::warn!(
                fd,
                len = response.len(),
                "response exceeds buffer size, closing connection"
            );
            self.connections.remove(fd);
            self.submit_close(fd);
            return;
        }
        let Some(index) = self.pool.acquire() else {
            metrics::BUFFER_POOL_EMPTY.increment();
            metrics::SUBMISSIONS_DEFERRED.increment();
            self.deferred.push(DeferredOp::Send(fd, response));
            tracing::debug!(fd, "buffer pool empty, send deferred");
            return;
        };
        let ptr = {
            let slot = self.pool.slice_mut(index);
            slot[..response.len()].copy_from_slice(&response);
            slot.as_ptr()
        };
        let key = self.requests.insert(IoRequest::send(fd, index));
        if self
            .ring
            .prep_send(fd, ptr, response.len() as u32, user_data_for(key))
            .is_err()
        {
            self.requests.remove(key);
            self.pool.release(index);
            metrics::SUBMISSIONS_DEFERRED.increment();
            self.deferred.push(DeferredOp::Send(fd, response));
            tracing::debug!(fd, "submission queue full, send deferred");
        }
    }

    fn submit_close(&mut self, fd: RawFd) {
        let key = self.requests.insert(IoRequest::close(fd));
        if self.ring.prep_close(fd, user_data_for(key)).is_err() {
            self.requests.remove(key);
            metrics::SUBMISSIONS_DEFERRED.increment();
            self.deferred.push(DeferredOp::Close(fd));
            tracing::debug!(fd, "submission queue full, close deferred");
        }
    }

    fn retry_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let ops = mem::take(&mut self.deferred);
        for op in ops {
            match op {
                DeferredOp::Accept => self.submit_accept(),
                DeferredOp::Recv(fd) => {
                    if self.connections.contains(fd) {
                        self.submit_recv(fd);
                    }
                }
                DeferredOp::Send(fd, response) => {
                    if self.connections.contains(fd) {
                        self.submit_send(fd, response);
                    }
                }
                // The kernel fd must be closed even when the table entry
                // is already gone.
                DeferredOp::Close(fd) => self.submit_close(fd),
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for conn in self.connections.drain() {
            unsafe {
                libc::close(conn.fd());
            }
        }
        if !self.listen_fd_closed.swap(true, Ordering::AcqRel) {
            unsafe {
                libc::close(self.listen_fd);
            }
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR. The fd stays blocking: all
/// I/O on it happens through the ring.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<RawFd, Error> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let addr_len = socket_addr_to_sockaddr(addr, &mut storage);
    let ret = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, addr_len) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(Error::Io(err));
    }

    let ret = unsafe { libc::listen(fd, backlog) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(Error::Io(err));
    }

    Ok(fd)
}

/// Write a SocketAddr into a sockaddr_storage, return the address length.
fn socket_addr_to_sockaddr(addr: SocketAddr, storage: &mut libc::sockaddr_storage) -> libc::socklen_t {
    // Zero the storage to avoid uninitialised padding bytes.
    unsafe {
        std::ptr::write_bytes(
            storage as *mut _ as *mut u8,
            0,
            mem::size_of::<libc::sockaddr_storage>(),
        );
    }
    match addr {
        SocketAddr::V4(v4) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sa).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sa).sin_port = v4.port().to_be();
                (*sa).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sa).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sa).sin6_port = v6.port().to_be();
                (*sa).sin6_flowinfo = v6.flowinfo();
                (*sa).sin6_addr.s6_addr = v6.ip().octets();
                (*sa).sin6_scope_id = v6.scope_id();
            }
            mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}

/// Convert a libc sockaddr_storage to a std SocketAddr.
fn sockaddr_to_socket_addr(
    addr: &libc::sockaddr_storage,
    len: libc::socklen_t,
) -> Option<SocketAddr> {
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
    match addr.ss_family as libc::c_int {
        libc::AF_INET if len >= mem::size_of::<libc::sockaddr_in>() as libc::socklen_t => {
            let sa = unsafe { &*(addr as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr));
            let port = u16::from_be(sa.sin_port);
            Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 if len >= mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t => {
            let sa = unsafe { &*(addr as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sa.sin6_addr.s6_addr);
            let port = u16::from_be(sa.sin6_port);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                sa.sin6_flowinfo,
                sa.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    #[test]
    fn bind_resolves_ephemeral_port() {
        let config = ConfigBuilder::new()
            .listen("127.0.0.1:0".parse().unwrap())
            .queue_depth(4)
            .buffer_count(2)
            .buffer_size(4096)
            .build()
            .unwrap();
        let server = Server::bind(config).unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let config = ConfigBuilder::new()
            .listen("127.0.0.1:0".parse().unwrap())
            .queue_depth(4)
            .buffer_count(2)
            .buffer_size(4096)
            .build()
            .unwrap();
        let server = Server::bind(config).unwrap();
        let handle = server.shutdown_handle();
        handle.stop();
        handle.stop();
        assert!(!server.running.load(Ordering::Acquire));
    }

    #[test]
    fn sockaddr_round_trip() {
        let addr: SocketAddr = "192.0.2.1:4242".parse().unwrap();
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let len = socket_addr_to_sockaddr(addr, &mut storage);
        assert_eq!(sockaddr_to_socket_addr(&storage, len), Some(addr));
    }
}
