//! Raw io_uring interface: setup syscall, shared-memory ring mappings,
//! SQE acquisition, and the enter protocol.
//!
//! The kernel reads the SQ ring and writes the CQ ring concurrently with
//! this thread. Kernel-written cursors (`sq_head`, `cq_tail`) are read with
//! acquire ordering; user-written cursors (`sq_tail`, `cq_head`) are stored
//! with release ordering, after the SQE contents or CQE reads they publish.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, SqFull};

// mmap offsets for the three shared regions.
pub const IORING_OFF_SQ_RING: i64 = 0;
pub const IORING_OFF_CQ_RING: i64 = 0x0800_0000;
pub const IORING_OFF_SQES: i64 = 0x1000_0000;

// io_uring_enter flags.
pub const IORING_ENTER_GETEVENTS: u32 = 1;

// io_uring_register opcodes.
pub const IORING_REGISTER_BUFFERS: u32 = 0;

// Opcodes used by the server loop.
pub const IORING_OP_NOP: u8 = 0;
pub const IORING_OP_READV: u8 = 1;
pub const IORING_OP_WRITEV: u8 = 2;
pub const IORING_OP_ACCEPT: u8 = 13;
pub const IORING_OP_CLOSE: u8 = 19;
pub const IORING_OP_SEND: u8 = 26;
pub const IORING_OP_RECV: u8 = 27;

/// Submission queue entry, shared with the kernel (64 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub op_flags: u32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub __pad2: [u64; 2],
}

impl Sqe {
    fn zeroed() -> Sqe {
        // Safety: Sqe is a plain repr(C) record; all-zeroes is the
        // kernel's "no-op fields" state.
        unsafe { mem::zeroed() }
    }
}

/// Completion queue entry (16 bytes). `res` is a byte count on success or
/// a negative errno on failure.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[allow(dead_code)] // full kernel ABI; not every offset is consumed
struct SqRingOffsets {
    head: u32,
    tail: u32,
    ring_mask: u32,
    ring_entries: u32,
    flags: u32,
    dropped: u32,
    array: u32,
    resv1: u32,
    user_addr: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[allow(dead_code)] // full kernel ABI; not every offset is consumed
struct CqRingOffsets {
    head: u32,
    tail: u32,
    ring_mask: u32,
    ring_entries: u32,
    overflow: u32,
    cqes: u32,
    flags: u32,
    resv1: u32,
    user_addr: u64,
}

/// Parameters record exchanged with `io_uring_setup`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[allow(dead_code)] // full kernel ABI; not every field is consumed
struct IoUringParams {
    sq_entries: u32,
    cq_entries: u32,
    flags: u32,
    sq_thread_cpu: u32,
    sq_thread_idle: u32,
    features: u32,
    wq_fd: u32,
    resv: [u32; 3],
    sq_off: SqRingOffsets,
    cq_off: CqRingOffsets,
}

/// One mmapped region against the ring fd. Unmapped on drop.
struct Mmap {
    ptr: *mut u8,
    len: usize,
}

impl Mmap {
    fn map(fd: RawFd, len: usize, offset: i64) -> io::Result<Mmap> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Mmap {
            ptr: ptr as *mut u8,
            len,
        })
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

/// The paired SQ/CQ shared-memory structure plus its SQE array.
///
/// `(sqe_head, sqe_tail)` privately track SQEs filled but not yet published
/// to the kernel-visible SQ tail; `sqe_tail - sqe_head <= sq_entries` holds
/// under unsigned wrap at all times.
pub struct Ring {
    fd: RawFd,
    _sq_mmap: Mmap,
    _cq_mmap: Mmap,
    _sqe_mmap: Mmap,
    // SQ cursors into shared memory.
    sq_khead: *const AtomicU32,
    sq_ktail: *const AtomicU32,
    sq_kdropped: *const AtomicU32,
    sq_array: *mut u32,
    sqes: *mut Sqe,
    sq_mask: u32,
    sq_entries: u32,
    sqe_head: u32,
    sqe_tail: u32,
    // CQ cursors into shared memory.
    cq_khead: *const AtomicU32,
    cq_ktail: *const AtomicU32,
    cqes: *const Cqe,
    cq_mask: u32,
}

// Safety: the ring is owned and driven by a single thread; the raw pointers
// target mappings that live exactly as long as the Ring.
unsafe impl Send for Ring {}

impl Ring {
    /// Create an io_uring instance with `entries` SQ slots and map its
    /// three shared regions.
    pub fn setup(entries: u32) -> Result<Ring, Error> {
        let mut params = IoUringParams::default();
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_uring_setup,
                entries,
                &mut params as *mut IoUringParams,
            )
        };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        let fd = ret as RawFd;

        let close_on_err = |e: io::Error| {
            unsafe {
                libc::close(fd);
            }
            Error::Io(e)
        };

        let sq_ring_len =
            params.sq_off.array as usize + params.sq_entries as usize * mem::size_of::<u32>();
        let cq_ring_len =
            params.cq_off.cqes as usize + params.cq_entries as usize * mem::size_of::<Cqe>();
        let sqes_len = params.sq_entries as usize * mem::size_of::<Sqe>();

        let sq_mmap = Mmap::map(fd, sq_ring_len, IORING_OFF_SQ_RING).map_err(close_on_err)?;
        let cq_mmap = Mmap::map(fd, cq_ring_len, IORING_OFF_CQ_RING).map_err(close_on_err)?;
        let sqe_mmap = Mmap::map(fd, sqes_len, IORING_OFF_SQES).map_err(close_on_err)?;

        // Safety: the reported offsets index into mappings sized from the
        // same parameters record.
        unsafe {
            let sq = sq_mmap.ptr;
            let cq = cq_mmap.ptr;
            let sq_mask = *(sq.add(params.sq_off.ring_mask as usize) as *const u32);
            let cq_mask = *(cq.add(params.cq_off.ring_mask as usize) as *const u32);

            Ok(Ring {
                fd,
                sq_khead: sq.add(params.sq_off.head as usize) as *const AtomicU32,
                sq_ktail: sq.add(params.sq_off.tail as usize) as *const AtomicU32,
                sq_kdropped: sq.add(params.sq_off.dropped as usize) as *const AtomicU32,
                sq_array: sq.add(params.sq_off.array as usize) as *mut u32,
                sqes: sqe_mmap.ptr as *mut Sqe,
                sq_mask,
                sq_entries: params.sq_entries,
                sqe_head: 0,
                sqe_tail: 0,
                cq_khead: cq.add(params.cq_off.head as usize) as *const AtomicU32,
                cq_ktail: cq.add(params.cq_off.tail as usize) as *const AtomicU32,
                cqes: cq.add(params.cq_off.cqes as usize) as *const Cqe,
                cq_mask,
                _sq_mmap: sq_mmap,
                _cq_mmap: cq_mmap,
                _sqe_mmap: sqe_mmap,
            })
        }
    }

    pub fn sq_entries(&self) -> u32 {
        self.sq_entries
    }

    /// SQEs the kernel reported dropped (malformed index in the SQ array).
    pub fn sq_dropped(&self) -> u32 {
        unsafe { (*self.sq_kdropped).load(Ordering::Relaxed) }
    }

    /// Reserve the next SQE slot, zeroed. The caller fills the fields and
    /// must not hold the reference past the next call into the ring.
    pub fn get_sqe(&mut self) -> Result<&mut Sqe, SqFull> {
        let head = unsafe { (*self.sq_khead).load(Ordering::Acquire) };
        if self.sqe_tail.wrapping_add(1).wrapping_sub(head) > self.sq_entries {
            return Err(SqFull);
        }
        let idx = (self.sqe_tail & self.sq_mask) as usize;
        self.sqe_tail = self.sqe_tail.wrapping_add(1);
        let sqe = unsafe { &mut *self.sqes.add(idx) };
        *sqe = Sqe::zeroed();
        Ok(sqe)
    }

    /// Publish filled SQEs to the kernel-visible tail. Returns the number
    /// made visible.
    pub fn flush_sq(&mut self) -> u32 {
        let to_flush = self.sqe_tail.wrapping_sub(self.sqe_head);
        if to_flush == 0 {
            return 0;
        }
        unsafe {
            let mut ktail = (*self.sq_ktail).load(Ordering::Relaxed);
            while self.sqe_head != self.sqe_tail {
                let slot = (ktail & self.sq_mask) as usize;
                *self.sq_array.add(slot) = self.sqe_head & self.sq_mask;
                ktail = ktail.wrapping_add(1);
                self.sqe_head = self.sqe_head.wrapping_add(1);
            }
            // SQE contents and array slots must be visible before the tail.
            (*self.sq_ktail).store(ktail, Ordering::Release);
        }
        to_flush
    }

    /// Flush and submit without waiting. Returns the number of SQEs the
    /// kernel accepted.
    pub fn submit(&mut self) -> io::Result<u32> {
        let to_submit = self.flush_sq();
        if to_submit == 0 {
            return Ok(0);
        }
        self.enter(to_submit, 0, 0)
    }

    /// Flush, submit, and park until at least `wait_nr` completions are
    /// available.
    pub fn submit_and_wait(&mut self, wait_nr: u32) -> io::Result<u32> {
        let to_submit = self.flush_sq();
        self.enter(to_submit, wait_nr, IORING_ENTER_GETEVENTS)
    }

    fn enter(&self, to_submit: u32, min_complete: u32, flags: u32) -> io::Result<u32> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_uring_enter,
                self.fd,
                to_submit,
                min_complete,
                flags,
                ptr::null::<libc::sigset_t>(),
                0usize,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as u32)
    }

    /// Drain all pending CQEs, in ring order, into `out`.
    pub fn drain_cqes(&mut self, out: &mut Vec<Cqe>) {
        unsafe {
            let tail = (*self.cq_ktail).load(Ordering::Acquire);
            let mut head = (*self.cq_khead).load(Ordering::Relaxed);
            while head != tail {
                let idx = (head & self.cq_mask) as usize;
                out.push(*self.cqes.add(idx));
                head = head.wrapping_add(1);
            }
            (*self.cq_khead).store(head, Ordering::Release);
        }
    }

    // ── SQE prep helpers ─────────────────────────────────────────────

    pub fn prep_nop(&mut self, user_data: u64) -> Result<(), SqFull> {
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_NOP;
        sqe.fd = -1;
        sqe.user_data = user_data;
        Ok(())
    }

    pub fn prep_accept(&mut self, fd: RawFd, user_data: u64) -> Result<(), SqFull> {
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_ACCEPT;
        sqe.fd = fd;
        sqe.user_data = user_data;
        Ok(())
    }

    /// The buffer must stay valid and exclusively owned until the CQE
    /// with this `user_data` is consumed.
    pub fn prep_recv(
        &mut self,
        fd: RawFd,
        buf: *mut u8,
        len: u32,
        user_data: u64,
    ) -> Result<(), SqFull> {
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_RECV;
        sqe.fd = fd;
        sqe.addr = buf as u64;
        sqe.len = len;
        sqe.user_data = user_data;
        Ok(())
    }

    /// The buffer must stay valid until the CQE with this `user_data` is
    /// consumed.
    pub fn prep_send(
        &mut self,
        fd: RawFd,
        buf: *const u8,
        len: u32,
        user_data: u64,
    ) -> Result<(), SqFull> {
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_SEND;
        sqe.fd = fd;
        sqe.addr = buf as u64;
        sqe.len = len;
        sqe.user_data = user_data;
        Ok(())
    }

    pub fn prep_close(&mut self, fd: RawFd, user_data: u64) -> Result<(), SqFull> {
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_CLOSE;
        sqe.fd = fd;
        sqe.user_data = user_data;
        Ok(())
    }

    /// Register fixed buffers with the kernel. Reserved for zero-copy I/O;
    /// the server loop does not call this.
    pub fn register_buffers(&self, iovecs: &[libc::iovec]) -> io::Result<()> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_uring_register,
                self.fd,
                IORING_REGISTER_BUFFERS,
                iovecs.as_ptr(),
                iovecs.len() as u32,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_kernel_abi() {
        assert_eq!(mem::size_of::<Sqe>(), 64);
        assert_eq!(mem::size_of::<Cqe>(), 16);
    }

    #[test]
    fn nop_round_trip() {
        let mut ring = Ring::setup(4).unwrap();
        ring.prep_nop(0x42).unwrap();
        ring.submit_and_wait(1).unwrap();

        let mut cqes = Vec::new();
        ring.drain_cqes(&mut cqes);
        assert_eq!(cqes.len(), 1);
        assert_eq!(cqes[0].user_data, 0x42);
        assert_eq!(cqes[0].res, 0);
    }

    #[test]
    fn sq_fills_to_capacity() {
        let mut ring = Ring::setup(4).unwrap();
        let entries = ring.sq_entries();
        for i in 0..entries {
            ring.prep_nop(i as u64 + 1).unwrap();
        }
        assert_eq!(ring.get_sqe().unwrap_err(), SqFull);
        let flushed = ring.flush_sq();
        assert_eq!(flushed, entries);
    }

    #[test]
    fn backlog_cycles_without_loss() {
        // Repeated fill/flush/drain cycles: no SQE lost, none duplicated.
        let mut ring = Ring::setup(4).unwrap();
        let entries = ring.sq_entries();
        let mut seen = Vec::new();
        let mut next: u64 = 1;
        for _ in 0..8 {
            for _ in 0..entries {
                ring.prep_nop(next).unwrap();
                next += 1;
            }
            ring.submit_and_wait(entries).unwrap();
            ring.drain_cqes(&mut seen);
        }
        let mut data: Vec<u64> = seen.iter().map(|c| c.user_data).collect();
        data.sort_unstable();
        let expected: Vec<u64> = (1..next).collect();
        assert_eq!(data, expected);
    }

    #[test]
    fn flush_of_empty_queue_is_zero() {
        let mut ring = Ring::setup(4).unwrap();
        assert_eq!(ring.flush_sq(), 0);
        assert_eq!(ring.submit().unwrap(), 0);
    }
}
