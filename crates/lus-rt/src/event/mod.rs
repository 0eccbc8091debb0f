// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Readiness multiplexing over the platform event API.
//!
//! Exactly one backend is compiled in per target: epoll on Linux,
//! kqueue on the BSDs and macOS, `select` elsewhere on POSIX. All
//! backends speak the same [`EventBackend`] trait and normalize their
//! results into [`EventResult`], reporting the registered fd verbatim
//! so callers can key their own state off it.

use std::io;
use std::os::unix::io::RawFd;

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly",
    target_os = "openbsd"
))]
mod kqueue;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "dragonfly",
    target_os = "openbsd"
)))]
mod select;

/// Readiness interest/result bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u8);

impl Events {
    pub const NONE: Events = Events(0);
    pub const READ: Events = Events(1);
    pub const WRITE: Events = Events(2);
    /// Error or hangup observed by the backend. Delivered alongside
    /// whatever of READ/WRITE was requested; callers wanting the
    /// precise failure consult the fd itself (e.g. SO_ERROR).
    pub const ERROR: Events = Events(4);

    pub fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Events {
    type Output = Events;
    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

/// One normalized readiness event. Multiple raw events for the same
/// fd within a single wait cycle are consolidated into one result
/// whose `events` is the union.
#[derive(Debug, Clone, Copy)]
pub struct EventResult {
    pub fd: RawFd,
    pub events: Events,
    pub tag: u64,
}

impl EventResult {
    pub const fn empty() -> Self {
        EventResult {
            fd: -1,
            events: Events::NONE,
            tag: 0,
        }
    }
}

/// Uniform backend operations.
///
/// Contracts shared by every implementation:
/// - an fd has at most one active registration; `add` on an already
///   registered fd is a caller bug the backend may not detect
/// - `remove` is idempotent within a wait cycle
/// - `wait` blocks up to `timeout_ms` (`< 0` = forever), returns the
///   number of results filled, `0` on timeout, and maps interrupted
///   system calls to `Ok(0)` rather than an error
pub trait EventBackend {
    fn add(&mut self, fd: RawFd, events: Events, tag: u64) -> io::Result<()>;
    fn modify(&mut self, fd: RawFd, events: Events) -> io::Result<()>;
    fn remove(&mut self, fd: RawFd) -> io::Result<()>;
    fn wait(&mut self, out: &mut [EventResult], timeout_ms: i32) -> io::Result<usize>;
}

/// Create the backend compiled in for this target.
pub fn create_backend() -> io::Result<Box<dyn EventBackend>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(epoll::EpollBackend::new()?))
    }
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "openbsd"
    ))]
    {
        Ok(Box::new(kqueue::KqueueBackend::new()?))
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "openbsd"
    )))]
    {
        Ok(Box::new(select::SelectBackend::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn close_fd(fd: RawFd) {
        unsafe { libc::close(fd) };
    }

    #[test]
    fn events_bit_ops() {
        let e = Events::READ | Events::ERROR;
        assert!(e.contains(Events::READ));
        assert!(!e.contains(Events::WRITE));
        assert!(e.intersects(Events::ERROR));
        assert!(Events::NONE.is_empty());
    }

    #[test]
    fn wait_times_out_with_no_events() {
        let mut be = create_backend().unwrap();
        let mut out = [EventResult::empty(); 4];
        let n = be.wait(&mut out, 10).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn pipe_read_readiness() {
        let mut be = create_backend().unwrap();
        let (r, w) = make_pipe();
        be.add(r, Events::READ, 7).unwrap();

        // Nothing written yet: no readiness.
        let mut out = [EventResult::empty(); 4];
        assert_eq!(be.wait(&mut out, 10).unwrap(), 0);

        unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) };
        let n = be.wait(&mut out, 1000).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].fd, r);
        assert_eq!(out[0].tag, 7);
        assert!(out[0].events.contains(Events::READ));

        be.remove(r).unwrap();
        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn removed_fd_is_not_reported() {
        let mut be = create_backend().unwrap();
        let (r, w) = make_pipe();
        be.add(r, Events::READ, 1).unwrap();
        unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) };
        be.remove(r).unwrap();

        let mut out = [EventResult::empty(); 4];
        assert_eq!(be.wait(&mut out, 10).unwrap(), 0);

        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn write_readiness_on_fresh_pipe() {
        let mut be = create_backend().unwrap();
        let (r, w) = make_pipe();
        be.add(w, Events::WRITE, 2).unwrap();
        let mut out = [EventResult::empty(); 4];
        let n = be.wait(&mut out, 1000).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].fd, w);
        assert!(out[0].events.contains(Events::WRITE));
        be.remove(w).unwrap();
        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn modify_switches_interest() {
        let mut be = create_backend().unwrap();
        let (r, w) = make_pipe();
        unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) };

        be.add(r, Events::READ, 3).unwrap();
        let mut out = [EventResult::empty(); 4];
        assert_eq!(be.wait(&mut out, 1000).unwrap(), 1);

        // After dropping interest in READ the readable fd goes quiet.
        be.modify(r, Events::NONE).unwrap();
        assert_eq!(be.wait(&mut out, 10).unwrap(), 0);

        be.remove(r).unwrap();
        close_fd(r);
        close_fd(w);
    }

    #[test]
    fn one_result_per_fd_and_cycle() {
        // Readable and writable interest on the same fd must come back
        // as a single consolidated result.
        let mut be = create_backend().unwrap();
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        let (a, b) = (fds[0], fds[1]);
        unsafe { libc::write(b, b"y".as_ptr() as *const libc::c_void, 1) };

        be.add(a, Events::READ | Events::WRITE, 9).unwrap();
        let mut out = [EventResult::empty(); 8];
        let n = be.wait(&mut out, 1000).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].fd, a);
        assert!(out[0].events.contains(Events::READ | Events::WRITE));

        be.remove(a).unwrap();
        close_fd(a);
        close_fd(b);
    }
}
