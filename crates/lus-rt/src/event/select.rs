// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `select(2)` fallback backend for POSIX targets without epoll or
//! kqueue. Interest is kept per fd and the three fd sets are rebuilt
//! on every wait; fds at or above FD_SETSIZE are rejected at `add`.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;

use super::{EventBackend, EventResult, Events};

pub struct SelectBackend {
    /// fd → (interest, caller tag), ordered so results are stable.
    regs: BTreeMap<RawFd, (Events, u64)>,
}

impl SelectBackend {
    pub fn new() -> Self {
        SelectBackend {
            regs: BTreeMap::new(),
        }
    }
}

impl EventBackend for SelectBackend {
    fn add(&mut self, fd: RawFd, events: Events, tag: u64) -> io::Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("fd {fd} out of range for select backend"),
            ));
        }
        self.regs.insert(fd, (events, tag));
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, events: Events) -> io::Result<()> {
        match self.regs.get_mut(&fd) {
            Some(reg) => {
                reg.0 = events;
                Ok(())
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.regs.remove(&fd);
        Ok(())
    }

    fn wait(&mut self, out: &mut [EventResult], timeout_ms: i32) -> io::Result<usize> {
        let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut err_set: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
            libc::FD_ZERO(&mut err_set);
        }

        let mut nfds = 0;
        for (&fd, &(interest, _)) in &self.regs {
            if interest.contains(Events::READ) {
                unsafe { libc::FD_SET(fd, &mut read_set) };
            }
            if interest.contains(Events::WRITE) {
                unsafe { libc::FD_SET(fd, &mut write_set) };
            }
            if !interest.is_empty() {
                unsafe { libc::FD_SET(fd, &mut err_set) };
                nfds = nfds.max(fd + 1);
            }
        }

        let mut tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        let tvp: *mut libc::timeval = if timeout_ms >= 0 {
            tv.tv_sec = (timeout_ms / 1000) as _;
            tv.tv_usec = ((timeout_ms % 1000) as i64 * 1000) as _;
            &mut tv
        } else {
            std::ptr::null_mut()
        };

        let rc = unsafe {
            libc::select(
                nfds,
                &mut read_set,
                &mut write_set,
                &mut err_set,
                tvp,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(0);
        }

        let mut count = 0;
        for (&fd, &(interest, tag)) in &self.regs {
            if count >= out.len() {
                break;
            }
            let mut events = Events::NONE;
            if interest.contains(Events::READ) && unsafe { libc::FD_ISSET(fd, &read_set) } {
                events |= Events::READ;
            }
            if interest.contains(Events::WRITE) && unsafe { libc::FD_ISSET(fd, &write_set) } {
                events |= Events::WRITE;
            }
            if unsafe { libc::FD_ISSET(fd, &err_set) } {
                events |= Events::ERROR;
            }
            if !events.is_empty() {
                out[count] = EventResult { fd, events, tag };
                count += 1;
            }
        }
        Ok(count)
    }
}
