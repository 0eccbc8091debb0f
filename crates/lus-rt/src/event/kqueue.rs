// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! kqueue backend for macOS and the BSDs.
//!
//! READ and WRITE are separate kevent filters, so one wait cycle can
//! produce two kevents for a single fd; they are consolidated into
//! one result here.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

use super::{EventBackend, EventResult, Events};

pub struct KqueueBackend {
    kq: RawFd,
    /// fd → (registered interest, caller tag).
    regs: HashMap<RawFd, (Events, u64)>,
}

fn kev(fd: RawFd, filter: i32, flags: u32) -> libc::kevent {
    // Field widths differ across the BSDs; build via zeroed + casts.
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = fd as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev
}

impl KqueueBackend {
    pub fn new() -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(KqueueBackend {
            kq,
            regs: HashMap::new(),
        })
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as _,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl EventBackend for KqueueBackend {
    fn add(&mut self, fd: RawFd, events: Events, tag: u64) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        if events.contains(Events::READ) {
            changes.push(kev(fd, libc::EVFILT_READ as i32, libc::EV_ADD as u32 | libc::EV_ENABLE as u32));
        }
        if events.contains(Events::WRITE) {
            changes.push(kev(fd, libc::EVFILT_WRITE as i32, libc::EV_ADD as u32 | libc::EV_ENABLE as u32));
        }
        self.apply(&changes)?;
        self.regs.insert(fd, (events, tag));
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, events: Events) -> io::Result<()> {
        let Some(&(old, tag)) = self.regs.get(&fd) else {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        };
        let mut changes = Vec::with_capacity(4);
        if old.contains(Events::READ) && !events.contains(Events::READ) {
            changes.push(kev(fd, libc::EVFILT_READ as i32, libc::EV_DELETE as u32));
        }
        if old.contains(Events::WRITE) && !events.contains(Events::WRITE) {
            changes.push(kev(fd, libc::EVFILT_WRITE as i32, libc::EV_DELETE as u32));
        }
        if !old.contains(Events::READ) && events.contains(Events::READ) {
            changes.push(kev(fd, libc::EVFILT_READ as i32, libc::EV_ADD as u32 | libc::EV_ENABLE as u32));
        }
        if !old.contains(Events::WRITE) && events.contains(Events::WRITE) {
            changes.push(kev(fd, libc::EVFILT_WRITE as i32, libc::EV_ADD as u32 | libc::EV_ENABLE as u32));
        }
        self.apply(&changes)?;
        self.regs.insert(fd, (events, tag));
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let Some((old, _)) = self.regs.remove(&fd) else {
            return Ok(()); // idempotent
        };
        let mut changes = Vec::with_capacity(2);
        if old.contains(Events::READ) {
            changes.push(kev(fd, libc::EVFILT_READ as i32, libc::EV_DELETE as u32));
        }
        if old.contains(Events::WRITE) {
            changes.push(kev(fd, libc::EVFILT_WRITE as i32, libc::EV_DELETE as u32));
        }
        // Delete errors are expected when the fd is already closed.
        let _ = self.apply(&changes);
        Ok(())
    }

    fn wait(&mut self, out: &mut [EventResult], timeout_ms: i32) -> io::Result<usize> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let tsp: *const libc::timespec = if timeout_ms >= 0 {
            ts.tv_sec = (timeout_ms / 1000) as _;
            ts.tv_nsec = ((timeout_ms % 1000) as i64 * 1_000_000) as _;
            &ts
        } else {
            std::ptr::null()
        };

        // Two filters can fire per fd; fetch twice the result budget
        // before consolidation.
        let cap = (out.len().max(1)) * 2;
        let mut raw: Vec<libc::kevent> = Vec::with_capacity(cap);
        let n = unsafe {
            libc::kevent(
                self.kq,
                std::ptr::null(),
                0,
                raw.as_mut_ptr(),
                cap as _,
                tsp,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        unsafe { raw.set_len(n as usize) };

        let mut count = 0;
        for ev in &raw {
            let fd = ev.ident as RawFd;
            let Some(&(_, tag)) = self.regs.get(&fd) else {
                continue;
            };
            let mut events = Events::NONE;
            if ev.filter == libc::EVFILT_READ as _ {
                events |= Events::READ;
            }
            if ev.filter == libc::EVFILT_WRITE as _ {
                events |= Events::WRITE;
            }
            if ev.flags as u32 & (libc::EV_ERROR as u32 | libc::EV_EOF as u32) != 0 {
                events |= Events::ERROR;
            }

            // Consolidate with an earlier result for the same fd.
            if let Some(prev) = out[..count].iter_mut().find(|r| r.fd == fd) {
                prev.events |= events;
                continue;
            }
            if count < out.len() {
                out[count] = EventResult { fd, events, tag };
                count += 1;
            }
        }
        Ok(count)
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}
