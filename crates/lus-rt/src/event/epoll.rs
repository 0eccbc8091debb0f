// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Linux epoll backend.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

use super::{EventBackend, EventResult, Events};

pub struct EpollBackend {
    epfd: RawFd,
    /// fd → caller tag, reported back verbatim in results.
    tags: HashMap<RawFd, u64>,
}

fn to_epoll(events: Events) -> u32 {
    let mut ev = 0u32;
    if events.contains(Events::READ) {
        ev |= libc::EPOLLIN as u32;
    }
    if events.contains(Events::WRITE) {
        ev |= libc::EPOLLOUT as u32;
    }
    ev
}

fn from_epoll(ev: u32) -> Events {
    let mut events = Events::NONE;
    if ev & libc::EPOLLIN as u32 != 0 {
        events |= Events::READ;
    }
    if ev & libc::EPOLLOUT as u32 != 0 {
        events |= Events::WRITE;
    }
    if ev & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
        events |= Events::ERROR;
    }
    events
}

impl EpollBackend {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EpollBackend {
            epfd,
            tags: HashMap::new(),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: Events) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: to_epoll(events),
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl EventBackend for EpollBackend {
    fn add(&mut self, fd: RawFd, events: Events, tag: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events)?;
        self.tags.insert(fd, tag);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, events: Events) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, events)
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        if self.tags.remove(&fd).is_none() {
            return Ok(()); // idempotent
        }
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // The fd may already be closed.
            if err.raw_os_error() != Some(libc::ENOENT) && err.raw_os_error() != Some(libc::EBADF) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn wait(&mut self, out: &mut [EventResult], timeout_ms: i32) -> io::Result<usize> {
        if out.is_empty() {
            // Pure timer wait.
            let rc = unsafe {
                let mut ev = libc::epoll_event { events: 0, u64: 0 };
                libc::epoll_wait(self.epfd, &mut ev, 1, timeout_ms)
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }
            return Ok(0);
        }

        let mut raw = vec![libc::epoll_event { events: 0, u64: 0 }; out.len()];
        let n = unsafe {
            libc::epoll_wait(self.epfd, raw.as_mut_ptr(), raw.len() as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        let mut count = 0;
        for ev in raw.iter().take(n as usize) {
            let fd = ev.u64 as RawFd;
            // A stale event can race a just-removed registration.
            let Some(&tag) = self.tags.get(&fd) else {
                continue;
            };
            out[count] = EventResult {
                fd,
                events: from_epoll(ev.events),
                tag,
            };
            count += 1;
        }
        Ok(count)
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.epfd) };
    }
}
