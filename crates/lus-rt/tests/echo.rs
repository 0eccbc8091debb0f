// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot TCP echo through the scheduler: a detached task accepts
//! a connection, receives five bytes and sends them back, parking on
//! fd readiness at every would-block point.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;

use lus_rt::event::Events;
use lus_rt::sched::{DetachedTask, ResumeOutcome, Scheduler, Wait, WakeReason};

enum EchoState {
    Accepting,
    Receiving(TcpStream),
    Sending(TcpStream, usize),
    Done,
}

struct EchoInner {
    listener: TcpListener,
    buf: Vec<u8>,
    state: EchoState,
    failed: Option<String>,
}

#[derive(Clone)]
struct EchoServer(Rc<RefCell<EchoInner>>);

impl EchoServer {
    fn new(listener: TcpListener) -> Self {
        listener.set_nonblocking(true).unwrap();
        EchoServer(Rc::new(RefCell::new(EchoInner {
            listener,
            buf: Vec::with_capacity(5),
            state: EchoState::Accepting,
            failed: None,
        })))
    }

    fn done(&self) -> bool {
        matches!(self.0.borrow().state, EchoState::Done)
    }

    fn failure(&self) -> Option<String> {
        self.0.borrow().failed.clone()
    }
}

fn would_block(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

impl DetachedTask for EchoServer {
    fn is_resumable(&self) -> bool {
        !matches!(self.0.borrow().state, EchoState::Done)
    }

    fn resume(&mut self, _wake: WakeReason) -> ResumeOutcome {
        let mut inner = self.0.borrow_mut();
        loop {
            match std::mem::replace(&mut inner.state, EchoState::Done) {
                EchoState::Accepting => match inner.listener.accept() {
                    Ok((conn, _)) => {
                        conn.set_nonblocking(true).unwrap();
                        inner.state = EchoState::Receiving(conn);
                    }
                    Err(ref e) if would_block(e) => {
                        let fd = inner.listener.as_raw_fd();
                        inner.state = EchoState::Accepting;
                        return ResumeOutcome::Parked(Wait::Io {
                            fd,
                            events: Events::READ,
                            deadline: 0.0,
                        });
                    }
                    Err(e) => {
                        inner.failed = Some(e.to_string());
                        return ResumeOutcome::Failed(e.to_string());
                    }
                },
                EchoState::Receiving(mut conn) => {
                    let mut chunk = [0u8; 8];
                    match conn.read(&mut chunk) {
                        Ok(n) => {
                            inner.buf.extend_from_slice(&chunk[..n]);
                            if inner.buf.len() >= 5 {
                                inner.state = EchoState::Sending(conn, 0);
                            } else {
                                inner.state = EchoState::Receiving(conn);
                            }
                        }
                        Err(ref e) if would_block(e) => {
                            let fd = conn.as_raw_fd();
                            inner.state = EchoState::Receiving(conn);
                            return ResumeOutcome::Parked(Wait::Io {
                                fd,
                                events: Events::READ,
                                deadline: 0.0,
                            });
                        }
                        Err(e) => {
                            inner.failed = Some(e.to_string());
                            return ResumeOutcome::Failed(e.to_string());
                        }
                    }
                }
                EchoState::Sending(mut conn, written) => {
                    let pending = &inner.buf[written..5];
                    if pending.is_empty() {
                        return ResumeOutcome::Completed;
                    }
                    match conn.write(pending) {
                        Ok(n) => {
                            if written + n >= 5 {
                                return ResumeOutcome::Completed;
                            }
                            inner.state = EchoState::Sending(conn, written + n);
                        }
                        Err(ref e) if would_block(e) => {
                            let fd = conn.as_raw_fd();
                            inner.state = EchoState::Sending(conn, written);
                            return ResumeOutcome::Parked(Wait::Io {
                                fd,
                                events: Events::WRITE,
                                deadline: 0.0,
                            });
                        }
                        Err(e) => {
                            inner.failed = Some(e.to_string());
                            return ResumeOutcome::Failed(e.to_string());
                        }
                    }
                }
                EchoState::Done => return ResumeOutcome::Completed,
            }
        }
    }
}

#[test]
fn echo_server_one_shot() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut sched = Scheduler::new().unwrap();
    let mut server = EchoServer::new(listener);

    // Start the task immediately, the way detach does; it parks on
    // the listener straight away.
    match server.resume(WakeReason::Init) {
        ResumeOutcome::Parked(wait) => sched.add_pending(server.clone(), wait).unwrap(),
        _ => panic!("expected the server to park on accept"),
    }

    let client = std::thread::spawn(move || {
        let mut conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
        conn.write_all(b"hello").unwrap();
        let mut echoed = [0u8; 5];
        conn.read_exact(&mut echoed).unwrap();
        echoed
    });

    while !server.done() {
        sched.poll(-1).unwrap();
        if let Some(err) = server.failure() {
            panic!("server failed: {err}");
        }
    }
    assert_eq!(sched.pending_count(), 0);
    assert_eq!(&client.join().unwrap(), b"hello");
}
