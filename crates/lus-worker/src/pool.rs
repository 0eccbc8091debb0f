// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The process-global worker pool.
//!
//! Thread creation is not reversible and workers migrate between
//! pool threads, so there is exactly one pool per process, started
//! lazily on the first `spawn_worker` and shut down once at process
//! exit. Pool threads loop dequeueing runnable workers and driving
//! their bodies through the registered [`WorkerEngine`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread;

use lus_pledge::PledgeStore;

use crate::message::Message;
use crate::wire::{WireError, WireValue};
use crate::worker::{Worker, WorkerHandle, WorkerStatus};

/// Upper bound on pool threads regardless of CPU count.
pub const MAX_POOL_THREADS: usize = 32;

/// The script engine a worker body runs through. Registered once by
/// the embedder (the interpreter crate) before any worker is
/// created.
pub trait WorkerEngine: Send + Sync {
    /// Run the worker's script. Implementations build a fresh
    /// interpreter state, install the stdlib, adopt
    /// [`WorkerContext::pledges`], pop the initial arguments, load
    /// the script and call it. The returned error becomes the
    /// worker's error status, carrying the script's own traceback.
    fn run(&self, ctx: &WorkerContext) -> Result<(), String>;
}

/// What a worker body may touch: its own worker record, through a
/// safe surface.
pub struct WorkerContext {
    worker: WorkerHandle,
}

impl WorkerContext {
    pub fn script_path(&self) -> &str {
        self.worker.script_path()
    }

    /// The worker record itself, for binding `worker.message` and
    /// `worker.peek` into the new state.
    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    /// Deep copy of the parent's pledge store, taken at create time.
    pub fn pledges(&self) -> PledgeStore {
        self.worker.pledges().inherit()
    }

    /// Initial arguments, in send order.
    pub fn take_args(&self) -> Vec<Message> {
        self.worker.take_args()
    }

    /// `worker.message(value)`: encode and push to the outbox.
    pub fn post(&self, value: &WireValue) -> Result<(), WireError> {
        let message = Message::encode(value)?;
        self.worker.post(message);
        Ok(())
    }

    /// `worker.peek()`: block until the parent sends a message.
    pub fn next_message(&self) -> Message {
        self.worker.wait_message()
    }
}

static ENGINE: OnceLock<Box<dyn WorkerEngine>> = OnceLock::new();
static POOL: OnceLock<WorkerPool> = OnceLock::new();

/// Install the engine worker bodies run through. The first
/// registration wins; later calls are ignored.
pub fn register_engine(engine: Box<dyn WorkerEngine>) {
    let _ = ENGINE.set(engine);
}

struct PoolInner {
    runnable: VecDeque<WorkerHandle>,
    shutdown: bool,
}

struct WorkerPool {
    inner: Mutex<PoolInner>,
    cond: Condvar,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    fn start() -> WorkerPool {
        let nthreads = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4)
            .min(MAX_POOL_THREADS);

        let pool = WorkerPool {
            inner: Mutex::new(PoolInner {
                runnable: VecDeque::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
            threads: Mutex::new(Vec::with_capacity(nthreads)),
        };
        pool
    }

    fn spawn_threads(&'static self, count: usize) {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        for i in 0..count {
            let handle = thread::Builder::new()
                .name(format!("lus-worker-{i}"))
                .spawn(move || pool_thread(self))
                .expect("failed to spawn worker pool thread");
            threads.push(handle);
        }
    }

    fn enqueue(&self, worker: WorkerHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.runnable.push_back(worker);
        self.cond.notify_one();
    }

    /// Block until a runnable worker appears or shutdown is
    /// signaled.
    fn dequeue(&self) -> Option<WorkerHandle> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if inner.shutdown {
                return None;
            }
            if let Some(worker) = inner.runnable.pop_front() {
                return Some(worker);
            }
            inner = self.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }
}

fn pool_thread(pool: &'static WorkerPool) {
    while let Some(worker) = pool.dequeue() {
        run_worker(&worker);
    }
}

fn run_worker(worker: &WorkerHandle) {
    let Some(engine) = ENGINE.get() else {
        worker.finish(
            WorkerStatus::Errored,
            Some("no worker engine registered".to_string()),
        );
        return;
    };
    let ctx = WorkerContext {
        worker: worker.clone(),
    };
    match engine.run(&ctx) {
        Ok(()) => worker.finish(WorkerStatus::Dead, None),
        Err(message) => worker.finish(WorkerStatus::Errored, Some(message)),
    }
}

fn global_pool() -> &'static WorkerPool {
    let mut started = false;
    let pool = POOL.get_or_init(|| {
        started = true;
        WorkerPool::start()
    });
    if started {
        let count = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4)
            .min(MAX_POOL_THREADS);
        pool.spawn_threads(count);
    }
    pool
}

/// Create a worker: snapshot the parent's pledges, seed the inbox
/// with the initial arguments, and enqueue it on the global pool.
pub fn spawn_worker(
    script_path: &str,
    parent_pledges: &PledgeStore,
    args: Vec<Message>,
) -> WorkerHandle {
    let worker = Worker::new(script_path, parent_pledges.inherit(), args);
    let pool = global_pool();
    pool.enqueue(worker.clone());
    worker
}

/// Process-exit shutdown: signal pool threads and join them.
/// Enqueued but unstarted workers are released as their handles
/// drop.
pub fn shutdown_pool() {
    let Some(pool) = POOL.get() else {
        return;
    };
    {
        let mut inner = pool.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.shutdown = true;
        inner.runnable.clear();
        pool.cond.notify_all();
    }
    let mut threads = pool.threads.lock().unwrap_or_else(|e| e.into_inner());
    for handle in threads.drain(..) {
        let _ = handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{receive, WorkerError};
    use lus_pledge::PledgeStore;
    use std::time::{Duration, Instant};

    /// Test engine: the script path encodes the behavior.
    struct TestEngine;

    impl WorkerEngine for TestEngine {
        fn run(&self, ctx: &WorkerContext) -> Result<(), String> {
            let path = ctx.script_path().to_string();
            match path.split(':').collect::<Vec<_>>().as_slice() {
                ["sum"] => {
                    let args = ctx.take_args();
                    let mut total = 0i64;
                    for arg in &args {
                        match arg.decode().map_err(|e| e.to_string())? {
                            WireValue::Int(i) => total += i,
                            other => return Err(format!("expected int arg, got {other:?}")),
                        }
                    }
                    ctx.post(&WireValue::Int(total)).map_err(|e| e.to_string())
                }
                ["two-messages"] => {
                    ctx.post(&WireValue::Str("first".into()))
                        .map_err(|e| e.to_string())?;
                    ctx.post(&WireValue::Str("second".into()))
                        .map_err(|e| e.to_string())
                }
                ["sleep-then", ms, text] => {
                    let ms: u64 = ms.parse().map_err(|_| "bad ms".to_string())?;
                    std::thread::sleep(Duration::from_millis(ms));
                    ctx.post(&WireValue::Str((*text).to_string()))
                        .map_err(|e| e.to_string())
                }
                ["echo-once"] => {
                    let message = ctx.next_message();
                    let value = message.decode().map_err(|e| e.to_string())?;
                    ctx.post(&value).map_err(|e| e.to_string())
                }
                ["fail", message] => Err((*message).to_string()),
                ["check-tmp-read"] => {
                    let mut pledges = ctx.pledges();
                    let granted = pledges.has_pledge("fs:read", Some("/tmp/x"));
                    ctx.post(&WireValue::Bool(granted)).map_err(|e| e.to_string())
                }
                ["die"] => Ok(()),
                other => Err(format!("unknown test script {other:?}")),
            }
        }
    }

    fn setup() {
        register_engine(Box::new(TestEngine));
    }

    fn int_arg(i: i64) -> Message {
        Message::encode(&WireValue::Int(i)).unwrap()
    }

    fn wait_dead(worker: &WorkerHandle) {
        let start = Instant::now();
        while worker.status().as_script_str() == "running" {
            assert!(start.elapsed() < Duration::from_secs(5), "worker hung");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn worker_sum_scenario() {
        setup();
        let pledges = PledgeStore::new();
        let worker = spawn_worker("sum", &pledges, vec![int_arg(2), int_arg(3)]);

        let slots = receive(&[worker.clone()]).unwrap();
        let message = slots[0].as_ref().expect("one ready message");
        assert_eq!(message.decode().unwrap(), WireValue::Int(5));

        wait_dead(&worker);
        assert_eq!(worker.status().as_script_str(), "dead");
    }

    #[test]
    fn outbox_preserves_message_order() {
        setup();
        let pledges = PledgeStore::new();
        let worker = spawn_worker("two-messages", &pledges, vec![]);

        let first = receive(&[worker.clone()]).unwrap();
        let second = receive(&[worker.clone()]).unwrap();
        assert_eq!(
            first[0].as_ref().unwrap().decode().unwrap(),
            WireValue::Str("first".into())
        );
        assert_eq!(
            second[0].as_ref().unwrap().decode().unwrap(),
            WireValue::Str("second".into())
        );
    }

    #[test]
    fn send_and_echo_round_trip() {
        setup();
        let pledges = PledgeStore::new();
        let worker = spawn_worker("echo-once", &pledges, vec![]);

        worker.send(Message::encode(&WireValue::Table(vec![(
            WireValue::Str("k".into()),
            WireValue::Int(9),
        )])).unwrap());

        let slots = receive(&[worker]).unwrap();
        assert_eq!(
            slots[0].as_ref().unwrap().decode().unwrap(),
            WireValue::Table(vec![(WireValue::Str("k".into()), WireValue::Int(9))])
        );
    }

    #[test]
    fn errored_worker_raises_its_message() {
        setup();
        let pledges = PledgeStore::new();
        let worker = spawn_worker("fail:deliberate failure", &pledges, vec![]);
        wait_dead(&worker);

        match receive(&[worker]) {
            Err(WorkerError::Script(message)) => {
                assert!(message.contains("deliberate failure"));
            }
            other => panic!("expected worker error, got {other:?}"),
        }
    }

    #[test]
    fn all_dead_workers_yield_all_nils() {
        setup();
        let pledges = PledgeStore::new();
        let worker = spawn_worker("die", &pledges, vec![]);
        wait_dead(&worker);

        let slots = receive(&[worker]).unwrap();
        assert!(slots.iter().all(|s| s.is_none()));
    }

    #[test]
    fn multi_worker_select_observes_wall_clock_order() {
        setup();
        let pledges = PledgeStore::new();
        let a = spawn_worker("sleep-then:10:a", &pledges, vec![]);
        let b = spawn_worker("sleep-then:60:b", &pledges, vec![]);
        let c = spawn_worker("sleep-then:35:c", &pledges, vec![]);
        let workers = [a, b, c];

        let mut seen = Vec::new();
        for _ in 0..3 {
            let slots = receive(&workers).unwrap();
            for slot in slots.into_iter().flatten() {
                match slot.decode().unwrap() {
                    WireValue::Str(s) => seen.push(s),
                    other => panic!("expected string, got {other:?}"),
                }
            }
        }
        assert_eq!(seen, vec!["a", "c", "b"]);
    }

    #[test]
    fn pledges_are_inherited_into_workers() {
        setup();
        let mut pledges = PledgeStore::new();
        lus_pledge::fs::install(&mut pledges);
        pledges.pledge("fs:read", Some("/tmp/*")).unwrap();

        let worker = spawn_worker("check-tmp-read", &pledges, vec![]);
        let slots = receive(&[worker]).unwrap();
        assert_eq!(
            slots[0].as_ref().unwrap().decode().unwrap(),
            WireValue::Bool(true)
        );

        // The copy went one way: a worker without the grant sees
        // nothing even while the parent keeps it.
        let bare = PledgeStore::new();
        let worker = spawn_worker("check-tmp-read", &bare, vec![]);
        let slots = receive(&[worker]).unwrap();
        assert_eq!(
            slots[0].as_ref().unwrap().decode().unwrap(),
            WireValue::Bool(false)
        );
    }
}
