//! Bounded pool of pre-started subframe workers
//!
//! The pool owns N workers and N threads. `wait_worker` moves an idle worker
//! out to the caller (so the caller has exclusive access to its buffers),
//! `start_worker` hands it to a pool thread, and the thread returns it to
//! the idle set once its work is done.

use crate::LayerError;
use common::Tti;
use crossbeam_channel::{unbounded, Receiver, SendError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// A reusable execution context managed by a `WorkerPool`
pub trait PoolWorker: Send + 'static {
    /// Stable index in `0..nof_workers`
    fn id(&self) -> usize;

    /// Associate the worker with subframe `tti`
    fn set_tti(&mut self, tti: Tti);

    /// Run the bound task; called on a pool thread
    fn work(&mut self);
}

enum Job<W> {
    Run(Box<W>),
    Exit,
}

struct PoolState<W> {
    /// Idle workers, indexed by worker id
    idle: Vec<Option<Box<W>>>,
    /// Subframe each busy worker is bound to
    busy: Vec<Option<Tti>>,
    /// Where the next idle search starts
    next_worker: usize,
    running: bool,
}

struct Shared<W> {
    state: Mutex<PoolState<W>>,
    cvar: Condvar,
}

impl<W: PoolWorker> Shared<W> {
    fn run_job(&self, mut worker: Box<W>) {
        worker.work();

        let mut state = self.state.lock();
        let id = worker.id();
        state.busy[id] = None;
        state.idle[id] = Some(worker);
        self.cvar.notify_all();
    }
}

/// Fixed-size worker pool
pub struct WorkerPool<W: PoolWorker> {
    name: String,
    shared: Arc<Shared<W>>,
    jobs: Sender<Job<W>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    nof_workers: usize,
}

impl<W: PoolWorker> WorkerPool<W> {
    /// Start one thread per worker. Worker ids must be exactly `0..workers.len()`.
    pub fn new(name: &str, workers: Vec<Box<W>>) -> Result<Self, LayerError> {
        let nof_workers = workers.len();
        if nof_workers == 0 {
            return Err(LayerError::InvalidConfiguration(format!("Pool '{}' needs at least one worker", name)));
        }

        let mut idle: Vec<Option<Box<W>>> = (0..nof_workers).map(|_| None).collect();
        for worker in workers {
            let id = worker.id();
            match idle.get_mut(id) {
                Some(slot) if slot.is_none() => *slot = Some(worker),
                _ => {
                    return Err(LayerError::InvalidConfiguration(
                        format!("Pool '{}': worker id {} out of range or duplicated", name, id)
                    ));
                }
            }
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                idle,
                busy: vec![None; nof_workers],
                next_worker: 0,
                running: true,
            }),
            cvar: Condvar::new(),
        });

        let (jobs, job_rx) = unbounded();
        let mut threads = Vec::with_capacity(nof_workers);
        for i in 0..nof_workers {
            let shared = shared.clone();
            let job_rx: Receiver<Job<W>> = job_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    while let Ok(Job::Run(worker)) = job_rx.recv() {
                        shared.run_job(worker);
                    }
                })
                .map_err(|e| LayerError::InitializationFailed(format!("Failed to spawn {}-{}: {}", name, i, e)))?;
            threads.push(handle);
        }

        info!("Worker pool '{}' started with {} workers", name, nof_workers);
        Ok(Self {
            name: name.to_string(),
            shared,
            jobs,
            threads: Mutex::new(threads),
            nof_workers,
        })
    }

    /// Take an idle worker and bind it to `tti`, blocking while all are busy
    ///
    /// Returns `None` only once the pool has been stopped.
    pub fn wait_worker(&self, tti: Tti) -> Option<Box<W>> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.running {
                return None;
            }

            let n = state.idle.len();
            let start = state.next_worker;
            let found = (0..n).map(|k| (start + k) % n).find_map(|id| state.idle[id].take());
            if let Some(mut worker) = found {
                let id = worker.id();
                state.next_worker = (id + 1) % n;
                state.busy[id] = Some(tti);
                drop(state);

                worker.set_tti(tti);
                return Some(worker);
            }

            self.shared.cvar.wait(&mut state);
        }
    }

    /// Run the worker's task asynchronously on a pool thread
    ///
    /// Once the pool is stopping the task runs inline on the caller so that
    /// whatever it was promised (its transmit ticket) is still honored.
    pub fn start_worker(&self, worker: Box<W>) {
        let job = {
            let state = self.shared.state.lock();
            let job = Job::Run(worker);
            if state.running {
                match self.jobs.send(job) {
                    Ok(()) => return,
                    Err(SendError(job)) => job,
                }
            } else {
                job
            }
        };

        if let Job::Run(worker) = job {
            debug!("Pool '{}' stopping, running worker {} inline", self.name, worker.id());
            self.shared.run_job(worker);
        }
    }

    /// Return a worker obtained from `wait_worker` without running it
    pub fn release_worker(&self, worker: Box<W>) {
        let mut state = self.shared.state.lock();
        let id = worker.id();
        state.busy[id] = None;
        state.idle[id] = Some(worker);
        self.shared.cvar.notify_all();
    }

    /// Stop the pool: wake blocked callers, finish queued work, join threads
    ///
    /// Safe to call more than once and from any thread.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.running {
                state.running = false;
                for _ in 0..self.nof_workers {
                    // Queued behind any pending work
                    let _ = self.jobs.send(Job::Exit);
                }
                debug!("Worker pool '{}' stopping", self.name);
            }
            self.shared.cvar.notify_all();
        }

        let threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        for handle in threads {
            if handle.join().is_err() {
                error!("Worker thread of pool '{}' panicked", self.name);
            }
        }
        info!("Worker pool '{}' stopped", self.name);
    }

    /// Configured number of workers
    pub fn nof_workers(&self) -> usize {
        self.nof_workers
    }

    /// Workers currently handed out or running
    pub fn busy_workers(&self) -> usize {
        self.shared.state.lock().busy.iter().filter(|b| b.is_some()).count()
    }

    /// False once `stop` has been called
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }
}

impl<W: PoolWorker> Drop for WorkerPool<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct TestWorker {
        id: usize,
        tti: Option<Tti>,
        in_use: Arc<Vec<AtomicBool>>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
        completed: Arc<AtomicUsize>,
        work_us: u64,
    }

    impl PoolWorker for TestWorker {
        fn id(&self) -> usize {
            self.id
        }

        fn set_tti(&mut self, tti: Tti) {
            self.tti = Some(tti);
        }

        fn work(&mut self) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_micros(self.work_us));
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.in_use[self.id].store(false, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        in_use: Arc<Vec<AtomicBool>>,
        max_running: Arc<AtomicUsize>,
        completed: Arc<AtomicUsize>,
    }

    fn make_pool(n: usize, work_us: u64) -> (WorkerPool<TestWorker>, Fixture) {
        let in_use: Arc<Vec<AtomicBool>> = Arc::new((0..n).map(|_| AtomicBool::new(false)).collect());
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let workers = (0..n)
            .map(|id| {
                Box::new(TestWorker {
                    id,
                    tti: None,
                    in_use: in_use.clone(),
                    running: running.clone(),
                    max_running: max_running.clone(),
                    completed: completed.clone(),
                    work_us,
                })
            })
            .collect();
        let pool = WorkerPool::new("test", workers).unwrap();
        (pool, Fixture { in_use, max_running, completed })
    }

    #[test]
    fn test_rejects_empty_and_bad_ids() {
        assert!(WorkerPool::<TestWorker>::new("empty", Vec::new()).is_err());

        let (pool, _) = make_pool(1, 0);
        pool.stop();
        let in_use = Arc::new(vec![AtomicBool::new(false)]);
        let bad = Box::new(TestWorker {
            id: 3,
            tti: None,
            in_use,
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            work_us: 0,
        });
        assert!(WorkerPool::new("bad", vec![bad]).is_err());
    }

    #[test]
    fn test_wait_worker_binds_tti_round_robin() {
        let (pool, _) = make_pool(3, 0);
        let a = pool.wait_worker(Tti::new(5, 10240).unwrap()).unwrap();
        let b = pool.wait_worker(Tti::new(6, 10240).unwrap()).unwrap();
        assert_eq!((a.id(), b.id()), (0, 1));
        assert_eq!(a.tti.map(|t| t.value()), Some(5));
        assert_eq!(pool.busy_workers(), 2);

        pool.release_worker(a);
        pool.release_worker(b);
        assert_eq!(pool.busy_workers(), 0);

        // Search continues after the last handed-out worker
        let c = pool.wait_worker(Tti::zero()).unwrap();
        assert_eq!(c.id(), 2);
        pool.release_worker(c);
        pool.stop();
    }

    #[test]
    fn test_never_hands_out_busy_worker() {
        const N: usize = 4;
        const CALLERS: usize = N + 3;
        const ROUNDS: usize = 50;
        let (pool, fixture) = make_pool(N, 200);
        let pool = Arc::new(pool);

        let callers: Vec<_> = (0..CALLERS)
            .map(|c| {
                let pool = pool.clone();
                let in_use = fixture.in_use.clone();
                std::thread::spawn(move || {
                    for r in 0..ROUNDS {
                        let tti = Tti::new((c * ROUNDS + r) as u32, 10240).unwrap();
                        let worker = pool.wait_worker(tti).unwrap();
                        assert!(pool.busy_workers() <= N);
                        let was_in_use = in_use[worker.id()].swap(true, Ordering::SeqCst);
                        assert!(!was_in_use, "worker {} handed out twice", worker.id());
                        std::thread::sleep(Duration::from_micros(rand::thread_rng().gen_range(0..100)));
                        pool.start_worker(worker);
                    }
                })
            })
            .collect();

        for c in callers {
            c.join().unwrap();
        }
        pool.stop();

        assert_eq!(fixture.completed.load(Ordering::SeqCst), CALLERS * ROUNDS);
        assert!(fixture.max_running.load(Ordering::SeqCst) <= N);
    }

    #[test]
    fn test_stop_wakes_blocked_caller() {
        let (pool, _) = make_pool(1, 0);
        let pool = Arc::new(pool);
        let held = pool.wait_worker(Tti::zero()).unwrap();

        let blocked = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.wait_worker(Tti::zero().next()).map(|w| w.id()))
        };

        std::thread::sleep(Duration::from_millis(20));
        pool.stop();
        assert_eq!(blocked.join().unwrap(), None);
        assert!(pool.wait_worker(Tti::zero()).is_none());

        drop(held);
        pool.stop();
        assert!(!pool.is_running());
    }

    #[test]
    fn test_stop_finishes_queued_work_and_runs_late_work_inline() {
        let (pool, fixture) = make_pool(2, 2000);
        for i in 0..2 {
            let worker = pool.wait_worker(Tti::new(i, 10240).unwrap()).unwrap();
            fixture.in_use[worker.id()].store(true, Ordering::SeqCst);
            pool.start_worker(worker);
        }
        pool.stop();
        assert_eq!(fixture.completed.load(Ordering::SeqCst), 2);

        // Hand-built worker started after stop still runs
        let late = Box::new(TestWorker {
            id: 0,
            tti: None,
            in_use: fixture.in_use.clone(),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            completed: fixture.completed.clone(),
            work_us: 0,
        });
        pool.start_worker(late);
        assert_eq!(fixture.completed.load(Ordering::SeqCst), 3);
    }
}
