//! Thread pool for concurrent execution of storage tasks.
//!
//! A fixed number of worker threads drain one shared FIFO queue. Tasks are
//! fire-and-forget closures; callers that need to wait for completion share a
//! [`SimpleProgress`](crate::progress::SimpleProgress) with the task and join on it.

use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Condvar, Mutex, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

/// Workers that run the pull and push tasks of the storage pipeline.
///
/// Clones share the same workers, which stay up until the last clone is
/// gone and the queue is empty.
#[derive(Clone)]
pub struct ThreadPool(Arc<PoolHandle>);

/// A boxed function that can be executed by a worker thread.
type TaskFn = Box<dyn FnOnce() + Send + 'static>;

impl ThreadPool {
    /// Starts `num_threads` workers named `ghostdex-worker-<i>`.
    pub fn new(num_threads: usize) -> Self {
        Self::with_thread_name(num_threads, |i| format!("ghostdex-worker-{i}"))
    }

    /// Starts `num_threads` workers, worker `i` named `thread_name(i)`. An
    /// empty name leaves that worker unnamed. Panics on zero workers.
    pub fn with_thread_name(num_threads: usize, thread_name: impl Fn(usize) -> String) -> Self {
        assert_ne!(num_threads, 0);

        let queue = Arc::new(TaskQueue::new());
        for i in 0..num_threads {
            let queue = queue.clone();
            let mut builder = thread::Builder::new();
            let name = thread_name(i);
            if !name.is_empty() {
                builder = builder.name(name);
            }
            builder
                .spawn(move || Self::thread_fn(queue))
                .expect("spawn thread");
        }
        log::debug!("started thread pool with {num_threads} workers");

        ThreadPool(Arc::new(PoolHandle {
            queue,
            num_threads,
        }))
    }

    /// Worker count for the shared pool. Ignored once [`global`](Self::global)
    /// has built it; zero counts as one.
    pub fn configure_global_pool_size(pool_size: usize) {
        let pool_size = pool_size.max(1);
        GLOBAL_POOL_SIZE.store(pool_size, Ordering::SeqCst);
    }

    /// The process-wide pool, built on first use.
    ///
    /// Without a configured size it gets one and a half workers per CPU, or 8
    /// when the CPU count is unknown, since store tasks mostly wait on I/O.
    pub fn global() -> &'static ThreadPool {
        static POOL: OnceLock<ThreadPool> = OnceLock::new();
        POOL.get_or_init(|| ThreadPool::new(Self::get_global_pool_size()))
    }

    /// Number of worker threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.0.num_threads
    }

    /// Number of tasks waiting to be picked up by a worker.
    pub fn queued(&self) -> usize {
        self.0.queue.len()
    }

    /// Queues `f` for the next idle worker. A panic in `f` is logged and the
    /// worker keeps going.
    pub fn spawn_detached<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.queue.push(Box::new(f));
    }

    fn get_global_pool_size() -> usize {
        let size = GLOBAL_POOL_SIZE.load(Ordering::SeqCst);
        if size == 0 {
            std::thread::available_parallelism()
                .map(|n| (n.get() * 3).div_ceil(2))
                .unwrap_or(8)
        } else {
            size
        }
    }

    fn thread_fn(queue: Arc<TaskQueue>) {
        while let Some(task) = queue.pop() {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                log::error!(
                    "task panicked on worker {:?}",
                    thread::current().name().unwrap_or_default()
                );
            }
        }
    }
}

impl Default for ThreadPool {
    /// Creates a pool with one worker per logical CPU (8 if unknown).
    fn default() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8);
        Self::new(num_threads)
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Configured size for the global pool, 0 when not configured.
static GLOBAL_POOL_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Shared by all clones of one pool; closes the queue when the last clone goes away.
struct PoolHandle {
    queue: Arc<TaskQueue>,
    num_threads: usize,
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.queue.close();
    }
}

struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    tasks: VecDeque<TaskFn>,
    closed: bool,
}

impl TaskQueue {
    fn new() -> TaskQueue {
        TaskQueue {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn push(&self, task: TaskFn) {
        let mut state = self.state.lock().unwrap();
        state.tasks.push_back(task);
        drop(state);
        self.available.notify_one();
    }

    /// Blocks until a task is available. Returns `None` once the queue is closed
    /// and drained.
    fn pop(&self) -> Option<TaskFn> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Progress, SimpleProgress};
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    #[test]
    fn test_new_thread_pool() {
        let pool = ThreadPool::new(2);
        assert_eq!(pool.num_threads(), 2);
        drop(pool);
    }

    #[test]
    #[should_panic]
    fn test_new_thread_pool_zero_threads() {
        ThreadPool::new(0);
    }

    #[test]
    fn test_spawn_detached_all_run() {
        let pool = ThreadPool::new(3);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let num_tasks = 20;
        for _ in 0..num_tasks {
            let counter = counter.clone();
            let tx = tx.clone();
            pool.spawn_detached(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..num_tasks {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), num_tasks);
    }

    #[test]
    fn test_join_through_progress() {
        let pool = ThreadPool::new(2);
        let progress = Arc::new(SimpleProgress::new("sleepy"));
        let value = Arc::new(Mutex::new(0));
        {
            let progress = progress.clone();
            let value = value.clone();
            pool.spawn_detached(move || {
                std::thread::sleep(Duration::from_millis(20));
                *value.lock().unwrap() = 42;
                progress.finish();
            });
        }
        progress.join().unwrap();
        // Side effects are visible once join returns.
        assert_eq!(*value.lock().unwrap(), 42);
    }

    #[test]
    fn test_concurrent_task_execution() {
        let pool = ThreadPool::new(4);
        let start_time = Instant::now();
        let sleep_duration = Duration::from_millis(50);

        let progresses: Vec<_> = (0..4)
            .map(|i| {
                let progress = Arc::new(SimpleProgress::new(format!("task {i}")));
                let p = progress.clone();
                pool.spawn_detached(move || {
                    std::thread::sleep(sleep_duration);
                    p.finish();
                });
                progress
            })
            .collect();

        for progress in progresses {
            progress.join().unwrap();
        }
        assert!(start_time.elapsed() < sleep_duration * 3);
    }

    #[test]
    fn test_panicking_task_keeps_worker() {
        let pool = ThreadPool::new(1);
        pool.spawn_detached(|| panic!("boom"));
        let (tx, rx) = mpsc::channel();
        pool.spawn_detached(move || tx.send(7).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_thread_names() {
        let pool = ThreadPool::with_thread_name(1, |i| format!("named-{i}"));
        let (tx, rx) = mpsc::channel();
        pool.spawn_detached(move || {
            tx.send(thread::current().name().map(str::to_string))
                .unwrap()
        });
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("named-0"));
    }

    #[test]
    fn test_empty_thread_name() {
        let pool = ThreadPool::with_thread_name(2, |i| match i {
            0 => String::new(),
            _ => "second".to_string(),
        });
        let (tx, rx) = mpsc::channel();
        for _ in 0..8 {
            let tx = tx.clone();
            pool.spawn_detached(move || {
                std::thread::sleep(Duration::from_millis(5));
                tx.send(thread::current().name().map(str::to_string)).unwrap()
            });
        }
        let mut names: Vec<_> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        names.sort();
        names.dedup();
        assert!(names.iter().all(|name| name.is_none() || name.as_deref() == Some("second")));
    }

    #[test]
    fn test_clone_shares_workers() {
        let pool1 = ThreadPool::new(2);
        let pool2 = pool1.clone();
        drop(pool1);
        let (tx, rx) = mpsc::channel();
        pool2.spawn_detached(move || tx.send("still alive").unwrap());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "still alive"
        );
    }

    #[test]
    fn test_global_pool() {
        let pool = ThreadPool::global();
        assert!(pool.num_threads() >= 1);
        let (tx, rx) = mpsc::channel();
        pool.spawn_detached(move || tx.send(1).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}
