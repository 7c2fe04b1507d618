//! Work-stealing thread pool.
//!
//! Each worker owns a bounded deque: the owner pushes and pops at the bottom,
//! thieves steal from the top, with a sequentially consistent fence between
//! the two ends (the Chase-Lev protocol). A mutex-guarded global queue absorbs
//! overflow and external submissions. Tasks are fire-and-forget: no execution
//! thread, ordering or fairness guarantees beyond exactly-once delivery.

use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capacity of each per-worker deque.
const DEQUE_CAPACITY: usize = 1024;

/// How long an idle worker sleeps before rechecking the queues.
const IDLE_WAIT: Duration = Duration::from_micros(10);

thread_local! {
    /// Index of the pool worker running on this thread, or -1 outside one.
    static WORKER_INDEX: Cell<isize> = const { Cell::new(-1) };
}

/// Bounded lock-free deque with owner-bottom push/pop and thief-top steal.
///
/// Tasks are boxed twice so a slot is a thin pointer an `AtomicPtr` can hold;
/// index counters are monotonic and wrapped into the ring by modulo.
struct WorkStealingQueue {
    top: AtomicUsize,
    bottom: AtomicUsize,
    slots: Box<[AtomicPtr<Task>]>,
}

impl WorkStealingQueue {
    fn new() -> Self {
        let slots = (0..DEQUE_CAPACITY)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        WorkStealingQueue {
            top: AtomicUsize::new(0),
            bottom: AtomicUsize::new(0),
            slots,
        }
    }

    /// Owner end. Hands the task back when the deque is full.
    fn push(&self, task: Task) -> Result<(), Task> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b - t >= DEQUE_CAPACITY {
            return Err(task);
        }

        let raw = Box::into_raw(Box::new(task));
        self.slots[b % DEQUE_CAPACITY].store(raw, Ordering::Release);
        self.bottom.store(b + 1, Ordering::Release);
        Ok(())
    }

    /// Owner end.
    fn pop(&self) -> Option<Task> {
        let b = self.bottom.load(Ordering::Relaxed);
        if b == 0 {
            return None;
        }
        let b = b - 1;
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t < b {
            // More than one task left; index b is the owner's alone.
            let raw = self.slots[b % DEQUE_CAPACITY].swap(ptr::null_mut(), Ordering::AcqRel);
            debug_assert!(!raw.is_null());
            // SAFETY: the pointer was produced by Box::into_raw in push and
            // the index arbitration above makes this the only taker.
            return Some(unsafe { *Box::from_raw(raw) });
        }
        if t == b {
            // Last task: win the race against thieves before touching the
            // slot, then restore bottom so the deque reads as empty.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b + 1, Ordering::Relaxed);
            if won {
                let raw = self.slots[b % DEQUE_CAPACITY].swap(ptr::null_mut(), Ordering::AcqRel);
                debug_assert!(!raw.is_null());
                // SAFETY: as above; the successful CAS excludes every thief.
                return Some(unsafe { *Box::from_raw(raw) });
            }
            return None;
        }

        // Thieves emptied the deque while bottom was decremented.
        self.bottom.store(b + 1, Ordering::Relaxed);
        None
    }

    /// Thief end. Abandons on any interference.
    fn steal(&self) -> Option<Task> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if t >= b {
            return None;
        }

        // Read the slot before the CAS; success validates the read.
        let raw = self.slots[t % DEQUE_CAPACITY].load(Ordering::Acquire);
        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        debug_assert!(!raw.is_null());

        // Clear the slot only if the owner has not already recycled it for a
        // later push; either way the task at index t is now ours.
        let _ = self.slots[t % DEQUE_CAPACITY].compare_exchange(
            raw,
            ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        // SAFETY: the winning CAS on top transfers ownership of index t and
        // its pointer to this thief exclusively.
        Some(unsafe { *Box::from_raw(raw) })
    }

    fn is_empty(&self) -> bool {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        t >= b
    }
}

impl Drop for WorkStealingQueue {
    fn drop(&mut self) {
        // Free whatever was never executed.
        for slot in self.slots.iter() {
            let raw = slot.swap(ptr::null_mut(), Ordering::Relaxed);
            if !raw.is_null() {
                // SAFETY: exclusive access in drop; pointer came from push.
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

struct Shared {
    queues: Vec<WorkStealingQueue>,
    overflow: Mutex<VecDeque<Task>>,
    wakeup: Condvar,
    stop: AtomicBool,
}

/// Thread pool with per-worker work-stealing deques.
///
/// Submission is non-blocking except under global-queue contention. Workers
/// poll local queue, then global queue under a try-lock, then steal from a
/// rotating victim, and otherwise sleep briefly on a condition variable.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool with `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(Shared {
            queues: (0..threads).map(|_| WorkStealingQueue::new()).collect(),
            overflow: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let workers = (0..threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("ecs-worker-{index}"))
                    .spawn(move || worker_loop(shared, index))
                    .expect("failed to spawn pool worker")
            })
            .collect();

        tracing::debug!(workers = threads, "thread pool started");
        ThreadPool { shared, workers }
    }

    /// Spawn a pool sized to the machine's available parallelism.
    pub fn with_default_threads() -> Self {
        let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(threads)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Submit a fire-and-forget task.
    ///
    /// Called from a worker thread, the task lands on that worker's deque
    /// when there is room; otherwise, and for external callers, it goes to
    /// the global queue. Panics if the pool has been stopped.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_boxed(Box::new(task));
    }

    fn submit_boxed(&self, task: Task) {
        let worker = WORKER_INDEX.with(|cell| cell.get());
        let task = if worker >= 0 && (worker as usize) < self.shared.queues.len() {
            match self.shared.queues[worker as usize].push(task) {
                Ok(()) => return,
                Err(task) => task,
            }
        } else {
            task
        };

        {
            let mut overflow = self.shared.overflow.lock();
            assert!(
                !self.shared.stop.load(Ordering::Relaxed),
                "submit on a stopped thread pool"
            );
            overflow.push_back(task);
        }
        self.shared.wakeup.notify_one();
    }

    /// Submit a task and receive a handle to its return value.
    pub fn enqueue<F, R>(&self, func: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let handle = TaskHandle::new();
        let state = Arc::clone(&handle.state);
        self.submit(move || {
            let value = func();
            *state.value.lock() = Some(value);
            state.ready.notify_all();
        });
        handle
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let _guard = self.shared.overflow.lock();
            self.shared.stop.store(true, Ordering::Release);
        }
        self.shared.wakeup.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("thread pool stopped");
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    WORKER_INDEX.with(|cell| cell.set(index as isize));

    loop {
        let task = shared.queues[index]
            .pop()
            .or_else(|| {
                shared
                    .overflow
                    .try_lock()
                    .and_then(|mut overflow| overflow.pop_front())
            })
            .or_else(|| {
                (0..shared.queues.len()).find_map(|offset| {
                    let victim = (index + offset + 1) % shared.queues.len();
                    shared.queues[victim].steal()
                })
            });

        if let Some(task) = task {
            task();
            continue;
        }

        if shared.stop.load(Ordering::Acquire) {
            // Drain before exiting: leave only once nothing is reachable.
            if shared.overflow.lock().is_empty() && shared.queues[index].is_empty() {
                return;
            }
            continue;
        }

        let mut overflow = shared.overflow.lock();
        if overflow.is_empty() && !shared.stop.load(Ordering::Acquire) {
            let _ = shared.wakeup.wait_for(&mut overflow, IDLE_WAIT);
        }
    }
}

struct HandleState<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

/// Waitable handle to a value produced by [`ThreadPool::enqueue`].
pub struct TaskHandle<T> {
    state: Arc<HandleState<T>>,
}

impl<T> TaskHandle<T> {
    fn new() -> Self {
        TaskHandle {
            state: Arc::new(HandleState {
                value: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    /// Block until the task completes and take its result.
    pub fn wait(self) -> T {
        let mut value = self.state.value.lock();
        loop {
            if let Some(result) = value.take() {
                return result;
            }
            self.state.ready.wait(&mut value);
        }
    }

    /// Take the result if the task already finished.
    pub fn try_take(&self) -> Option<T> {
        self.state.value.lock().take()
    }
}

/// Countdown latch used to join a batch of pool tasks.
pub struct Latch {
    remaining: AtomicUsize,
    mutex: Mutex<()>,
    done: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Latch {
            remaining: AtomicUsize::new(count),
            mutex: Mutex::new(()),
            done: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.mutex.lock();
            self.done.notify_all();
        }
    }

    pub fn wait(&self) {
        if self.remaining.load(Ordering::Acquire) == 0 {
            return;
        }
        let mut guard = self.mutex.lock();
        while self.remaining.load(Ordering::Acquire) != 0 {
            self.done.wait(&mut guard);
        }
    }
}
