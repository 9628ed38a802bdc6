use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::task_list::{TaskList, TaskScheduledListener};

/// Configuration for a [`ThreadPool`].
#[derive(Clone, Copy, Debug)]
pub struct Desc {
    /// Start one worker per logical CPU.
    pub use_hardware_concurrency: bool,

    /// Workers added on top of the hardware count, or removed from it
    /// if negative. The effective count is clamped to zero.
    pub additional_threads: i32,
}

impl Default for Desc {
    fn default() -> Self {
        Self {
            use_hardware_concurrency: true,
            additional_threads: 0,
        }
    }
}

/// Interval between forced re-probes of the task lists while parked.
///
/// Task-list notifications are sent without holding the park mutex (a
/// notify lock would self-deadlock: the wait predicate executes tasks,
/// and a task may itself schedule), so a notification can slip between
/// a worker's probe and its wait. The timed wait bounds how long such a
/// miss can stall a task.
const PARK_REPROBE_INTERVAL: Duration = Duration::from_millis(100);

/// State shared between the owning [`ThreadPool`] and its workers.
///
/// Workers capture only this shared state, never the owning pool, so
/// dropping the pool is what triggers shutdown and join.
struct PoolShared {
    is_cancelled: AtomicBool,
    task_lists: RwLock<Vec<Arc<TaskList>>>,
    next_task_list_idx: AtomicUsize,
    park_mutex: Mutex<()>,
    has_task: Condvar,
}

impl PoolShared {
    fn is_cancelled(&self) -> bool {
        self.is_cancelled.load(Ordering::Acquire)
    }

    /// One full round-robin pass over the task lists, starting at the
    /// cursor. Executes at most one task; returns `true` if one ran.
    fn try_execute_one(&self) -> bool {
        let lists = self.task_lists.read().unwrap();
        let len = lists.len();
        if len == 0 {
            return false;
        }

        let start = self.next_task_list_idx.load(Ordering::Relaxed);
        for i in 0..len {
            let idx = (start + i) % len;
            if lists[idx].execute_next() {
                self.next_task_list_idx.store((idx + 1) % len, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    fn worker_loop(&self) {
        log::trace!("pool worker {:?} started", thread::current().id());

        while !self.is_cancelled() {
            // Drain until a full pass over every list comes up empty.
            while !self.is_cancelled() && self.try_execute_one() {}

            // Park. The wait predicate re-probes the lists (executing
            // at most one task as a side effect), so a schedule that
            // raced the last drain pass is caught before blocking.
            let guard = self.park_mutex.lock().unwrap();
            let _guard = self
                .has_task
                .wait_timeout_while(guard, PARK_REPROBE_INTERVAL, |_| {
                    !self.is_cancelled() && !self.try_execute_one()
                })
                .unwrap();
        }

        log::trace!("pool worker {:?} shutting down", thread::current().id());
    }
}

impl TaskScheduledListener for PoolShared {
    fn on_task_added(&self) {
        self.has_task.notify_one();
    }
}

/// Pool of worker threads draining a dynamic set of [`TaskList`]s.
///
/// Workers round-robin over the registered lists, executing one task at
/// a time, and park on a condition variable once every list is empty.
/// The pool registers itself as a listener on each list it is given, so
/// a schedule on any of them wakes a parked worker.
///
/// Task lists and pools have a many-to-many relationship, but typically
/// there is one pool and a small collection of lists feeding it.
///
/// A pool configured with zero effective workers is valid: it executes
/// nothing and acts only as a listener sink.
///
/// Dropping the pool clears its list memberships, cancels and wakes
/// every worker, and joins them. Tasks still sitting in the lists at
/// that point are not run by the pool; they stay queued until some
/// other consumer drains them.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Starts a pool with the worker count described by `desc`.
    pub fn new(desc: Desc) -> ThreadPool {
        let mut count = i64::from(desc.additional_threads);
        if desc.use_hardware_concurrency {
            count += thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as i64;
        }
        let count = count.max(0) as usize;

        let shared = Arc::new(PoolShared {
            is_cancelled: AtomicBool::new(false),
            task_lists: RwLock::new(Vec::new()),
            next_task_list_idx: AtomicUsize::new(0),
            park_mutex: Mutex::new(()),
            has_task: Condvar::new(),
        });

        log::debug!("starting thread pool with {count} workers");

        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            let shared = Arc::clone(&shared);
            workers.push(thread::spawn(move || shared.worker_loop()));
        }

        ThreadPool { shared, workers }
    }

    /// Handle implementing the task-list listener protocol for this
    /// pool. Registering it on a list wakes a parked worker per
    /// schedule.
    pub fn listener(&self) -> Arc<dyn TaskScheduledListener> {
        Arc::clone(&self.shared) as Arc<dyn TaskScheduledListener>
    }

    /// Adds `task_list` to the set the workers drain, registering the
    /// pool as its listener. An already-present list is re-added, not
    /// duplicated.
    pub fn add_task_list(&self, task_list: &Arc<TaskList>) {
        self.remove_task_list(task_list);
        {
            let mut lists = self.shared.task_lists.write().unwrap();
            lists.push(Arc::clone(task_list));
            task_list.register_listener(self.listener());
        }
        log::trace!("task list added to pool");
        self.shared.has_task.notify_all();
    }

    /// Removes every matching entry from the drained set.
    ///
    /// The pool stays registered as a listener on the removed list; an
    /// in-flight task from it completes on its worker, and the next
    /// round-robin probe simply no longer sees the list.
    pub fn remove_task_list(&self, task_list: &Arc<TaskList>) {
        let mut lists = self.shared.task_lists.write().unwrap();
        lists.retain(|tl| !Arc::ptr_eq(tl, task_list));
    }

    /// Unregisters the pool from every list and empties the drained set.
    pub fn clear_all_task_lists(&self) {
        {
            let mut lists = self.shared.task_lists.write().unwrap();
            let listener = self.listener();
            for tl in lists.iter() {
                tl.unregister_listener(&listener);
            }
            lists.clear();
        }
        log::trace!("all task lists cleared from pool");
        self.shared.has_task.notify_all();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.clear_all_task_lists();
        self.shared.is_cancelled.store(true, Ordering::Release);
        self.shared.has_task.notify_all();

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
