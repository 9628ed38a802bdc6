use std::sync::{Arc, RwLock};

use crossbeam_queue::SegQueue;

use crate::context::ExecutionContext;
use crate::promise::Promise;
use crate::task::Task;

/// Receives a notification every time a task is scheduled onto a
/// [`TaskList`].
///
/// Listeners are how executors (notably [`ThreadPool`](crate::ThreadPool))
/// learn that a list they drain has new work, so parked workers can be
/// woken promptly.
pub trait TaskScheduledListener: Send + Sync {
    /// Called once per scheduled task, on the scheduling thread, before
    /// `schedule` returns.
    fn on_task_added(&self);
}

/// Construction hints for a [`TaskList`].
#[derive(Clone, Copy, Debug)]
pub struct Desc {
    /// Expected number of listeners that will be registered to observe
    /// new tasks being enqueued.
    pub listener_capacity: usize,
}

impl Default for Desc {
    fn default() -> Self {
        Self {
            listener_capacity: 1,
        }
    }
}

/// Thread-safe FIFO of tasks that need to be executed.
///
/// Producers call [`schedule`](ExecutionContext::schedule) from any
/// thread; consumers call [`execute_next`](Self::execute_next) from any
/// thread. Every successful schedule notifies each currently registered
/// listener before returning.
///
/// Ordering: the underlying queue is a lock-free MPMC FIFO. Dequeue
/// order is best-effort FIFO for a single producer and unspecified
/// across producers; do not rely on strict ordering under contention.
pub struct TaskList {
    tasks: SegQueue<Task>,
    listeners: RwLock<Vec<Arc<dyn TaskScheduledListener>>>,
}

impl TaskList {
    /// Creates a new task list with default hints.
    pub fn create() -> Arc<TaskList> {
        Self::create_with(Desc::default())
    }

    /// Creates a new task list with the given hints.
    pub fn create_with(desc: Desc) -> Arc<TaskList> {
        Arc::new(TaskList {
            tasks: SegQueue::new(),
            listeners: RwLock::new(Vec::with_capacity(desc.listener_capacity)),
        })
    }

    /// Dequeues and runs at most one task.
    ///
    /// Returns `true` if a task was executed, `false` if the queue was
    /// observed empty.
    pub fn execute_next(&self) -> bool {
        match self.tasks.pop() {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }

    /// Registers `listener` for enqueue notifications.
    ///
    /// Duplicate registrations are kept as-is; a listener registered
    /// twice is notified twice per schedule.
    pub fn register_listener(&self, listener: Arc<dyn TaskScheduledListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Removes every registration equal to `listener`.
    pub fn unregister_listener(&self, listener: &Arc<dyn TaskScheduledListener>) {
        self.listeners
            .write()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Schedules `f` and returns a promise for its result.
    pub fn run<F, R>(&self, f: F) -> Arc<Promise<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        let promise = Promise::create();
        let resolve_target = Arc::clone(&promise);
        self.schedule(Task::of(move || {
            resolve_target.resolve(f());
        }));
        promise
    }
}

impl ExecutionContext for TaskList {
    /// Stamps the task as scheduled, enqueues it, and notifies every
    /// currently registered listener before returning.
    ///
    /// Notification ordering among listeners is unspecified.
    fn schedule(&self, mut task: Task) {
        task.mark_scheduled();
        self.tasks.push(task);

        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_task_added();
        }
    }
}
