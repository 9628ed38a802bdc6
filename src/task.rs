use std::thread::{self, ThreadId};
use std::time::Instant;

/// Timing record for a single [`Task`].
///
/// Timestamps are stamped as the task moves through its lifecycle:
/// creation, hand-off to an execution context, start of execution, and
/// completion. Stages the task never reached are `None`.
///
/// A profile is only delivered when the task was built with
/// [`Task::with_profile`]; plain tasks skip the bookkeeping entirely.
#[derive(Clone, Copy, Debug)]
pub struct TaskProfile {
    /// When the task was created.
    pub created: Instant,

    /// When the task was handed to an execution context.
    pub scheduled: Option<Instant>,

    /// When a worker began running the task closure.
    pub started: Option<Instant>,

    /// When the task closure returned.
    pub finished: Option<Instant>,

    /// The thread that executed the task.
    pub executor_thread: Option<ThreadId>,
}

impl TaskProfile {
    fn new() -> Self {
        Self {
            created: Instant::now(),
            scheduled: None,
            started: None,
            finished: None,
            executor_thread: None,
        }
    }
}

/// A one-shot deferred invocation.
///
/// A `Task` wraps a zero-argument closure together with optional
/// profiling state. It is move-only, and [`run`](Self::run) consumes
/// the task, so the closure is invoked at most once.
///
/// Tasks carry no failure channel of their own: a closure that panics
/// propagates the panic to whatever thread happens to be running it.
pub struct Task {
    f: Box<dyn FnOnce() + Send>,
    profile_cb: Option<Box<dyn FnOnce(TaskProfile) + Send>>,
    profile: TaskProfile,
}

impl Task {
    /// Wraps `f` into a task.
    pub fn of<F>(f: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            f: Box::new(f),
            profile_cb: None,
            profile: TaskProfile::new(),
        }
    }

    /// Wraps `f` into a task that reports its completed [`TaskProfile`]
    /// to `profile_cb` after running.
    pub fn with_profile<P, F>(profile_cb: P, f: F) -> Task
    where
        P: FnOnce(TaskProfile) + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Task {
            f: Box::new(f),
            profile_cb: Some(Box::new(profile_cb)),
            profile: TaskProfile::new(),
        }
    }

    /// Stamps the moment the task was accepted by an execution context.
    ///
    /// Called by queueing contexts at enqueue time; inline contexts run
    /// the task without ever stamping it.
    pub fn mark_scheduled(&mut self) {
        self.profile.scheduled = Some(Instant::now());
    }

    /// Invokes the wrapped closure, then delivers the profile if a
    /// profile callback was attached.
    pub fn run(mut self) {
        if self.profile_cb.is_some() {
            self.profile.started = Some(Instant::now());
        }

        (self.f)();

        if let Some(profile_cb) = self.profile_cb.take() {
            self.profile.finished = Some(Instant::now());
            self.profile.executor_thread = Some(thread::current().id());
            profile_cb(self.profile);
        }
    }
}
