use std::sync::{Arc, OnceLock};

use crate::error::DefaultContextError;
use crate::task::Task;

/// An object capable of running a [`Task`], now or later.
///
/// The two implementations shipped with this crate cover the intended
/// use cases:
///
/// 1. [`InlineExecutionContext`] executes a scheduled task immediately,
///    without waiting.
/// 2. [`TaskList`](crate::TaskList) enqueues a task to be executed
///    later, perhaps on a separate thread.
pub trait ExecutionContext: Send + Sync {
    /// Takes ownership of `task` and arranges for it to run exactly once.
    fn schedule(&self, task: Task);
}

/// Execution context that immediately executes scheduled tasks.
///
/// The task runs synchronously on the calling thread before `schedule`
/// returns. This is a useful default when an execution context is
/// required but no task list has been set up.
pub struct InlineExecutionContext;

impl ExecutionContext for InlineExecutionContext {
    fn schedule(&self, task: Task) {
        task.run();
    }
}

static DEFAULT_CONTEXT: OnceLock<Arc<dyn ExecutionContext>> = OnceLock::new();

/// Returns the process-wide default execution context.
///
/// Unless replaced via [`set_default_execution_context`] before first
/// use, this is an [`InlineExecutionContext`].
pub fn default_execution_context() -> Arc<dyn ExecutionContext> {
    DEFAULT_CONTEXT
        .get_or_init(|| Arc::new(InlineExecutionContext))
        .clone()
}

/// Installs `ctx` as the process-wide default execution context.
///
/// Must be called before the default is first used; afterwards the
/// default is fixed for the lifetime of the process and this returns
/// [`DefaultContextError::AlreadyInstalled`].
pub fn set_default_execution_context(
    ctx: Arc<dyn ExecutionContext>,
) -> Result<(), DefaultContextError> {
    DEFAULT_CONTEXT
        .set(ctx)
        .map_err(|_| DefaultContextError::AlreadyInstalled)
}
