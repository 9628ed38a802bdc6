#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pactum::{ExecutionContext, InlineExecutionContext, TaskList};

/// Move-only value for exercising reference vs. move access paths.
pub struct NonCopyable {
    val: i32,
}

impl NonCopyable {
    pub fn new(val: i32) -> Self {
        Self { val }
    }

    pub fn val(&self) -> i32 {
        self.val
    }
}

/// Bumps a shared counter when dropped, to observe exactly when held
/// values are released.
pub struct DestructorTracker {
    hits: Arc<AtomicUsize>,
}

impl DestructorTracker {
    pub fn new(hits: &Arc<AtomicUsize>) -> Self {
        Self {
            hits: Arc::clone(hits),
        }
    }
}

impl Drop for DestructorTracker {
    fn drop(&mut self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn inline_ctx() -> Arc<dyn ExecutionContext> {
    Arc::new(InlineExecutionContext)
}

pub fn flush(task_list: &Arc<TaskList>) {
    while task_list.execute_next() {}
}
