//! # Pactum
//!
//! **Pactum** is a lightweight promise and task-scheduling substrate for
//! Rust: single-assignment value cells with chained continuations, and
//! explicit control over which thread runs each one.
//!
//! Unlike future-based runtimes, Pactum has no coroutines and no
//! reactor. Work is expressed as plain closures wrapped in one-shot
//! [`Task`]s, scheduled onto [`ExecutionContext`]s, and sequenced by
//! [`Promise`]s. The result is a small substrate that embeds anywhere a
//! few threads and a couple of queues are welcome:
//!
//! - **[`Promise<T>`](Promise)**: a write-once cell whose continuations
//!   run on an execution context of the caller's choosing, with an
//!   at-most-once *consumer* that receives the value by move after
//!   every observer has finished
//! - **[`PromiseCombiner`]**: a fan-in barrier that joins
//!   heterogeneous promises into one keyed result
//! - **[`TaskList`]**: a thread-safe task FIFO that is itself an
//!   execution context and notifies listeners on every enqueue
//! - **[`ThreadPool`]**: workers that round-robin over a dynamic set
//!   of task lists and park when all are empty
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pactum::{Promise, TaskList, ThreadPool, pool};
//!
//! let tasks = TaskList::create();
//! let pool = ThreadPool::new(pool::Desc::default());
//! pool.add_task_list(&tasks);
//!
//! let doubled = tasks
//!     .run(|| expensive_number())
//!     .then(|n| n * 2, tasks.clone());
//!
//! doubled.on_resolve(|n| println!("result: {n}"), tasks.clone());
//! ```
//!
//! ## Failure
//!
//! Promises carry no error channel by design. Encode failure inside the
//! held value as a sum type (`Result<Payload, MyError>` works well)
//! and let continuations branch on it.

mod context;
mod error;
mod promise;
mod task;

pub mod pool;
pub mod task_list;

pub use context::{
    ExecutionContext, InlineExecutionContext, default_execution_context,
    set_default_execution_context,
};
pub use error::DefaultContextError;
pub use pool::ThreadPool;
pub use promise::{CombinedResult, Promise, PromiseCombiner, PromiseKey, VoidPromise};
pub use task::{Task, TaskProfile};
pub use task_list::{TaskList, TaskScheduledListener};
