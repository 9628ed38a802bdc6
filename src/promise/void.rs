use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::context::ExecutionContext;
use crate::promise::Promise;
use crate::task::Task;

struct ThenOp {
    f: Box<dyn FnOnce() + Send>,
    ctx: Arc<dyn ExecutionContext>,
}

/// A promise that signals completion without carrying a value.
///
/// `VoidPromise` is the argument-free sibling of [`Promise`]: it has no
/// value storage and no consumer slot, continuations take no argument,
/// and any number of them may be registered. Use it where only the fact
/// of completion matters.
pub struct VoidPromise {
    then_queue: Mutex<VecDeque<ThenOp>>,
    is_finished: AtomicBool,
    weak_self: Weak<VoidPromise>,
}

impl VoidPromise {
    /// Creates a new unresolved promise.
    pub fn create() -> Arc<VoidPromise> {
        Arc::new_cyclic(|weak_self| VoidPromise {
            then_queue: Mutex::new(VecDeque::new()),
            is_finished: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    /// Creates a promise that is already resolved.
    pub fn immediate() -> Arc<VoidPromise> {
        let promise = Self::create();
        promise.resolve();
        promise
    }

    fn strong(&self) -> Arc<VoidPromise> {
        self.weak_self
            .upgrade()
            .expect("promise self-reference expired")
    }

    /// Finalizes this promise, scheduling every pending continuation.
    ///
    /// Returns `None` if the promise was already resolved.
    pub fn resolve(&self) -> Option<Arc<VoidPromise>> {
        let drained: Vec<ThenOp>;
        {
            let mut queue = self.then_queue.lock().unwrap();

            if self.is_finished.load(Ordering::Acquire) {
                log::warn!("resolve on an already-resolved promise; ignoring");
                return None;
            }
            self.is_finished.store(true, Ordering::Release);

            drained = queue.drain(..).collect();
        }

        for ThenOp { f, ctx } in drained {
            // Completion callbacks carry no data, so no lifetime pin is
            // needed on the dispatched task.
            ctx.schedule(Task::of(f));
        }

        Some(self.strong())
    }

    /// Registers `f` to run once this promise resolves.
    ///
    /// If the promise is already resolved, `f` is scheduled
    /// immediately.
    pub fn on_resolve<F>(&self, f: F, ctx: Arc<dyn ExecutionContext>) -> Option<Arc<VoidPromise>>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.then_queue.lock().unwrap();
            if !self.is_finished.load(Ordering::Acquire) {
                queue.push_back(ThenOp {
                    f: Box::new(f),
                    ctx,
                });
                return Some(self.strong());
            }
        }

        ctx.schedule(Task::of(f));
        Some(self.strong())
    }

    /// Returns a new promise holding the result of `f`, run after this
    /// promise resolves.
    pub fn then<F, R>(&self, f: F, ctx: Arc<dyn ExecutionContext>) -> Arc<Promise<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        let result = Promise::<R>::create();
        let resolve_target = Arc::clone(&result);
        self.on_resolve(
            move || {
                resolve_target.resolve(f());
            },
            ctx,
        );
        result
    }

    /// Chains a promise-producing `f`: the returned promise resolves
    /// with the value of the promise `f` returns.
    ///
    /// `f` runs on `outer`; the inner promise's completion is observed
    /// on `inner`, defaulting to `outer` when `None`.
    pub fn then_chain<F, U>(
        &self,
        f: F,
        outer: Arc<dyn ExecutionContext>,
        inner: Option<Arc<dyn ExecutionContext>>,
    ) -> Arc<Promise<U>>
    where
        F: FnOnce() -> Arc<Promise<U>> + Send + 'static,
        U: Send + Sync + 'static,
    {
        let inner = inner.unwrap_or_else(|| Arc::clone(&outer));
        let result = Promise::<U>::create();
        let resolve_target = Arc::clone(&result);
        self.on_resolve(
            move || {
                f().consume(
                    move |inner_val| {
                        resolve_target.resolve(inner_val);
                    },
                    inner,
                );
            },
            outer,
        );
        result
    }

    /// Snapshot of whether this promise has been resolved.
    pub fn is_finished(&self) -> bool {
        self.is_finished.load(Ordering::Acquire)
    }
}
