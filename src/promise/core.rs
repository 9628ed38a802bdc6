use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::context::ExecutionContext;
use crate::task::Task;

/// Continuation registered through `on_resolve` and not yet dispatched.
struct ThenOp<T> {
    f: Box<dyn FnOnce(&T) + Send>,
    ctx: Arc<dyn ExecutionContext>,
}

/// Terminal continuation registered through `consume`.
struct ConsumeOp<T> {
    f: Box<dyn FnOnce(T) + Send>,
    ctx: Arc<dyn ExecutionContext>,
}

struct ThenQueue<T> {
    queue: VecDeque<ThenOp<T>>,

    /// Cleared once a consumer is attached; no continuation of any kind
    /// is accepted afterwards.
    accept_thens: bool,
}

struct ConsumeSlot<T> {
    op: Option<ConsumeOp<T>>,

    /// Number of dispatched-but-not-yet-completed `on_resolve`
    /// callbacks. The consumer is only dispatched once this reaches
    /// zero with the value present, which is what guarantees that every
    /// observer finishes before the value is moved out.
    remaining_thens: usize,
}

/// A single-assignment value cell with chained continuations.
///
/// A `Promise` starts out empty and is given a value exactly once via
/// [`resolve`](Self::resolve). It never exposes the value directly;
/// instead, callers register continuations that are scheduled onto an
/// [`ExecutionContext`] once the value is available:
///
/// - [`on_resolve`](Self::on_resolve) observes the value by reference
///   and may be registered any number of times.
/// - [`consume`](Self::consume) moves the value out and may be
///   registered at most once. It runs only after every observer
///   callback has completed.
/// - [`then`](Self::then), [`then_consuming`](Self::then_consuming),
///   [`then_chain`](Self::then_chain), and
///   [`then_chain_consuming`](Self::then_chain_consuming) compose a new
///   promise from a transformation of this one's value.
///
/// Promises are always handled through `Arc`; create one with
/// [`create`](Self::create) or [`immediate`](Self::immediate). All
/// methods are safe to call from any thread.
///
/// There is no error channel: model failure as a sum type inside `T`
/// (for example `Result<Payload, MyError>` as the held value).
pub struct Promise<T> {
    /// Value storage. Written exactly once, under the then-queue lock,
    /// and published by `is_finished`.
    ///
    /// Reads hand out `&T` without locking: the write happens-before
    /// every read, via the `is_finished` Acquire load or via the
    /// scheduling of the reading task. Move-out happens only on the
    /// at-most-once consumer path, after every dispatched observer has
    /// completed.
    result: UnsafeCell<Option<T>>,

    then_queue: Mutex<ThenQueue<T>>,
    consume_slot: Mutex<ConsumeSlot<T>>,

    is_finished: AtomicBool,

    /// Self-reference so `&self` methods can hand out owning handles
    /// and pin the promise across dispatched tasks.
    weak_self: Weak<Promise<T>>,
}

// Safety: the value cell is written once before `is_finished` is
// published, read only after, and moved out only by the single consumer
// dispatch; all remaining state is behind the internal mutexes. `T: Sync`
// is required because observer callbacks on distinct worker threads may
// hold `&T` concurrently.
unsafe impl<T: Send> Send for Promise<T> {}
unsafe impl<T: Send + Sync> Sync for Promise<T> {}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Creates a new unresolved promise.
    pub fn create() -> Arc<Promise<T>> {
        Arc::new_cyclic(|weak_self| Promise {
            result: UnsafeCell::new(None),
            then_queue: Mutex::new(ThenQueue {
                queue: VecDeque::new(),
                accept_thens: true,
            }),
            consume_slot: Mutex::new(ConsumeSlot {
                op: None,
                remaining_thens: 0,
            }),
            is_finished: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    /// Creates a promise that is already resolved with `val`.
    pub fn immediate(val: T) -> Arc<Promise<T>> {
        let promise = Self::create();
        promise.resolve(val);
        promise
    }

    fn strong(&self) -> Arc<Promise<T>> {
        // A method call implies a live handle somewhere.
        self.weak_self
            .upgrade()
            .expect("promise self-reference expired")
    }

    /// Finalizes this promise with `val`, scheduling every pending
    /// continuation onto its captured execution context.
    ///
    /// Returns `None` if the promise was already resolved; the second
    /// value is dropped and no state changes.
    pub fn resolve(&self, val: T) -> Option<Arc<Promise<T>>> {
        let drained: Vec<ThenOp<T>>;
        {
            let mut thens = self.then_queue.lock().unwrap();

            if self.is_finished.load(Ordering::Acquire) {
                log::warn!("resolve on an already-resolved promise; ignoring");
                return None;
            }

            // Safety: the first resolve wins under the then-queue lock;
            // no reader touches the cell until `is_finished` is
            // published below.
            unsafe { *self.result.get() = Some(val) };
            self.is_finished.store(true, Ordering::Release);

            drained = thens.queue.drain(..).collect();
        }

        // Dispatch outside the locks so an inline execution context can
        // re-enter this promise from the callback.
        for op in drained {
            self.dispatch_then(op);
        }

        if let Some(op) = self.take_ready_consumer() {
            self.dispatch_consume(op);
        }

        Some(self.strong())
    }

    /// Registers `f` to observe the value once it is available.
    ///
    /// If the promise is already resolved, `f` is scheduled
    /// immediately. Returns `None` (and drops `f` unrun) if a consumer
    /// has already been attached.
    pub fn on_resolve<F>(&self, f: F, ctx: Arc<dyn ExecutionContext>) -> Option<Arc<Promise<T>>>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let resolved = {
            let mut thens = self.then_queue.lock().unwrap();

            if !thens.accept_thens {
                log::warn!("on_resolve after a consumer was attached; ignoring");
                return None;
            }

            let op = ThenOp {
                f: Box::new(f),
                ctx,
            };

            // Counted in `remaining_thens` whether dispatched now or
            // queued, so a consumer attached later cannot overtake this
            // callback.
            self.consume_slot.lock().unwrap().remaining_thens += 1;

            if self.is_finished.load(Ordering::Acquire) {
                Some(op)
            } else {
                thens.queue.push_back(op);
                None
            }
        };

        if let Some(op) = resolved {
            self.dispatch_then(op);
        }

        Some(self.strong())
    }

    /// Attaches the at-most-once terminal continuation, which receives
    /// the value by move.
    ///
    /// The consumer runs only after the promise has resolved and every
    /// previously dispatched `on_resolve` callback has completed. After
    /// this call no further continuations are accepted. Returns `None`
    /// if a consumer was already attached.
    pub fn consume<F>(&self, f: F, ctx: Arc<dyn ExecutionContext>) -> Option<Arc<Promise<T>>>
    where
        F: FnOnce(T) + Send + 'static,
    {
        let ready = {
            let mut thens = self.then_queue.lock().unwrap();

            if !thens.accept_thens {
                log::warn!("consume on a promise that already has a consumer; ignoring");
                return None;
            }
            thens.accept_thens = false;

            let mut slot = self.consume_slot.lock().unwrap();
            slot.op = Some(ConsumeOp {
                f: Box::new(f),
                ctx,
            });
            self.take_ready_consumer_locked(&mut slot)
        };

        if let Some(op) = ready {
            self.dispatch_consume(op);
        }

        Some(self.strong())
    }

    /// Returns a new promise holding `f` applied to this one's value.
    ///
    /// `f` observes the value by reference, so this promise remains
    /// usable afterwards. A `()`-returning `f` yields an
    /// `Arc<Promise<()>>` that resolves once `f` has run.
    pub fn then<F, R>(&self, f: F, ctx: Arc<dyn ExecutionContext>) -> Arc<Promise<R>>
    where
        F: FnOnce(&T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        let result = Promise::<R>::create();
        let resolve_target = Arc::clone(&result);
        self.on_resolve(
            move |val| {
                resolve_target.resolve(f(val));
            },
            ctx,
        );
        result
    }

    /// Like [`then`](Self::then), but `f` receives the moved-out value.
    ///
    /// Installed through [`consume`](Self::consume): at most one
    /// consuming continuation per promise, and it runs after every
    /// observer.
    pub fn then_consuming<F, R>(&self, f: F, ctx: Arc<dyn ExecutionContext>) -> Arc<Promise<R>>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        let result = Promise::<R>::create();
        let resolve_target = Arc::clone(&result);
        self.consume(
            move |val| {
                resolve_target.resolve(f(val));
            },
            ctx,
        );
        result
    }

    /// Chains a promise-producing `f`: the returned promise resolves
    /// with the value of the promise `f` returns.
    ///
    /// `f` itself runs on `outer`; the inner promise's completion is
    /// observed on `inner`, defaulting to `outer` when `None`.
    pub fn then_chain<F, U>(
        &self,
        f: F,
        outer: Arc<dyn ExecutionContext>,
        inner: Option<Arc<dyn ExecutionContext>>,
    ) -> Arc<Promise<U>>
    where
        F: FnOnce(&T) -> Arc<Promise<U>> + Send + 'static,
        U: Send + Sync + 'static,
    {
        let inner = inner.unwrap_or_else(|| Arc::clone(&outer));
        let result = Promise::<U>::create();
        let resolve_target = Arc::clone(&result);
        self.on_resolve(
            move |val| {
                f(val).consume(
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

    /// Like [`then_chain`](Self::then_chain), but `f` receives the
    /// moved-out value. Installed through [`consume`](Self::consume).
    pub fn then_chain_consuming<F, U>(
        &self,
        f: F,
        outer: Arc<dyn ExecutionContext>,
        inner: Option<Arc<dyn ExecutionContext>>,
    ) -> Arc<Promise<U>>
    where
        F: FnOnce(T) -> Arc<Promise<U>> + Send + 'static,
        U: Send + Sync + 'static,
    {
        let inner = inner.unwrap_or_else(|| Arc::clone(&outer));
        let result = Promise::<U>::create();
        let resolve_target = Arc::clone(&result);
        self.consume(
            move |val| {
                f(val).consume(
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

    /// Returns a reference to the stored value without synchronization.
    ///
    /// # Safety
    ///
    /// The caller must have established a happens-before with a
    /// successful [`resolve`](Self::resolve) (for example by observing
    /// [`is_finished`](Self::is_finished) on this thread), and must
    /// guarantee that no consumer moves the value out while the
    /// reference is live.
    ///
    /// # Panics
    ///
    /// If the value is absent (unresolved, or already moved out).
    pub unsafe fn unsafe_sync_peek(&self) -> &T {
        unsafe {
            (*self.result.get())
                .as_ref()
                .expect("promise value is not present")
        }
    }

    /// Moves the stored value out without synchronization.
    ///
    /// # Safety
    ///
    /// The caller must have established a happens-before with a
    /// successful [`resolve`](Self::resolve), and must guarantee that
    /// no consumer is attached and no other access to the value is in
    /// flight.
    ///
    /// # Panics
    ///
    /// If the value is absent (unresolved, or already moved out).
    pub unsafe fn unsafe_sync_move(&self) -> T {
        unsafe {
            (*self.result.get())
                .take()
                .expect("promise value is not present")
        }
    }

    /// Schedules one observer callback. The dispatched task pins the
    /// promise, runs the user function against the stored value, then
    /// performs the decrement-and-recheck that may release the consumer.
    fn dispatch_then(&self, op: ThenOp<T>) {
        let lifetime = self.strong();
        let f = op.f;
        op.ctx.schedule(Task::of(move || {
            {
                // Safety: dispatched only after resolution; the
                // consumer cannot move the value out while this
                // callback is still counted in `remaining_thens`.
                let val = unsafe {
                    (*lifetime.result.get())
                        .as_ref()
                        .expect("resolved promise lost its value")
                };
                f(val);
            }

            let ready = {
                let mut slot = lifetime.consume_slot.lock().unwrap();
                slot.remaining_thens -= 1;
                lifetime.take_ready_consumer_locked(&mut slot)
            };
            if let Some(op) = ready {
                lifetime.dispatch_consume(op);
            }
        }));
    }

    /// Schedules the consumer. Called at most once per promise: the
    /// slot is emptied under the consume lock before this runs.
    fn dispatch_consume(&self, op: ConsumeOp<T>) {
        let lifetime = self.strong();
        let f = op.f;
        op.ctx.schedule(Task::of(move || {
            // Safety: the consumer is the last accessor of the value.
            // Every dispatched observer has completed, and no further
            // continuations are accepted.
            let val = unsafe {
                (*lifetime.result.get())
                    .take()
                    .expect("resolved promise lost its value")
            };
            f(val);
        }));
    }

    fn take_ready_consumer(&self) -> Option<ConsumeOp<T>> {
        let mut slot = self.consume_slot.lock().unwrap();
        self.take_ready_consumer_locked(&mut slot)
    }

    fn take_ready_consumer_locked(&self, slot: &mut ConsumeSlot<T>) -> Option<ConsumeOp<T>> {
        if slot.remaining_thens == 0 && self.is_finished.load(Ordering::Acquire) {
            slot.op.take()
        } else {
            None
        }
    }
}
