use std::any::Any;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use crate::context::{ExecutionContext, default_execution_context};
use crate::promise::{Promise, VoidPromise};

/// Type-erased handle to a child promise held by a combiner entry.
///
/// `CombinedResult::get`/`take` recover the static type recorded in the
/// entry's [`PromiseKey`] by downcasting through `as_any`.
trait ErasedPromise: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + Sync + 'static> ErasedPromise for Promise<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErasedPromise for VoidPromise {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Token identifying one entry of a [`PromiseCombiner`].
///
/// A key carries the entry's value type and, at the type level, whether
/// the entry grants move access: only keys minted by
/// [`add_consuming`](PromiseCombiner::add_consuming) are
/// `PromiseKey<T, true>`, and only those can be passed to
/// [`CombinedResult::take`].
///
/// Keys are trivially copyable and only ever minted by a combiner. An
/// `add` rejected because the combiner was already finalized returns an
/// invalid key (`is_valid() == false`).
pub struct PromiseKey<T, const CONSUMING: bool> {
    key: u16,
    _value: PhantomData<fn() -> T>,
}

impl<T, const CONSUMING: bool> Clone for PromiseKey<T, CONSUMING> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, const CONSUMING: bool> Copy for PromiseKey<T, CONSUMING> {}

impl<T, const CONSUMING: bool> PromiseKey<T, CONSUMING> {
    fn new(key: u16) -> Self {
        Self {
            key,
            _value: PhantomData,
        }
    }

    /// `false` only for keys returned from a rejected add.
    pub fn is_valid(&self) -> bool {
        self.key > 0
    }

    /// Raw entry identifier; `0` is the "no entry" sentinel.
    pub fn key(&self) -> u16 {
        self.key
    }
}

struct Entry {
    key: u16,
    promise: Arc<dyn ErasedPromise>,
    is_resolved: bool,
    is_owning: bool,
}

struct CombinerState {
    next_key: u16,
    entries: Vec<Entry>,

    /// Set by `combine`/`combine_chaining`; no entries are accepted
    /// afterwards, and entry resolution may now complete the barrier.
    is_finished: bool,

    /// The self-referencing result, parked here between finalization
    /// and the resolution of the terminal promise.
    result: Option<CombinedResult>,
}

/// Fan-in barrier over heterogeneous promises.
///
/// A combiner collects promises of arbitrary value types via
/// [`add`](Self::add) / [`add_consuming`](Self::add_consuming) /
/// [`add_void`](Self::add_void), each returning a typed [`PromiseKey`].
/// A single [`combine`](Self::combine) (or
/// [`combine_chaining`](Self::combine_chaining)) call finalizes the
/// barrier and schedules the aggregate callback once every added
/// promise has resolved; the callback reads the collected values out of
/// its [`CombinedResult`] by key.
///
/// ```ignore
/// let combiner = PromiseCombiner::create();
/// let k1 = combiner.add(&width, ctx.clone());
/// let k2 = combiner.add(&height, ctx.clone());
/// let area = combiner.combine(move |rsl| rsl.get(k1) * rsl.get(k2), ctx);
/// ```
///
/// Child promises hold only weak references back to the combiner. The
/// one deliberate strong cycle (the `CombinedResult` owning the
/// combiner that stores it) is broken when the result handed to the
/// aggregate callback is dropped.
pub struct PromiseCombiner {
    state: Mutex<CombinerState>,
    terminal: Arc<Promise<CombinedResult>>,
    weak_self: Weak<PromiseCombiner>,
}

impl PromiseCombiner {
    /// Creates a new combiner with no entries.
    pub fn create() -> Arc<PromiseCombiner> {
        Arc::new_cyclic(|weak_self| PromiseCombiner {
            state: Mutex::new(CombinerState {
                next_key: 1,
                entries: Vec::new(),
                is_finished: false,
                result: None,
            }),
            terminal: Promise::create(),
            weak_self: weak_self.clone(),
        })
    }

    fn strong(&self) -> Arc<PromiseCombiner> {
        self.weak_self
            .upgrade()
            .expect("combiner self-reference expired")
    }

    /// Adds `promise` to the barrier. Its value stays in place and is
    /// readable through [`CombinedResult::get`].
    ///
    /// The completion notification runs on `ctx`. Returns an invalid
    /// key if the combiner was already finalized.
    pub fn add<T>(
        &self,
        promise: &Arc<Promise<T>>,
        ctx: Arc<dyn ExecutionContext>,
    ) -> PromiseKey<T, false>
    where
        T: Send + Sync + 'static,
    {
        let key = match self.insert_entry(Arc::clone(promise) as Arc<dyn ErasedPromise>, false) {
            Some(key) => key,
            None => return PromiseKey::new(0),
        };

        let combiner = self.weak_self.clone();
        promise.on_resolve(
            move |_| {
                if let Some(combiner) = combiner.upgrade() {
                    combiner.resolve_entry(key);
                }
            },
            ctx,
        );

        PromiseKey::new(key)
    }

    /// Adds `promise` to the barrier, consuming it: the value is moved
    /// into a relay private to the combiner and can be moved out again
    /// through [`CombinedResult::take`].
    ///
    /// This attaches the promise's single consumer; the promise accepts
    /// no further continuations afterwards. Returns an invalid key if
    /// the combiner was already finalized (in which case the promise is
    /// left untouched).
    pub fn add_consuming<T>(
        &self,
        promise: &Arc<Promise<T>>,
        ctx: Arc<dyn ExecutionContext>,
    ) -> PromiseKey<T, true>
    where
        T: Send + Sync + 'static,
    {
        let relay = Promise::<T>::create();

        let key = match self.insert_entry(Arc::clone(&relay) as Arc<dyn ErasedPromise>, true) {
            Some(key) => key,
            None => return PromiseKey::new(0),
        };

        let relay_target = Arc::clone(&relay);
        promise.consume(
            move |val| {
                relay_target.resolve(val);
            },
            ctx,
        );

        let combiner = self.weak_self.clone();
        relay.on_resolve(
            move |_| {
                if let Some(combiner) = combiner.upgrade() {
                    combiner.resolve_entry(key);
                }
            },
            default_execution_context(),
        );

        PromiseKey::new(key)
    }

    /// Adds a completion-only [`VoidPromise`] to the barrier.
    ///
    /// The returned key witnesses completion; it holds no value, and
    /// passing it to [`CombinedResult::get`] is a usage bug.
    pub fn add_void(
        &self,
        promise: &Arc<VoidPromise>,
        ctx: Arc<dyn ExecutionContext>,
    ) -> PromiseKey<(), false> {
        let key = match self.insert_entry(Arc::clone(promise) as Arc<dyn ErasedPromise>, false) {
            Some(key) => key,
            None => return PromiseKey::new(0),
        };

        let combiner = self.weak_self.clone();
        promise.on_resolve(
            move || {
                if let Some(combiner) = combiner.upgrade() {
                    combiner.resolve_entry(key);
                }
            },
            ctx,
        );

        PromiseKey::new(key)
    }

    /// Finalizes the barrier. `f` is scheduled onto `ctx` with the
    /// keyed [`CombinedResult`] once every entry has resolved, which
    /// may be immediately if they all already have.
    ///
    /// Returns a promise for `f`'s result, or `None` (logging a
    /// warning) if the combiner was already finalized.
    pub fn combine<F, R>(
        &self,
        f: F,
        ctx: Arc<dyn ExecutionContext>,
    ) -> Option<Arc<Promise<R>>>
    where
        F: FnOnce(CombinedResult) -> R + Send + 'static,
        R: Send + Sync + 'static,
    {
        if !self.finalize() {
            return None;
        }
        Some(self.terminal.then_consuming(f, ctx))
    }

    /// Chaining variant of [`combine`](Self::combine): `f` returns a
    /// promise, and the promise returned here resolves with that inner
    /// promise's value.
    ///
    /// `f` runs on `outer`; the inner promise's completion is observed
    /// on `inner`, defaulting to `outer` when `None`.
    pub fn combine_chaining<F, R>(
        &self,
        f: F,
        outer: Arc<dyn ExecutionContext>,
        inner: Option<Arc<dyn ExecutionContext>>,
    ) -> Option<Arc<Promise<R>>>
    where
        F: FnOnce(CombinedResult) -> Arc<Promise<R>> + Send + 'static,
        R: Send + Sync + 'static,
    {
        if !self.finalize() {
            return None;
        }
        Some(self.terminal.then_chain_consuming(f, outer, inner))
    }

    /// Marks the combiner finalized and installs the self-referencing
    /// result, then runs the sentinel resolution tick in case every
    /// entry had already resolved. Returns `false` if already finalized.
    fn finalize(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_finished {
                log::warn!("combine on an already-combined combiner; ignoring");
                return false;
            }

            // The deliberate self-reference: broken when the
            // CombinedResult handed to the aggregate callback drops.
            state.result = Some(CombinedResult {
                combiner: Some(self.strong()),
            });
            state.is_finished = true;
        }

        self.resolve_entry(0);
        true
    }

    fn insert_entry(&self, promise: Arc<dyn ErasedPromise>, is_owning: bool) -> Option<u16> {
        let mut state = self.state.lock().unwrap();
        if state.is_finished {
            log::warn!("add on an already-combined combiner; returning an invalid key");
            return None;
        }

        let key = state.next_key;
        state.next_key += 1;
        state.entries.push(Entry {
            key,
            promise,
            is_resolved: false,
            is_owning,
        });
        Some(key)
    }

    /// Records `key` as resolved (`0` is the sentinel no-entry tick)
    /// and, if the combiner is finalized with every entry resolved,
    /// completes the terminal promise.
    fn resolve_entry(&self, key: u16) {
        let ready = {
            let mut state = self.state.lock().unwrap();

            if key != 0 {
                if let Some(entry) = state.entries.iter_mut().find(|e| e.key == key) {
                    entry.is_resolved = true;
                }
            }

            if state.is_finished && state.entries.iter().all(|e| e.is_resolved) {
                // The lock is released before the terminal promise runs
                // user code, so an inline aggregate callback can
                // re-enter the combiner.
                state.result.take()
            } else {
                None
            }
        };

        if let Some(result) = ready {
            self.terminal.resolve(result);
        }
    }
}

/// Keyed view over a finalized combiner's resolved entries.
///
/// Handed by value to the aggregate callback of
/// [`PromiseCombiner::combine`]. [`get`](Self::get) reads any entry by
/// reference; [`take`](Self::take) moves a consuming entry's value out
/// and is only callable with a `PromiseKey<T, true>`.
///
/// The result owns the combiner's only strong back-reference. Dropping
/// it clears the combiner's entry table, releasing every child promise
/// handle. Keep the result inside the aggregate callback rather than
/// stashing it, or the held values live as long as the stash does.
pub struct CombinedResult {
    combiner: Option<Arc<PromiseCombiner>>,
}

impl CombinedResult {
    /// Returns a reference to the value held for `key`.
    ///
    /// # Panics
    ///
    /// If `key` was not minted by this combiner, or its entry holds a
    /// different type (including completion-only void entries), or the
    /// value was already moved out by [`take`](Self::take). All of
    /// these are usage bugs.
    pub fn get<T, const CONSUMING: bool>(&self, key: PromiseKey<T, CONSUMING>) -> &T
    where
        T: Send + Sync + 'static,
    {
        let promise = self.entry_promise::<T, CONSUMING>(key);
        // Safety: every entry resolved before this result existed, and
        // values are only moved out through `take`, which needs
        // `&mut self` and is therefore excluded while this borrow
        // lives.
        unsafe { promise.unsafe_sync_peek() }
    }

    /// Moves the value held for `key` out of the combiner. Only
    /// available for keys minted by
    /// [`add_consuming`](PromiseCombiner::add_consuming); a
    /// non-consuming key is rejected at compile time:
    ///
    /// ```compile_fail
    /// # use std::sync::Arc;
    /// # use pactum::{ExecutionContext, InlineExecutionContext, Promise, PromiseCombiner};
    /// let ctx: Arc<dyn ExecutionContext> = Arc::new(InlineExecutionContext);
    /// let p = Promise::<i32>::create();
    /// let combiner = PromiseCombiner::create();
    /// let key = combiner.add(&p, ctx.clone());
    /// combiner.combine(
    ///     move |mut rsl| {
    ///         let _ = rsl.take(key); // `add` keys do not grant move access
    ///     },
    ///     ctx,
    /// );
    /// ```
    ///
    /// # Panics
    ///
    /// If `key` was not minted by this combiner, or its entry holds a
    /// different type, or the value was already taken.
    pub fn take<T>(&mut self, key: PromiseKey<T, true>) -> T
    where
        T: Send + Sync + 'static,
    {
        let promise = self.entry_promise::<T, true>(key);
        // Safety: consuming entries hold a relay promise private to the
        // combiner, and this exclusive method is its only mover.
        unsafe { promise.unsafe_sync_move() }
    }

    /// Looks up `key`'s entry and downcasts its promise to the type the
    /// key records. The reference is detached from the entry-table lock
    /// guard; see the safety comments at the call sites.
    fn entry_promise<T, const CONSUMING: bool>(&self, key: PromiseKey<T, CONSUMING>) -> &Promise<T>
    where
        T: Send + Sync + 'static,
    {
        let combiner = self
            .combiner
            .as_ref()
            .expect("combined result already released its combiner");
        let state = combiner.state.lock().unwrap();
        let entry = state
            .entries
            .iter()
            .find(|e| e.key == key.key)
            .unwrap_or_else(|| {
                log::error!("promise key {} is unknown to this combiner", key.key);
                panic!("promise key {} is unknown to this combiner", key.key);
            });
        debug_assert!(!CONSUMING || entry.is_owning);
        let promise = entry
            .promise
            .as_any()
            .downcast_ref::<Promise<T>>()
            .unwrap_or_else(|| {
                log::error!("promise key {} does not hold the requested type", key.key);
                panic!("promise key {} does not hold the requested type", key.key);
            });
        // Safety: the promise lives in an Arc held by the entry table,
        // which is not touched again until this result drops; the
        // reference stays valid for `&self`'s lifetime.
        unsafe { &*(promise as *const Promise<T>) }
    }
}

impl Drop for CombinedResult {
    /// Releases the combiner self-reference and, with it, every child
    /// promise handle the entries were keeping alive.
    fn drop(&mut self) {
        if let Some(combiner) = self.combiner.take() {
            combiner.state.lock().unwrap().entries.clear();
        }
    }
}
