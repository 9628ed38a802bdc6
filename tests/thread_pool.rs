use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use pactum::{ExecutionContext, Task, TaskList, ThreadPool, pool};

mod common;

fn single_worker_pool() -> ThreadPool {
    ThreadPool::new(pool::Desc {
        use_hardware_concurrency: false,
        additional_threads: 1,
    })
}

/// Polls `predicate` for up to ~1 second.
fn wait_for(predicate: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn consumes_tasks() {
    let thread_pool = single_worker_pool();
    let task_list = TaskList::create();

    thread_pool.add_task_list(&task_list);

    let executed = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&executed);
    task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));

    assert!(wait_for(|| executed.load(Ordering::SeqCst)));
}

#[test]
fn picks_up_tasks_scheduled_before_membership() {
    let task_list = TaskList::create();

    let executed = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&executed);
    task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));

    // The task predates the pool learning about the list; membership
    // notification must still get it drained.
    let thread_pool = single_worker_pool();
    thread_pool.add_task_list(&task_list);

    assert!(wait_for(|| executed.load(Ordering::SeqCst)));
}

#[test]
fn consumes_tasks_from_multiple_task_lists() {
    let thread_pool = single_worker_pool();
    let task_list = TaskList::create();
    let other_task_list = TaskList::create();

    thread_pool.add_task_list(&task_list);
    thread_pool.add_task_list(&other_task_list);

    let executed = Arc::new(AtomicBool::new(false));
    let executed_other = Arc::new(AtomicBool::new(false));

    let sink = Arc::clone(&executed);
    task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));
    let sink = Arc::clone(&executed_other);
    other_task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));

    assert!(wait_for(|| {
        executed.load(Ordering::SeqCst) && executed_other.load(Ordering::SeqCst)
    }));
}

#[test]
fn removed_task_list_stops_feeding_the_pool() {
    let thread_pool = single_worker_pool();
    let task_list = TaskList::create();

    thread_pool.add_task_list(&task_list);

    let executed = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&executed);
    task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));
    assert!(wait_for(|| executed.load(Ordering::SeqCst)));

    thread_pool.remove_task_list(&task_list);

    let executed_after_removal = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&executed_after_removal);
    task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));

    thread::sleep(Duration::from_millis(300));
    assert!(!executed_after_removal.load(Ordering::SeqCst));

    // The task is still queued; a manual drain runs it.
    assert!(task_list.execute_next());
    assert!(executed_after_removal.load(Ordering::SeqCst));
}

#[test]
fn zero_worker_pool_executes_nothing() {
    let thread_pool = ThreadPool::new(pool::Desc {
        use_hardware_concurrency: false,
        additional_threads: 0,
    });
    let task_list = TaskList::create();
    thread_pool.add_task_list(&task_list);

    let executed = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&executed);
    task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));

    thread::sleep(Duration::from_millis(300));
    assert!(!executed.load(Ordering::SeqCst));
}

#[test]
fn negative_additional_threads_clamp_to_zero() {
    // More threads subtracted than any machine has: a valid, inert pool.
    let thread_pool = ThreadPool::new(pool::Desc {
        use_hardware_concurrency: false,
        additional_threads: -4,
    });
    drop(thread_pool);
}

#[test]
fn drop_joins_workers_and_leaves_queued_tasks() {
    let task_list = TaskList::create();
    {
        let thread_pool = single_worker_pool();
        thread_pool.add_task_list(&task_list);
        // Dropping here clears memberships, cancels, and joins.
    }

    let executed = Arc::new(AtomicBool::new(false));
    let sink = Arc::clone(&executed);
    task_list.schedule(Task::of(move || {
        sink.store(true, Ordering::SeqCst);
    }));

    thread::sleep(Duration::from_millis(100));
    assert!(!executed.load(Ordering::SeqCst));
    assert!(task_list.execute_next());
    assert!(executed.load(Ordering::SeqCst));
}

#[test]
fn drains_many_tasks_across_workers() {
    let thread_pool = ThreadPool::new(pool::Desc {
        use_hardware_concurrency: false,
        additional_threads: 4,
    });
    let task_list = TaskList::create();
    thread_pool.add_task_list(&task_list);

    let executed = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let sink = Arc::clone(&executed);
        task_list.schedule(Task::of(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }));
    }

    assert!(wait_for(|| executed.load(Ordering::SeqCst) == 100));
}

#[test]
fn resolves_promises_scheduled_through_run() {
    let thread_pool = single_worker_pool();
    let task_list = TaskList::create();
    thread_pool.add_task_list(&task_list);

    let promise = task_list.run(|| 7 * 6);

    assert!(wait_for(|| promise.is_finished()));

    let observed = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&observed);
    promise.on_resolve(
        move |v| {
            sink.store(*v as usize, Ordering::SeqCst);
        },
        common::inline_ctx(),
    );
    assert!(wait_for(|| observed.load(Ordering::SeqCst) == 42));
}
