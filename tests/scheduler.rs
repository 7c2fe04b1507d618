use sparse_ecs::{Error, SystemScheduler};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn independent_systems_overlap() {
    // A and B each sleep 50 ms; C depends on both. With the two sleeps
    // overlapping, the whole graph must finish well under the 100 ms a
    // sequential run would take.
    let mut scheduler = SystemScheduler::with_threads(4);
    let a_done = Arc::new(AtomicBool::new(false));
    let b_done = Arc::new(AtomicBool::new(false));
    let c_ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&a_done);
    scheduler.add_named(
        "a",
        move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        },
        &[],
    );
    let flag = Arc::clone(&b_done);
    scheduler.add_named(
        "b",
        move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        },
        &[],
    );

    let (a, b, c) = (Arc::clone(&a_done), Arc::clone(&b_done), Arc::clone(&c_ran));
    scheduler.add_named(
        "c",
        move || {
            assert!(a.load(Ordering::SeqCst), "c ran before a finished");
            assert!(b.load(Ordering::SeqCst), "c ran before b finished");
            c.store(true, Ordering::SeqCst);
        },
        &["a", "b"],
    );

    let start = Instant::now();
    scheduler.run_graph().unwrap();
    let elapsed = start.elapsed();

    assert!(c_ran.load(Ordering::SeqCst));
    assert!(
        elapsed < Duration::from_millis(90),
        "a and b did not overlap: {elapsed:?}"
    );
}

#[test]
fn cycle_reported_without_partial_execution() {
    let mut scheduler = SystemScheduler::with_threads(2);
    let ran = Arc::new(AtomicUsize::new(0));

    for (name, dep) in [("a", "b"), ("b", "a")] {
        let ran = Arc::clone(&ran);
        scheduler.add_named(
            name,
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            },
            &[dep],
        );
    }

    match scheduler.run_graph() {
        Err(Error::DependencyCycle(_)) => {}
        other => panic!("expected a cycle error, got {other:?}"),
    }
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn diamond_dependencies_respect_edges() {
    // root -> left, root -> right, join -> both. The join must observe every
    // upstream effect.
    let mut scheduler = SystemScheduler::with_threads(4);
    let stamps = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&stamps);
    scheduler.add_named(
        "root",
        move || {
            s.fetch_add(1, Ordering::SeqCst);
        },
        &[],
    );
    for name in ["left", "right"] {
        let s = Arc::clone(&stamps);
        scheduler.add_named(
            name,
            move || {
                assert!(s.load(Ordering::SeqCst) >= 1);
                s.fetch_add(10, Ordering::SeqCst);
            },
            &["root"],
        );
    }
    let s = Arc::clone(&stamps);
    scheduler.add_named(
        "join",
        move || {
            assert_eq!(s.load(Ordering::SeqCst), 21);
        },
        &["left", "right"],
    );

    scheduler.run_graph().unwrap();
    assert_eq!(stamps.load(Ordering::SeqCst), 21);
}

#[test]
fn frame_waits_for_every_task() {
    let scheduler = SystemScheduler::with_threads(4);
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let counter = Arc::clone(&counter);
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .collect();
    scheduler.frame(tasks);

    assert_eq!(counter.load(Ordering::SeqCst), 32);
}

#[test]
fn parallel_and_sequential_run_the_same_set() {
    let mut scheduler = SystemScheduler::with_threads(4);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let counter = Arc::clone(&counter);
        scheduler.add(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    scheduler.run_sequential();
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    scheduler.run_parallel();
    assert_eq!(counter.load(Ordering::SeqCst), 20);
}
