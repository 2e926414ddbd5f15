//! Ordering guarantees of the driver loop.
//!
//! Covers microtask-before-macrotask, microtask fixpoint draining, timer
//! due-time ordering with FIFO tie-break, and immediate/timer interleaving
//! under both policies.

use std::cell::RefCell;
use std::rc::Rc;
use turnloop::{ImmediatePolicy, Scheduler, SchedulerConfig};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn test_microtask_runs_before_zero_delay_timer() {
    init_logging();
    let mut scheduler = Scheduler::new();
    let log = recorder();

    let t = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            t.borrow_mut().push("timer");
            Ok(())
        },
        0,
    );

    let m = log.clone();
    scheduler.enqueue_microtask(move |_| {
        m.borrow_mut().push("micro");
        Ok(())
    });

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["micro", "timer"]);
}

#[test]
fn test_microtask_fixpoint_drains_before_macrotask() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    let t = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            t.borrow_mut().push("timer");
            Ok(())
        },
        0,
    );

    let first = log.clone();
    scheduler.enqueue_microtask(move |s| {
        first.borrow_mut().push("micro-1");
        let second = first.clone();
        s.enqueue_microtask(move |_| {
            second.borrow_mut().push("micro-2");
            Ok(())
        });
        Ok(())
    });

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["micro-1", "micro-2", "timer"]);
}

#[test]
fn test_timers_fire_in_due_order_regardless_of_enqueue_order() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    for (label, delay) in [("d50", 50u64), ("d10", 10), ("d30", 30)] {
        let l = log.clone();
        scheduler.enqueue_timer(
            move |_| {
                l.borrow_mut().push(label);
                Ok(())
            },
            delay,
        );
    }

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["d10", "d30", "d50"]);
    assert_eq!(scheduler.now(), 50);
}

#[test]
fn test_equal_delay_timers_fire_in_enqueue_order() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    for label in ["first", "second", "third"] {
        let l = log.clone();
        scheduler.enqueue_timer(
            move |_| {
                l.borrow_mut().push(label);
                Ok(())
            },
            20,
        );
    }

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["first", "second", "third"]);
}

#[test]
fn test_later_timer_waits_for_earlier_one() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    let x = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            x.borrow_mut().push("x");
            Ok(())
        },
        100,
    );
    let y = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            y.borrow_mut().push("y");
            Ok(())
        },
        10,
    );

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["y", "x"]);
    assert_eq!(scheduler.now(), 100);
}

#[test]
fn test_microtasks_from_macrotask_run_before_next_macrotask() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    let first = log.clone();
    scheduler.enqueue_timer(
        move |s| {
            first.borrow_mut().push("timer-1");
            let m = first.clone();
            s.enqueue_microtask(move |_| {
                m.borrow_mut().push("micro-from-timer");
                Ok(())
            });
            Ok(())
        },
        0,
    );

    let second = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            second.borrow_mut().push("timer-2");
            Ok(())
        },
        0,
    );

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["timer-1", "micro-from-timer", "timer-2"]);
}

#[test]
fn test_immediates_run_in_fifo_order() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    for label in ["a", "b", "c"] {
        let l = log.clone();
        scheduler.enqueue_immediate(move |_| {
            l.borrow_mut().push(label);
            Ok(())
        });
    }

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["a", "b", "c"]);
}

#[test]
fn test_due_timer_precedes_immediate_by_default() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    let i = log.clone();
    scheduler.enqueue_immediate(move |_| {
        i.borrow_mut().push("immediate");
        Ok(())
    });
    let t = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            t.borrow_mut().push("timer");
            Ok(())
        },
        0,
    );

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["timer", "immediate"]);
}

#[test]
fn test_immediate_precedes_future_timer_by_default() {
    let mut scheduler = Scheduler::new();
    let log = recorder();

    let t = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            t.borrow_mut().push("timer");
            Ok(())
        },
        10,
    );
    let i = log.clone();
    scheduler.enqueue_immediate(move |_| {
        i.borrow_mut().push("immediate");
        Ok(())
    });

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["immediate", "timer"]);
}

#[test]
fn test_before_timers_policy_runs_immediate_first() {
    let mut scheduler = Scheduler::with_config(SchedulerConfig {
        immediate_policy: ImmediatePolicy::BeforeTimers,
    });
    let log = recorder();

    let t = log.clone();
    scheduler.enqueue_timer(
        move |_| {
            t.borrow_mut().push("timer");
            Ok(())
        },
        0,
    );
    let i = log.clone();
    scheduler.enqueue_immediate(move |_| {
        i.borrow_mut().push("immediate");
        Ok(())
    });

    scheduler.run_until_idle().expect("driver not re-entered");
    assert_eq!(*log.borrow(), ["immediate", "timer"]);
}
