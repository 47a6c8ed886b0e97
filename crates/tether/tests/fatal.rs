//! Fatal Misuse Tests
//!
//! Dropping an owner while one of its objects is borrowed through a guard
//! aborts the process. Each case re-runs this test binary in a child process
//! with `TETHER_FATAL_CHILD` set, so only the child dies.

mod common;

use std::env;
use std::process::Command;

use common::circle;
use tether::Anchored;

const CHILD_ENV: &str = "TETHER_FATAL_CHILD";

/// Run the named test in a child process and report whether it exited cleanly
fn child_succeeds(test_name: &str) -> bool {
    let exe = env::current_exe().expect("test binary path");
    let status = Command::new(exe)
        .args([test_name, "--exact", "--test-threads=1", "--nocapture"])
        .env(CHILD_ENV, "1")
        .status()
        .expect("spawn child test");
    status.success()
}

fn in_child() -> bool {
    env::var_os(CHILD_ENV).is_some()
}

#[test]
fn child_drop_owner_while_borrowed() {
    if !in_child() {
        return;
    }
    let c = circle(1.0);
    let h = c.weak();
    let guard = h.borrow();
    drop(c);
    // Not reached
    let _ = guard.radius.get();
}

#[test]
fn child_drop_owner_after_guard_released() {
    if !in_child() {
        return;
    }
    let c = circle(1.0);
    let h = c.weak();
    {
        let guard = h.borrow();
        assert_eq!(guard.radius.get(), 1.0);
    }
    drop(c);
    assert!(h.is_null());
}

#[test]
fn test_drop_while_borrowed_aborts() {
    if in_child() {
        return;
    }
    assert!(!child_succeeds("child_drop_owner_while_borrowed"));
}

#[test]
fn test_drop_after_guard_released_is_clean() {
    if in_child() {
        return;
    }
    assert!(child_succeeds("child_drop_owner_after_guard_released"));
}
