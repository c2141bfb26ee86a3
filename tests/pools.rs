mod common;

use common::{wait_for_state, wait_until, TestHarness};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};
use vmthreads::{RuntimeConfig, StopKind, ThreadError, ThreadOptions, ThreadState};

fn small_pools() -> TestHarness {
    TestHarness::with_config(RuntimeConfig::default().with_pool_capacity(8, 8))
}

#[test]
fn test_mutex_pool_exhaustion_and_reuse() {
    let harness = small_pools();
    let rt = &harness.runtime;

    let ids: Vec<_> = (0..8).map(|i| rt.mutex_create(&format!("m{i}")).unwrap()).collect();
    assert_eq!(
        rt.mutex_create("ninth").unwrap_err(),
        ThreadError::Exhausted { capacity: 8 }
    );
    assert_eq!(rt.stats().mutexes_in_use, 8);

    rt.mutex_destroy(ids[3]).unwrap();
    assert!(matches!(
        rt.mutex_trylock(ids[3]).unwrap_err(),
        ThreadError::InvalidArgs(_)
    ));
    let again = rt.mutex_create("again").unwrap();
    assert_eq!(again, ids[3]);
    assert_eq!(rt.mutexes().name_of(again).unwrap(), "again");
    assert_eq!(rt.stats().mutexes_in_use, 8);
}

#[test]
fn test_cond_pool_exhaustion_and_reuse() {
    let harness = small_pools();
    let rt = &harness.runtime;

    let ids: Vec<_> = (0..8).map(|i| rt.cond_create(&format!("c{i}")).unwrap()).collect();
    assert_eq!(
        rt.cond_create("ninth").unwrap_err(),
        ThreadError::Exhausted { capacity: 8 }
    );
    for id in ids {
        rt.cond_destroy(id).unwrap();
    }
    assert_eq!(rt.stats().conds_in_use, 0);
    rt.cond_create("fresh").unwrap();
}

#[test]
fn test_trylock_busy_from_another_thread() {
    let harness = TestHarness::new(StopKind::default());
    let rt = harness.runtime.clone();
    let lock = rt.mutex_create("shared").unwrap();
    rt.mutex_lock(lock).unwrap();

    let outcome = Arc::new(Mutex::new(Vec::new()));
    {
        let (rt2, outcome) = (rt.clone(), outcome.clone());
        rt.spawn(ThreadOptions::named("prober"), move || {
            let mut seen = outcome.lock().unwrap();
            seen.push(rt2.mutex_trylock(lock));
            seen.push(rt2.mutex_unlock(lock));
        })
        .unwrap();
    }
    harness.finish();

    let seen = outcome.lock().unwrap();
    assert_eq!(seen[0], Err(ThreadError::Busy));
    assert_eq!(seen[1], Err(ThreadError::PermissionDenied));
    assert_eq!(rt.mutex_destroy(lock).unwrap_err(), ThreadError::Busy);

    rt.mutex_unlock(lock).unwrap();
    rt.mutex_trylock(lock).unwrap();
    rt.mutex_unlock(lock).unwrap();
    rt.mutex_destroy(lock).unwrap();
}

#[test]
fn test_lock_waits_for_owner() {
    let harness = TestHarness::new(StopKind::default());
    let rt = harness.runtime.clone();
    let lock = rt.mutex_create("handoff").unwrap();
    rt.mutex_lock(lock).unwrap();

    let acquired = Arc::new(AtomicUsize::new(0));
    let waiter = {
        let (rt2, acquired) = (rt.clone(), acquired.clone());
        rt.spawn(ThreadOptions::named("waiter"), move || {
            rt2.mutex_lock(lock).unwrap();
            acquired.fetch_add(1, Ordering::SeqCst);
            rt2.mutex_unlock(lock).unwrap();
        })
        .unwrap()
    };

    assert!(wait_for_state(&rt, waiter, ThreadState::Blocked));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(acquired.load(Ordering::SeqCst), 0);
    rt.mutex_unlock(lock).unwrap();
    harness.finish();
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    assert_eq!(rt.stats().lock_contention_count, 1);
}

#[test]
fn test_signal_wakes_one_and_broadcast_wakes_rest() {
    let harness = TestHarness::new(StopKind::default());
    let rt = harness.runtime.clone();
    let lock = rt.mutex_create("M").unwrap();
    let cond = rt.cond_create("C").unwrap();

    // Tokens and counts are only touched with `lock` held.
    let tokens = Arc::new(AtomicUsize::new(0));
    let ready = Arc::new(AtomicUsize::new(0));
    let woken = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let (rt2, tokens, ready, woken) = (rt.clone(), tokens.clone(), ready.clone(), woken.clone());
        rt.spawn(ThreadOptions::named(format!("waiter-{i}")), move || {
            rt2.mutex_lock(lock).unwrap();
            ready.fetch_add(1, Ordering::SeqCst);
            while tokens.load(Ordering::SeqCst) == 0 {
                rt2.cond_wait(cond, lock).unwrap();
            }
            tokens.fetch_sub(1, Ordering::SeqCst);
            woken.fetch_add(1, Ordering::SeqCst);
            rt2.mutex_unlock(lock).unwrap();
        })
        .unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || ready.load(Ordering::SeqCst) == 3));
    // Every waiter released the mutex inside cond_wait once we get it.
    rt.mutex_lock(lock).unwrap();
    tokens.store(1, Ordering::SeqCst);
    rt.cond_signal(cond).unwrap();
    rt.mutex_unlock(lock).unwrap();

    assert!(wait_until(Duration::from_secs(5), || woken.load(Ordering::SeqCst) == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(woken.load(Ordering::SeqCst), 1);

    assert_eq!(rt.cond_destroy(cond).unwrap_err(), ThreadError::Busy);

    rt.mutex_lock(lock).unwrap();
    tokens.store(2, Ordering::SeqCst);
    rt.cond_broadcast(cond).unwrap();
    rt.mutex_unlock(lock).unwrap();

    harness.finish();
    assert_eq!(woken.load(Ordering::SeqCst), 3);
    rt.cond_destroy(cond).unwrap();
    rt.mutex_destroy(lock).unwrap();
}

#[test]
fn test_cond_wait_requires_owned_mutex() {
    let harness = TestHarness::new(StopKind::default());
    let rt = &harness.runtime;
    let lock = rt.mutex_create("M").unwrap();
    let cond = rt.cond_create("C").unwrap();
    assert_eq!(
        rt.cond_wait(cond, lock).unwrap_err(),
        ThreadError::PermissionDenied
    );
}
