use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eni_cni::config::KeyLockConfig;
use eni_cni::keylock::KeyLock;

/// Slot is the first byte of the key, so collisions are easy to arrange
fn first_byte(key: &[u8], len: usize) -> usize {
    key.first().copied().unwrap_or(0) as usize % len
}

fn small_lock() -> KeyLock {
    KeyLock::new(16, first_byte, Duration::from_millis(1))
}

#[test]
fn distinct_slots_do_not_block() {
    let lock = small_lock();
    assert_ne!(lock.lock_index(b"a"), lock.lock_index(b"b"));

    lock.lock(b"a");
    assert!(lock.raw_try_lock(lock.lock_index(b"b")));
    lock.unlock(b"b");
    lock.unlock(b"a");
}

#[test]
fn shared_slot_blocks_until_unlock() {
    let lock = Arc::new(small_lock());
    // Different keys, same first byte
    assert_eq!(lock.lock_index(b"pod-a"), lock.lock_index(b"pod-b"));

    lock.lock(b"pod-a");
    let acquired = Arc::new(AtomicBool::new(false));

    let waiter = {
        let lock = lock.clone();
        let acquired = acquired.clone();
        thread::spawn(move || {
            lock.lock(b"pod-b");
            acquired.store(true, Ordering::SeqCst);
            lock.unlock(b"pod-b");
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::SeqCst));

    lock.unlock(b"pod-a");
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
#[should_panic(expected = "unlock of unlocked key lock")]
fn unlock_without_lock_panics() {
    small_lock().unlock(b"never-locked");
}

#[test]
#[should_panic(expected = "unlock of unlocked key lock")]
fn double_unlock_panics() {
    let lock = small_lock();
    lock.raw_lock(3);
    lock.raw_unlock(3);
    lock.raw_unlock(3);
}

#[test]
fn guard_releases_on_drop() {
    let lock = small_lock();
    let index = {
        let guard = lock.guard(b"x");
        assert!(!lock.raw_try_lock(guard.index()));
        guard.index()
    };
    assert!(lock.raw_try_lock(index));
    lock.raw_unlock(index);
}

#[test]
fn default_hash_is_stable_and_in_range() {
    let lock = KeyLock::with_config(KeyLockConfig {
        slots: KeyLockConfig::SLOTS_32K,
        retry_interval: Duration::from_millis(1),
    });
    assert_eq!(lock.len(), KeyLockConfig::SLOTS_32K);

    for key in [&b"default.nginx"[..], &b""[..], &b"kube-system.coredns"[..]] {
        let index = lock.lock_index(key);
        assert!(index < lock.len());
        assert_eq!(index, lock.lock_index(key));
    }
}

#[test]
fn many_threads_serialize_on_one_key() {
    let lock = Arc::new(small_lock());
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let inside = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (lock, counter, inside) = (lock.clone(), counter.clone(), inside.clone());
            thread::spawn(move || {
                for _ in 0..20 {
                    let _guard = lock.guard(b"shared");
                    assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                    counter.fetch_add(1, Ordering::SeqCst);
                    inside.store(false, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 160);
}
