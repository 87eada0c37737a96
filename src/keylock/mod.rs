//! Hash-sharded spin lock keyed by arbitrary bytes.
//!
//! Keys map onto a fixed table of flags, so memory stays bounded no matter how
//! many distinct keys pass through. Two keys landing on the same slot simply
//! serialize against each other; two different slots are never conflated.
//!
//! Acquisition polls at a fixed interval with no timeout and no deadlock
//! detection. Callers must not hold a slot across anything that waits on the
//! same slot being released.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::config::KeyLockConfig;

/// Maps a key onto a slot in `0..len`
pub type KeyGen = fn(key: &[u8], len: usize) -> usize;

/// Default key mapping: SipHash with fixed keys, reduced modulo the table size
pub fn sip_mod(key: &[u8], len: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(key);
    (hasher.finish() % len as u64) as usize
}

pub struct KeyLock {
    locks: Box<[AtomicU32]>,
    key_gen: KeyGen,
    retry_interval: Duration,
}

impl Default for KeyLock {
    fn default() -> Self {
        Self::with_config(KeyLockConfig::default())
    }
}

impl KeyLock {
    pub fn new(slots: usize, key_gen: KeyGen, retry_interval: Duration) -> Self {
        let slots = slots.max(1);
        Self {
            locks: (0..slots).map(|_| AtomicU32::new(0)).collect(),
            key_gen,
            retry_interval,
        }
    }

    pub fn with_config(config: KeyLockConfig) -> Self {
        Self::new(config.slots, sip_mod, config.retry_interval)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Slot `key` maps to; feed it to `raw_lock`/`raw_unlock` to skip rehashing
    pub fn lock_index(&self, key: &[u8]) -> usize {
        (self.key_gen)(key, self.locks.len()) % self.locks.len()
    }

    pub fn lock(&self, key: &[u8]) {
        self.raw_lock(self.lock_index(key));
    }

    pub fn unlock(&self, key: &[u8]) {
        self.raw_unlock(self.lock_index(key));
    }

    /// Try once to take `index`; true on success
    pub fn raw_try_lock(&self, index: usize) -> bool {
        self.locks[index]
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn raw_lock(&self, index: usize) {
        while !self.raw_try_lock(index) {
            trace!(index, "key lock busy");
            thread::sleep(self.retry_interval);
        }
    }

    /// Release `index`.
    ///
    /// # Panics
    ///
    /// Panics if the slot is not held. That means the caller broke the
    /// lock/unlock pairing, and continuing would leave exclusion unsound.
    pub fn raw_unlock(&self, index: usize) {
        if self.locks[index]
            .compare_exchange(1, 0, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("unlock of unlocked key lock (index {})", index);
        }
    }

    /// Lock `key` and release it when the guard drops
    pub fn guard(&self, key: &[u8]) -> KeyLockGuard<'_> {
        let index = self.lock_index(key);
        self.raw_lock(index);
        KeyLockGuard { lock: self, index }
    }
}

/// Holds one slot of a [`KeyLock`] until dropped
pub struct KeyLockGuard<'a> {
    lock: &'a KeyLock,
    index: usize,
}

impl KeyLockGuard<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.raw_unlock(self.index);
    }
}
