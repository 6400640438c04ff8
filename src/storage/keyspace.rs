//! Keyspace with per-key expiration
//!
//! The keyspace holds all live string values plus a parallel expiration
//! map from key to absolute deadline. The expiration map is strictly a
//! subset of the keyspace: a key with a deadline always has a value, never
//! the other way round.
//!
//! Expired keys are reclaimed two ways:
//!
//! 1. **Lazy**: every read path checks the deadline first and deletes the
//!    key (from both maps) before answering, so an expired key is never
//!    observable.
//! 2. **Sampling sweep**: a periodic timer calls [`Keyspace::sweep_expired`],
//!    which samples a bounded number of keys from the expiration map per
//!    round and keeps going only while a significant share of the sample
//!    turns out to be expired. This reclaims keys that are never touched
//!    again without ever scanning the whole map.
//!
//! All operations take `now` explicitly; the caller owns the monotonic
//! clock. That keeps expiration behavior deterministic under test.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Instant;

/// Keys sampled from the expiration map per sweep round.
pub const SWEEP_SAMPLE: usize = 20;

/// Upper bound on sweep rounds per timer tick.
pub const SWEEP_MAX_ROUNDS: usize = 16;

/// A round that expires more than this share of its sample triggers
/// another round.
const SWEEP_CONTINUE_RATIO: f64 = 0.25;

/// The global map of keys to stored values, with expiration tracking and
/// hit/miss accounting.
#[derive(Debug, Default)]
pub struct Keyspace {
    data: HashMap<Bytes, Bytes>,
    expires: HashMap<Bytes, Instant>,
    hits: u64,
    misses: u64,
}

impl Keyspace {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a value. Any prior expiration on the key is cleared; the
    /// last writer wins.
    pub fn set(&mut self, key: Bytes, value: Bytes) {
        self.expires.remove(&key);
        self.data.insert(key, value);
    }

    /// Returns the value for `key` after the lazy expiration check,
    /// updating the hit/miss counters.
    pub fn get(&mut self, key: &[u8], now: Instant) -> Option<Bytes> {
        self.expire_if_due(key, now);
        match self.data.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Removes `key` from both maps. Returns `true` if a live key was
    /// removed.
    pub fn del(&mut self, key: &[u8], now: Instant) -> bool {
        if self.expire_if_due(key, now) {
            return false;
        }
        self.expires.remove(key);
        self.data.remove(key).is_some()
    }

    /// Returns whether `key` is live.
    pub fn exists(&mut self, key: &[u8], now: Instant) -> bool {
        self.expire_if_due(key, now);
        self.data.contains_key(key)
    }

    /// Installs (or overwrites) an absolute expiration deadline.
    ///
    /// Returns `1` if the key exists, `0` otherwise.
    pub fn expire_at(&mut self, key: &[u8], deadline: Instant, now: Instant) -> i64 {
        self.expire_if_due(key, now);
        match self.data.get_key_value(key) {
            Some((stored_key, _)) => {
                let stored_key = stored_key.clone();
                self.expires.insert(stored_key, deadline);
                1
            }
            None => 0,
        }
    }

    /// Removes the expiration from a key.
    ///
    /// Returns `1` if an expiration was present, `0` otherwise.
    pub fn persist(&mut self, key: &[u8], now: Instant) -> i64 {
        self.expire_if_due(key, now);
        i64::from(self.expires.remove(key).is_some())
    }

    /// Remaining time-to-live in milliseconds: `-2` if the key is absent,
    /// `-1` if it has no expiration.
    pub fn pttl(&mut self, key: &[u8], now: Instant) -> i64 {
        self.expire_if_due(key, now);
        if !self.data.contains_key(key) {
            return -2;
        }
        match self.expires.get(key) {
            None => -1,
            Some(deadline) => deadline.saturating_duration_since(now).as_millis() as i64,
        }
    }

    /// Remaining time-to-live in seconds (rounded up), with the same
    /// `-2`/`-1` sentinels as [`Keyspace::pttl`].
    pub fn ttl(&mut self, key: &[u8], now: Instant) -> i64 {
        match self.pttl(key, now) {
            ms if ms < 0 => ms,
            ms => (ms + 999) / 1000,
        }
    }

    /// Number of keys currently stored (not counting keys already past
    /// their deadline but not yet reclaimed).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Keyspace hit counter (reads that found a live key).
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Keyspace miss counter (reads that found nothing).
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// All live keys matching a glob pattern.
    ///
    /// Keys past their deadline are filtered out but not reclaimed here;
    /// the sweep and the per-key read paths handle deletion.
    pub fn keys(&self, pattern: &[u8], now: Instant) -> Vec<Bytes> {
        self.data
            .keys()
            .filter(|key| match self.expires.get(*key) {
                Some(deadline) => now < *deadline,
                None => true,
            })
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect()
    }

    /// Removes every key and expiration record.
    pub fn flush(&mut self) {
        self.data.clear();
        self.expires.clear();
    }

    /// One sampling sweep pass over the expiration map.
    ///
    /// Runs up to [`SWEEP_MAX_ROUNDS`] rounds. Each round samples up to
    /// [`SWEEP_SAMPLE`] keys starting at a random offset, deletes the
    /// expired ones, and schedules another round only while more than a
    /// quarter of the sample was expired.
    ///
    /// Returns the number of keys reclaimed.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let mut reclaimed = 0;

        for _ in 0..SWEEP_MAX_ROUNDS {
            if self.expires.is_empty() {
                break;
            }
            let len = self.expires.len();
            let offset = fastrand::usize(..len);
            let sampled: Vec<Bytes> = self
                .expires
                .keys()
                .skip(offset)
                .chain(self.expires.keys())
                .take(SWEEP_SAMPLE.min(len))
                .cloned()
                .collect();

            let mut expired = 0;
            for key in &sampled {
                if self.expires.get(key).is_some_and(|deadline| now >= *deadline) {
                    self.expires.remove(key);
                    self.data.remove(key);
                    expired += 1;
                }
            }
            reclaimed += expired;

            if (expired as f64) <= (sampled.len() as f64) * SWEEP_CONTINUE_RATIO {
                break;
            }
        }

        reclaimed
    }

    /// Deletes `key` from both maps if its deadline has passed.
    ///
    /// Returns `true` when the key was reclaimed.
    fn expire_if_due(&mut self, key: &[u8], now: Instant) -> bool {
        match self.expires.get(key) {
            Some(deadline) if now >= *deadline => {
                self.expires.remove(key);
                self.data.remove(key);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn expiration_subset_of_keyspace(&self) -> bool {
        self.expires.keys().all(|key| self.data.contains_key(key))
    }
}

/// Byte-wise glob matching for the KEYS command.
///
/// Supports `*` (any run), `?` (any single byte), `[...]` classes with
/// ranges and `^` negation, and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => (0..=text.len()).any(|i| glob_match(&pattern[1..], &text[i..])),
        Some(b'?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some(b'[') => {
            let Some(&c) = text.first() else {
                return false;
            };
            let negate = pattern.get(1) == Some(&b'^');
            let mut i = if negate { 2 } else { 1 };
            let mut matched = false;
            while i < pattern.len() && pattern[i] != b']' {
                if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
                    if pattern[i] <= c && c <= pattern[i + 2] {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if pattern[i] == c {
                        matched = true;
                    }
                    i += 1;
                }
            }
            if i >= pattern.len() {
                // Unterminated class never matches
                return false;
            }
            if negate {
                matched = !matched;
            }
            matched && glob_match(&pattern[i + 1..], &text[1..])
        }
        Some(b'\\') if pattern.len() > 1 => {
            !text.is_empty() && pattern[1] == text[0] && glob_match(&pattern[2..], &text[1..])
        }
        Some(&c) => !text.is_empty() && c == text[0] && glob_match(&pattern[1..], &text[1..]),
    }
}
