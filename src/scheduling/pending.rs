//! Time-keyed table of pending subscriptions.
//!
//! The table keeps two generations, each a `DashMap` from absolute target time to the bucket of
//! subscriptions due at that time. One generation is live and takes inserts; the other is
//! retired and empty. `take_snapshot_and_clear` swaps the live index to the empty generation,
//! seals the old one, waits out any insert that was already inside it, and drains it. Inserts
//! never wait on a drain: an insert that finds its generation sealed simply retries against the
//! new live one. Every insert therefore lands in exactly one of the returned snapshot or the
//! fresh table.
use std::hint::spin_loop;
use std::sync::atomic::Ordering::{Acquire, Relaxed, SeqCst};
use std::sync::atomic::{AtomicBool, AtomicUsize};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::subscription::Subscription;

#[derive(Debug)]
struct Generation {
    buckets: DashMap<u64, Vec<Subscription>>,
    writers: AtomicUsize, // inserts currently inside this generation
    sealed: AtomicBool,
}

impl Generation {
    fn new(sealed: bool) -> Self {
        Self {
            buckets: DashMap::new(),
            writers: AtomicUsize::new(0),
            sealed: AtomicBool::new(sealed),
        }
    }
}

#[derive(Debug)]
pub struct PendingTable {
    generations: [Generation; 2],
    live: AtomicUsize,
    pending: AtomicUsize, // upper bound on subscriptions in the table, never below the true count
    drain: Mutex<()>,
}

impl Default for PendingTable {
    fn default() -> Self {
        PendingTable::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            generations: array_init::array_init(|i| Generation::new(i != 0)),
            live: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            drain: Mutex::new(()),
        }
    }

    /// Add `subscription` to the bucket for `target_time`.
    /// Returns `true` if the table was empty beforehand.
    pub fn insert(&self, target_time: u64, subscription: Subscription) -> bool {
        self.insert_bucket(target_time, vec![subscription])
    }

    /// Add a whole bucket at once, appending to any bucket already present for `target_time`.
    /// Returns `true` if the table was empty beforehand.
    pub fn insert_bucket(&self, target_time: u64, subscriptions: Vec<Subscription>) -> bool {
        if subscriptions.is_empty() {
            return false;
        }
        // counted before the write lands so a concurrent drain can never subtract more than was added
        let was_empty = self.pending.fetch_add(subscriptions.len(), SeqCst) == 0;
        loop {
            let generation = &self.generations[self.live.load(SeqCst)];
            generation.writers.fetch_add(1, SeqCst);
            if generation.sealed.load(SeqCst) {
                generation.writers.fetch_sub(1, SeqCst);
                spin_loop();
                continue;
            }
            generation
                .buckets
                .entry(target_time)
                .or_default()
                .extend(subscriptions);
            generation.writers.fetch_sub(1, SeqCst);
            return was_empty;
        }
    }

    /// Atomically replace the table with an empty one and return what it held.
    pub fn take_snapshot_and_clear(&self) -> Snapshot {
        let _drain = self.drain.lock();
        let observed = self.live.load(SeqCst);
        let fresh = observed ^ 1;
        self.generations[fresh].sealed.store(false, SeqCst);
        while self
            .live
            .compare_exchange_weak(observed, fresh, SeqCst, Relaxed)
            .is_err()
        {
            spin_loop();
        }

        let retired = &self.generations[observed];
        retired.sealed.store(true, SeqCst);
        while retired.writers.load(SeqCst) != 0 {
            spin_loop();
        }

        let mut buckets = Vec::with_capacity(retired.buckets.len());
        retired.buckets.retain(|&time, subs| {
            buckets.push((time, std::mem::take(subs)));
            false
        });
        let snapshot = Snapshot::from_buckets(buckets);
        self.pending.fetch_sub(snapshot.len(), SeqCst);
        snapshot
    }

    /// Cheap emptiness check. May briefly report non-empty while an insert is in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.load(Acquire) == 0
    }

    /// Approximate number of subscriptions in the table.
    pub fn len(&self) -> usize {
        self.pending.load(Acquire)
    }
}

/// Contents of the table at the instant it was taken, owned exclusively by the taker.
#[derive(Debug, Default)]
pub struct Snapshot {
    buckets: Vec<(u64, Vec<Subscription>)>,
    len: usize,
}

impl Snapshot {
    fn from_buckets(buckets: Vec<(u64, Vec<Subscription>)>) -> Self {
        let len = buckets.iter().map(|(_, subs)| subs.len()).sum();
        Self { buckets, len }
    }

    /// Number of subscriptions across all buckets.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct target times.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Split into buckets due at or before `horizon` and buckets after it.
    pub fn partition(self, horizon: u64) -> (Snapshot, Snapshot) {
        let (due, later): (Vec<_>, Vec<_>) = self
            .buckets
            .into_iter()
            .partition(|(time, _)| *time <= horizon);
        (Snapshot::from_buckets(due), Snapshot::from_buckets(later))
    }
}

impl IntoIterator for Snapshot {
    type Item = (u64, Vec<Subscription>);
    type IntoIter = std::vec::IntoIter<(u64, Vec<Subscription>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.buckets.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::testing::Recorder;
    use crate::scheduling::FnObserver;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    fn sub(target: u64) -> Subscription {
        Subscription::new(target, Box::new(FnObserver(|_| {}))).0
    }

    fn times(snapshot: Snapshot) -> BTreeMap<u64, usize> {
        snapshot
            .into_iter()
            .map(|(time, subs)| (time, subs.len()))
            .collect()
    }

    #[test]
    fn insert_reports_empty_transition() {
        let table = PendingTable::new();
        assert!(table.is_empty());
        assert!(table.insert(5, sub(5)));
        assert!(!table.insert(5, sub(5)));
        assert!(!table.insert(9, sub(9)));
        assert_eq!(table.len(), 3);

        let snapshot = table.take_snapshot_and_clear();
        assert!(table.is_empty());
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.bucket_count(), 2);
        assert_eq!(times(snapshot), BTreeMap::from([(5, 2), (9, 1)]));

        // empty again, so the next insert is a transition
        assert!(table.insert(1, sub(1)));
    }

    #[test]
    fn empty_bucket_insert_is_ignored() {
        let table = PendingTable::new();
        assert!(!table.insert_bucket(3, Vec::new()));
        assert!(table.is_empty());
        assert!(table.take_snapshot_and_clear().is_empty());
    }

    #[test]
    fn repeated_snapshots_alternate_generations() {
        let table = PendingTable::new();
        for round in 0..10u64 {
            table.insert(round, sub(round));
            table.insert(round + 100, sub(round + 100));
            let snapshot = table.take_snapshot_and_clear();
            assert_eq!(
                times(snapshot),
                BTreeMap::from([(round, 1), (round + 100, 1)])
            );
            assert!(table.take_snapshot_and_clear().is_empty());
        }
    }

    #[test]
    fn partition_splits_on_horizon_inclusively() {
        let table = PendingTable::new();
        for t in [1, 5, 10, 11, 50] {
            table.insert(t, sub(t));
        }
        let (due, later) = table.take_snapshot_and_clear().partition(10);
        assert_eq!(times(due), BTreeMap::from([(1, 1), (5, 1), (10, 1)]));
        assert_eq!(times(later), BTreeMap::from([(11, 1), (50, 1)]));
    }

    #[test]
    fn reinserted_bucket_merges_with_new_arrivals() {
        let table = PendingTable::new();
        table.insert(7, sub(7));
        let snapshot = table.take_snapshot_and_clear();
        table.insert(7, sub(7));
        for (time, subs) in snapshot {
            table.insert_bucket(time, subs);
        }
        assert_eq!(times(table.take_snapshot_and_clear()), BTreeMap::from([(7, 2)]));
    }

    #[test]
    fn concurrent_inserts_survive_concurrent_drains() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 2_000;

        let table = Arc::new(PendingTable::new());
        let recorder = Arc::new(Recorder::default());
        let writers: Vec<_> = (0..THREADS)
            .map(|t| {
                let table = Arc::clone(&table);
                let recorder = Arc::clone(&recorder);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let target = t * PER_THREAD + i;
                        let (s, _) = Subscription::new(target, Box::new(Arc::clone(&recorder)));
                        table.insert(target, s);
                    }
                })
            })
            .collect();

        let mut seen = BTreeMap::new();
        while writers.iter().any(|w| !w.is_finished()) {
            for (time, subs) in table.take_snapshot_and_clear() {
                *seen.entry(time).or_insert(0usize) += subs.len();
            }
        }
        for w in writers {
            w.join().unwrap();
        }
        for (time, subs) in table.take_snapshot_and_clear() {
            *seen.entry(time).or_insert(0usize) += subs.len();
        }

        assert_eq!(seen.len() as u64, THREADS * PER_THREAD);
        assert!(seen.values().all(|&n| n == 1), "an insert was duplicated");
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn snapshot_holds_exactly_what_was_inserted(targets in proptest::collection::vec(0u64..64, 0..200)) {
            let table = PendingTable::new();
            let mut expected = BTreeMap::new();
            for &t in &targets {
                table.insert(t, sub(t));
                *expected.entry(t).or_insert(0usize) += 1;
            }
            prop_assert_eq!(table.len(), targets.len());
            let snapshot = table.take_snapshot_and_clear();
            prop_assert_eq!(snapshot.len(), targets.len());
            prop_assert_eq!(times(snapshot), expected);
            prop_assert!(table.is_empty());
        }

        #[test]
        fn partition_loses_nothing(targets in proptest::collection::vec(0u64..1_000, 0..100), horizon in 0u64..1_000) {
            let table = PendingTable::new();
            for &t in &targets {
                table.insert(t, sub(t));
            }
            let (due, later) = table.take_snapshot_and_clear().partition(horizon);
            prop_assert_eq!(due.len() + later.len(), targets.len());
            prop_assert!(due.into_iter().all(|(t, _)| t <= horizon));
            prop_assert!(later.into_iter().all(|(t, _)| t > horizon));
        }
    }
}
