//! Bounded priority dispatch queue
//!
//! Scored candidates wait here for a worker. Higher score pops first; equal
//! scores pop in first-seen order so older high scorers are not starved.
//!
//! When the queue is full the feed is never blocked: the lowest-priority
//! entry is evicted if the newcomer outranks it, otherwise the newcomer is
//! dropped.
//!
//! Each address is in at most one of three places: queued, in evaluation, or
//! in evaluation with one parked replacement. A newer snapshot for a queued
//! address replaces it in place; for an address in evaluation it is parked
//! and only released to the queue when the running evaluation completes.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use crate::filter::types::ScoredCandidate;

/// What happened to a pushed candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Added to the queue
    Queued,
    /// Replaced the queued snapshot of the same address
    Replaced,
    /// Address is in evaluation; held until it completes
    Parked,
    /// Added after evicting the lowest-priority entry
    Evicted(String),
    /// Queue full and the candidate ranks below everything queued
    Rejected,
    /// Queue no longer accepts work
    Closed,
}

/// Ordering key: score descending, then first seen, then arrival
#[derive(Debug, Clone, Copy)]
struct QueueKey {
    score: f64,
    first_seen_at: DateTime<Utc>,
    seq: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.first_seen_at.cmp(&other.first_seen_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueKey {}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub queued: usize,
    pub in_flight: usize,
    pub parked: usize,
    pub replaced: u64,
    pub evicted: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct QueueState {
    entries: BTreeMap<QueueKey, ScoredCandidate>,
    keys: HashMap<String, QueueKey>,
    in_flight: HashSet<String>,
    parked: HashMap<String, ScoredCandidate>,
    seq: u64,
    closed: bool,
    replaced: u64,
    evicted: u64,
    rejected: u64,
}

impl QueueState {
    fn key_for(&mut self, scored: &ScoredCandidate) -> QueueKey {
        self.seq += 1;
        QueueKey {
            score: scored.score.score,
            first_seen_at: scored.candidate.first_seen_at,
            seq: self.seq,
        }
    }

    fn insert(&mut self, scored: ScoredCandidate, capacity: usize) -> PushOutcome {
        let address = scored.address().to_string();

        if let Some(old) = self.keys.remove(&address) {
            self.entries.remove(&old);
            let key = self.key_for(&scored);
            self.entries.insert(key, scored);
            self.keys.insert(address, key);
            self.replaced += 1;
            return PushOutcome::Replaced;
        }

        let key = self.key_for(&scored);
        let mut outcome = PushOutcome::Queued;

        if self.entries.len() >= capacity {
            let lowest = match self.entries.last_key_value() {
                Some((lowest, _)) => *lowest,
                None => return PushOutcome::Rejected,
            };
            if key >= lowest {
                self.rejected += 1;
                return PushOutcome::Rejected;
            }
            if let Some(evicted) = self.entries.remove(&lowest) {
                self.keys.remove(evicted.address());
                self.evicted += 1;
                outcome = PushOutcome::Evicted(evicted.address().to_string());
            }
        }

        self.entries.insert(key, scored);
        self.keys.insert(address, key);
        outcome
    }
}

/// Bounded priority queue with per-address de-duplication
pub struct DispatchQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Offer a scored candidate; never waits
    pub fn push(&self, scored: ScoredCandidate) -> PushOutcome {
        let mut state = self.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        let address = scored.address().to_string();
        if state.in_flight.contains(&address) {
            state.parked.insert(address, scored);
            return PushOutcome::Parked;
        }

        let outcome = state.insert(scored, self.capacity);
        drop(state);

        match &outcome {
            PushOutcome::Queued | PushOutcome::Evicted(_) => self.notify.notify_one(),
            PushOutcome::Rejected => debug!(%address, "Queue full, candidate dropped"),
            _ => {}
        }
        outcome
    }

    /// Take the highest-priority candidate, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed. The address stays marked in
    /// evaluation until the returned [`Dispatched`] is dropped.
    pub async fn pop(self: &Arc<Self>) -> Option<Dispatched> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some((_, scored)) = state.entries.pop_first() {
                    let address = scored.address().to_string();
                    state.keys.remove(&address);
                    state.in_flight.insert(address);
                    return Some(Dispatched {
                        queue: Arc::clone(self),
                        scored,
                    });
                }
            }

            notified.await;
        }
    }

    fn complete(&self, address: &str) {
        let mut state = self.lock();
        state.in_flight.remove(address);
        let Some(parked) = state.parked.remove(address) else {
            return;
        };
        if state.closed {
            return;
        }

        let outcome = state.insert(parked, self.capacity);
        drop(state);
        if matches!(outcome, PushOutcome::Queued | PushOutcome::Evicted(_)) {
            self.notify.notify_one();
        }
    }

    /// Stop accepting work and wake every waiting worker. Returns the number
    /// of queued candidates discarded.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.entries.len() + state.parked.len();
        state.entries.clear();
        state.keys.clear();
        state.parked.clear();
        drop(state);

        self.notify.notify_waiters();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether an evaluation for `address` is running
    pub fn is_in_flight(&self, address: &str) -> bool {
        self.lock().in_flight.contains(address)
    }

    pub fn stats(&self) -> DispatchStats {
        let state = self.lock();
        DispatchStats {
            queued: state.entries.len(),
            in_flight: state.in_flight.len(),
            parked: state.parked.len(),
            replaced: state.replaced,
            evicted: state.evicted,
            rejected: state.rejected,
        }
    }
}

/// A candidate taken by a worker. Dropping it completes the evaluation and
/// releases any parked snapshot of the same address.
pub struct Dispatched {
    queue: Arc<DispatchQueue>,
    scored: ScoredCandidate,
}

impl Dispatched {
    pub fn scored(&self) -> &ScoredCandidate {
        &self.scored
    }

    pub fn address(&self) -> &str {
        self.scored.address()
    }
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatched")
            .field("address", &self.address())
            .field("score", &self.scored.score.score)
            .finish()
    }
}

impl Drop for Dispatched {
    fn drop(&mut self) {
        self.queue.complete(self.scored.address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::ScoreResult;
    use crate::test_support::candidate;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn scored(address: &str, score: f64, first_seen_at: DateTime<Utc>) -> ScoredCandidate {
        let mut c = candidate(address);
        c.first_seen_at = first_seen_at;
        ScoredCandidate {
            candidate: c,
            score: ScoreResult {
                address: address.to_string(),
                score,
                passed_gates: true,
                reasons: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_pop_order_score_then_first_seen() {
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(1);
        let t3 = t1 + ChronoDuration::seconds(2);
        let queue = Arc::new(DispatchQueue::new(10));

        queue.push(scored("A", 90.0, t2));
        queue.push(scored("B", 90.0, t1));
        queue.push(scored("C", 70.0, t3));

        let mut order = Vec::new();
        for _ in 0..3 {
            let d = queue.pop().await.unwrap();
            order.push((d.scored().score.score, d.scored().candidate.first_seen_at));
        }
        assert_eq!(order, vec![(90.0, t1), (90.0, t2), (70.0, t3)]);
    }

    #[test]
    fn test_waiting_pop_woken_by_push() {
        let queue = Arc::new(DispatchQueue::new(4));
        let mut pop = tokio_test::task::spawn(queue.pop());
        tokio_test::assert_pending!(pop.poll());

        queue.push(scored("A", 50.0, Utc::now()));
        assert!(pop.is_woken());
        let dispatched = tokio_test::assert_ready!(pop.poll()).unwrap();
        assert_eq!(dispatched.address(), "A");
        assert_eq!(
            format!("{:?}", dispatched),
            r#"Dispatched { address: "A", score: 50.0 }"#
        );
    }

    #[tokio::test]
    async fn test_full_queue_evicts_lowest() {
        let now = Utc::now();
        let queue = Arc::new(DispatchQueue::new(2));

        assert_eq!(queue.push(scored("A", 50.0, now)), PushOutcome::Queued);
        assert_eq!(queue.push(scored("B", 60.0, now)), PushOutcome::Queued);
        assert_eq!(
            queue.push(scored("C", 70.0, now)),
            PushOutcome::Evicted("A".into())
        );
        assert_eq!(queue.push(scored("D", 40.0, now)), PushOutcome::Rejected);

        let stats = queue.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(queue.pop().await.unwrap().address(), "C");
    }

    #[tokio::test]
    async fn test_newer_snapshot_replaces_queued() {
        let now = Utc::now();
        let queue = Arc::new(DispatchQueue::new(10));

        queue.push(scored("A", 60.0, now));
        assert_eq!(queue.push(scored("A", 80.0, now)), PushOutcome::Replaced);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().await.unwrap().scored().score.score, 80.0);
    }

    #[tokio::test]
    async fn test_snapshot_parked_while_in_flight() {
        let now = Utc::now();
        let queue = Arc::new(DispatchQueue::new(10));

        queue.push(scored("A", 60.0, now));
        let running = queue.pop().await.unwrap();
        assert!(queue.is_in_flight("A"));

        assert_eq!(queue.push(scored("A", 75.0, now)), PushOutcome::Parked);
        assert_eq!(queue.push(scored("A", 85.0, now)), PushOutcome::Parked);
        assert!(queue.is_empty());
        assert!(tokio::time::timeout(Duration::from_millis(20), queue.pop())
            .await
            .is_err());

        drop(running);
        let next = queue.pop().await.unwrap();
        assert_eq!(next.scored().score.score, 85.0);
        assert_eq!(queue.stats().parked, 0);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_workers() {
        let queue = Arc::new(DispatchQueue::new(10));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.is_none() })
        };
        tokio::task::yield_now().await;

        queue.push(scored("A", 50.0, Utc::now()));
        // The waiter may take A first; either way it must return
        queue.close();
        let _ = waiter.await.unwrap();

        assert!(queue.pop().await.is_none());
        assert_eq!(queue.push(scored("B", 90.0, Utc::now())), PushOutcome::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_evaluation_per_address() {
        let queue = Arc::new(DispatchQueue::new(16));
        let active: Arc<HashMap<String, AtomicUsize>> = Arc::new(
            ["A", "B", "C"]
                .iter()
                .map(|a| (a.to_string(), AtomicUsize::new(0)))
                .collect(),
        );
        let violations = Arc::new(AtomicUsize::new(0));
        let evaluated = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..6 {
            let queue = queue.clone();
            let active = active.clone();
            let violations = violations.clone();
            let evaluated = evaluated.clone();
            workers.push(tokio::spawn(async move {
                while let Some(d) = queue.pop().await {
                    let counter = &active[d.address()];
                    if counter.fetch_add(1, AtomicOrdering::SeqCst) > 0 {
                        violations.fetch_add(1, AtomicOrdering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    counter.fetch_sub(1, AtomicOrdering::SeqCst);
                    evaluated.fetch_add(1, AtomicOrdering::SeqCst);
                }
            }));
        }

        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    let address = ["A", "B", "C"][(i + p) % 3];
                    queue.push(scored(address, (i % 10) as f64 * 10.0, Utc::now()));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }

        // Let parked snapshots drain
        for _ in 0..200 {
            let stats = queue.stats();
            if stats.queued == 0 && stats.in_flight == 0 && stats.parked == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        queue.close();
        for w in workers {
            w.await.unwrap();
        }

        assert_eq!(violations.load(AtomicOrdering::SeqCst), 0);
        assert!(evaluated.load(AtomicOrdering::SeqCst) >= 3);
    }
}
