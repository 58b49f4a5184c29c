//! LRU-K frame replacement.
//!
//! Tracks the last K access timestamps per frame on a logical clock and
//! evicts the frame with the largest backward K-distance
//! (`now - k_th_most_recent_access`). Frames with fewer than K accesses
//! have infinite distance and are evicted first, FIFO by their earliest
//! access. All ties break toward the lower frame ID.
//!
//! Compared to plain LRU this resists sequential flooding: one big scan
//! cannot push out frames with an established reuse history.

use std::collections::{HashMap, HashSet, VecDeque};

use super::FrameId;

/// Victim selector for the buffer pool.
///
/// Not internally synchronized; the buffer pool's latch guards it.
#[derive(Debug)]
pub struct LruKReplacer {
    /// K value: number of accesses considered per frame.
    k: usize,
    /// Logical clock, bumped on every recorded access.
    current_timestamp: u64,
    /// Last K access timestamps per frame, oldest first.
    access_history: HashMap<FrameId, VecDeque<u64>>,
    /// Frames currently eligible for eviction (pin count zero).
    evictable: HashSet<FrameId>,
}

impl LruKReplacer {
    /// Create a replacer considering the last `k` accesses.
    pub fn new(k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            current_timestamp: 0,
            access_history: HashMap::new(),
            evictable: HashSet::new(),
        }
    }

    /// Record an access to a frame.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.current_timestamp += 1;

        let history = self.access_history.entry(frame_id).or_default();
        history.push_back(self.current_timestamp);
        while history.len() > self.k {
            history.pop_front();
        }
    }

    /// Mark a frame evictable or not.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if evictable {
            self.evictable.insert(frame_id);
        } else {
            self.evictable.remove(&frame_id);
        }
    }

    /// Select and remove a victim frame, if any frame is evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<FrameId> = None;
        // (has_infinite_distance, primary ordering value): for infinite
        // candidates the primary value is the first-access time (smaller
        // wins); for finite candidates it is the K-distance (larger wins).
        let mut victim_infinite = false;
        let mut victim_first_access = u64::MAX;
        let mut victim_distance = 0u64;

        for &frame_id in &self.evictable {
            let history = self.access_history.get(&frame_id);
            let (infinite, first_access, distance) = match history {
                Some(h) if h.len() >= self.k => {
                    (false, 0, self.current_timestamp - h.front().copied().unwrap())
                }
                Some(h) => (true, h.front().copied().unwrap_or(0), 0),
                None => (true, 0, 0),
            };

            let better = match (infinite, victim_infinite) {
                (true, false) => true,
                (false, true) => false,
                (true, true) => (first_access, frame_id) < (victim_first_access, victim.unwrap()),
                (false, false) => match distance.cmp(&victim_distance) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => {
                        victim.map(|v| frame_id < v).unwrap_or(true)
                    }
                    std::cmp::Ordering::Less => false,
                },
            };

            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_infinite = infinite;
                victim_first_access = first_access;
                victim_distance = distance;
            }
        }

        let frame_id = victim?;
        self.evictable.remove(&frame_id);
        self.access_history.remove(&frame_id);
        Some(frame_id)
    }

    /// Drop all state for a frame.
    pub fn remove(&mut self, frame_id: FrameId) {
        self.evictable.remove(&frame_id);
        self.access_history.remove(&frame_id);
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }

    /// The K value.
    pub fn k(&self) -> usize {
        self.k
    }
}
