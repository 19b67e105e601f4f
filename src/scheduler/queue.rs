// src/scheduler/queue.rs
//! Pending calls ordered by priority band, then submission order.
//!
//! Lower priority value is served first. A call that waits longer than the
//! aging step moves up one band per step, so low-priority work cannot starve.
//! Requeued calls take a sequence number ahead of everything already queued.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Entry<T> {
    pub priority: i32,
    pub seq: i64,
    pub enqueued_at: Instant,
    pub item: T,
}

#[derive(Debug)]
pub struct PendingQueue<T> {
    entries: Vec<Entry<T>>,
    next_seq: i64,
    next_front_seq: i64,
    aging: Option<Duration>,
}

impl<T> PendingQueue<T> {
    pub fn new(aging: Option<Duration>) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
            next_front_seq: -1,
            aging: aging.filter(|d| !d.is_zero()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, item: T, priority: i32, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            priority,
            seq,
            enqueued_at: now,
            item,
        });
    }

    /// Put a call back at the front of its band, keeping its original age.
    pub fn push_front(&mut self, item: T, priority: i32, enqueued_at: Instant) {
        let seq = self.next_front_seq;
        self.next_front_seq -= 1;
        self.entries.push(Entry {
            priority,
            seq,
            enqueued_at,
            item,
        });
    }

    fn effective_priority(&self, e: &Entry<T>, now: Instant) -> i64 {
        let bonus = match self.aging {
            Some(step) => {
                let waited = now.saturating_duration_since(e.enqueued_at);
                (waited.as_millis() / step.as_millis().max(1)) as i64
            }
            None => 0,
        };
        i64::from(e.priority) - bonus
    }

    /// Index of the entry that should run next.
    pub fn head(&self, now: Instant) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| (self.effective_priority(e, now), e.seq))
            .map(|(i, _)| i)
    }

    pub fn get(&self, idx: usize) -> Option<&Entry<T>> {
        self.entries.get(idx)
    }

    pub fn remove(&mut self, idx: usize) -> Entry<T> {
        self.entries.swap_remove(idx)
    }

    /// Remove and return every entry for which `keep` is false.
    pub fn extract_if_not(&mut self, mut keep: impl FnMut(&T) -> bool) -> Vec<Entry<T>> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if keep(&self.entries[i].item) {
                i += 1;
            } else {
                out.push(self.entries.swap_remove(i));
            }
        }
        out
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Entry<T>> + '_ {
        self.entries.drain(..)
    }
}
