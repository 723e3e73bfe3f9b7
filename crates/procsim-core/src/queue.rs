//! Per-station waiting queues.
//!
//! A [`WaitingQueue`] only stores clients in arrival order. Counter and
//! statistics bookkeeping happens in `Replication::enqueue` /
//! `Replication::dequeue_at`, which are the only places queues change length
//! during a run, so the reported queue length always equals the live size.

use std::collections::VecDeque;

use crate::id::ClientKey;
use crate::sim::SimTime;

/// A waiting client plus the time it was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub client: ClientKey,
    pub enqueued_at: SimTime,
}

#[derive(Debug, Clone, Default)]
pub struct WaitingQueue {
    entries: VecDeque<QueueEntry>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, client: ClientKey, now: SimTime) {
        self.entries.push_back(QueueEntry {
            client,
            enqueued_at: now,
        });
    }

    pub fn remove(&mut self, index: usize) -> Option<QueueEntry> {
        self.entries.remove(index)
    }

    pub fn get(&self, index: usize) -> Option<&QueueEntry> {
        self.entries.get(index)
    }

    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn position(&self, client: ClientKey) -> Option<usize> {
        self.entries.iter().position(|e| e.client == client)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue time of the longest-waiting client.
    pub fn earliest(&self) -> Option<SimTime> {
        self.entries.iter().map(|e| e.enqueued_at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(n: usize) -> Vec<ClientKey> {
        let mut map: SlotMap<ClientKey, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn fifo_order() {
        let k = keys(3);
        let mut q = WaitingQueue::new();
        for (i, key) in k.iter().enumerate() {
            q.push(*key, i as SimTime);
        }
        assert_eq!(q.front().unwrap().client, k[0]);
        assert_eq!(q.remove(0).unwrap().client, k[0]);
        assert_eq!(q.front().unwrap().client, k[1]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn position_and_out_of_order_removal() {
        let k = keys(3);
        let mut q = WaitingQueue::new();
        for key in &k {
            q.push(*key, 5);
        }
        assert_eq!(q.position(k[2]), Some(2));
        let e = q.remove(1).unwrap();
        assert_eq!(e.client, k[1]);
        assert_eq!(e.enqueued_at, 5);
        assert_eq!(q.position(k[2]), Some(1));
        assert!(q.remove(7).is_none());
    }

    #[test]
    fn earliest_tracks_oldest() {
        let k = keys(2);
        let mut q = WaitingQueue::new();
        assert_eq!(q.earliest(), None);
        q.push(k[0], 40);
        q.push(k[1], 90);
        assert_eq!(q.earliest(), Some(40));
    }
}
