//! Global page pool with LRU reclamation.
//!
//! Every page in the process lives in one queue, created up front with a
//! fixed budget. Allocation never grows the pool; a request for a page is
//! served by reclaiming the least recently granted one, splicing it out of
//! its previous owner's chain first. Ordering is by a monotonic sequence
//! number assigned at grant time, kept in a `BTreeMap` so delete-min and
//! reinsert are both O(log n).
//!
//! Lock order: the queue mutex is taken before any series lock. A series
//! asking for a page must therefore not hold its own lock across the call,
//! because serving the request may lock an arbitrary victim series,
//! including the requester itself.

use crate::store::page::Page;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

/// Holder of a chain of pages, notified when the pool reclaims one.
pub trait PageOwner: Send + Sync {
    /// Drop the page in `slot` from the owner's chain. Called with the
    /// queue lock held; the implementation takes the owner's own lock.
    fn relinquish_page(&self, slot: u32);
}

/// Reference to a granted page.
///
/// The handle stays valid until the pool reclaims the slot for another
/// owner; [`PageSlot::is_current`] tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle {
    pub(crate) slot: u32,
    pub(crate) seq: u64,
}

/// One slot of the pool: the page storage plus the sequence number it was
/// last granted under.
#[derive(Debug)]
pub struct PageSlot {
    data: RwLock<Page>,
    seq: AtomicU64,
}

impl PageSlot {
    /// The page storage. Only the current owner may write; readers must
    /// hold their own series lock and check [`PageSlot::is_current`].
    pub fn data(&self) -> &RwLock<Page> {
        &self.data
    }

    /// True while `handle` still refers to this slot's current grant.
    pub fn is_current(&self, handle: PageHandle) -> bool {
        self.seq.load(Ordering::Acquire) == handle.seq
    }
}

struct QueueInner {
    /// Grant order; the smallest key is the next reclamation victim.
    by_seq: BTreeMap<u64, u32>,
    /// Owner back-link per slot, kept consistent with the owners' chains.
    owners: Vec<Option<Weak<dyn PageOwner>>>,
    next_seq: u64,
}

/// The global fixed-budget page pool.
pub struct PageQueue {
    slots: Box<[PageSlot]>,
    inner: Mutex<QueueInner>,
    allocations: AtomicU64,
    evicted_samples: AtomicU64,
}

impl PageQueue {
    /// Build a pool of `page_count` pages of `page_bytes` each. The pool
    /// holds exactly this many pages for the life of the process.
    pub fn new(page_count: usize, page_bytes: usize) -> Self {
        assert!(page_count > 0, "page pool must hold at least one page");
        let slots: Box<[PageSlot]> = (0..page_count)
            .map(|i| PageSlot {
                data: RwLock::new(Page::with_bytes(page_bytes)),
                seq: AtomicU64::new(i as u64),
            })
            .collect();
        let by_seq = (0..page_count).map(|i| (i as u64, i as u32)).collect();
        Self {
            slots,
            inner: Mutex::new(QueueInner {
                by_seq,
                owners: vec![None; page_count],
                next_seq: page_count as u64,
            }),
            allocations: AtomicU64::new(0),
            evicted_samples: AtomicU64::new(0),
        }
    }

    /// Number of pages in the pool, fixed at construction.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pages granted since construction.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Samples lost to reclamation since construction.
    pub fn evicted_samples(&self) -> u64 {
        self.evicted_samples.load(Ordering::Relaxed)
    }

    /// Grant a page to `owner`, reclaiming the least recently granted one.
    ///
    /// The previous owner, if any, is told to drop the page from its chain
    /// before the grant; the new owner is recorded as the back-link and the
    /// returned handle carries the fresh sequence number. The page is
    /// handed over empty: whatever the victim still held is drained here,
    /// under the queue lock, and added to the evicted-sample count exactly
    /// once.
    pub fn get_page(&self, owner: Weak<dyn PageOwner>) -> PageHandle {
        let mut inner = self.inner.lock();
        let (&victim_seq, &slot) = inner
            .by_seq
            .iter()
            .next()
            .expect("page pool ordering is never empty");
        inner.by_seq.remove(&victim_seq);

        if let Some(prev) = inner.owners[slot as usize].take() {
            if let Some(prev) = prev.upgrade() {
                prev.relinquish_page(slot);
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_seq.insert(seq, slot);
        inner.owners[slot as usize] = Some(owner);
        // Publish the new grant before draining the page: an append racing
        // on the old handle either lands before the drain and is counted
        // below, or fails its validity check under the page lock.
        self.slots[slot as usize].seq.store(seq, Ordering::Release);

        let mut page = self.slots[slot as usize].data.write();
        let lost = page.len() as u64;
        if lost > 0 {
            self.evicted_samples.fetch_add(lost, Ordering::Relaxed);
        }
        page.clear();
        drop(page);

        self.allocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(slot, seq, "page granted");
        PageHandle { slot, seq }
    }

    /// Release a page without a replacement owner, used when a series is
    /// dropped. The slot keeps its place in the grant order and empties
    /// immediately.
    pub fn give_up(&self, handle: PageHandle) {
        let mut inner = self.inner.lock();
        let slot = handle.slot as usize;
        if self.slots[slot].seq.load(Ordering::Acquire) != handle.seq {
            // Already reclaimed for someone else.
            return;
        }
        inner.owners[slot] = None;
        self.slots[slot].data.write().clear();
    }

    /// Access a slot by index. Handle validity is the caller's concern.
    pub(crate) fn slot_at(&self, slot: u32) -> &PageSlot {
        &self.slots[slot as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::MetricValue;
    use parking_lot::Mutex as PlainMutex;
    use std::sync::Arc;

    /// Owner that records which slots were spliced away from it.
    #[derive(Default)]
    struct RecordingOwner {
        relinquished: PlainMutex<Vec<u32>>,
    }

    impl PageOwner for RecordingOwner {
        fn relinquish_page(&self, slot: u32) {
            self.relinquished.lock().push(slot);
        }
    }

    fn owner() -> Arc<RecordingOwner> {
        Arc::new(RecordingOwner::default())
    }

    fn weak(o: &Arc<RecordingOwner>) -> Weak<dyn PageOwner> {
        Arc::downgrade(o) as Weak<dyn PageOwner>
    }

    #[test]
    fn test_len_is_fixed_budget() {
        let q = PageQueue::new(4, 128);
        assert_eq!(q.len(), 4);
        let o = owner();
        for _ in 0..10 {
            q.get_page(weak(&o));
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.allocations(), 10);
    }

    #[test]
    fn test_grants_cycle_through_all_slots_before_reuse() {
        let q = PageQueue::new(3, 128);
        let o = owner();
        let first: Vec<u32> = (0..3).map(|_| q.get_page(weak(&o)).slot).collect();
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[test]
    fn test_reclaims_least_recently_granted() {
        let q = PageQueue::new(2, 128);
        let o = owner();
        let a = q.get_page(weak(&o));
        let b = q.get_page(weak(&o));
        // Pool is exhausted; the next grant must recycle the oldest grant.
        let c = q.get_page(weak(&o));
        assert_eq!(c.slot, a.slot);
        assert_ne!(c.seq, a.seq);
        assert!(!q.slot_at(a.slot).is_current(a));
        assert!(q.slot_at(b.slot).is_current(b));
        assert!(q.slot_at(c.slot).is_current(c));
    }

    #[test]
    fn test_previous_owner_is_notified() {
        let q = PageQueue::new(1, 128);
        let first = owner();
        let second = owner();
        let h = q.get_page(weak(&first));
        q.get_page(weak(&second));
        assert_eq!(*first.relinquished.lock(), vec![h.slot]);
        assert!(second.relinquished.lock().is_empty());
    }

    #[test]
    fn test_evicted_samples_counted() {
        let q = PageQueue::new(1, 1024);
        let o = owner();
        let h = q.get_page(weak(&o));
        {
            let slot = q.slot_at(h.slot);
            let mut page = slot.data().write();
            page.make_pairs();
            page.push_pair(1.0, MetricValue::Number(1.0));
            page.push_pair(2.0, MetricValue::Number(2.0));
        }
        assert_eq!(q.evicted_samples(), 0);
        q.get_page(weak(&o));
        assert_eq!(q.evicted_samples(), 2);
    }

    #[test]
    fn test_regrant_counts_lost_samples_once() {
        let q = PageQueue::new(1, 1024);
        let o = owner();
        let h = q.get_page(weak(&o));
        {
            let mut page = q.slot_at(h.slot).data().write();
            page.make_pairs();
            page.push_pair(1.0, MetricValue::Number(1.0));
            page.push_pair(2.0, MetricValue::Number(2.0));
            page.push_pair(3.0, MetricValue::Number(3.0));
        }
        // Two regrants in a row: the content is drained by the first, so
        // the second finds an empty page and the count stays at three even
        // though no grantee ever wrote to the slot in between.
        q.get_page(weak(&o));
        q.get_page(weak(&o));
        assert_eq!(q.evicted_samples(), 3);
    }

    #[test]
    fn test_grant_hands_over_empty_page() {
        let q = PageQueue::new(1, 1024);
        let o = owner();
        let h = q.get_page(weak(&o));
        {
            let mut page = q.slot_at(h.slot).data().write();
            page.make_pairs();
            page.push_pair(1.0, MetricValue::Number(1.0));
        }
        let h = q.get_page(weak(&o));
        assert_eq!(q.slot_at(h.slot).data().read().len(), 0);
    }

    #[test]
    fn test_give_up_clears_slot() {
        let q = PageQueue::new(2, 1024);
        let o = owner();
        let h = q.get_page(weak(&o));
        {
            let mut page = q.slot_at(h.slot).data().write();
            page.make_pairs();
            page.push_pair(1.0, MetricValue::Number(1.0));
        }
        q.give_up(h);
        assert_eq!(q.slot_at(h.slot).data().read().len(), 0);
        // No samples were lost to reclamation, only released.
        let _ = q.get_page(weak(&o));
        let _ = q.get_page(weak(&o));
        assert_eq!(q.evicted_samples(), 0);
    }

    #[test]
    fn test_give_up_on_stale_handle_is_noop() {
        let q = PageQueue::new(1, 1024);
        let o = owner();
        let old = q.get_page(weak(&o));
        let new = q.get_page(weak(&o));
        {
            let mut page = q.slot_at(new.slot).data().write();
            page.make_pairs();
            page.push_pair(1.0, MetricValue::Number(1.0));
        }
        q.give_up(old);
        // The stale release must not clear the new grant's data.
        assert_eq!(q.slot_at(new.slot).data().read().len(), 1);
    }

    #[test]
    fn test_dead_owner_weak_is_tolerated() {
        let q = PageQueue::new(1, 128);
        let o = owner();
        q.get_page(weak(&o));
        drop(o);
        let survivor = owner();
        let h = q.get_page(weak(&survivor));
        assert!(q.slot_at(h.slot).is_current(h));
    }
}
