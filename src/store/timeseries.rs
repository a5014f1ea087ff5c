//! One time series: the sample stream of a single (endpoint, metric).
//!
//! A series owns a chronological chain of page handles plus a cached copy
//! of its latest record. Appends are strictly timestamp-increasing; a stale
//! or duplicate timestamp is silently dropped. When the owning endpoint
//! leaves the fleet the series is terminated with an inactive marker and
//! rejects appends until the endpoint returns.
//!
//! The pool may reclaim any page in the chain at any time; it does so by
//! splicing the page out under this series' write lock, so a handle read
//! under the series lock is always validated against the slot's current
//! grant before the page data is touched.

use crate::domain::ports::Appender;
use crate::domain::value_objects::{MetricId, MetricValue, Record};
use crate::store::page_queue::{PageHandle, PageOwner, PageQueue};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// Result of an append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored, and the value differs from the previous record.
    Changed,
    /// Stored, same value as the previous record.
    Unchanged,
    /// Dropped: stale timestamp or terminated series.
    Rejected,
}

struct SeriesState {
    /// Page chain in chronological order; only the back page accepts
    /// appends.
    pages: VecDeque<PageHandle>,
    /// Timestamp of the newest stored record, meaningful once `latest` is
    /// set.
    last_timestamp: f64,
    /// Cached newest record so last-value queries skip the page chain.
    latest: Option<Record>,
    active: bool,
    samples_added: u64,
}

/// A single (endpoint, metric) sample stream.
pub struct TimeSeries {
    id: MetricId,
    queue: Arc<PageQueue>,
    weak: Weak<TimeSeries>,
    state: RwLock<SeriesState>,
}

impl TimeSeries {
    pub fn new(id: MetricId, queue: Arc<PageQueue>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            queue,
            weak: weak.clone(),
            state: RwLock::new(SeriesState {
                pages: VecDeque::new(),
                last_timestamp: 0.0,
                latest: None,
                active: true,
                samples_added: 0,
            }),
        })
    }

    pub fn id(&self) -> &MetricId {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    /// The newest stored record, including an inactive marker.
    pub fn latest(&self) -> Option<Record> {
        self.state.read().latest.clone()
    }

    /// Total records this series has stored, including any that were later
    /// lost to page reclamation.
    pub fn samples_added(&self) -> u64 {
        self.state.read().samples_added
    }

    /// Append a record. A timestamp at or before the newest stored record,
    /// or an append to a terminated series, is silently dropped.
    pub fn add(&self, timestamp: f64, value: MetricValue) -> AddOutcome {
        self.append(timestamp, value, false)
    }

    /// Terminate the series with an inactive marker at `timestamp`.
    ///
    /// Appends are rejected afterwards until [`TimeSeries::mark_active`].
    /// If `timestamp` does not advance past the newest record the marker is
    /// not written but the series still stops accepting appends.
    pub fn mark_inactive(&self, timestamp: f64) {
        if !self.is_active() {
            return;
        }
        self.append(timestamp, MetricValue::Inactive, true);
    }

    /// Reopen a terminated series. The stored data is untouched; the next
    /// append simply resumes after the inactive marker.
    pub fn mark_active(&self) {
        self.state.write().active = true;
    }

    fn append(&self, timestamp: f64, value: MetricValue, terminating: bool) -> AddOutcome {
        let mut new_handle: Option<PageHandle> = None;
        loop {
            {
                let mut st = self.state.write();
                if !terminating && !st.active {
                    return AddOutcome::Rejected;
                }
                if st.latest.is_some() && timestamp <= st.last_timestamp {
                    if terminating {
                        st.active = false;
                    }
                    return AddOutcome::Rejected;
                }

                if let Some(h) = new_handle.take() {
                    let slot = self.queue.slot_at(h.slot);
                    let mut page = slot.data().write();
                    // A fresh grant can be stolen back before we file it.
                    // The check and the mode switch share the page lock so
                    // a steal cannot slip in between them.
                    if slot.is_current(h) {
                        page.make_pairs();
                        drop(page);
                        st.pages.push_back(h);
                    }
                }

                loop {
                    let Some(&tail) = st.pages.back() else { break };
                    let slot = self.queue.slot_at(tail.slot);
                    let mut page = slot.data().write();
                    if !slot.is_current(tail) {
                        // The pool reassigned this page before we could
                        // use it.
                        drop(page);
                        st.pages.pop_back();
                        continue;
                    }
                    if page.is_full() {
                        break;
                    }
                    page.push_pair(timestamp, value.clone());
                    drop(page);
                    let changed = match &st.latest {
                        Some(r) => r.value != value,
                        None => true,
                    };
                    st.last_timestamp = timestamp;
                    st.latest = Some(Record { timestamp, value });
                    st.samples_added += 1;
                    if terminating {
                        st.active = false;
                    }
                    return if changed {
                        AddOutcome::Changed
                    } else {
                        AddOutcome::Unchanged
                    };
                }
            }
            // The tail is missing or full. The queue lock comes before the
            // series lock, and serving this request may evict from any
            // series including this one, so the state lock is released
            // first.
            new_handle = Some(self.queue.get_page(self.weak.clone()));
        }
    }

    /// Emit records in `[start, end)` newest first, preceded by the record
    /// in force at `start`.
    pub fn fetch(&self, start: f64, end: f64, out: &mut dyn Appender) {
        let st = self.state.read();
        let mut record = Record::default();
        for &h in st.pages.iter().rev() {
            let slot = self.queue.slot_at(h.slot);
            if !slot.is_current(h) {
                continue;
            }
            let page = slot.data().read();
            match page.first_timestamp() {
                Some(min) if min < end => {
                    if !page.fetch(start, end, &mut record, out) {
                        return;
                    }
                }
                _ => continue,
            }
        }
    }

    /// Emit records in `[start, end)` oldest first, preceded by the record
    /// in force at `start`.
    pub fn fetch_forward(&self, start: f64, end: f64, out: &mut dyn Appender) {
        let st = self.state.read();

        // Position on the newest page that still covers `start`; default to
        // the oldest page when none does.
        let mut begin = 0usize;
        for (i, &h) in st.pages.iter().enumerate().rev() {
            let slot = self.queue.slot_at(h.slot);
            if !slot.is_current(h) {
                continue;
            }
            let covers = slot
                .data()
                .read()
                .first_timestamp()
                .map_or(false, |min| min <= start);
            if covers {
                begin = i;
                break;
            }
        }

        let mut record = Record::default();
        for &h in st.pages.iter().skip(begin) {
            let slot = self.queue.slot_at(h.slot);
            if !slot.is_current(h) {
                continue;
            }
            let page = slot.data().read();
            if page.is_empty() {
                continue;
            }
            if !page.fetch_forward(start, end, &mut record, out) {
                return;
            }
        }
    }
}

impl PageOwner for TimeSeries {
    fn relinquish_page(&self, slot: u32) {
        let mut st = self.state.write();
        if let Some(pos) = st.pages.iter().position(|h| h.slot == slot) {
            st.pages.remove(pos);
        }
    }
}

impl Drop for TimeSeries {
    fn drop(&mut self) {
        let handles: Vec<PageHandle> = self.state.get_mut().pages.drain(..).collect();
        for h in handles {
            self.queue.give_up(h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Collector;

    // A page budget that fits exactly `n` pair records.
    fn bytes_for_pairs(n: usize) -> usize {
        n * std::mem::size_of::<Record>()
    }

    fn series_with_queue(pages: usize, records_per_page: usize) -> (Arc<TimeSeries>, Arc<PageQueue>) {
        let queue = Arc::new(PageQueue::new(pages, bytes_for_pairs(records_per_page)));
        let series = TimeSeries::new(MetricId::gauge("cpu"), queue.clone());
        (series, queue)
    }

    fn timestamps(series: &TimeSeries, start: f64, end: f64) -> Vec<f64> {
        let mut c = Collector::new();
        series.fetch(start, end, &mut c);
        c.records.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn test_add_and_fetch_in_order_exactly_once() {
        let (series, _queue) = series_with_queue(8, 4);
        for i in 1..=10 {
            let outcome = series.add(i as f64, MetricValue::Number(i as f64));
            assert_eq!(outcome, AddOutcome::Changed);
        }
        let got = timestamps(&series, 0.0, 100.0);
        let expect: Vec<f64> = (1..=10).rev().map(|i| i as f64).collect();
        assert_eq!(got, expect);
        assert_eq!(series.samples_added(), 10);
    }

    #[test]
    fn test_stale_and_duplicate_timestamps_rejected() {
        let (series, _queue) = series_with_queue(4, 4);
        assert_eq!(series.add(10.0, MetricValue::Number(1.0)), AddOutcome::Changed);
        assert_eq!(series.add(10.0, MetricValue::Number(2.0)), AddOutcome::Rejected);
        assert_eq!(series.add(9.0, MetricValue::Number(2.0)), AddOutcome::Rejected);
        assert_eq!(series.add(11.0, MetricValue::Number(2.0)), AddOutcome::Changed);
        assert_eq!(series.samples_added(), 2);
    }

    #[test]
    fn test_unchanged_value_detected() {
        let (series, _queue) = series_with_queue(4, 4);
        assert_eq!(series.add(1.0, MetricValue::Number(5.0)), AddOutcome::Changed);
        assert_eq!(series.add(2.0, MetricValue::Number(5.0)), AddOutcome::Unchanged);
        assert_eq!(series.add(3.0, MetricValue::Number(6.0)), AddOutcome::Changed);
    }

    #[test]
    fn test_latest_cache() {
        let (series, _queue) = series_with_queue(4, 4);
        assert!(series.latest().is_none());
        series.add(1.0, MetricValue::Number(5.0));
        series.add(2.0, MetricValue::Number(7.0));
        let latest = series.latest().unwrap();
        assert_eq!(latest.timestamp, 2.0);
        assert_eq!(latest.value, MetricValue::Number(7.0));
    }

    #[test]
    fn test_page_rollover() {
        let (series, queue) = series_with_queue(4, 2);
        for i in 1..=5 {
            series.add(i as f64, MetricValue::Number(0.0));
        }
        // Five records across pages of two means three grants.
        assert_eq!(queue.allocations(), 3);
        assert_eq!(timestamps(&series, 0.0, 10.0), vec![5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_eviction_drops_oldest_page() {
        // Two pages of capacity 2: the third page grant recycles the first.
        let (series, queue) = series_with_queue(2, 2);
        for i in 1..=5 {
            series.add(i as f64, MetricValue::Number(0.0));
        }
        assert_eq!(queue.evicted_samples(), 2);
        // Only the two newest pages remain: records 3, 4 and 5.
        assert_eq!(timestamps(&series, 0.0, 10.0), vec![5.0, 4.0, 3.0]);
        // The bookkeeping identity holds: added = observable + evicted.
        assert_eq!(series.samples_added(), 3 + queue.evicted_samples());
    }

    #[test]
    fn test_mark_inactive_appends_marker_and_rejects() {
        let (series, _queue) = series_with_queue(4, 4);
        series.add(1.0, MetricValue::Number(1.0));
        series.mark_inactive(2.0);
        assert!(!series.is_active());
        assert_eq!(series.add(3.0, MetricValue::Number(1.0)), AddOutcome::Rejected);

        let mut c = Collector::new();
        series.fetch(0.0, 10.0, &mut c);
        assert_eq!(c.records[0].value, MetricValue::Inactive);
        assert_eq!(c.records[0].timestamp, 2.0);
        assert_eq!(c.records[1].value, MetricValue::Number(1.0));
    }

    #[test]
    fn test_mark_inactive_without_room_still_terminates() {
        let (series, _queue) = series_with_queue(4, 4);
        series.add(5.0, MetricValue::Number(1.0));
        series.mark_inactive(5.0);
        assert!(!series.is_active());
        // No marker fits at a non-advancing timestamp.
        assert_eq!(timestamps(&series, 0.0, 10.0), vec![5.0]);
    }

    #[test]
    fn test_reactivation_resumes_appends() {
        let (series, _queue) = series_with_queue(4, 4);
        series.add(1.0, MetricValue::Number(1.0));
        series.mark_inactive(2.0);
        series.mark_active();
        assert_eq!(series.add(3.0, MetricValue::Number(1.0)), AddOutcome::Changed);
        assert_eq!(timestamps(&series, 0.0, 10.0), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_mark_inactive_twice_writes_one_marker() {
        let (series, _queue) = series_with_queue(4, 4);
        series.add(1.0, MetricValue::Number(1.0));
        series.mark_inactive(2.0);
        series.mark_inactive(3.0);
        assert_eq!(timestamps(&series, 0.0, 10.0), vec![2.0, 1.0]);
    }

    #[test]
    fn test_fetch_forward_agrees_with_fetch() {
        let (series, _queue) = series_with_queue(8, 3);
        for i in [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0] {
            series.add(i, MetricValue::Number(i));
        }
        for (start, end) in [(0.0, 100.0), (2.0, 16.0), (3.0, 33.0), (70.0, 90.0), (0.0, 1.0)] {
            let mut reverse = timestamps(&series, start, end);
            reverse.reverse();
            let mut c = Collector::new();
            series.fetch_forward(start, end, &mut c);
            let forward: Vec<f64> = c.records.iter().map(|r| r.timestamp).collect();
            assert_eq!(forward, reverse, "range [{start}, {end})");
        }
    }

    #[test]
    fn test_fetch_consumer_stop_spans_pages() {
        let (series, _queue) = series_with_queue(8, 2);
        for i in 1..=6 {
            series.add(i as f64, MetricValue::Number(0.0));
        }
        let mut c = Collector::with_limit(3);
        series.fetch(0.0, 10.0, &mut c);
        let got: Vec<f64> = c.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(got, vec![6.0, 5.0, 4.0]);
    }

    #[test]
    fn test_drop_releases_pages() {
        let queue = Arc::new(PageQueue::new(2, bytes_for_pairs(2)));
        {
            let series = TimeSeries::new(MetricId::gauge("cpu"), queue.clone());
            for i in 1..=4 {
                series.add(i as f64, MetricValue::Number(0.0));
            }
        }
        // Both slots were released and emptied, so regranting them loses
        // nothing.
        let survivor = TimeSeries::new(MetricId::gauge("mem"), queue.clone());
        survivor.add(1.0, MetricValue::Number(0.0));
        survivor.add(2.0, MetricValue::Number(0.0));
        survivor.add(3.0, MetricValue::Number(0.0));
        assert_eq!(queue.evicted_samples(), 0);
    }

    #[test]
    fn test_concurrent_reader_and_writer() {
        use std::thread;

        let (series, _queue) = series_with_queue(4, 8);
        let writer = {
            let series = series.clone();
            thread::spawn(move || {
                for i in 1..=1000 {
                    series.add(i as f64, MetricValue::Number(i as f64));
                }
            })
        };
        let reader = {
            let series = series.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let mut c = Collector::new();
                    series.fetch(0.0, 2000.0, &mut c);
                    // Reverse chronological, strictly decreasing.
                    for pair in c.records.windows(2) {
                        assert!(pair[0].timestamp > pair[1].timestamp);
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }
}
