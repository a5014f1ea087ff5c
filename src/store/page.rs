//! A single fixed-size page of sample storage.
//!
//! Pages hold either (timestamp, value) pairs or bare timestamps. The byte
//! budget is fixed when the pool is built; the logical capacity follows from
//! the element size of the current mode. Within a page timestamps are
//! strictly increasing, which the owning series guarantees, so lookups are
//! binary searches.

use crate::domain::ports::Appender;
use crate::domain::value_objects::{MetricValue, Record};
use std::mem;

/// Storage content of a page in its current mode.
#[derive(Debug)]
enum PageData {
    Pairs(Vec<Record>),
    Times(Vec<f64>),
}

/// One page of the global pool.
#[derive(Debug)]
pub struct Page {
    bytes: usize,
    data: PageData,
}

impl Page {
    /// Create a pair-mode page with the given byte budget.
    pub fn with_bytes(bytes: usize) -> Self {
        let cap = (bytes / mem::size_of::<Record>()).max(1);
        Self {
            bytes,
            data: PageData::Pairs(Vec::with_capacity(cap)),
        }
    }

    /// Capacity in records when holding (timestamp, value) pairs.
    pub fn pair_capacity(&self) -> usize {
        (self.bytes / mem::size_of::<Record>()).max(1)
    }

    /// Capacity in records when holding bare timestamps.
    pub fn time_capacity(&self) -> usize {
        (self.bytes / mem::size_of::<f64>()).max(1)
    }

    /// Reinterpret as an empty pair-mode page.
    pub fn make_pairs(&mut self) {
        let cap = self.pair_capacity();
        if let PageData::Pairs(v) = &mut self.data {
            v.clear();
        } else {
            self.data = PageData::Pairs(Vec::with_capacity(cap));
        }
    }

    /// Reinterpret as an empty timestamp-mode page.
    pub fn make_times(&mut self) {
        let cap = self.time_capacity();
        if let PageData::Times(v) = &mut self.data {
            v.clear();
        } else {
            self.data = PageData::Times(Vec::with_capacity(cap));
        }
    }

    /// Drop all records, keeping mode and capacity.
    pub fn clear(&mut self) {
        match &mut self.data {
            PageData::Pairs(v) => v.clear(),
            PageData::Times(v) => v.clear(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            PageData::Pairs(v) => v.len(),
            PageData::Times(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        match &self.data {
            PageData::Pairs(v) => v.len() == self.pair_capacity(),
            PageData::Times(v) => v.len() == self.time_capacity(),
        }
    }

    /// Append a (timestamp, value) pair. The page must be in pair mode and
    /// not full; the caller keeps timestamps strictly increasing.
    pub fn push_pair(&mut self, timestamp: f64, value: MetricValue) {
        let cap = self.pair_capacity();
        match &mut self.data {
            PageData::Pairs(v) => {
                debug_assert!(v.len() < cap);
                v.push(Record { timestamp, value });
            }
            PageData::Times(_) => panic!("push_pair on a timestamp-mode page"),
        }
    }

    /// Append a bare timestamp. The page must be in timestamp mode and not
    /// full.
    pub fn push_time(&mut self, timestamp: f64) {
        match &mut self.data {
            PageData::Times(v) => v.push(timestamp),
            PageData::Pairs(_) => panic!("push_time on a pair-mode page"),
        }
    }

    /// Index of the first record with timestamp >= ts, or `len` when there
    /// is none.
    pub fn find_greater_or_equal(&self, ts: f64) -> usize {
        match &self.data {
            PageData::Pairs(v) => v.partition_point(|r| r.timestamp < ts),
            PageData::Times(v) => v.partition_point(|&t| t < ts),
        }
    }

    /// Index of the first record with timestamp > ts, or `len` when there
    /// is none.
    pub fn find_greater(&self, ts: f64) -> usize {
        match &self.data {
            PageData::Pairs(v) => v.partition_point(|r| r.timestamp <= ts),
            PageData::Times(v) => v.partition_point(|&t| t <= ts),
        }
    }

    /// Copy the record at `idx` into `out`. A timestamp-mode page fills
    /// only the timestamp and leaves the value untouched.
    pub fn record_into(&self, idx: usize, out: &mut Record) {
        match &self.data {
            PageData::Pairs(v) => {
                out.timestamp = v[idx].timestamp;
                out.value = v[idx].value.clone();
            }
            PageData::Times(v) => {
                out.timestamp = v[idx];
            }
        }
    }

    /// Timestamp of the earliest record, or None for an empty page.
    pub fn first_timestamp(&self) -> Option<f64> {
        match &self.data {
            PageData::Pairs(v) => v.first().map(|r| r.timestamp),
            PageData::Times(v) => v.first().copied(),
        }
    }

    /// Timestamp of the latest record, or None for an empty page.
    pub fn last_timestamp(&self) -> Option<f64> {
        match &self.data {
            PageData::Pairs(v) => v.last().map(|r| r.timestamp),
            PageData::Times(v) => v.last().copied(),
        }
    }

    /// Emit records in `[start, end)` to `out`, newest first.
    ///
    /// Also emits the record immediately preceding `start`, which carries
    /// the value in force at `start`. Returns true when the caller should
    /// continue with the previous (earlier) page: either this page is
    /// entirely at or after `end`, or the range extends past its oldest
    /// record. Returns false when the range is satisfied or the consumer
    /// stopped the iteration.
    pub fn fetch(&self, start: f64, end: f64, record: &mut Record, out: &mut dyn Appender) -> bool {
        let last = self.find_greater_or_equal(end);
        if last == 0 {
            return true;
        }
        let first = self.find_greater(start);
        let (first, keep_going) = if first == 0 { (0, true) } else { (first - 1, false) };
        for i in (first..last).rev() {
            self.record_into(i, record);
            if !out.append(record) {
                return false;
            }
        }
        keep_going
    }

    /// Emit records in `[start, end)` to `out`, oldest first, including the
    /// record in force at `start`.
    ///
    /// Returns true when the range may continue into the next (later) page.
    /// Unlike [`Page::fetch`], the caller must position itself on the
    /// correct starting page before the first call.
    pub fn fetch_forward(
        &self,
        start: f64,
        end: f64,
        record: &mut Record,
        out: &mut dyn Appender,
    ) -> bool {
        let first = self.find_greater(start).saturating_sub(1);
        let last = self.find_greater_or_equal(end);
        let keep_going = last == self.len();
        for i in first..last {
            self.record_into(i, record);
            if !out.append(record) {
                return false;
            }
        }
        keep_going
    }
}
