//! The paged time-series store.
//!
//! Bounded memory by construction: every sample lands in a page drawn from
//! one global pool, and when the pool runs dry the least recently granted
//! page is recycled, dropping the oldest history first.

mod page;
mod page_queue;
mod store;
mod timeseries;

pub use page::Page;
pub use page_queue::{PageHandle, PageOwner, PageQueue, PageSlot};
pub use store::Store;
pub use timeseries::{AddOutcome, TimeSeries};
