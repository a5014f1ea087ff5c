pub mod lifecycle;

pub use lifecycle::{listen_for_signals, CycleGuard, Lifecycle};
