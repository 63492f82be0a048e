//! Shared monotonic clock used by the transaction timer, Client keepalive,
//! record timers and prompt pause/skip logic.

pub mod clock;

pub use clock::MonotonicClock;
