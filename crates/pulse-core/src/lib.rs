//! pulse-core — realtime engagement analytics engines
//!
//! Two independent in-memory engines derive live signals from a
//! high-volume activity stream:
//!
//! - [`EventStreamProcessor`]: multi-producer lock-free ingest into a
//!   bounded ring, a single consumer maintaining channel frequency
//!   (Count-Min Sketch plus an exact top map) and sliding-hour unique
//!   users (per-minute HyperLogLog buckets), with batched delivery to a
//!   flush callback and a synchronous drain barrier.
//! - [`Leaderboard`]: per-user scores under lazy exponential time decay
//!   on an indexed skip list, with top-k / rank queries and JSON
//!   snapshots.
//!
//! All frequency and cardinality answers are approximate with the usual
//! sketch error bounds; both engines take injectable time sources and
//! make no durability promises beyond the explicit snapshot call.

pub mod error;
pub mod hash;
pub mod leaderboard;
pub mod pool;
pub mod processor;
pub mod ring;
pub mod sketch;

pub use error::Error;
pub use leaderboard::{Leaderboard, RankEntry};
pub use pool::WorkerPool;
pub use processor::{Event, EventStreamProcessor, FlushCallback, ProcessorConfig};
pub use ring::RingBuffer;
pub use sketch::{CountMinSketch, HyperLogLog};
