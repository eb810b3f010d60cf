//! SIM Elementary File cache engine.
//!
//! Sits between a higher-level SIM consumer and a low-level SIM driver,
//! satisfying EF reads from a persistent per-subscriber on-disk cache when
//! possible, falling back to the driver otherwise, and opportunistically
//! populating the cache. Concurrent requests for one SIM are serialised into
//! an ordered operation queue and drained by a cooperative, single-threaded
//! scheduler (see [`queue`] and [`engine`]).
//!
//! The crate is generic over two narrow external interfaces, [`driver::SimDriver`]
//! and [`driver::SimIdentity`]; callers provide a real adapter (or, for tests,
//! a fixture) and inject a [`config::SimFsConfig`] naming the cache root.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod format;
pub mod model;
pub mod op;
pub mod path;
pub mod queue;

pub use config::SimFsConfig;
pub use driver::{DriverError, FileInfoReply, SimDriver, SimIdentity};
pub use engine::SimFs;
pub use error::SimFsError;
pub use model::{AccessCondition, AccessConditions, EfId, FileInfo, FileStructure, SimPhase};
pub use op::{ReadCallback, ReadOutcome, WriteCallback};
pub use queue::{ImmediateScheduler, Scheduler};
