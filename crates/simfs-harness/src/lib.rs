//! Test-only fixture SIM card used by this crate's integration tests and
//! available to other crates (e.g. `simfs-bench`) that need a deterministic
//! driver without standing up a real one.

pub mod fixture;

pub use fixture::{CallCounts, FixtureCard};
