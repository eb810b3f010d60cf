//! Thin shims over [`SimDriver`]/[`SimIdentity`] (§2 item 6 "external adapters"):
//! a logging decorator usable around any concrete driver, and a null driver
//! for embedders that haven't wired one up yet.

use simfs_core::driver::{DriverCallback, DriverResult, FileInfoReply, SimDriver, SimIdentity};
use simfs_core::model::{EfId, SimPhase};

/// Wraps a driver and logs every dispatched command and its outcome at
/// `debug` level. Delegates every method; does not alter behaviour.
pub struct LoggingDriver<D> {
    inner: D,
    label: String,
}

impl<D: SimDriver> LoggingDriver<D> {
    pub fn new(inner: D, label: impl Into<String>) -> Self {
        LoggingDriver {
            inner,
            label: label.into(),
        }
    }
}

impl<D: SimDriver> SimDriver for LoggingDriver<D> {
    fn read_file_info(&self, id: EfId, done: DriverCallback<FileInfoReply>) {
        let label = self.label.clone();
        log::debug!("{label}: read_file_info({id:#06x})");
        self.inner.read_file_info(
            id,
            Box::new(move |result| {
                log::debug!("{label}: read_file_info({id:#06x}) -> {}", outcome_tag(&result));
                done(result);
            }),
        );
    }

    fn read_file_transparent(&self, id: EfId, offset: u16, num_bytes: u16, done: DriverCallback<Vec<u8>>) {
        let label = self.label.clone();
        log::debug!("{label}: read_file_transparent({id:#06x}, {offset}, {num_bytes})");
        self.inner.read_file_transparent(
            id,
            offset,
            num_bytes,
            Box::new(move |result| {
                log::debug!(
                    "{label}: read_file_transparent({id:#06x}, {offset}, {num_bytes}) -> {}",
                    outcome_tag(&result)
                );
                done(result);
            }),
        );
    }

    fn read_file_linear(&self, id: EfId, record: u16, record_length: u16, done: DriverCallback<Vec<u8>>) {
        let label = self.label.clone();
        log::debug!("{label}: read_file_linear({id:#06x}, {record})");
        self.inner.read_file_linear(
            id,
            record,
            record_length,
            Box::new(move |result| {
                log::debug!("{label}: read_file_linear({id:#06x}, {record}) -> {}", outcome_tag(&result));
                done(result);
            }),
        );
    }

    fn read_file_cyclic(&self, id: EfId, record: u16, record_length: u16, done: DriverCallback<Vec<u8>>) {
        let label = self.label.clone();
        log::debug!("{label}: read_file_cyclic({id:#06x}, {record})");
        self.inner.read_file_cyclic(
            id,
            record,
            record_length,
            Box::new(move |result| {
                log::debug!("{label}: read_file_cyclic({id:#06x}, {record}) -> {}", outcome_tag(&result));
                done(result);
            }),
        );
    }

    fn write_file_transparent(&self, id: EfId, offset: u16, length: u16, data: Vec<u8>, done: DriverCallback<()>) {
        let label = self.label.clone();
        log::debug!("{label}: write_file_transparent({id:#06x}, {offset}, {length})");
        self.inner.write_file_transparent(
            id,
            offset,
            length,
            data,
            Box::new(move |result| {
                log::debug!(
                    "{label}: write_file_transparent({id:#06x}, {offset}, {length}) -> {}",
                    outcome_tag(&result)
                );
                done(result);
            }),
        );
    }

    fn write_file_linear(&self, id: EfId, record: u16, length: u16, data: Vec<u8>, done: DriverCallback<()>) {
        let label = self.label.clone();
        log::debug!("{label}: write_file_linear({id:#06x}, {record}, {length})");
        self.inner.write_file_linear(
            id,
            record,
            length,
            data,
            Box::new(move |result| {
                log::debug!(
                    "{label}: write_file_linear({id:#06x}, {record}, {length}) -> {}",
                    outcome_tag(&result)
                );
                done(result);
            }),
        );
    }

    fn write_file_cyclic(&self, id: EfId, length: u16, data: Vec<u8>, done: DriverCallback<()>) {
        let label = self.label.clone();
        log::debug!("{label}: write_file_cyclic({id:#06x}, {length})");
        self.inner.write_file_cyclic(
            id,
            length,
            data,
            Box::new(move |result| {
                log::debug!("{label}: write_file_cyclic({id:#06x}, {length}) -> {}", outcome_tag(&result));
                done(result);
            }),
        );
    }
}

fn outcome_tag<T>(result: &DriverResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => {
            let _ = e;
            "error"
        }
    }
}

/// Wraps an identity provider and logs each query at `trace` level.
pub struct LoggingIdentity<I> {
    inner: I,
    label: String,
}

impl<I: SimIdentity> LoggingIdentity<I> {
    pub fn new(inner: I, label: impl Into<String>) -> Self {
        LoggingIdentity {
            inner,
            label: label.into(),
        }
    }
}

impl<I: SimIdentity> SimIdentity for LoggingIdentity<I> {
    fn imsi(&self) -> Option<String> {
        let imsi = self.inner.imsi();
        log::trace!("{}: imsi() -> {imsi:?}", self.label);
        imsi
    }

    fn phase(&self) -> SimPhase {
        let phase = self.inner.phase();
        log::trace!("{}: phase() -> {phase}", self.label);
        phase
    }
}

/// A driver that implements nothing: every command reports "not supported".
/// Useful as a placeholder while an embedder wires up a real adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriver;

impl SimDriver for NullDriver {}

/// An identity provider with no IMSI, disabling caching entirely; reads still
/// work by falling through to whatever driver is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIdentity {
    pub phase: Option<SimPhase>,
}

impl SimIdentity for NullIdentity {
    fn imsi(&self) -> Option<String> {
        None
    }

    fn phase(&self) -> SimPhase {
        self.phase.unwrap_or(SimPhase::Phase2Plus)
    }
}
