//! External interfaces (§6): the SIM driver capability set and the SIM
//! identity provider. The cache engine is generic over these two traits; it
//! never depends on how a concrete implementation actually talks to the
//! card (AT commands, a QMI/MBIM link, a test fixture, ...).

use crate::model::{EfId, FileStructure, SimPhase};

/// A driver-reported failure, or "this driver doesn't implement this
/// command" (the Rust stand-in for the original's null-function-pointer
/// capability check — a trait object can't expose optional methods, so
/// unsupported commands fail through the same `DriverError` path instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("SIM driver reported an error for this command")]
    Failed,
    #[error("SIM driver does not implement this command")]
    NotSupported,
}

/// Decoded reply to `read_file_info`.
#[derive(Debug, Clone, Copy)]
pub struct FileInfoReply {
    pub length: u16,
    pub structure: FileStructure,
    pub record_length: u16,
    /// Raw 3-byte access-condition field; decode with
    /// [`crate::model::AccessConditions::decode`].
    pub access: [u8; 3],
}

pub type DriverResult<T> = Result<T, DriverError>;
pub type DriverCallback<T> = Box<dyn FnOnce(DriverResult<T>)>;

/// The SIM driver capability set (§6). Every method is asynchronous: it
/// dispatches the command and returns immediately, invoking `done` exactly
/// once when the command completes (possibly synchronously, for a test
/// driver; possibly much later, for a real card over a slow bus).
///
/// Default method bodies report [`DriverError::NotSupported`], modelling
/// "any [capability] may be absent" without `Option<fn>` fields.
pub trait SimDriver {
    fn read_file_info(&self, _id: EfId, done: DriverCallback<FileInfoReply>) {
        done(Err(DriverError::NotSupported));
    }

    fn read_file_transparent(
        &self,
        _id: EfId,
        _offset: u16,
        _num_bytes: u16,
        done: DriverCallback<Vec<u8>>,
    ) {
        done(Err(DriverError::NotSupported));
    }

    fn read_file_linear(
        &self,
        _id: EfId,
        _record: u16,
        _record_length: u16,
        done: DriverCallback<Vec<u8>>,
    ) {
        done(Err(DriverError::NotSupported));
    }

    fn read_file_cyclic(
        &self,
        _id: EfId,
        _record: u16,
        _record_length: u16,
        done: DriverCallback<Vec<u8>>,
    ) {
        done(Err(DriverError::NotSupported));
    }

    fn write_file_transparent(
        &self,
        _id: EfId,
        _offset: u16,
        _length: u16,
        _data: Vec<u8>,
        done: DriverCallback<()>,
    ) {
        done(Err(DriverError::NotSupported));
    }

    fn write_file_linear(
        &self,
        _id: EfId,
        _record: u16,
        _length: u16,
        _data: Vec<u8>,
        done: DriverCallback<()>,
    ) {
        done(Err(DriverError::NotSupported));
    }

    fn write_file_cyclic(&self, _id: EfId, _length: u16, _data: Vec<u8>, done: DriverCallback<()>) {
        done(Err(DriverError::NotSupported));
    }
}

/// The SIM identity provider (§6): exposes the current IMSI and phase.
/// Absence of an IMSI disables caching; reads still work via the driver.
pub trait SimIdentity {
    fn imsi(&self) -> Option<String>;
    fn phase(&self) -> SimPhase;
}
