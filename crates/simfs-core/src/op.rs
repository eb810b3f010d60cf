//! Operation records: an immutable description of *what* a pending request
//! wants, plus the handful of fields the cache engine mutates as it steps
//! the request through its sub-state-machine (§3, §9 "callback indirection").
//!
//! The original's `struct sim_fs_op` carries a single `gconstpointer cb` cast
//! back to one of two function-pointer types based on an `is_read` flag.
//! Here the read/write distinction is a variant of this enum, each carrying
//! its own closure type — there is no type-erased pointer to get wrong.

use crate::model::{EfId, FileStructure};

/// What a completed (or failed) read delivers to its callback.
///
/// For transparent reads this fires once, with the whole assembled range in
/// `data` and `current_unit == 0`. For record-based reads it fires once per
/// record, `current_unit` set to that record's 1-based index. On failure
/// `ok` is `false` and the remaining fields are zeroed/empty — mirrors the
/// original's `(0, 0, 0, NULL, 0, userdata)` failure callback exactly, minus
/// the `userdata` parameter (a Rust closure captures what it needs).
#[derive(Debug, Clone, Default)]
pub struct ReadOutcome {
    pub ok: bool,
    pub total_bytes: u16,
    pub current_unit: u16,
    pub data: Vec<u8>,
    pub record_length: u16,
}

impl ReadOutcome {
    pub fn failure() -> Self {
        ReadOutcome::default()
    }
}

pub type ReadCallback = Box<dyn FnMut(ReadOutcome)>;
pub type WriteCallback = Box<dyn FnOnce(bool)>;

/// A pending read, together with the sub-state-machine cursor the engine
/// advances as it services it.
pub struct ReadOp {
    pub id: EfId,
    pub expected_structure: FileStructure,
    pub offset: u16,
    /// `0` initially means "read to end of file"; the engine resolves this
    /// to the real byte count as soon as the file length is known (either
    /// from the cache header or from `read_file_info`).
    pub num_bytes: u16,
    /// Total file length; `0` until resolved.
    pub length: u16,
    /// Record length (`== length` for transparent files); `0` until resolved.
    pub record_length: u16,
    /// Next block index (transparent) or next 1-based record number
    /// (fixed/cyclic); set once `length`/`record_length` are known.
    pub current: u16,
    pub callback: ReadCallback,
}

impl ReadOp {
    pub fn new(
        id: EfId,
        expected_structure: FileStructure,
        offset: u16,
        num_bytes: u16,
        callback: ReadCallback,
    ) -> Self {
        ReadOp {
            id,
            expected_structure,
            offset,
            num_bytes,
            length: 0,
            record_length: 0,
            current: 0,
            callback,
        }
    }

    pub fn end_block(&self) -> u16 {
        (self.offset as u32 + self.num_bytes as u32 - 1).div_euclid(256) as u16
    }

    pub fn start_block(&self) -> u16 {
        self.offset / 256
    }

    pub fn total_records(&self) -> u16 {
        self.length / self.record_length
    }
}

/// A pending write: the full payload and the destination record (meaningful
/// only for [`FileStructure::Fixed`]; ignored for transparent/cyclic).
pub struct WriteOp {
    pub id: EfId,
    pub structure: FileStructure,
    pub record: u16,
    pub data: Vec<u8>,
    pub callback: WriteCallback,
}

/// One entry in the operation queue.
pub enum Operation {
    Read(ReadOp),
    Write(WriteOp),
}

impl Operation {
    pub fn id(&self) -> EfId {
        match self {
            Operation::Read(op) => op.id,
            Operation::Write(op) => op.id,
        }
    }
}
