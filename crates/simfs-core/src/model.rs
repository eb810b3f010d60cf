//! Core data types shared by the on-disk format, the operation queue, and the
//! external driver boundary.

use std::fmt;

/// 16-bit Elementary File identifier, as assigned by the SIM filesystem tree
/// (e.g. `0x6f05` for EFLI).
pub type EfId = u16;

/// SIM specification phase, combined with the IMSI to key the cache directory.
///
/// Mirrors the handful of phases a SIM identity provider can report; unknown
/// phases from newer cards fall back to [`SimPhase::Phase2Plus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimPhase {
    Phase1,
    Phase2,
    Phase2Plus,
}

impl fmt::Display for SimPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            SimPhase::Phase1 => 0,
            SimPhase::Phase2 => 1,
            SimPhase::Phase2Plus => 2,
        };
        write!(f, "{n}")
    }
}

/// The three EF organisations a SIM file can have (TS 51.011 §9.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStructure {
    Transparent,
    Fixed,
    Cyclic,
}

impl FileStructure {
    /// Wire value used in the on-disk header and in driver responses.
    pub fn to_wire(self) -> u8 {
        match self {
            FileStructure::Transparent => 0,
            FileStructure::Fixed => 1,
            FileStructure::Cyclic => 2,
        }
    }

    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(FileStructure::Transparent),
            1 => Some(FileStructure::Fixed),
            2 => Some(FileStructure::Cyclic),
            _ => None,
        }
    }
}

/// A 4-bit access condition code (TS 51.011 §9.3). Values 4..=14 all
/// normalise to [`AccessCondition::Adm`]; 15 is `Never`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCondition {
    Always,
    Chv1,
    Chv2,
    Reserved,
    Adm,
    Never,
}

impl AccessCondition {
    /// Decode a raw 4-bit nibble from an access-condition byte.
    pub fn decode(nibble: u8) -> Self {
        match nibble & 0x0f {
            0 => AccessCondition::Always,
            1 => AccessCondition::Chv1,
            2 => AccessCondition::Chv2,
            3 => AccessCondition::Reserved,
            15 => AccessCondition::Never,
            _ => AccessCondition::Adm,
        }
    }

    /// Whether this condition alone permits the cache to retain the file
    /// across the corresponding operation (update/invalidate/rehabilitate).
    pub fn permits_caching(self) -> bool {
        matches!(self, AccessCondition::Adm | AccessCondition::Never)
    }
}

/// Decoded access-condition triple for one EF, as reported by
/// `read_file_info`'s 3-byte `access` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessConditions {
    pub update: AccessCondition,
    pub invalidate: AccessCondition,
    pub rehabilitate: AccessCondition,
}

impl AccessConditions {
    /// Decode from the raw 3-byte access field (TS 11.11 §9.3 layout, as
    /// surfaced by `read_file_info`): `access[0]` low nibble is `update`,
    /// `access[2]` high nibble is `rehabilitate`, low nibble is `invalidate`.
    pub fn decode(access: [u8; 3]) -> Self {
        AccessConditions {
            update: AccessCondition::decode(access[0] & 0x0f),
            rehabilitate: AccessCondition::decode((access[2] >> 4) & 0x0f),
            invalidate: AccessCondition::decode(access[2] & 0x0f),
        }
    }

    /// I4: only EFs whose update/invalidate/rehabilitate conditions are all
    /// ADM or NEVER may be cached.
    pub fn cacheable(self) -> bool {
        self.update.permits_caching()
            && self.invalidate.permits_caching()
            && self.rehabilitate.permits_caching()
    }
}

/// Parsed 6-byte file-info record, as returned by the driver or persisted in
/// the cache header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// `0` means "no error"; any other value is a previously-cached error.
    pub error_type: u8,
    pub length: u16,
    pub structure: FileStructure,
    pub record_length: u16,
}

impl FileInfo {
    /// I6: a well-formed file info has a positive record length that evenly
    /// divides (or, for transparent files, equals) the file length.
    pub fn is_well_formed(&self) -> bool {
        self.record_length > 0 && self.length >= self.record_length
    }

    /// Number of cacheable units: 256-byte blocks for transparent files,
    /// records for fixed/cyclic files.
    pub fn unit_size(&self) -> u16 {
        match self.structure {
            FileStructure::Transparent => 256,
            FileStructure::Fixed | FileStructure::Cyclic => self.record_length,
        }
    }

    /// Total record count for record-based files (I6: exact division).
    pub fn total_records(&self) -> u16 {
        self.length / self.record_length
    }
}
