//! An in-memory deterministic SIM card: a [`SimDriver`]/[`SimIdentity`] pair
//! with scriptable per-EF contents and call-count assertions, for exercising
//! the cache engine without a real modem.

use std::cell::RefCell;
use std::collections::HashMap;

use simfs_core::driver::{DriverCallback, DriverError, FileInfoReply, SimDriver, SimIdentity};
use simfs_core::model::{EfId, FileStructure, SimPhase};

struct FixtureFile {
    structure: FileStructure,
    data: Vec<u8>,
    record_length: u16,
    access: [u8; 3],
    info_fails: bool,
}

/// Per-command dispatch counts, for asserting how many times the driver was
/// actually hit (vs. served from cache).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub info: u32,
    pub read_transparent: u32,
    pub read_linear: u32,
    pub read_cyclic: u32,
    pub write_transparent: u32,
    pub write_linear: u32,
    pub write_cyclic: u32,
}

/// A fixture SIM card: `SimDriver` + `SimIdentity` over an in-memory file
/// table. Build one with [`FixtureCard::new`], populate it with
/// [`FixtureCard::with_file`], then hand `Rc::new(card)` to [`simfs_core::SimFs::new`]
/// for both the driver and identity arguments.
pub struct FixtureCard {
    files: RefCell<HashMap<EfId, FixtureFile>>,
    imsi: Option<String>,
    phase: SimPhase,
    calls: RefCell<CallCounts>,
    /// What every `write_file_*` call reports back; `true` unless overridden.
    writes_succeed: RefCell<bool>,
}

impl FixtureCard {
    pub fn new(imsi: Option<&str>, phase: SimPhase) -> Self {
        FixtureCard {
            files: RefCell::new(HashMap::new()),
            imsi: imsi.map(str::to_owned),
            phase,
            calls: RefCell::new(CallCounts::default()),
            writes_succeed: RefCell::new(true),
        }
    }

    /// Script an EF's contents as the driver would report them.
    pub fn with_file(&self, id: EfId, structure: FileStructure, data: Vec<u8>, record_length: u16, access: [u8; 3]) {
        self.files.borrow_mut().insert(
            id,
            FixtureFile {
                structure,
                data,
                record_length,
                access,
                info_fails: false,
            },
        );
    }

    /// Make `read_file_info` fail for `id` (simulates a card that rejects the
    /// select/get-response for this EF).
    pub fn fail_info(&self, id: EfId) {
        if let Some(f) = self.files.borrow_mut().get_mut(&id) {
            f.info_fails = true;
        }
    }

    pub fn set_writes_succeed(&self, succeed: bool) {
        *self.writes_succeed.borrow_mut() = succeed;
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.borrow()
    }
}

impl SimDriver for FixtureCard {
    fn read_file_info(&self, id: EfId, done: DriverCallback<FileInfoReply>) {
        self.calls.borrow_mut().info += 1;
        let files = self.files.borrow();
        match files.get(&id) {
            Some(f) if f.info_fails => done(Err(DriverError::Failed)),
            Some(f) => done(Ok(FileInfoReply {
                length: f.data.len() as u16,
                structure: f.structure,
                record_length: f.record_length,
                access: f.access,
            })),
            None => done(Err(DriverError::Failed)),
        }
    }

    fn read_file_transparent(&self, id: EfId, offset: u16, num_bytes: u16, done: DriverCallback<Vec<u8>>) {
        self.calls.borrow_mut().read_transparent += 1;
        let files = self.files.borrow();
        match files.get(&id) {
            Some(f) => done(Ok(f.data[offset as usize..(offset + num_bytes) as usize].to_vec())),
            None => done(Err(DriverError::Failed)),
        }
    }

    fn read_file_linear(&self, id: EfId, record: u16, record_length: u16, done: DriverCallback<Vec<u8>>) {
        self.calls.borrow_mut().read_linear += 1;
        let files = self.files.borrow();
        match files.get(&id) {
            Some(f) => {
                let start = (record - 1) as usize * record_length as usize;
                done(Ok(f.data[start..start + record_length as usize].to_vec()))
            }
            None => done(Err(DriverError::Failed)),
        }
    }

    fn read_file_cyclic(&self, id: EfId, record: u16, record_length: u16, done: DriverCallback<Vec<u8>>) {
        self.calls.borrow_mut().read_cyclic += 1;
        let files = self.files.borrow();
        match files.get(&id) {
            Some(f) => {
                let start = (record - 1) as usize * record_length as usize;
                done(Ok(f.data[start..start + record_length as usize].to_vec()))
            }
            None => done(Err(DriverError::Failed)),
        }
    }

    fn write_file_transparent(&self, id: EfId, offset: u16, _length: u16, data: Vec<u8>, done: DriverCallback<()>) {
        self.calls.borrow_mut().write_transparent += 1;
        if *self.writes_succeed.borrow() {
            if let Some(f) = self.files.borrow_mut().get_mut(&id) {
                let end = offset as usize + data.len();
                if f.data.len() < end {
                    f.data.resize(end, 0);
                }
                f.data[offset as usize..end].copy_from_slice(&data);
            }
            done(Ok(()));
        } else {
            done(Err(DriverError::Failed));
        }
    }

    fn write_file_linear(&self, id: EfId, record: u16, _length: u16, data: Vec<u8>, done: DriverCallback<()>) {
        self.calls.borrow_mut().write_linear += 1;
        if *self.writes_succeed.borrow() {
            if let Some(f) = self.files.borrow_mut().get_mut(&id) {
                let start = (record - 1) as usize * f.record_length as usize;
                f.data[start..start + data.len()].copy_from_slice(&data);
            }
            done(Ok(()));
        } else {
            done(Err(DriverError::Failed));
        }
    }

    fn write_file_cyclic(&self, id: EfId, _length: u16, data: Vec<u8>, done: DriverCallback<()>) {
        self.calls.borrow_mut().write_cyclic += 1;
        if *self.writes_succeed.borrow() {
            if let Some(f) = self.files.borrow_mut().get_mut(&id) {
                f.data[0..data.len()].copy_from_slice(&data);
            }
            done(Ok(()));
        } else {
            done(Err(DriverError::Failed));
        }
    }
}

impl SimIdentity for FixtureCard {
    fn imsi(&self) -> Option<String> {
        self.imsi.clone()
    }

    fn phase(&self) -> SimPhase {
        self.phase
    }
}
