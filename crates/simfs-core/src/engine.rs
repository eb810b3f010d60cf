//! The cache engine (§4.2-§4.6): the state machine that services the head of
//! an engine's operation queue one atomic step at a time.
//!
//! [`SimFs`] is the public handle a consumer holds; it wraps `Rc<RefCell<CacheEngine>>`
//! so that deferred ticks and driver callbacks can close over a cheap, clonable
//! reference back into shared state without `Arc`/`Mutex` (this engine is never
//! touched from more than one thread, per the scheduling model in §5).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::SimFsConfig;
use crate::driver::{DriverCallback, DriverResult, FileInfoReply, SimDriver, SimIdentity};
use crate::format::{self, CacheFile, CacheProbe};
use crate::model::{AccessConditions, EfId, FileInfo, FileStructure, SimPhase};
use crate::op::{Operation, ReadCallback, ReadOp, ReadOutcome, WriteCallback, WriteOp};
use crate::path;
use crate::queue::Scheduler;

/// Owning handle to one SIM's cache engine. Not `Clone`: an engine belongs to
/// whichever higher-level object owns the corresponding SIM session.
pub struct SimFs {
    inner: Rc<RefCell<CacheEngine>>,
}

impl SimFs {
    pub fn new(
        config: SimFsConfig,
        driver: Rc<dyn SimDriver>,
        identity: Rc<dyn SimIdentity>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        SimFs {
            inner: Rc::new(RefCell::new(CacheEngine {
                config,
                driver,
                identity,
                scheduler,
                queue: VecDeque::new(),
                tick_generation: 0,
                cache: None,
                buffer: None,
            })),
        }
    }

    /// Enqueue a read. `offset`/`num_bytes` are meaningful only for
    /// [`FileStructure::Transparent`] (`num_bytes == 0` means "to end of
    /// file"); for `Fixed`/`Cyclic` every record from 1 to the last is
    /// streamed to `callback` and both fields are ignored.
    pub fn read(
        &self,
        id: EfId,
        expected_structure: FileStructure,
        offset: u16,
        num_bytes: u16,
        callback: ReadCallback,
    ) {
        let op = ReadOp::new(id, expected_structure, offset, num_bytes, callback);
        CacheEngine::enqueue(&self.inner, Operation::Read(op));
    }

    /// Enqueue a write. `record` is meaningful only for [`FileStructure::Fixed`].
    pub fn write(&self, id: EfId, structure: FileStructure, record: u16, data: Vec<u8>, callback: WriteCallback) {
        let op = WriteOp {
            id,
            structure,
            record,
            data,
            callback,
        };
        CacheEngine::enqueue(&self.inner, Operation::Write(op));
    }

    /// Cancel any scheduled tick and drop every queued operation without
    /// invoking its callback (§3 lifecycle contract).
    pub fn shutdown(&self) {
        CacheEngine::shutdown(&self.inner);
    }
}

struct CacheEngine {
    config: SimFsConfig,
    driver: Rc<dyn SimDriver>,
    identity: Rc<dyn SimIdentity>,
    scheduler: Rc<dyn Scheduler>,
    queue: VecDeque<Operation>,
    /// Bumped on `shutdown`; a deferred tick captured before the bump
    /// compares its snapshot against the live value and no-ops on mismatch.
    tick_generation: u64,
    cache: Option<CacheFile>,
    /// Transparent-read assembly buffer; `None` for record-based reads.
    buffer: Option<Vec<u8>>,
}

impl CacheEngine {
    fn enqueue(engine: &Rc<RefCell<CacheEngine>>, op: Operation) {
        let was_empty = {
            let mut e = engine.borrow_mut();
            let empty = e.queue.is_empty();
            e.queue.push_back(op);
            empty
        };
        if was_empty {
            Self::schedule_tick(engine);
        }
    }

    fn shutdown(engine: &Rc<RefCell<CacheEngine>>) {
        let mut e = engine.borrow_mut();
        e.tick_generation = e.tick_generation.wrapping_add(1);
        e.queue.clear();
        e.cache = None;
        e.buffer = None;
    }

    fn schedule_tick(engine: &Rc<RefCell<CacheEngine>>) {
        let (scheduler, generation) = {
            let e = engine.borrow();
            (e.scheduler.clone(), e.tick_generation)
        };
        let weak = Rc::downgrade(engine);
        scheduler.defer(Box::new(move || {
            let Some(strong) = weak.upgrade() else { return };
            let stale = strong.borrow().tick_generation != generation;
            if !stale {
                CacheEngine::tick(&strong);
            }
        }));
    }

    fn advance_queue(engine: &Rc<RefCell<CacheEngine>>) {
        let pending = !engine.borrow().queue.is_empty();
        if pending {
            Self::schedule_tick(engine);
        }
    }

    fn tick(engine: &Rc<RefCell<CacheEngine>>) {
        let head_is_read = match engine.borrow().queue.front() {
            Some(Operation::Read(_)) => Some(true),
            Some(Operation::Write(_)) => Some(false),
            None => None,
        };
        match head_is_read {
            Some(true) => Self::tick_read(engine),
            Some(false) => Self::tick_write(engine),
            None => {}
        }
    }

    // ---- read path (§4.2) ----

    fn tick_read(engine: &Rc<RefCell<CacheEngine>>) {
        let unresolved = matches!(
            engine.borrow().queue.front(),
            Some(Operation::Read(op)) if op.length == 0
        );
        if unresolved {
            Self::resolve_read(engine);
        } else {
            Self::advance_read_retrieval(engine);
        }
    }

    /// Phase 1 (cache probe) and, if it misses, the start of phase 2 (driver
    /// file-info dispatch).
    fn resolve_read(engine: &Rc<RefCell<CacheEngine>>) {
        let (id, expected_structure) = {
            let e = engine.borrow();
            match e.queue.front() {
                Some(Operation::Read(op)) => (op.id, op.expected_structure),
                _ => return,
            }
        };

        let imsi = engine.borrow().identity.imsi();
        let phase = engine.borrow().identity.phase();

        let Some(imsi) = imsi else {
            // No identity available: caching is impossible, go straight to
            // the driver with no cache target to populate.
            Self::dispatch_file_info(engine, id, None);
            return;
        };

        let path = {
            let e = engine.borrow();
            let dir = path::cache_dir(&e.config, &imsi, phase);
            path::ef_path(&dir, id)
        };

        match format::probe(&path, expected_structure) {
            CacheProbe::Ready(cache_file, info) => {
                engine.borrow_mut().cache = Some(*cache_file);
                Self::begin_unit_retrieval(engine, info);
                Self::schedule_tick(engine);
            }
            CacheProbe::CachedError(_) | CacheProbe::StructureMismatch => {
                Self::finish_read_failure(engine);
            }
            CacheProbe::Absent | CacheProbe::Miss => {
                Self::dispatch_file_info(engine, id, Some((imsi, phase)));
            }
        }
    }

    fn dispatch_file_info(engine: &Rc<RefCell<CacheEngine>>, id: EfId, cache_target: Option<(String, SimPhase)>) {
        let driver = engine.borrow().driver.clone();
        let weak = Rc::downgrade(engine);
        driver.read_file_info(
            id,
            Box::new(move |result| {
                let Some(engine) = weak.upgrade() else { return };
                CacheEngine::on_file_info(&engine, id, result, cache_target);
            }),
        );
    }

    fn on_file_info(
        engine: &Rc<RefCell<CacheEngine>>,
        id: EfId,
        result: DriverResult<FileInfoReply>,
        cache_target: Option<(String, SimPhase)>,
    ) {
        let reply = match result {
            Ok(reply) => reply,
            Err(_) => {
                Self::finish_read_failure(engine);
                return;
            }
        };

        let expected_structure = match engine.borrow().queue.front() {
            Some(Operation::Read(op)) => op.expected_structure,
            _ => return,
        };
        if reply.structure != expected_structure {
            Self::finish_read_failure(engine);
            return;
        }

        let info = FileInfo {
            error_type: 0,
            length: reply.length,
            structure: reply.structure,
            record_length: reply.record_length,
        };

        if AccessConditions::decode(reply.access).cacheable() {
            if let Some((imsi, phase)) = &cache_target {
                let path = {
                    let e = engine.borrow();
                    let dir = path::cache_dir(&e.config, imsi, *phase);
                    path::ef_path(&dir, id)
                };
                if let Some(cache_file) = format::create(&path, &info) {
                    engine.borrow_mut().cache = Some(cache_file);
                }
            }
        }

        Self::begin_unit_retrieval(engine, info);
        Self::schedule_tick(engine);
    }

    /// Resolve the head read op's `length`/`record_length`/`current` (and, for
    /// transparent reads, `num_bytes` and the assembly buffer) now that file
    /// info is known, from either the cache header or a driver reply.
    fn begin_unit_retrieval(engine: &Rc<RefCell<CacheEngine>>, info: FileInfo) {
        let transparent_len = {
            let mut e = engine.borrow_mut();
            let op = match e.queue.front_mut() {
                Some(Operation::Read(op)) => op,
                _ => return,
            };
            op.length = info.length;
            op.record_length = info.record_length;
            match op.expected_structure {
                FileStructure::Transparent => {
                    if op.num_bytes == 0 {
                        op.num_bytes = info.length.saturating_sub(op.offset);
                    }
                    op.current = op.start_block();
                    Some(op.num_bytes as usize)
                }
                FileStructure::Fixed | FileStructure::Cyclic => {
                    op.current = 1;
                    None
                }
            }
        };
        if let Some(len) = transparent_len {
            engine.borrow_mut().buffer = Some(vec![0u8; len]);
        }
    }

    fn advance_read_retrieval(engine: &Rc<RefCell<CacheEngine>>) {
        let structure = match engine.borrow().queue.front() {
            Some(Operation::Read(op)) => op.expected_structure,
            _ => return,
        };
        match structure {
            FileStructure::Transparent => Self::advance_transparent(engine),
            FileStructure::Fixed | FileStructure::Cyclic => Self::advance_record(engine),
        }
    }

    // ---- §4.3 transparent read sub-state-machine ----

    fn advance_transparent(engine: &Rc<RefCell<CacheEngine>>) {
        enum Step {
            Done,
            NeedFetch { block: u16, len: u16 },
        }

        let step = {
            let mut e = engine.borrow_mut();
            let CacheEngine { queue, cache, buffer, .. } = &mut *e;
            let op = match queue.front_mut() {
                Some(Operation::Read(op)) => op,
                _ => return,
            };
            let end_block = op.end_block();
            loop {
                if op.current > end_block {
                    break Step::Done;
                }
                let served = match cache.as_mut() {
                    Some(cf) if cf.bit_is_set(op.current) => serve_cached_block(
                        op,
                        cf,
                        buffer
                            .as_mut()
                            .expect("transparent read always has an assembly buffer"),
                    ),
                    _ => false,
                };
                if !served {
                    let (_, block_len) = block_geometry(op, op.current);
                    break Step::NeedFetch {
                        block: op.current,
                        len: block_len,
                    };
                }
                op.current += 1;
            }
        };

        match step {
            Step::Done => Self::finish_read_success(engine),
            Step::NeedFetch { block, len } => Self::dispatch_transparent_block(engine, block, len),
        }
    }

    fn dispatch_transparent_block(engine: &Rc<RefCell<CacheEngine>>, block: u16, len: u16) {
        let (id, driver) = {
            let e = engine.borrow();
            let id = match e.queue.front() {
                Some(Operation::Read(op)) => op.id,
                _ => return,
            };
            (id, e.driver.clone())
        };
        let weak = Rc::downgrade(engine);
        driver.read_file_transparent(
            id,
            block * format::BLOCK_SIZE,
            len,
            Box::new(move |result| {
                let Some(engine) = weak.upgrade() else { return };
                CacheEngine::on_transparent_block(&engine, block, result);
            }),
        );
    }

    fn on_transparent_block(engine: &Rc<RefCell<CacheEngine>>, block: u16, result: DriverResult<Vec<u8>>) {
        let data = match result {
            Ok(data) => data,
            Err(_) => {
                Self::finish_read_failure(engine);
                return;
            }
        };

        {
            let mut e = engine.borrow_mut();
            let CacheEngine { queue, cache, buffer, .. } = &mut *e;
            let op = match queue.front_mut() {
                Some(Operation::Read(op)) => op,
                _ => return,
            };
            let (block_begin, block_len) = block_geometry(op, block);
            let (intra, copy_len, dest) = overlap_geometry(op, block_begin, block_len);
            if copy_len > 0 {
                if let Some(buf) = buffer.as_mut() {
                    let src = intra as usize;
                    let n = copy_len as usize;
                    buf[dest as usize..dest as usize + n].copy_from_slice(&data[src..src + n]);
                }
            }
            if let Some(cf) = cache.as_mut() {
                cf.cache_block(block, format::BLOCK_SIZE, &data);
            }
            op.current = block + 1;
        }

        Self::schedule_tick(engine);
    }

    fn finish_read_success(engine: &Rc<RefCell<CacheEngine>>) {
        let op = {
            let mut e = engine.borrow_mut();
            let buffer = e.buffer.take();
            e.cache = None;
            match e.queue.pop_front() {
                Some(Operation::Read(op)) => Some((op, buffer)),
                Some(other) => {
                    e.queue.push_front(other);
                    None
                }
                None => None,
            }
        };
        if let Some((mut op, buffer)) = op {
            let outcome = ReadOutcome {
                ok: true,
                total_bytes: op.num_bytes,
                current_unit: 0,
                data: buffer.unwrap_or_default(),
                record_length: op.record_length,
            };
            (op.callback)(outcome);
        }
        Self::advance_queue(engine);
    }

    fn finish_read_failure(engine: &Rc<RefCell<CacheEngine>>) {
        let op = {
            let mut e = engine.borrow_mut();
            e.cache = None;
            e.buffer = None;
            match e.queue.pop_front() {
                Some(Operation::Read(op)) => Some(op),
                Some(other) => {
                    e.queue.push_front(other);
                    None
                }
                None => None,
            }
        };
        if let Some(mut op) = op {
            (op.callback)(ReadOutcome::failure());
        }
        Self::advance_queue(engine);
    }

    // ---- §4.4 record read sub-state-machine ----

    fn advance_record(engine: &Rc<RefCell<CacheEngine>>) {
        loop {
            enum Step {
                Done,
                Delivered(ReadOutcome),
                NeedFetch(u16),
            }

            let step = {
                let mut e = engine.borrow_mut();
                let CacheEngine { queue, cache, .. } = &mut *e;
                let op = match queue.front_mut() {
                    Some(Operation::Read(op)) => op,
                    _ => return,
                };
                let total = op.total_records();
                if op.current > total {
                    Step::Done
                } else {
                    let cached = match cache.as_mut() {
                        Some(cf) if cf.bit_is_set(op.current - 1) => {
                            let mut buf = vec![0u8; op.record_length as usize];
                            cf.read_unit_slice(op.current - 1, op.record_length, 0, &mut buf)
                                .ok()
                                .map(|()| buf)
                        }
                        _ => None,
                    };
                    match cached {
                        Some(data) => {
                            let outcome = ReadOutcome {
                                ok: true,
                                total_bytes: op.length,
                                current_unit: op.current,
                                data,
                                record_length: op.record_length,
                            };
                            op.current += 1;
                            Step::Delivered(outcome)
                        }
                        None => Step::NeedFetch(op.current),
                    }
                }
            };

            match step {
                Step::Done => {
                    Self::finish_record_read(engine);
                    return;
                }
                Step::Delivered(outcome) => Self::invoke_read_callback(engine, outcome),
                Step::NeedFetch(record) => {
                    Self::dispatch_record(engine, record);
                    return;
                }
            }
        }
    }

    fn dispatch_record(engine: &Rc<RefCell<CacheEngine>>, record: u16) {
        let (id, structure, record_length, driver) = {
            let e = engine.borrow();
            let op = match e.queue.front() {
                Some(Operation::Read(op)) => op,
                _ => return,
            };
            (op.id, op.expected_structure, op.record_length, e.driver.clone())
        };
        let weak = Rc::downgrade(engine);
        let cb: DriverCallback<Vec<u8>> = Box::new(move |result| {
            let Some(engine) = weak.upgrade() else { return };
            CacheEngine::on_record_fetched(&engine, record, result);
        });
        match structure {
            FileStructure::Fixed => driver.read_file_linear(id, record, record_length, cb),
            FileStructure::Cyclic => driver.read_file_cyclic(id, record, record_length, cb),
            FileStructure::Transparent => {
                debug_assert!(false, "dispatch_record only runs for record-based structures");
            }
        }
    }

    fn on_record_fetched(engine: &Rc<RefCell<CacheEngine>>, record: u16, result: DriverResult<Vec<u8>>) {
        let data = match result {
            Ok(data) => data,
            Err(_) => {
                Self::finish_read_failure(engine);
                return;
            }
        };

        let outcome = {
            let mut e = engine.borrow_mut();
            let CacheEngine { queue, cache, .. } = &mut *e;
            let op = match queue.front_mut() {
                Some(Operation::Read(op)) => op,
                _ => return,
            };
            if let Some(cf) = cache.as_mut() {
                cf.cache_block(record - 1, op.record_length, &data);
            }
            let outcome = ReadOutcome {
                ok: true,
                total_bytes: op.length,
                current_unit: record,
                data,
                record_length: op.record_length,
            };
            op.current = record + 1;
            outcome
        };

        Self::invoke_read_callback(engine, outcome);
        Self::schedule_tick(engine);
    }

    fn finish_record_read(engine: &Rc<RefCell<CacheEngine>>) {
        {
            let mut e = engine.borrow_mut();
            e.cache = None;
            e.buffer = None;
            e.queue.pop_front();
        }
        Self::advance_queue(engine);
    }

    /// Invoke the head read op's callback without holding the engine's
    /// `RefCell` borrow across the call, so a callback that turns around and
    /// enqueues another operation on this same engine does not panic on a
    /// re-entrant borrow. The callback is swapped out, called, then swapped
    /// back in (the queue head is unchanged across record delivery).
    fn invoke_read_callback(engine: &Rc<RefCell<CacheEngine>>, outcome: ReadOutcome) {
        let mut callback: ReadCallback = {
            let mut e = engine.borrow_mut();
            let op = match e.queue.front_mut() {
                Some(Operation::Read(op)) => op,
                _ => return,
            };
            std::mem::replace(&mut op.callback, Box::new(|_| {}))
        };
        callback(outcome);
        let mut e = engine.borrow_mut();
        if let Some(Operation::Read(op)) = e.queue.front_mut() {
            op.callback = callback;
        }
    }

    // ---- write path (§4.6) ----

    fn tick_write(engine: &Rc<RefCell<CacheEngine>>) {
        let (id, structure, record, data, driver) = {
            let e = engine.borrow();
            let op = match e.queue.front() {
                Some(Operation::Write(op)) => op,
                _ => return,
            };
            (op.id, op.structure, op.record, op.data.clone(), e.driver.clone())
        };
        let weak = Rc::downgrade(engine);
        let cb: DriverCallback<()> = Box::new(move |result| {
            let Some(engine) = weak.upgrade() else { return };
            CacheEngine::on_write_complete(&engine, result.is_ok());
        });
        let length = data.len() as u16;
        match structure {
            FileStructure::Transparent => driver.write_file_transparent(id, 0, length, data, cb),
            FileStructure::Fixed => driver.write_file_linear(id, record, length, data, cb),
            FileStructure::Cyclic => driver.write_file_cyclic(id, length, data, cb),
        }
    }

    fn on_write_complete(engine: &Rc<RefCell<CacheEngine>>, ok: bool) {
        let op = {
            let mut e = engine.borrow_mut();
            match e.queue.pop_front() {
                Some(Operation::Write(op)) => Some(op),
                Some(other) => {
                    e.queue.push_front(other);
                    None
                }
                None => None,
            }
        };
        if let Some(op) = op {
            (op.callback)(ok);
        }
        Self::advance_queue(engine);
    }
}

/// `(block_begin_in_file, bytes_actually_present_in_this_unit_of_the_file)`;
/// the latter is short only for the final block of a file whose length isn't
/// a multiple of 256.
fn block_geometry(op: &ReadOp, block: u16) -> (u16, u16) {
    let block_begin = block * format::BLOCK_SIZE;
    let avail = op.length.saturating_sub(block_begin).min(format::BLOCK_SIZE);
    (block_begin, avail)
}

/// Overlap between the requested byte range and one block's file-relative
/// extent: `(offset into the block/driver reply, bytes to copy, offset into
/// the assembly buffer)`.
fn overlap_geometry(op: &ReadOp, block_begin: u16, block_len: u16) -> (u16, u16, u16) {
    let req_start = op.offset;
    let req_end = op.offset + op.num_bytes;
    let block_end = block_begin + block_len;
    let overlap_start = req_start.max(block_begin);
    let overlap_end = req_end.min(block_end);
    let copy_len = overlap_end.saturating_sub(overlap_start);
    (overlap_start - block_begin, copy_len, overlap_start - req_start)
}

fn serve_cached_block(op: &ReadOp, cf: &mut CacheFile, buffer: &mut [u8]) -> bool {
    let (block_begin, block_len) = block_geometry(op, op.current);
    let (intra, copy_len, dest) = overlap_geometry(op, block_begin, block_len);
    if copy_len == 0 {
        return true;
    }
    let mut tmp = vec![0u8; copy_len as usize];
    if cf
        .read_unit_slice(op.current, format::BLOCK_SIZE, intra, &mut tmp)
        .is_err()
    {
        log::debug!("simfs: cache read failed for a bit-set block, falling back to driver");
        return false;
    }
    buffer[dest as usize..dest as usize + copy_len as usize].copy_from_slice(&tmp);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;
    use crate::queue::ImmediateScheduler;
    use std::cell::RefCell as StdRefCell;

    struct FixtureDriver {
        files: StdRefCell<std::collections::HashMap<EfId, FixtureFile>>,
        info_calls: StdRefCell<u32>,
        block_calls: StdRefCell<Vec<(EfId, u16, u16)>>,
        record_calls: StdRefCell<Vec<(EfId, u16)>>,
    }

    struct FixtureFile {
        structure: FileStructure,
        data: Vec<u8>,
        record_length: u16,
        access: [u8; 3],
    }

    impl FixtureDriver {
        fn new() -> Self {
            FixtureDriver {
                files: StdRefCell::new(std::collections::HashMap::new()),
                info_calls: StdRefCell::new(0),
                block_calls: StdRefCell::new(Vec::new()),
                record_calls: StdRefCell::new(Vec::new()),
            }
        }

        fn add(&self, id: EfId, structure: FileStructure, data: Vec<u8>, record_length: u16, access: [u8; 3]) {
            self.files.borrow_mut().insert(
                id,
                FixtureFile {
                    structure,
                    data,
                    record_length,
                    access,
                },
            );
        }
    }

    impl SimDriver for FixtureDriver {
        fn read_file_info(&self, id: EfId, done: DriverCallback<FileInfoReply>) {
            *self.info_calls.borrow_mut() += 1;
            let files = self.files.borrow();
            match files.get(&id) {
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
            self.block_calls.borrow_mut().push((id, offset, num_bytes));
            let files = self.files.borrow();
            match files.get(&id) {
                Some(f) => done(Ok(f.data[offset as usize..(offset + num_bytes) as usize].to_vec())),
                None => done(Err(DriverError::Failed)),
            }
        }

        fn read_file_linear(&self, id: EfId, record: u16, record_length: u16, done: DriverCallback<Vec<u8>>) {
            self.record_calls.borrow_mut().push((id, record));
            let files = self.files.borrow();
            let f = files.get(&id).unwrap();
            let start = (record - 1) as usize * record_length as usize;
            done(Ok(f.data[start..start + record_length as usize].to_vec()));
        }
    }

    struct FixtureIdentity {
        imsi: Option<String>,
    }

    impl SimIdentity for FixtureIdentity {
        fn imsi(&self) -> Option<String> {
            self.imsi.clone()
        }

        fn phase(&self) -> SimPhase {
            SimPhase::Phase2Plus
        }
    }

    fn setup(tmp: &std::path::Path) -> (SimFs, Rc<FixtureDriver>) {
        let driver = Rc::new(FixtureDriver::new());
        let identity = Rc::new(FixtureIdentity {
            imsi: Some("001010000000001".to_string()),
        });
        let scheduler = Rc::new(ImmediateScheduler::new());
        let config = SimFsConfig::new(tmp);
        let fs = SimFs::new(config, driver.clone(), identity, scheduler);
        (fs, driver)
    }

    #[test]
    fn cold_transparent_read_populates_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let (fs, driver) = setup(tmp.path());
        let data: Vec<u8> = (0u8..10).collect();
        driver.add(0x6f05, FileStructure::Transparent, data.clone(), 10, [0x0f, 0x00, 0xff]);

        let result = Rc::new(StdRefCell::new(None));
        let slot = result.clone();
        fs.read(
            0x6f05,
            FileStructure::Transparent,
            0,
            10,
            Box::new(move |outcome| *slot.borrow_mut() = Some(outcome)),
        );

        let outcome = result.borrow_mut().take().unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.data, data);
        assert_eq!(*driver.info_calls.borrow(), 1);
        assert_eq!(driver.block_calls.borrow().len(), 1);
    }

    #[test]
    fn warm_sub_block_read_issues_no_driver_call() {
        let tmp = tempfile::tempdir().unwrap();
        let (fs, driver) = setup(tmp.path());
        let data: Vec<u8> = (0u8..10).collect();
        driver.add(0x6f05, FileStructure::Transparent, data, 10, [0x0f, 0x00, 0xff]);

        fs.read(0x6f05, FileStructure::Transparent, 0, 10, Box::new(|_| {}));
        assert_eq!(driver.block_calls.borrow().len(), 1);

        let result = Rc::new(StdRefCell::new(None));
        let slot = result.clone();
        fs.read(
            0x6f05,
            FileStructure::Transparent,
            3,
            4,
            Box::new(move |outcome| *slot.borrow_mut() = Some(outcome)),
        );
        let outcome = result.borrow_mut().take().unwrap();
        assert_eq!(outcome.data, vec![3, 4, 5, 6]);
        // No new block fetch: still just the one from the cold read.
        assert_eq!(driver.block_calls.borrow().len(), 1);
    }

    #[test]
    fn straddling_read_fetches_both_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let (fs, driver) = setup(tmp.path());
        let data: Vec<u8> = (0..300u32).map(|b| (b % 256) as u8).collect();
        driver.add(0x6f10, FileStructure::Transparent, data.clone(), 300, [0x0f, 0x00, 0xff]);

        let result = Rc::new(StdRefCell::new(None));
        let slot = result.clone();
        fs.read(
            0x6f10,
            FileStructure::Transparent,
            250,
            20,
            Box::new(move |outcome| *slot.borrow_mut() = Some(outcome)),
        );
        let outcome = result.borrow_mut().take().unwrap();
        assert_eq!(outcome.data, data[250..270]);
        let calls = driver.block_calls.borrow();
        assert_eq!(*calls, vec![(0x6f10, 0, 256), (0x6f10, 256, 44)]);
    }

    #[test]
    fn fixed_records_mixed_hit_and_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let (fs, driver) = setup(tmp.path());
        let data: Vec<u8> = (0u8..80).collect();
        driver.add(0x6f3c, FileStructure::Fixed, data.clone(), 20, [0x0f, 0x00, 0xff]);

        let received = Rc::new(StdRefCell::new(Vec::new()));
        let slot = received.clone();
        fs.read(
            0x6f3c,
            FileStructure::Fixed,
            0,
            0,
            Box::new(move |outcome| slot.borrow_mut().push(outcome)),
        );

        let got = received.borrow();
        assert_eq!(got.len(), 4);
        for (i, outcome) in got.iter().enumerate() {
            assert_eq!(outcome.current_unit, i as u16 + 1);
            assert_eq!(outcome.data, data[i * 20..i * 20 + 20]);
        }
        assert_eq!(driver.record_calls.borrow().len(), 4);
    }

    #[test]
    fn uncacheable_ef_leaves_no_cache_file_and_refetches_every_time() {
        let tmp = tempfile::tempdir().unwrap();
        let (fs, driver) = setup(tmp.path());
        let data: Vec<u8> = (0u8..10).collect();
        // update = CHV1: not cacheable per I4.
        driver.add(0x6f07, FileStructure::Transparent, data.clone(), 10, [0x01, 0x00, 0x00]);

        for _ in 0..3 {
            let result = Rc::new(StdRefCell::new(None));
            let slot = result.clone();
            fs.read(
                0x6f07,
                FileStructure::Transparent,
                0,
                10,
                Box::new(move |outcome| *slot.borrow_mut() = Some(outcome)),
            );
            assert!(result.borrow().as_ref().unwrap().ok);
        }

        assert_eq!(*driver.info_calls.borrow(), 3);
        assert_eq!(driver.block_calls.borrow().len(), 3);
        let dir = path::cache_dir(
            &SimFsConfig::new(tmp.path()),
            "001010000000001",
            SimPhase::Phase2Plus,
        );
        assert!(!path::ef_path(&dir, 0x6f07).exists());
    }

    #[test]
    fn fifo_across_two_operations() {
        let tmp = tempfile::tempdir().unwrap();
        let (fs, driver) = setup(tmp.path());
        driver.add(0x6f01, FileStructure::Transparent, vec![1, 2], 2, [0x0f, 0x00, 0xff]);
        driver.add(0x6f02, FileStructure::Transparent, vec![3, 4], 2, [0x0f, 0x00, 0xff]);

        let order = Rc::new(StdRefCell::new(Vec::new()));
        let log1 = order.clone();
        fs.read(0x6f01, FileStructure::Transparent, 0, 2, Box::new(move |_| log1.borrow_mut().push(1)));
        let log2 = order.clone();
        fs.read(0x6f02, FileStructure::Transparent, 0, 2, Box::new(move |_| log2.borrow_mut().push(2)));

        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}
