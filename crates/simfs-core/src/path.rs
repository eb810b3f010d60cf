//! Path & version manager.
//!
//! Computes per-subscriber cache directory paths keyed by `(IMSI, phase)`,
//! and implements the coarse-grained version-bump invalidation mechanism
//! that is the only supported way to wipe stale caches (§4.7).

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::SimFsConfig;
use crate::error::SimFsError;
use crate::model::{EfId, SimPhase};

/// Current on-disk format version. A cache file or directory stamped with
/// any other byte is unusable (I5) and gets wiped by [`check_version`].
pub const SIM_FS_VERSION: u8 = 1;

/// Cache files (and the version sentinel) are created user-only read/write.
pub const SIM_CACHE_MODE: u32 = 0o600;

/// Per-subscriber cache directory: `<storage_root>/<imsi>-<phase>`.
pub fn cache_dir(config: &SimFsConfig, imsi: &str, phase: SimPhase) -> PathBuf {
    config.storage_root.join(format!("{imsi}-{phase}"))
}

/// Per-EF cache file path: `<cache_dir>/<efid:%04x>`.
pub fn ef_path(dir: &Path, id: EfId) -> PathBuf {
    dir.join(format!("{id:04x}"))
}

/// Version sentinel path: `<cache_dir>/version`.
pub fn version_path(dir: &Path) -> PathBuf {
    dir.join("version")
}

/// Parse a cache-file name back into an EF id: must be exactly four
/// lower-case hex digits, matching `ef_path`'s own formatting exactly so
/// unrelated files sharing the directory are never touched.
fn parse_ef_filename(name: &str) -> Option<EfId> {
    if name.len() != 4 || !name.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return None;
    }
    u16::from_str_radix(name, 16).ok()
}

/// Run the version check for one subscriber's cache directory: if the
/// sentinel is absent or stale, delete every per-EF cache file and rewrite
/// the sentinel with the current version. Must be called once before any
/// operation touches the cache (I5).
pub fn check_version(config: &SimFsConfig, imsi: &str, phase: SimPhase) -> Result<(), SimFsError> {
    let dir = cache_dir(config, imsi, phase);
    let vpath = version_path(&dir);

    if read_version_byte(&vpath)? == Some(SIM_FS_VERSION) {
        return Ok(());
    }

    let removed = wipe_ef_caches(&dir)?;
    log::info!(
        "simfs: cache format mismatch in {}, wiped {removed} file(s)",
        dir.display()
    );

    write_version_byte(&dir, &vpath)?;
    Ok(())
}

fn read_version_byte(vpath: &Path) -> Result<Option<u8>, SimFsError> {
    match fs::File::open(vpath) {
        Ok(mut f) => {
            let mut buf = [0u8; 1];
            match f.read(&mut buf) {
                Ok(1) => Ok(Some(buf[0])),
                _ => Ok(None),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SimFsError::io(vpath, e)),
    }
}

/// Delete every regular file under `dir` whose name is a 4-hex-digit EF id.
/// Iteration order does not influence the outcome (every matching entry is
/// removed regardless of the order `read_dir` yields them in).
fn wipe_ef_caches(dir: &Path) -> Result<usize, SimFsError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(SimFsError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| SimFsError::io(dir, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if parse_ef_filename(&name).is_none() {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SimFsError::io(&path, e)),
        }
    }
    Ok(removed)
}

fn write_version_byte(dir: &Path, vpath: &Path) -> Result<(), SimFsError> {
    fs::create_dir_all(dir).map_err(|e| SimFsError::io(dir, e))?;
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(vpath)
        .map_err(|e| SimFsError::io(vpath, e))?;
    f.set_permissions(fs::Permissions::from_mode(SIM_CACHE_MODE))
        .map_err(|e| SimFsError::io(vpath, e))?;
    f.write_all(&[SIM_FS_VERSION])
        .map_err(|e| SimFsError::io(vpath, e))
}
