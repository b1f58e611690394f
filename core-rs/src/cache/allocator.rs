//! Per-client-type cache folder allocation
//!
//! Layout: `<cacheParentFolder>/<clientType>/data-<N>/.lock`
//!
//! A `data-<N>` folder is in use exactly while some process holds an exclusive
//! lock on its `.lock` file. Folders whose owner died are unlocked by the OS
//! and get reused; new folders are only created when every existing one is held.

use fs2::FileExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SlotError};
use crate::instance::Instance;

pub const DATA_DIR_PREFIX: &str = "data";
pub const LOCK_FILE_NAME: &str = ".lock";

static DATA_DIR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data-([0-9]+)$").expect("data dir pattern is valid"));

/// Exclusive lock on a cache folder's `.lock` file, released on drop
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    file: File,
}

impl CacheLock {
    /// Path of the locked `.lock` file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Lock state of a `data-<N>` folder as seen by a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDirState {
    /// `.lock` exists and nobody holds it
    Free,
    /// `.lock` is held by a live process
    InUse,
    /// No `.lock` file at all
    Unguarded,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheDirStatus {
    pub number: u64,
    pub path: PathBuf,
    pub state: CacheDirState,
}

/// Number `N` of a `data-<N>` folder name
pub fn data_dir_number(name: &str) -> Option<u64> {
    DATA_DIR_PATTERN
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn data_dir_name(number: u64) -> String {
    format!("{}-{}", DATA_DIR_PREFIX, number)
}

/// `data-<N>` subdirectories of a client cache root, in filesystem order
fn numbered_dirs(root: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(root = %root.display(), error = %e, "Skipping unreadable cache entry");
                continue;
            }
        };
        let Some(number) = entry.file_name().to_str().and_then(data_dir_number) else {
            continue;
        };
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push((number, entry.path()));
        }
    }
    Ok(dirs)
}

/// Try to lock a `.lock` file without blocking
///
/// `Ok(None)` means someone else holds it.
fn try_lock(lock_path: &Path, create: bool) -> io::Result<Option<CacheLock>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .open(lock_path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(CacheLock {
            path: lock_path.to_path_buf(),
            file,
        })),
        Err(e) => {
            debug!(path = %lock_path.display(), error = %e, "Lock active on another program");
            Ok(None)
        }
    }
}

/// Pick the first existing folder nobody holds
fn select_existing(dirs: Vec<(u64, PathBuf)>) -> Option<(PathBuf, Option<CacheLock>)> {
    for (_, dir) in dirs {
        let lock_path = dir.join(LOCK_FILE_NAME);

        if !lock_path.exists() {
            // Unowned. Guard it for our lifetime; a racing process that locked
            // it first wins and we keep looking.
            match try_lock(&lock_path, true) {
                Ok(Some(lock)) => return Some((dir, Some(lock))),
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %lock_path.display(), error = %e, "Could not create lock file, using folder unguarded");
                    return Some((dir, None));
                }
            }
        }

        match try_lock(&lock_path, false) {
            Ok(Some(lock)) => return Some((dir, Some(lock))),
            Ok(None) => {}
            Err(e) => {
                error!(path = %lock_path.display(), error = %e, "Error locking file in data cache directory");
            }
        }
    }
    None
}

/// Create `data-<max+1>` (or the next name nobody created first) and lock it
fn create_next(root: &Path, mut max_found: u64) -> Result<(PathBuf, CacheLock)> {
    loop {
        max_found = max_found.checked_add(1).ok_or_else(|| {
            SlotError::CacheDirectoryIo(format!(
                "No data folder number left after {} in {}",
                max_found,
                root.display()
            ))
        })?;
        let candidate = root.join(data_dir_name(max_found));

        match fs::create_dir(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Another process slipped in and created it, skip over them
                continue;
            }
            Err(e) => {
                return Err(SlotError::CacheDirectoryIo(format!(
                    "Failed to create {}: {}",
                    candidate.display(),
                    e
                )));
            }
        }

        let lock_path = candidate.join(LOCK_FILE_NAME);
        match try_lock(&lock_path, true) {
            Ok(Some(lock)) => return Ok((candidate, lock)),
            Ok(None) => {
                // A scanner saw the fresh folder and guarded it before us
                debug!(path = %candidate.display(), "New cache folder taken by another process");
            }
            Err(e) => {
                return Err(SlotError::CacheDirectoryIo(format!(
                    "Failed to lock {}: {}",
                    lock_path.display(),
                    e
                )));
            }
        }
    }
}

/// Assign a cache folder to the instance, surfacing I/O failures
///
/// Idempotent per instance: once a folder is assigned it is returned as is.
pub fn try_assign_cache_folder(instance: &mut Instance) -> Result<PathBuf> {
    if let Some(existing) = instance.cache_path() {
        return Ok(existing.to_path_buf());
    }

    let root = instance.cache_parent_folder().join(instance.client_type());
    fs::create_dir_all(&root).map_err(|e| {
        SlotError::CacheDirectoryIo(format!("Failed to create {}: {}", root.display(), e))
    })?;

    let dirs = numbered_dirs(&root).map_err(|e| {
        SlotError::CacheDirectoryIo(format!("Failed to read {}: {}", root.display(), e))
    })?;
    let max_found = dirs.iter().map(|(n, _)| *n).max().unwrap_or(0);

    let (path, lock) = match select_existing(dirs) {
        Some(selected) => selected,
        None => {
            let (path, lock) = create_next(&root, max_found)?;
            (path, Some(lock))
        }
    };

    instance.set_cache(path.clone(), lock);
    Ok(path)
}

/// Assign a cache folder, logging failures instead of returning them
pub fn assign_cache_folder(instance: &mut Instance) -> Option<PathBuf> {
    match try_assign_cache_folder(instance) {
        Ok(path) => {
            info!(path = %path.display(), "Cache folder assigned");
            Some(path)
        }
        Err(e) => {
            error!(error = %e, "Error creating data cache folder");
            None
        }
    }
}

/// Report every `data-<N>` folder under a client cache root, sorted by N
///
/// Free folders are detected by briefly taking their lock.
pub fn scan_cache_folders(root: &Path) -> Result<Vec<CacheDirStatus>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut statuses: Vec<CacheDirStatus> = numbered_dirs(root)?
        .into_iter()
        .map(|(number, path)| {
            let lock_path = path.join(LOCK_FILE_NAME);
            let state = if !lock_path.exists() {
                CacheDirState::Unguarded
            } else {
                match try_lock(&lock_path, false) {
                    Ok(Some(_lock)) => CacheDirState::Free,
                    _ => CacheDirState::InUse,
                }
            };
            CacheDirStatus { number, path, state }
        })
        .collect();

    statuses.sort_by_key(|s| s.number);
    Ok(statuses)
}
