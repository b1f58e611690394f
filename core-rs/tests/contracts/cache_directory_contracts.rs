// Cache Directory Contract Tests
//
// The `<parent>/<clientType>/data-<N>/.lock` layout is shared by every copy of
// a client, including older builds. These tests pin that layout and the
// meaning of the lock file.

use fs2::FileExt;
use slotlock_core::cache::try_assign_cache_folder;
use slotlock_core::Instance;
use std::fs::{self, OpenOptions};
use tempfile::TempDir;

/// WHY: Folder names are `data-<N>` directly under `<parent>/<clientType>`
/// REASON: Every client build scans the same names
/// BREAKS: Older and newer builds sharing (or ignoring) each other's folders
#[test]
fn layout_is_parent_client_type_data_n() {
    let temp = TempDir::new().unwrap();
    let mut instance = Instance::new("spoon", temp.path(), Vec::new());

    let path = try_assign_cache_folder(&mut instance).unwrap();

    assert_eq!(path, temp.path().join("spoon").join("data-1"));
    assert!(path.join(".lock").is_file());
}

/// WHY: An unlocked `data-3` is reused instead of creating `data-4`
/// REASON: Repeated runs must not grow the cache root without bound
/// BREAKS: Disk usage grows by one folder per run
#[test]
fn unlocked_folder_is_reused() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("spoon").join("data-3");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(".lock"), b"").unwrap();

    let mut instance = Instance::new("spoon", temp.path(), Vec::new());
    assert_eq!(try_assign_cache_folder(&mut instance).unwrap(), dir);
    assert!(!temp.path().join("spoon").join("data-4").exists());
}

/// WHY: A held lock means "in use"; the next number is created and locked
/// REASON: Two live instances must never share working data
/// BREAKS: Cache corruption between concurrent instances
#[test]
fn held_folder_forces_new_locked_folder() {
    let temp = TempDir::new().unwrap();
    let dir1 = temp.path().join("spoon").join("data-1");
    fs::create_dir_all(&dir1).unwrap();
    let holder = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dir1.join(".lock"))
        .unwrap();
    holder.lock_exclusive().unwrap();

    let mut instance = Instance::new("spoon", temp.path(), Vec::new());
    let path = try_assign_cache_folder(&mut instance).unwrap();
    assert_eq!(path, temp.path().join("spoon").join("data-2"));

    // data-2 is now held by the instance
    let probe = OpenOptions::new().write(true).open(path.join(".lock")).unwrap();
    assert!(probe.try_lock_exclusive().is_err());
}

/// WHY: Creating the cache root is idempotent
/// REASON: Every start calls it, the first one creates it
/// BREAKS: Second start of any client type fails
#[test]
fn repeated_allocation_against_same_root_is_safe() {
    let temp = TempDir::new().unwrap();
    let parent = temp.path().join("empty-root");

    let mut first = Instance::new("spoon", &parent, Vec::new());
    let mut second = Instance::new("spoon", &parent, Vec::new());

    assert!(try_assign_cache_folder(&mut first).is_ok());
    assert!(try_assign_cache_folder(&mut second).is_ok());
}
