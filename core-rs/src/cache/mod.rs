//! Cache module for per-client-type working folders
//!
//! Allocates `<cacheParentFolder>/<clientType>/data-<N>` folders guarded by
//! `.lock` files so that no two live instances share one.

pub mod allocator;

pub use allocator::{
    assign_cache_folder, scan_cache_folders, try_assign_cache_folder, CacheDirState,
    CacheDirStatus, CacheLock,
};
