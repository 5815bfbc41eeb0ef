//-
// Copyright (c) 2021, Jason Lingle
//
// This file is part of Mockmap.
//
// Mockmap is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of  the License, or (at your option)
// any later version.
//
// Mockmap is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without even  the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mockmap. If not, see <http://www.gnu.org/licenses/>.

//! Process-wide state shared by everything under one repository root: the
//! UID allocator and the folder cache.
//!
//! # UID allocation
//!
//! UIDs must be unique and monotonically increasing for the life of the
//! repository, including across process restarts and crashes. Persisting
//! every allocation would cost one disk write per message, so the allocator
//! instead reserves UIDs in blocks: the value persisted on disk is always an
//! upper bound that no handed-out UID has reached. On a clean shutdown the
//! exact next value is written back so nothing is wasted; after a crash the
//! allocator resumes from the persisted bound, wasting at most one block of
//! UIDs but never reusing one.
//!
//! # Folder cache
//!
//! At most one `Folder` instance may be live per mailbox path, so that
//! listener registrations and in-memory index state are never split across
//! two views of the same files. The cache enforces this by keying folders on
//! the lexically-normalised path. Entries idle for longer than twelve hours
//! are dropped by a sweep that runs before each cache access.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::filestore::folder::Folder;
use crate::filestore::model::Uid;
use crate::filestore::repository::path_to_full_name;
use crate::filestore::settings::{UidRangeFile, UID_RANGE_FILE};
use crate::support::error::Error;
use crate::support::file_ops::normalize_path;

/// How many UIDs are reserved per persisted watermark update.
///
/// Bounds disk writes to one per `UID_RANGE` allocations, and bounds the
/// UIDs wasted by a crash to at most `UID_RANGE`.
pub const UID_RANGE: u64 = 1000;

/// Folders idle longer than this are dropped from the cache.
const MAX_CACHE_IDLE_MILLIS: i64 = 12 * 60 * 60 * 1000;

/// Allocates UIDs for one repository root.
pub struct UidAllocator {
    file: UidRangeFile,
    state: Mutex<UidState>,
}

struct UidState {
    next_uid: u64,
    reserved_upper_bound: u64,
}

impl UidAllocator {
    /// Open the allocator, resuming from the persisted reservation if one
    /// exists.
    ///
    /// If the previous process crashed mid-block, this skips straight past
    /// the whole reserved block rather than trying to discover how much of
    /// it was consumed.
    pub(super) fn open(root: &Path) -> Result<Self, Error> {
        let file = UidRangeFile::new(root.join(UID_RANGE_FILE));
        let next_uid = match file.load()? {
            None => 1,
            Some(bound) => bound,
        };
        let reserved_upper_bound = next_uid + UID_RANGE;
        file.store(reserved_upper_bound)?;
        Ok(UidAllocator {
            file,
            state: Mutex::new(UidState {
                next_uid,
                reserved_upper_bound,
            }),
        })
    }

    /// Return a UID strictly greater than every UID previously returned for
    /// this repository root, in this or any prior process lifetime.
    pub fn allocate(&self) -> Result<Uid, Error> {
        let mut state = self.state.lock().unwrap();
        let result = state.next_uid;
        state.next_uid += 1;
        if state.next_uid >= state.reserved_upper_bound {
            // The new bound must be on disk before any UID of the next
            // block is handed out.
            state.reserved_upper_bound = state.next_uid + UID_RANGE;
            self.file.store(state.reserved_upper_bound)?;
        }
        Ok(Uid::of(result).expect("UIDs start at 1"))
    }

    /// Persist the exact next UID so the unconsumed remainder of the
    /// current block is not wasted. Call on clean shutdown only.
    pub fn deinit(&self) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        self.file.store(state.next_uid)
    }
}

/// Per-repository-root shared state: the UID allocator and the folder
/// cache.
///
/// One `StoreContext` is constructed per repository root and passed by
/// shared reference into everything it serves; there is no global ambient
/// instance.
pub struct StoreContext {
    root: PathBuf,
    uids: Arc<UidAllocator>,
    cache: Mutex<HashMap<PathBuf, Arc<Folder>>>,
}

impl StoreContext {
    pub fn open(root: &Path) -> Result<Self, Error> {
        if !root.is_dir() {
            fs::create_dir_all(root)?;
        }
        Ok(StoreContext {
            root: root.to_owned(),
            uids: Arc::new(UidAllocator::open(root)?),
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uids(&self) -> &Arc<UidAllocator> {
        &self.uids
    }

    /// Return the single live folder for `path`, constructing and loading
    /// it from disk if it is not cached.
    ///
    /// While the entry remains cached, every call with an equivalent path
    /// returns the identical instance.
    pub fn get_or_create(&self, path: &Path) -> Result<Arc<Folder>, Error> {
        let path = normalize_path(path);
        let mut cache = self.cache.lock().unwrap();
        sweep(&mut cache);

        if let Some(folder) = cache.get(&path) {
            folder.touch();
            return Ok(Arc::clone(folder));
        }

        let full_name = path_to_full_name(&self.root, &path);
        let folder = Arc::new(Folder::open(
            path.clone(),
            full_name,
            Arc::clone(&self.uids),
        )?);
        cache.insert(path, Arc::clone(&folder));
        Ok(folder)
    }

    /// Drop the cache entry for `path`, if any. Used on logout and
    /// cleanup.
    pub fn remove(&self, path: &Path) {
        let path = normalize_path(path);
        if self.cache.lock().unwrap().remove(&path).is_some() {
            debug!("Removed folder {} from cache", path.display());
        }
    }

    /// Persist the allocator's exact position. Call on clean shutdown.
    pub fn deinit(&self) -> Result<(), Error> {
        self.uids.deinit()
    }
}

/// Drop cache entries that have been idle past the threshold.
///
/// This does not check whether some caller still holds the `Arc`: an
/// evicted folder keeps operating against the same files, unsynchronised
/// with any fresh instance a later resolution constructs. Known gap,
/// tolerated for a test server.
fn sweep(cache: &mut HashMap<PathBuf, Arc<Folder>>) {
    cache.retain(|path, folder| {
        let keep = folder.idle_millis() <= MAX_CACHE_IDLE_MILLIS;
        if !keep {
            debug!(
                "Dropping folder {} from cache after {}ms idle",
                path.display(),
                folder.idle_millis()
            );
        }
        keep
    });
}
