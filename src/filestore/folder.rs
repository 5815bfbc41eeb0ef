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

//! A single mailbox folder.
//!
//! A `Folder` owns one mailbox directory: its settings file, its message
//! index, and its content files. It has no explicit state machine; the
//! invariant loop is load-on-construct, serve operations, persist on every
//! mutation before returning. There is no write-behind.
//!
//! All index mutation runs under the folder's single mutex, held across the
//! whole read-modify-persist sequence so that the in-memory list and the
//! index file cannot be observed out of step. Listener fan-out happens after
//! the mutex is released but before the triggering call returns.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{error, info};

use crate::filestore::content::{ContentCodec, EmlFileCodec};
use crate::filestore::context::UidAllocator;
use crate::filestore::index::{MessageEntry, MessageIndex, INDEX_FILE};
use crate::filestore::model::{
    Flags, FolderListener, IdRange, StoredMessage, Uid,
};
use crate::filestore::settings::{FolderSettings, FOLDER_SETTINGS_FILE};
use crate::support::error::Error;

/// The UIDVALIDITY value reported for every folder.
///
/// UIDs are stored directly in the per-message metadata, so they remain
/// valid across restarts and UIDVALIDITY never needs to rotate. See RFC
/// 2683 §3.4.3.
pub const UID_VALIDITY: u32 = 42;

/// One mailbox folder, backed by a directory on disk.
pub struct Folder {
    log_prefix: String,
    name: String,
    full_name: String,
    path: PathBuf,
    uids: Arc<UidAllocator>,
    codec: Box<dyn ContentCodec>,
    inner: Mutex<FolderInner>,
    listeners: Mutex<Vec<Arc<dyn FolderListener>>>,
    /// Milliseconds-since-epoch of the last public operation, used only for
    /// cache eviction.
    last_access: AtomicI64,
}

struct FolderInner {
    settings: FolderSettings,
    index: MessageIndex,
}

impl fmt::Debug for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Folder")
            .field("name", &self.name)
            .field("full_name", &self.full_name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Folder {
    /// Open the folder at `path`, creating the directory and default
    /// settings if it does not exist yet, or loading settings and index if
    /// it does.
    ///
    /// Construction should go through the repository context's cache so that
    /// at most one `Folder` exists per path.
    pub(super) fn open(
        path: PathBuf,
        full_name: String,
        uids: Arc<UidAllocator>,
    ) -> Result<Self, Error> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let log_prefix = format!("folder:{}", full_name);

        let mut settings =
            FolderSettings::new(path.join(FOLDER_SETTINGS_FILE));
        let mut index = MessageIndex::new(path.join(INDEX_FILE));
        let codec = Box::new(EmlFileCodec::new(path.clone()));

        if path.is_dir() {
            settings.load()?;
            index.load(&*codec)?;
        } else {
            fs::create_dir_all(&path)?;
            settings.store()?;
        }

        let folder = Folder {
            log_prefix,
            name,
            full_name,
            path,
            uids,
            codec,
            inner: Mutex::new(FolderInner { settings, index }),
            listeners: Mutex::new(Vec::new()),
            last_access: AtomicI64::new(Utc::now().timestamp_millis()),
        };
        Ok(folder)
    }

    /// The folder's short name (the final segment of its full name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The folder's fully-qualified hierarchical name, e.g.
    /// `#mail.INBOX.work`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Milliseconds since the last public operation on this folder.
    pub fn idle_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.last_access.load(SeqCst)
    }

    pub(super) fn touch(&self) {
        self.last_access
            .store(Utc::now().timestamp_millis(), SeqCst);
    }

    #[cfg(test)]
    pub(super) fn force_idle(&self, millis: i64) {
        self.last_access.fetch_sub(millis, SeqCst);
    }

    pub fn uid_validity(&self) -> u32 {
        UID_VALIDITY
    }

    pub fn is_selectable(&self) -> bool {
        self.touch();
        self.inner.lock().unwrap().settings.is_selectable()
    }

    pub fn set_selectable(&self, selectable: bool) -> Result<(), Error> {
        self.touch();
        let mut inner = self.inner.lock().unwrap();
        inner.settings.set_selectable(selectable);
        inner.settings.store()
    }

    /// Whether this folder has child folders.
    ///
    /// Not cached; the call is infrequent and the filesystem is the source
    /// of truth.
    pub fn has_children(&self) -> Result<bool, Error> {
        self.touch();
        for entry in fs::read_dir(&self.path)? {
            if entry?.file_type()?.is_dir() {
                // Every directory inside a folder is a child folder
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn message_count(&self) -> usize {
        self.touch();
        self.inner.lock().unwrap().index.len()
    }

    pub fn unseen_count(&self) -> usize {
        self.touch();
        self.inner.lock().unwrap().index.unseen_count()
    }

    pub fn recent_count(&self) -> usize {
        self.touch();
        self.inner.lock().unwrap().index.recent_count()
    }

    /// The sequence number of the first unseen message, if any.
    pub fn first_unseen(&self) -> Option<u32> {
        self.touch();
        self.inner.lock().unwrap().index.first_unseen()
    }

    /// The sequence number of the message with the given UID.
    pub fn msgnum_for_uid(&self, uid: Uid) -> Result<u32, Error> {
        self.touch();
        self.inner
            .lock()
            .unwrap()
            .index
            .msgnum_for_uid(uid)
            .ok_or(Error::NxMessage)
    }

    /// The UID of the most recently appended message still present, if any.
    pub fn last_uid(&self) -> Option<Uid> {
        self.touch();
        self.inner.lock().unwrap().index.last_entry().map(|e| e.uid)
    }

    /// Append a message to this folder.
    ///
    /// A fresh UID is allocated, `Recent` is set on top of the
    /// caller-supplied flags, the content is persisted, and the new index
    /// record is written. Listeners are notified of the addition before this
    /// returns. Never blocks on any other folder.
    pub fn append(
        &self,
        content: &[u8],
        flags: Flags,
        received: DateTime<Utc>,
    ) -> Result<Uid, Error> {
        self.touch();
        let uid = self.uids.allocate()?;

        let msgnum;
        {
            let mut inner = self.inner.lock().unwrap();
            let mut entry = MessageEntry::new(uid);
            entry.flags = flags | Flags::RECENT;
            entry.rec_date_millis = received.timestamp_millis();
            let ix = inner.index.push(entry);
            msgnum = ix as u32 + 1;
            self.codec.store(&inner.index.entries()[ix], content)?;
            inner.index.store_one(ix)?;
        }

        info!("{} Appended message with UID {}", self.log_prefix, uid);
        for listener in self.listeners.lock().unwrap().iter() {
            listener.added(msgnum);
        }
        Ok(uid)
    }

    /// Append with no flags and the current time as the receipt date, the
    /// shape used by mail delivery.
    pub fn store(&self, content: &[u8]) -> Result<Uid, Error> {
        self.append(content, Flags::empty(), Utc::now())
    }

    /// Retrieve the message with the given UID, or `None` if no such entry
    /// exists.
    pub fn get_message(&self, uid: Uid) -> Option<StoredMessage> {
        self.touch();
        let entry = self.inner.lock().unwrap().index.entry_by_uid(uid).cloned();
        entry.and_then(|e| self.retrieve_one(&e))
    }

    pub fn get_all_messages(&self) -> Vec<StoredMessage> {
        self.touch();
        let entries = self.inner.lock().unwrap().index.entries().to_vec();
        self.retrieve_many(&entries)
    }

    pub fn get_non_deleted_messages(&self) -> Vec<StoredMessage> {
        self.touch();
        let entries = self.inner.lock().unwrap().index.non_deleted();
        self.retrieve_many(&entries)
    }

    /// Retrieve the messages whose UIDs lie in `start..=end`.
    pub fn get_messages_by_uid_range(
        &self,
        start: Uid,
        end: Uid,
    ) -> Vec<StoredMessage> {
        self.touch();
        let entries = self.inner.lock().unwrap().index.by_uid_range(start, end);
        self.retrieve_many(&entries)
    }

    /// Retrieve the messages whose sequence numbers fall in any of the
    /// given ranges.
    pub fn get_messages_by_msgnum_ranges(
        &self,
        ranges: &[IdRange],
    ) -> Vec<StoredMessage> {
        self.touch();
        let entries =
            self.inner.lock().unwrap().index.by_msgnum_ranges(ranges);
        self.retrieve_many(&entries)
    }

    /// The UIDs of all messages currently in the folder, in sequence order.
    pub fn message_uids(&self) -> Vec<Uid> {
        self.touch();
        self.inner.lock().unwrap().index.uids()
    }

    /// The UIDs of the messages whose UIDs fall in any of the given ranges.
    pub fn uids_by_uid_ranges(&self, ranges: &[IdRange]) -> Vec<Uid> {
        self.touch();
        self.inner
            .lock()
            .unwrap()
            .index
            .by_uid_ranges(ranges)
            .iter()
            .map(|e| e.uid)
            .collect()
    }

    /// The UIDs of the messages whose sequence numbers fall in any of the
    /// given ranges.
    pub fn uids_by_msgnum_ranges(&self, ranges: &[IdRange]) -> Vec<Uid> {
        self.touch();
        self.inner
            .lock()
            .unwrap()
            .index
            .by_msgnum_ranges(ranges)
            .iter()
            .map(|e| e.uid)
            .collect()
    }

    /// Merge `flags` into the flags of the message with the given UID and
    /// persist only that message's record.
    ///
    /// `add` must be `true`; clearing individual flags is not supported and
    /// fails visibly rather than guessing at semantics (`replace_flags` is
    /// the supported way to drop a flag). Listeners other than
    /// `exclude_listener` are notified, with the UID included when
    /// `notify_uid` is set.
    pub fn set_flags(
        &self,
        flags: Flags,
        add: bool,
        uid: Uid,
        exclude_listener: Option<&Arc<dyn FolderListener>>,
        notify_uid: bool,
    ) -> Result<(), Error> {
        self.touch();
        if !add {
            return Err(Error::FlagClearUnsupported);
        }
        self.update_flags(uid, exclude_listener, notify_uid, |current| {
            current | flags
        })
    }

    /// Overwrite the flags of the message with the given UID and persist
    /// only that message's record.
    pub fn replace_flags(
        &self,
        flags: Flags,
        uid: Uid,
        exclude_listener: Option<&Arc<dyn FolderListener>>,
        notify_uid: bool,
    ) -> Result<(), Error> {
        self.touch();
        self.update_flags(uid, exclude_listener, notify_uid, |_| flags)
    }

    fn update_flags(
        &self,
        uid: Uid,
        exclude_listener: Option<&Arc<dyn FolderListener>>,
        notify_uid: bool,
        f: impl FnOnce(Flags) -> Flags,
    ) -> Result<(), Error> {
        let msgnum;
        let new_flags;
        {
            let mut inner = self.inner.lock().unwrap();
            let ix =
                inner.index.index_of_uid(uid).ok_or(Error::NxMessage)?;
            let entry = inner.index.entry_mut(ix);
            entry.flags = f(entry.flags);
            msgnum = entry.msg_num;
            new_flags = entry.flags;
            inner.index.store_one(ix)?;
        }

        let uid_notification = if notify_uid { Some(uid) } else { None };
        for listener in self.listeners.lock().unwrap().iter() {
            if let Some(excluded) = exclude_listener {
                if Arc::ptr_eq(excluded, listener) {
                    continue;
                }
            }
            listener.flags_updated(msgnum, new_flags, uid_notification);
        }
        Ok(())
    }

    /// Permanently remove every message flagged deleted and, if `id_ranges`
    /// is given, whose UID falls within one of the ranges.
    ///
    /// Content files are deleted best-effort (an orphaned file is tolerated;
    /// a missing one is not an error), the survivors are renumbered, and the
    /// whole index is rewritten. Listeners then receive one `expunged`
    /// notification per removed message, in descending order of the original
    /// sequence numbers: an earlier notification must not invalidate the
    /// positions referenced by a later one.
    pub fn expunge(
        &self,
        id_ranges: Option<&[IdRange]>,
    ) -> Result<(), Error> {
        self.touch();
        let removed;
        {
            let mut inner = self.inner.lock().unwrap();
            removed = inner.index.take_expunged(id_ranges);
            for entry in &removed {
                info!(
                    "{} Expunging message with UID {}",
                    self.log_prefix, entry.uid
                );
                if let Err(e) = self.codec.delete(entry) {
                    error!(
                        "{} Failed to delete content for UID {}: {}",
                        self.log_prefix, entry.uid, e
                    );
                }
            }
            inner.index.store_all()?;
        }

        let listeners = self.listeners.lock().unwrap();
        for entry in removed.iter().rev() {
            for listener in listeners.iter() {
                listener.expunged(entry.msg_num);
            }
        }
        Ok(())
    }

    /// Remove every message regardless of flags, without notifications.
    pub fn delete_all_messages(&self) -> Result<(), Error> {
        self.touch();
        let mut inner = self.inner.lock().unwrap();
        for entry in inner.index.take_all() {
            if let Err(e) = self.codec.delete(&entry) {
                error!(
                    "{} Failed to delete content for UID {}: {}",
                    self.log_prefix, entry.uid, e
                );
            }
        }
        inner.index.store_all()
    }

    /// Evaluate `predicate` against every message in the folder and return
    /// the UIDs of the matches.
    ///
    /// This loads every message's content, which is O(N) file reads;
    /// acceptable for a test server, not for production scale.
    pub fn search(
        &self,
        predicate: impl Fn(&StoredMessage) -> bool,
    ) -> Vec<Uid> {
        self.touch();
        let entries = self.inner.lock().unwrap().index.entries().to_vec();
        entries
            .iter()
            .filter_map(|e| self.retrieve_one(e))
            .filter(|m| predicate(m))
            .map(|m| m.uid)
            .collect()
    }

    /// Copy the message with the given UID into `target`, which allocates a
    /// fresh UID in the target's UID space. The copy keeps the original's
    /// flags and receipt date.
    ///
    /// The read from this folder and the append to `target` are independent
    /// operations; if the append fails, nothing is rolled back here.
    pub fn copy_to(&self, uid: Uid, target: &Folder) -> Result<Uid, Error> {
        self.touch();
        let message = self.get_message(uid).ok_or(Error::NxMessage)?;
        target.append(&message.content, message.flags, message.received)
    }

    pub fn add_listener(&self, listener: Arc<dyn FolderListener>) {
        self.touch();
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn FolderListener>) {
        self.touch();
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Notify listeners that the folder itself is going away.
    pub fn signal_deletion(&self) {
        self.touch();
        for listener in self.listeners.lock().unwrap().iter() {
            listener.mailbox_deleted();
        }
    }

    /// Remove the folder's settings and index files ahead of directory
    /// removal.
    pub(super) fn prepare_for_deletion(&self) -> Result<(), Error> {
        let inner = self.inner.lock().unwrap();
        inner.settings.delete()?;
        inner.index.delete_file()
    }

    fn retrieve_many(&self, entries: &[MessageEntry]) -> Vec<StoredMessage> {
        entries.iter().filter_map(|e| self.retrieve_one(e)).collect()
    }

    /// Retrieve one message's content. A retrieval failure degrades that
    /// single message to absent instead of failing the whole batch.
    fn retrieve_one(&self, entry: &MessageEntry) -> Option<StoredMessage> {
        match self.codec.retrieve(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                error!(
                    "{} Failed to read content for UID {}: {}",
                    self.log_prefix, entry.uid, e
                );
                None
            }
        }
    }
}
