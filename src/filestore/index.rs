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

//! The per-folder binary message index.
//!
//! The index file is an ordered sequence of fixed-width 36-byte records, one
//! per message, in message-sequence order. Each record is the following
//! big-endian fields in this exact order:
//!
//! - `i32` message sequence number (1-based position in the folder)
//! - `i64` UID
//! - `i32` flag bitmask
//! - `i64` receipt timestamp in milliseconds since the UNIX epoch
//! - `i64` content offset within a shared mbox file
//! - `i32` content length within a shared mbox file
//!
//! The last two fields exist for backends that keep all content in one
//! shared file; the one-file-per-message backend writes them as zero. New
//! fields may only be appended at the end of the record so that existing
//! files remain readable.
//!
//! The fixed width is what makes single-record updates cheap: a flag change
//! or an append seeks to `index * RECORD_SIZE` and rewrites exactly one
//! record, leaving every other byte of the file untouched. Only structural
//! changes (expunge, reconciliation) rewrite the whole file.
//!
//! On load, records are read sequentially until end-of-file, then the
//! content codec is consulted to drop entries whose backing content has
//! vanished (e.g. files deleted manually); if anything was dropped, the
//! survivors are renumbered and the cleaned file is written back.

use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::PathBuf;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

use crate::filestore::content::ContentCodec;
use crate::filestore::model::{ranges_contain, Flags, IdRange, Uid};
use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;

/// On-disk name of the index file within a folder directory.
pub const INDEX_FILE: &str = "mockmap.entries.bin";

/// Size in bytes of one index record.
pub const RECORD_SIZE: u64 = 36;

/// One message's entry in the folder index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEntry {
    /// 1-based position of the message in the folder's current sequence.
    /// Recomputed on every structural change.
    pub msg_num: u32,
    /// The message's permanent UID.
    pub uid: Uid,
    /// The message's current flags.
    pub flags: Flags,
    /// Receipt timestamp in milliseconds since the UNIX epoch.
    pub rec_date_millis: i64,
    /// Content offset within a shared mbox file; zero for per-message-file
    /// backends.
    pub mbox_position: u64,
    /// Content length within a shared mbox file; zero for per-message-file
    /// backends.
    pub mbox_len: u32,
}

impl MessageEntry {
    pub fn new(uid: Uid) -> Self {
        MessageEntry {
            msg_num: 0,
            uid,
            flags: Flags::empty(),
            rec_date_millis: 0,
            mbox_position: 0,
            mbox_len: 0,
        }
    }

    fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.msg_num)?;
        w.write_u64::<BigEndian>(self.uid.0.get())?;
        w.write_u32::<BigEndian>(self.flags.bits())?;
        w.write_i64::<BigEndian>(self.rec_date_millis)?;
        w.write_u64::<BigEndian>(self.mbox_position)?;
        w.write_u32::<BigEndian>(self.mbox_len)?;
        // Write new fields here, at the end only.
        Ok(())
    }

    fn read_from(r: &mut impl Read) -> io::Result<Self> {
        let msg_num = r.read_u32::<BigEndian>()?;
        let uid = Uid::of(r.read_u64::<BigEndian>()?).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "zero UID in index")
        })?;
        let flags = Flags::from_bits_truncate(r.read_u32::<BigEndian>()?);
        let rec_date_millis = r.read_i64::<BigEndian>()?;
        let mbox_position = r.read_u64::<BigEndian>()?;
        let mbox_len = r.read_u32::<BigEndian>()?;
        // Read new fields here, at the end only.
        Ok(MessageEntry {
            msg_num,
            uid,
            flags,
            rec_date_millis,
            mbox_position,
            mbox_len,
        })
    }
}

/// The in-memory image of a folder's index file, plus the operations that
/// keep the two in sync.
///
/// This type performs no locking of its own; the owning folder serialises
/// every read-modify-persist sequence behind its single mutex so that the
/// in-memory list and the file can never be observed out of step.
pub struct MessageIndex {
    path: PathBuf,
    entries: Vec<MessageEntry>,
}

impl MessageIndex {
    pub fn new(path: PathBuf) -> Self {
        MessageIndex {
            path,
            entries: Vec::new(),
        }
    }

    /// Load the index from its file, if the file exists, then reconcile the
    /// entries against the content actually present on disk.
    ///
    /// If reconciliation drops anything, the survivors are renumbered and
    /// the cleaned index is persisted immediately.
    pub fn load(&mut self, codec: &dyn ContentCodec) -> Result<(), Error> {
        self.entries.clear();

        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = io::BufReader::new(file);
        loop {
            match MessageEntry::read_from(&mut reader) {
                Ok(entry) => self.entries.push(entry),
                Err(e) if io::ErrorKind::UnexpectedEof == e.kind() => break,
                Err(e) => return Err(e.into()),
            }
        }

        if codec.cleanup(&mut self.entries)? {
            warn!(
                "{}: dropped entries whose content vanished, rewriting",
                self.path.display()
            );
            self.renumber();
            self.store_all()?;
        }

        Ok(())
    }

    /// Rewrite the whole index file from the in-memory list, in record
    /// order.
    pub fn store_all(&self) -> Result<(), Error> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = io::BufWriter::new(&mut file);
        for entry in &self.entries {
            entry.write_to(&mut writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Rewrite exactly one record in place, leaving the bytes of every other
    /// record untouched.
    pub fn store_one(&self, index: usize) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(RECORD_SIZE as usize);
        self.entries[index].write_to(&mut buf)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.seek(io::SeekFrom::Start(index as u64 * RECORD_SIZE))?;
        file.write_all(&buf)?;
        Ok(())
    }

    pub fn delete_file(&self) -> Result<(), Error> {
        fs::remove_file(&self.path).ignore_not_found()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    /// Append a new entry, assigning it the next sequence number. Returns
    /// the zero-based record index for use with `store_one`.
    pub fn push(&mut self, mut entry: MessageEntry) -> usize {
        entry.msg_num = self.entries.len() as u32 + 1;
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn index_of_uid(&self, uid: Uid) -> Option<usize> {
        self.entries.iter().position(|e| e.uid == uid)
    }

    pub fn entry_by_uid(&self, uid: Uid) -> Option<&MessageEntry> {
        self.entries.iter().find(|e| e.uid == uid)
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut MessageEntry {
        &mut self.entries[index]
    }

    pub fn last_entry(&self) -> Option<&MessageEntry> {
        self.entries.last()
    }

    pub fn unseen_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.flags.contains(Flags::SEEN))
            .count()
    }

    pub fn recent_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.flags.contains(Flags::RECENT))
            .count()
    }

    /// The sequence number of the first unseen message, if any.
    pub fn first_unseen(&self) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| !e.flags.contains(Flags::SEEN))
            .map(|e| e.msg_num)
    }

    pub fn msgnum_for_uid(&self, uid: Uid) -> Option<u32> {
        self.entry_by_uid(uid).map(|e| e.msg_num)
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.entries.iter().map(|e| e.uid).collect()
    }

    pub fn non_deleted(&self) -> Vec<MessageEntry> {
        self.entries
            .iter()
            .filter(|e| !e.flags.contains(Flags::DELETED))
            .cloned()
            .collect()
    }

    pub fn by_uid_range(&self, start: Uid, end: Uid) -> Vec<MessageEntry> {
        self.entries
            .iter()
            .filter(|e| e.uid >= start && e.uid <= end)
            .cloned()
            .collect()
    }

    pub fn by_uid_ranges(&self, ranges: &[IdRange]) -> Vec<MessageEntry> {
        self.entries
            .iter()
            .filter(|e| ranges_contain(ranges, e.uid.0.get()))
            .cloned()
            .collect()
    }

    pub fn by_msgnum_ranges(&self, ranges: &[IdRange]) -> Vec<MessageEntry> {
        self.entries
            .iter()
            .filter(|e| ranges_contain(ranges, e.msg_num as u64))
            .cloned()
            .collect()
    }

    /// Remove every entry that is flagged deleted and, if `ranges` is given,
    /// whose UID falls within one of the ranges. The survivors are
    /// renumbered `1..=N`.
    ///
    /// Returns the removed entries, in ascending order of their original
    /// sequence numbers (which the returned clones retain). The caller is
    /// responsible for persisting the rewritten index and disposing of the
    /// removed content.
    pub fn take_expunged(
        &mut self,
        ranges: Option<&[IdRange]>,
    ) -> Vec<MessageEntry> {
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            let expunge = e.flags.contains(Flags::DELETED)
                && ranges
                    .map(|r| ranges_contain(r, e.uid.0.get()))
                    .unwrap_or(true);
            if expunge {
                removed.push(e.clone());
            }
            !expunge
        });
        self.renumber();
        removed
    }

    /// Remove every entry, returning them for content disposal.
    pub fn take_all(&mut self) -> Vec<MessageEntry> {
        std::mem::replace(&mut self.entries, Vec::new())
    }

    fn renumber(&mut self) {
        for (ix, entry) in self.entries.iter_mut().enumerate() {
            entry.msg_num = ix as u32 + 1;
        }
    }
}
