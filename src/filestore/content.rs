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

//! Storage of raw message content.
//!
//! The index file records a message's metadata; the content codec owns the
//! message bytes themselves. The codec is a seam: a folder works against the
//! `ContentCodec` trait, and which implementation backs it is a backend
//! decision.
//!
//! The implementation provided here, `EmlFileCodec`, stores one file per
//! message in the folder directory, named `msg-<uid>.eml`. The file is named
//! by UID alone because UIDs are permanent while sequence numbers are
//! renumbered on expunge. The UID is also recorded in a header line
//! prepended to the content, so it can be recovered from the raw bytes of a
//! previously retrieved message.

use std::fs;
use std::path::PathBuf;

use log::warn;

use crate::filestore::index::MessageEntry;
use crate::filestore::model::{datetime_from_millis, StoredMessage, Uid};
use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;

/// Header line prepended to stored content so the UID is recoverable from
/// the bytes alone.
const UID_HEADER: &str = "X-Mockmap-Uid";

/// Persists and retrieves raw message bytes on behalf of a folder.
pub trait ContentCodec: Send + Sync {
    /// Persist `content` as the message described by `entry`.
    fn store(&self, entry: &MessageEntry, content: &[u8])
        -> Result<(), Error>;

    /// Retrieve the message described by `entry`.
    fn retrieve(&self, entry: &MessageEntry) -> Result<StoredMessage, Error>;

    /// Delete the stored content of `entry`. Deleting content that is
    /// already gone is not an error.
    fn delete(&self, entry: &MessageEntry) -> Result<(), Error>;

    /// Drop entries whose backing content no longer exists on disk (e.g.
    /// files removed manually while the store was down). Returns whether
    /// anything was dropped.
    fn cleanup(&self, entries: &mut Vec<MessageEntry>)
        -> Result<bool, Error>;
}

/// Recover the UID embedded in stored content, if any.
///
/// This inspects only the first line of the content, which is where
/// `EmlFileCodec::store` puts the UID header.
pub fn uid_from_content(content: &[u8]) -> Option<Uid> {
    let line = content.split(|&b| b == b'\n').next()?;
    let line = std::str::from_utf8(line).ok()?;
    let value = line.strip_prefix(UID_HEADER)?.strip_prefix(": ")?;
    value.trim_end_matches('\r').parse().ok().and_then(Uid::of)
}

/// The one-file-per-message content codec.
pub struct EmlFileCodec {
    dir: PathBuf,
}

impl EmlFileCodec {
    /// Create a codec storing message files directly in `dir` (the folder
    /// directory).
    pub fn new(dir: PathBuf) -> Self {
        EmlFileCodec { dir }
    }

    fn path_for(&self, uid: Uid) -> PathBuf {
        self.dir.join(format!("msg-{}.eml", uid))
    }
}

impl ContentCodec for EmlFileCodec {
    fn store(
        &self,
        entry: &MessageEntry,
        content: &[u8],
    ) -> Result<(), Error> {
        // A message copied from another folder still carries that folder's
        // UID header; replace it with our own.
        let body = strip_uid_header(content);
        let mut data =
            format!("{}: {}\r\n", UID_HEADER, entry.uid).into_bytes();
        data.extend_from_slice(body);
        fs::write(self.path_for(entry.uid), &data)?;
        Ok(())
    }

    fn retrieve(&self, entry: &MessageEntry) -> Result<StoredMessage, Error> {
        let content = fs::read(self.path_for(entry.uid))?;
        Ok(StoredMessage {
            uid: entry.uid,
            flags: entry.flags,
            received: datetime_from_millis(entry.rec_date_millis),
            content,
        })
    }

    fn delete(&self, entry: &MessageEntry) -> Result<(), Error> {
        fs::remove_file(self.path_for(entry.uid)).ignore_not_found()?;
        Ok(())
    }

    fn cleanup(
        &self,
        entries: &mut Vec<MessageEntry>,
    ) -> Result<bool, Error> {
        let before = entries.len();
        let dir = &self.dir;
        entries.retain(|entry| {
            let present = self.path_for(entry.uid).is_file();
            if !present {
                warn!(
                    "{}: content for UID {} vanished, dropping its entry",
                    dir.display(),
                    entry.uid
                );
            }
            present
        });
        Ok(entries.len() != before)
    }
}

/// If `content` begins with a UID header line, return the content without
/// it; otherwise return the content unchanged.
fn strip_uid_header(content: &[u8]) -> &[u8] {
    if content.starts_with(UID_HEADER.as_bytes()) {
        match content.iter().position(|&b| b == b'\n') {
            Some(eol) => &content[eol + 1..],
            None => &[],
        }
    } else {
        content
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::filestore::model::Flags;

    fn entry(uid: u64) -> MessageEntry {
        let mut entry = MessageEntry::new(Uid::u(uid));
        entry.msg_num = 1;
        entry.flags = Flags::SEEN;
        entry.rec_date_millis = 1_500_000_000_000;
        entry
    }

    #[test]
    fn store_retrieve_roundtrip() {
        let dir = TempDir::new().unwrap();
        let codec = EmlFileCodec::new(dir.path().to_owned());

        let entry = entry(7);
        codec.store(&entry, b"Subject: hi\r\n\r\nbody\r\n").unwrap();

        let msg = codec.retrieve(&entry).unwrap();
        assert_eq!(Uid::u(7), msg.uid);
        assert_eq!(Flags::SEEN, msg.flags);
        assert_eq!(1_500_000_000_000, msg.received.timestamp_millis());
        assert!(msg.content.ends_with(b"Subject: hi\r\n\r\nbody\r\n"));
        assert_eq!(Some(Uid::u(7)), uid_from_content(&msg.content));
    }

    #[test]
    fn stale_uid_header_is_replaced() {
        let dir = TempDir::new().unwrap();
        let codec = EmlFileCodec::new(dir.path().to_owned());

        let copied = entry(3);
        codec.store(&copied, b"X-Mockmap-Uid: 99\r\nSubject: x\r\n").unwrap();

        let msg = codec.retrieve(&copied).unwrap();
        assert_eq!(Some(Uid::u(3)), uid_from_content(&msg.content));
        // Exactly one header line; the stale one is gone.
        assert_eq!(
            b"X-Mockmap-Uid: 3\r\nSubject: x\r\n".to_vec(),
            msg.content
        );
    }

    #[test]
    fn uid_from_headerless_content() {
        assert_eq!(None, uid_from_content(b"Subject: hi\r\n"));
        assert_eq!(None, uid_from_content(b""));
    }

    #[test]
    fn delete_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let codec = EmlFileCodec::new(dir.path().to_owned());

        let a = entry(1);
        let b = entry(2);
        codec.store(&a, b"a").unwrap();
        codec.store(&b, b"b").unwrap();

        codec.delete(&a).unwrap();
        // Double delete is not an error
        codec.delete(&a).unwrap();

        let mut entries = vec![a, b];
        assert!(codec.cleanup(&mut entries).unwrap());
        assert_eq!(1, entries.len());
        assert_eq!(Uid::u(2), entries[0].uid);
        assert!(!codec.cleanup(&mut entries).unwrap());
    }
}
