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

//! Small binary settings files.
//!
//! Each settings file holds a short sequence of big-endian fixed-width
//! fields in a stable order, and is persisted by truncating and rewriting
//! the whole file. To stay readable by older processes, new fields may only
//! be appended at the end.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;

/// On-disk name of the per-folder settings file.
pub const FOLDER_SETTINGS_FILE: &str = "mockmap.mailbox.bin";
/// On-disk name of the per-repository UID range file.
pub const UID_RANGE_FILE: &str = "mockmap.store.bin";

/// A file holding fixed binary fields, shared base of the concrete settings
/// types below.
struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    fn new(path: PathBuf) -> Self {
        RecordFile { path }
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn delete(&self) -> Result<(), Error> {
        fs::remove_file(&self.path).ignore_not_found()?;
        Ok(())
    }

    /// Truncate-and-rewrite the file with the bytes produced by `fill`.
    fn store(
        &self,
        fill: impl FnOnce(&mut Vec<u8>) -> io::Result<()>,
    ) -> Result<(), Error> {
        let mut buf = Vec::new();
        fill(&mut buf)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// If the file exists, feed it to `read` and return true; otherwise
    /// return false without calling `read`.
    fn load(
        &self,
        read: impl FnOnce(&mut dyn Read) -> io::Result<()>,
    ) -> Result<bool, Error> {
        let mut file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        read(&mut file)?;
        Ok(true)
    }
}

/// The per-folder settings file: currently a single boolean recording
/// whether the folder is selectable (usable for message storage, as opposed
/// to a pure hierarchy node).
pub struct FolderSettings {
    file: RecordFile,
    selectable: bool,
}

impl FolderSettings {
    pub fn new(path: PathBuf) -> Self {
        FolderSettings {
            file: RecordFile::new(path),
            selectable: false,
        }
    }

    /// Load the settings if the file exists; otherwise keep the defaults.
    pub fn load(&mut self) -> Result<(), Error> {
        let mut selectable = self.selectable;
        self.file.load(|r| {
            selectable = 0 != r.read_u8()?;
            // Read new fields here, at the end only.
            Ok(())
        })?;
        self.selectable = selectable;
        Ok(())
    }

    pub fn store(&self) -> Result<(), Error> {
        let selectable = self.selectable;
        self.file.store(|w| {
            w.write_u8(selectable as u8)?;
            // Write new fields here, at the end only.
            Ok(())
        })
    }

    pub fn delete(&self) -> Result<(), Error> {
        self.file.delete()
    }

    pub fn is_selectable(&self) -> bool {
        self.selectable
    }

    pub fn set_selectable(&mut self, selectable: bool) {
        self.selectable = selectable;
    }
}

/// The per-repository UID range file: a single `i64` holding the next
/// reserved upper bound of the UID allocator.
///
/// The value persisted here is always greater than or equal to every UID
/// handed out so far, so after a crash the allocator can resume from it
/// without ever reusing a UID.
pub struct UidRangeFile {
    file: RecordFile,
}

impl UidRangeFile {
    pub fn new(path: PathBuf) -> Self {
        UidRangeFile {
            file: RecordFile::new(path),
        }
    }

    /// Read the persisted upper bound, or `None` if no file exists yet.
    pub fn load(&self) -> Result<Option<u64>, Error> {
        let mut bound = 0i64;
        let present = self.file.load(|r| {
            bound = r.read_i64::<BigEndian>()?;
            // Read new fields here, at the end only.
            Ok(())
        })?;
        if present && bound > 0 {
            Ok(Some(bound as u64))
        } else {
            Ok(None)
        }
    }

    pub fn store(&self, reserved_upper_bound: u64) -> Result<(), Error> {
        self.file.store(|w| {
            w.write_i64::<BigEndian>(reserved_upper_bound as i64)?;
            // Write new fields here, at the end only.
            Ok(())
        })
    }

    pub fn exists(&self) -> bool {
        self.file.exists()
    }

    pub fn delete(&self) -> Result<(), Error> {
        self.file.delete()
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn folder_settings_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FOLDER_SETTINGS_FILE);

        let mut settings = FolderSettings::new(path.clone());
        assert!(!settings.is_selectable());
        // Load with no file keeps the defaults
        settings.load().unwrap();
        assert!(!settings.is_selectable());

        settings.set_selectable(true);
        settings.store().unwrap();

        let mut reloaded = FolderSettings::new(path.clone());
        reloaded.load().unwrap();
        assert!(reloaded.is_selectable());

        reloaded.delete().unwrap();
        assert!(!path.is_file());
        // Deleting a deleted file is fine
        reloaded.delete().unwrap();
    }

    #[test]
    fn uid_range_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = UidRangeFile::new(dir.path().join(UID_RANGE_FILE));

        assert_eq!(None, file.load().unwrap());
        assert!(!file.exists());

        file.store(1001).unwrap();
        assert!(file.exists());
        assert_eq!(Some(1001), file.load().unwrap());

        file.store(2001).unwrap();
        assert_eq!(Some(2001), file.load().unwrap());
    }

    #[test]
    fn uid_range_is_big_endian_i64() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(UID_RANGE_FILE);
        let file = UidRangeFile::new(path.clone());
        file.store(0x0102030405060708).unwrap();
        assert_eq!(
            vec![1u8, 2, 3, 4, 5, 6, 7, 8],
            std::fs::read(&path).unwrap()
        );
    }
}
