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

//! Miscellaneous functions for working with files and paths.

use std::io;
use std::path::{Component, Path, PathBuf};

pub trait IgnoreKinds {
    fn ignore_already_exists(self) -> Self;
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_already_exists(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                Ok(R::default())
            }
            Err(e) => Err(e),
        }
    }

    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

/// Lexically normalise `path` by removing `.` components and resolving `..`
/// components against their parents.
///
/// This never touches the filesystem, so the path need not exist. Symlinks
/// are not resolved; two paths that reach the same directory through
/// different links normalise to different values.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_path() {
        fn n(p: &str) -> PathBuf {
            normalize_path(Path::new(p))
        }

        assert_eq!(PathBuf::from("/a/b"), n("/a/b"));
        assert_eq!(PathBuf::from("/a/b"), n("/a/./b"));
        assert_eq!(PathBuf::from("/a/b"), n("/a/c/../b"));
        assert_eq!(PathBuf::from("/b"), n("/a/../b"));
        assert_eq!(PathBuf::from("/b"), n("/../b"));
        assert_eq!(PathBuf::from("a/b"), n("./a/b/."));
        assert_eq!(PathBuf::from("../b"), n("../b"));
    }

    #[test]
    fn test_ignore_kinds() {
        fn nx() -> Result<(), io::Error> {
            Err(io::Error::new(io::ErrorKind::NotFound, "nx"))
        }

        assert!(nx().ignore_not_found().is_ok());
        assert!(nx().ignore_already_exists().is_err());
    }
}
