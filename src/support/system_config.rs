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

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The storage backends this crate knows how to construct.
///
/// The backend is chosen by a stable configuration string rather than by a
/// class or type name resolved at runtime, so a bad configuration fails at
/// startup with a clear error instead of failing at first use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The file-based store implemented by this crate.
    File,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "file" => Ok(BackendKind::File),
            _ => Err(Error::UnknownBackend(s.to_owned())),
        }
    }
}

/// Startup configuration for the mailbox store.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Which storage backend to construct.
    pub backend: BackendKind,

    /// The repository root.
    ///
    /// All mailbox directories, the user list, and the PID file live under
    /// this directory. It is created on startup if it does not exist.
    pub root: PathBuf,
}

impl StoreConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_config() {
        let config = StoreConfig::from_toml(
            "backend = \"file\"\nroot = \"/tmp/mail\"\n",
        )
        .unwrap();
        assert_eq!(BackendKind::File, config.backend);
        assert_eq!(PathBuf::from("/tmp/mail"), config.root);
    }

    #[test]
    fn unknown_backend_rejected() {
        assert!(StoreConfig::from_toml(
            "backend = \"voodoo\"\nroot = \"/tmp/mail\"\n"
        )
        .is_err());
        assert_matches!(
            Err(Error::UnknownBackend(_)),
            "voodoo".parse::<BackendKind>()
        );
    }
}
