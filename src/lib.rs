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

//! The persistent mailbox store of an embeddable test mail server.
//!
//! This crate implements a hierarchical, file-backed mailbox repository
//! which durably stores messages, flags, and folder metadata, and survives
//! process restarts without losing or reusing identifiers. The wire protocol
//! layers (IMAP/SMTP/POP3 parsing and session state), user authentication,
//! and MIME handling are deliberately out of scope; they consume this store
//! through the capability surface exposed by [`filestore`].
//!
//! The design favours crash-simplicity over crash-perfection: files are
//! persisted by truncate-and-rewrite or positional writes with no
//! write-ahead log, which is an acceptable tradeoff for a test server and
//! would not be for a production mailbox system.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod filestore;
pub mod support;
