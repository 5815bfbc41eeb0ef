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

use std::io;

use thiserror::Error;

/// The crate-wide error type.
///
/// Variants other than `Io` and `Toml` are semantic conditions the protocol
/// layer is expected to translate into protocol-level error responses. `Io`
/// covers any filesystem failure during persistence; such a failure is fatal
/// to the call in progress and may leave the on-disk state inconsistent.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe mailbox or flag name")]
    UnsafeName,
    #[error("No such mailbox")]
    NxMailbox,
    #[error("No such message")]
    NxMessage,
    #[error("Mailbox has child mailboxes")]
    MailboxHasInferiors,
    #[error("Mailbox still contains messages")]
    MailboxNotEmpty,
    #[error(
        "Wildcards are only supported as the final character of a list pattern"
    )]
    BadListPattern,
    #[error("Malformed user list line: {0}")]
    BadUserLine(String),
    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),
    #[error("Clearing individual flags is not supported; use replace_flags")]
    FlagClearUnsupported,
    #[error("Renaming mailboxes is not supported")]
    RenameUnsupported,
    #[error("Quotas are not supported")]
    QuotaUnsupported,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
