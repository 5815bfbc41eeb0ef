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

//! The file-backed mailbox store.
//!
//! # Directory layout
//!
//! Every mailbox is a directory under the repository root, nested to mirror
//! the mailbox hierarchy. A mailbox named `#mail.INBOX.work` lives at
//! `<root>/#mail/INBOX/work/` and contains:
//!
//! - `mockmap.mailbox.bin` — the folder's binary settings file
//! - `mockmap.entries.bin` — the folder's binary message index
//! - `msg-<uid>.eml` — one content file per message
//!
//! The repository root additionally contains:
//!
//! - `mockmap.store.bin` — the UID allocator's reservation watermark
//! - `userlist` — the flat user list, one login record per line
//! - `mockmap.pid` — the liveness PID file of the owning process
//!
//! # Module map
//!
//! [`model`] defines the shared vocabulary (UIDs, flags, ranges,
//! listeners). [`settings`] and [`index`] are the binary file formats.
//! [`content`] persists raw message bytes. [`folder`] ties those together
//! into one mailbox; [`context`] owns the per-repository UID allocator and
//! the folder cache; [`repository`] is the top-level facade that speaks
//! hierarchical names.

pub mod content;
pub mod context;
pub mod folder;
pub mod index;
pub mod model;
pub mod repository;
pub mod settings;

pub use self::content::{uid_from_content, ContentCodec, EmlFileCodec};
pub use self::context::StoreContext;
pub use self::folder::Folder;
pub use self::model::{
    Flags, FolderListener, IdRange, Quota, StoredMessage, Uid,
};
pub use self::repository::{open_store, FileStore, UserRecord};
