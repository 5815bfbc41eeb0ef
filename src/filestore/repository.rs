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

//! The top-level mailbox repository.
//!
//! The repository translates between hierarchical mailbox names and
//! filesystem paths, and delegates everything folder-shaped to the cached
//! `Folder` instances held by the `StoreContext`.
//!
//! A hierarchical name is segments joined by `.`, rooted at the `#mail`
//! namespace token: `#mail.INBOX.work` lives at
//! `<root>/#mail/INBOX/work/`. Since the protocol layer that would
//! namespace-qualify names is out of scope here, a name without the leading
//! token is accepted as rooted at the namespace.
//!
//! Besides mailboxes, the repository owns two flat files directly under the
//! root: the user list (one `login:password[@domain]` per line, read and
//! rewritten whole) and a liveness PID file holding the decimal process id,
//! written at startup and removed at clean shutdown. A PID file already
//! present at startup only produces a warning; refusing to start would be
//! wrong more often than it would be right for a test tool.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::filestore::context::StoreContext;
use crate::filestore::folder::Folder;
use crate::filestore::model::Quota;
use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;
use crate::support::safe_name::is_safe_name;
use crate::support::system_config::{BackendKind, StoreConfig};

/// The delimiter between segments of a hierarchical mailbox name.
pub const HIERARCHY_DELIMITER: char = '.';
/// The namespace token every absolute mailbox name is rooted at.
pub const USER_NAMESPACE: &str = "#mail";

/// On-disk name of the flat user-list file.
pub const USER_LIST_FILE: &str = "userlist";
/// On-disk name of the liveness PID file.
pub const PID_FILE: &str = "mockmap.pid";

/// Construct the store selected by `config`.
pub fn open_store(config: &StoreConfig) -> Result<FileStore, Error> {
    match config.backend {
        BackendKind::File => FileStore::open(&config.root),
    }
}

/// The file-backed mailbox repository.
pub struct FileStore {
    root: PathBuf,
    user_list_path: PathBuf,
    pid_path: PathBuf,
    ctx: StoreContext,
}

impl FileStore {
    /// Open the repository rooted at `root`, creating it if necessary, and
    /// write the liveness PID file.
    pub fn open(root: &Path) -> Result<Self, Error> {
        let ctx = StoreContext::open(root)?;
        let store = FileStore {
            root: root.to_owned(),
            user_list_path: root.join(USER_LIST_FILE),
            pid_path: root.join(PID_FILE),
            ctx,
        };

        if store.pid_path.is_file() {
            warn!(
                "PID file {} already exists; either another process is using \
                 this repository or the previous one did not shut down \
                 cleanly. Continuing anyway.",
                store.pid_path.display()
            );
        }
        store.write_pid_file()?;
        Ok(store)
    }

    /// Cleanly shut the repository down: persist the UID allocator's exact
    /// position and remove the PID file.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.ctx.deinit()?;
        fs::remove_file(&self.pid_path).ignore_not_found()?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an absolute hierarchical name to its folder, or `None` if no
    /// such mailbox exists. The empty name and the bare namespace token
    /// resolve to the namespace root folder, which is created on demand.
    pub fn get_mailbox(
        &self,
        name: &str,
    ) -> Result<Option<Arc<Folder>>, Error> {
        if name.is_empty() || name.eq_ignore_ascii_case(USER_NAMESPACE) {
            return Ok(Some(
                self.ctx.get_or_create(&self.root.join(USER_NAMESPACE))?,
            ));
        }

        let path = full_name_to_path(&self.root, name)?;
        if path.is_dir() {
            Ok(Some(self.ctx.get_or_create(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Resolve a direct child of `parent` by its short name, or `None` if
    /// it does not exist.
    pub fn get_child(
        &self,
        parent: &Folder,
        name: &str,
    ) -> Result<Option<Arc<Folder>>, Error> {
        if !is_safe_name(name) {
            return Err(Error::UnsafeName);
        }

        let path = parent.path().join(name);
        if path.is_dir() {
            Ok(Some(self.ctx.get_or_create(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Create (or open) the mailbox `name` under `parent` and record
    /// whether it is selectable.
    pub fn create_mailbox(
        &self,
        parent: &Folder,
        name: &str,
        selectable: bool,
    ) -> Result<Arc<Folder>, Error> {
        if !is_safe_name(name) {
            return Err(Error::UnsafeName);
        }

        let folder = self.ctx.get_or_create(&parent.path().join(name))?;
        folder.set_selectable(selectable)?;
        Ok(folder)
    }

    /// The direct children of `parent`, sorted by name.
    pub fn children(
        &self,
        parent: &Folder,
    ) -> Result<Vec<Arc<Folder>>, Error> {
        let mut result = Vec::new();
        for entry in fs::read_dir(parent.path())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                // Every directory inside a mailbox is a child mailbox
                result.push(self.ctx.get_or_create(&entry.path())?);
            }
        }
        result.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(result)
    }

    /// Delete `folder`. Fails if the folder still has child mailboxes or
    /// messages; a successful deletion removes its settings and index files
    /// and its directory, and drops it from the cache.
    pub fn delete_mailbox(&self, folder: &Folder) -> Result<(), Error> {
        if folder.has_children()? {
            return Err(Error::MailboxHasInferiors);
        }
        if 0 != folder.message_count() {
            return Err(Error::MailboxNotEmpty);
        }

        folder.prepare_for_deletion()?;
        fs::remove_dir(folder.path())?;
        self.ctx.remove(folder.path());
        info!("Deleted mailbox {}", folder.full_name());
        Ok(())
    }

    /// List the mailboxes matching `pattern`.
    ///
    /// A trailing `%` matches the immediate children of the pattern's
    /// parent whose names start with the rest of the final segment; a
    /// trailing `*` additionally matches all of their descendants. A
    /// wildcard anywhere but the final position is rejected. A pattern with
    /// no wildcard is an exact lookup.
    pub fn list_mailboxes(
        &self,
        pattern: &str,
    ) -> Result<Vec<Arc<Folder>>, Error> {
        let star = pattern.find('*');
        let percent = pattern.find('%');
        let last = pattern.len().saturating_sub(1);

        if star.map(|ix| ix < last).unwrap_or(false)
            || percent.map(|ix| ix < last).unwrap_or(false)
        {
            return Err(Error::BadListPattern);
        }

        if star.is_none() && percent.is_none() {
            return Ok(self.get_mailbox(pattern)?.into_iter().collect());
        }

        let recursive = star.is_some();
        let (parent_name, prefix) =
            match pattern[..last].rfind(HIERARCHY_DELIMITER) {
                None => (USER_NAMESPACE, &pattern[..last]),
                Some(dot) => (&pattern[..dot], &pattern[dot + 1..last]),
            };

        let mut result = Vec::new();
        if let Some(parent) = self.get_mailbox(parent_name)? {
            for child in self.children(&parent)? {
                if child.name().starts_with(prefix) {
                    if recursive {
                        self.add_descendants(&child, &mut result)?;
                    } else {
                        result.push(child);
                    }
                }
            }
        }
        Ok(result)
    }

    fn add_descendants(
        &self,
        folder: &Arc<Folder>,
        result: &mut Vec<Arc<Folder>>,
    ) -> Result<(), Error> {
        result.push(Arc::clone(folder));
        for child in self.children(folder)? {
            self.add_descendants(&child, result)?;
        }
        Ok(())
    }

    pub fn set_selectable(
        &self,
        folder: &Folder,
        selectable: bool,
    ) -> Result<(), Error> {
        folder.set_selectable(selectable)
    }

    /// Renaming is part of the repository contract but intentionally not
    /// implemented by this backend.
    pub fn rename_mailbox(
        &self,
        _folder: &Folder,
        _new_name: &str,
    ) -> Result<(), Error> {
        Err(Error::RenameUnsupported)
    }

    pub fn is_quota_supported(&self) -> bool {
        false
    }

    /// Quotas are part of the repository contract but intentionally not
    /// implemented by this backend; this never succeeds.
    pub fn get_quota(&self, _quota_root: &str) -> Result<Vec<Quota>, Error> {
        Err(Error::QuotaUnsupported)
    }

    /// See `get_quota`.
    pub fn set_quota(&self, _quota: &Quota) -> Result<(), Error> {
        Err(Error::QuotaUnsupported)
    }

    /// Read the whole user list into memory. A missing file is an empty
    /// list.
    pub fn read_user_list(&self) -> Result<Vec<UserRecord>, Error> {
        if !self.user_list_path.is_file() {
            return Ok(Vec::new());
        }

        let text = fs::read_to_string(&self.user_list_path)?;
        text.lines()
            .filter(|line| !line.is_empty())
            .map(UserRecord::parse)
            .collect()
    }

    /// Rewrite the whole user list.
    pub fn write_user_list(
        &self,
        users: &[UserRecord],
    ) -> Result<(), Error> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.user_list_path)?;
        for user in users {
            writeln!(file, "{}", user.to_line())?;
        }
        Ok(())
    }

    /// Drop the cached handles for the named mailbox and everything below
    /// it. Used when a user logs out so their folders can be reloaded
    /// fresh on the next login.
    pub fn evict_from_cache(&self, name: &str) -> Result<(), Error> {
        let path = full_name_to_path(&self.root, name)?;
        self.evict_recursive(&path);
        Ok(())
    }

    fn evict_recursive(&self, path: &Path) {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.filter_map(|e| e.ok()) {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    self.evict_recursive(&entry.path());
                }
            }
        }
        self.ctx.remove(path);
    }

    fn write_pid_file(&self) -> Result<(), Error> {
        let pid = std::process::id();
        info!(
            "Writing process id {} to {}",
            pid,
            self.pid_path.display()
        );
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.pid_path)?;
        writeln!(file, "{}", pid)?;
        Ok(())
    }
}

/// One line of the user list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub login: String,
    pub password: String,
    pub domain: Option<String>,
}

impl UserRecord {
    /// Parse a `login:password[@domain]` line.
    ///
    /// The split is on the first `:` and the last `@` after it, so a
    /// password may contain `:` but not `@`.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let colon = line
            .find(':')
            .ok_or_else(|| Error::BadUserLine(line.to_owned()))?;
        let login = &line[..colon];
        if login.is_empty() {
            return Err(Error::BadUserLine(line.to_owned()));
        }

        let rest = &line[colon + 1..];
        let (password, domain) = match rest.rfind('@') {
            Some(at) => (&rest[..at], Some(rest[at + 1..].to_owned())),
            None => (rest, None),
        };
        Ok(UserRecord {
            login: login.to_owned(),
            password: password.to_owned(),
            domain,
        })
    }

    pub fn to_line(&self) -> String {
        match self.domain {
            Some(ref domain) => {
                format!("{}:{}@{}", self.login, self.password, domain)
            }
            None => format!("{}:{}", self.login, self.password),
        }
    }
}

/// Map a filesystem path under `root` back to a hierarchical name.
pub(super) fn path_to_full_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Map a hierarchical name to its filesystem path under `root`.
///
/// A leading namespace token is accepted (case-insensitively) and implied
/// when absent. Every other segment must be a safe file name.
pub(super) fn full_name_to_path(
    root: &Path,
    name: &str,
) -> Result<PathBuf, Error> {
    let mut path = root.join(USER_NAMESPACE);
    let mut segments = name
        .split(HIERARCHY_DELIMITER)
        .filter(|s| !s.is_empty())
        .peekable();
    if let Some(first) = segments.peek() {
        if first.eq_ignore_ascii_case(USER_NAMESPACE) {
            segments.next();
        }
    }
    for segment in segments {
        if !is_safe_name(segment) {
            return Err(Error::UnsafeName);
        }
        path.push(segment);
    }
    Ok(path)
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::filestore::model::Flags;

    struct Setup {
        root: TempDir,
        store: FileStore,
    }

    fn set_up() -> Setup {
        let root = TempDir::new().unwrap();
        let store = FileStore::open(root.path()).unwrap();
        Setup { root, store }
    }

    fn namespace_root(store: &FileStore) -> Arc<Folder> {
        store.get_mailbox(USER_NAMESPACE).unwrap().unwrap()
    }

    #[test]
    fn name_path_mapping() {
        let root = Path::new("/repo");
        assert_eq!(
            PathBuf::from("/repo/#mail/INBOX/work"),
            full_name_to_path(root, "#mail.INBOX.work").unwrap()
        );
        assert_eq!(
            PathBuf::from("/repo/#mail/INBOX/work"),
            full_name_to_path(root, "INBOX.work").unwrap()
        );
        assert_eq!(
            PathBuf::from("/repo/#mail"),
            full_name_to_path(root, "#MAIL").unwrap()
        );
        assert_matches!(
            Err(Error::UnsafeName),
            full_name_to_path(root, "#mail.IN/BOX")
        );

        assert_eq!(
            "#mail.INBOX.work",
            path_to_full_name(
                root,
                Path::new("/repo/#mail/INBOX/work")
            )
        );
    }

    #[test]
    fn create_and_resolve() {
        let setup = set_up();
        let ns = namespace_root(&setup.store);

        let inbox = setup.store.create_mailbox(&ns, "INBOX", true).unwrap();
        assert!(inbox.is_selectable());
        assert_eq!("#mail.INBOX", inbox.full_name());

        let by_abs = setup.store.get_mailbox("#mail.INBOX").unwrap().unwrap();
        let by_rel = setup.store.get_mailbox("INBOX").unwrap().unwrap();
        assert!(Arc::ptr_eq(&inbox, &by_abs));
        assert!(Arc::ptr_eq(&inbox, &by_rel));

        assert!(setup.store.get_mailbox("#mail.Nope").unwrap().is_none());
        assert_matches!(
            Err(Error::UnsafeName),
            setup.store.create_mailbox(&ns, "bad*name", true)
        );
    }

    #[test]
    fn children_and_get_child() {
        let setup = set_up();
        let ns = namespace_root(&setup.store);
        let inbox = setup.store.create_mailbox(&ns, "INBOX", true).unwrap();
        setup.store.create_mailbox(&inbox, "b", true).unwrap();
        setup.store.create_mailbox(&inbox, "a", false).unwrap();

        let children = setup.store.children(&inbox).unwrap();
        assert_eq!(
            vec!["a", "b"],
            children.iter().map(|f| f.name()).collect::<Vec<_>>()
        );

        let a = setup.store.get_child(&inbox, "a").unwrap().unwrap();
        assert!(Arc::ptr_eq(&children[0], &a));
        assert!(setup.store.get_child(&inbox, "zzz").unwrap().is_none());
    }

    #[test]
    fn list_with_wildcards() {
        let setup = set_up();
        let ns = namespace_root(&setup.store);
        let inbox = setup.store.create_mailbox(&ns, "INBOX", true).unwrap();
        let sub1 = setup.store.create_mailbox(&inbox, "sub1", true).unwrap();
        setup.store.create_mailbox(&inbox, "sub2", true).unwrap();
        setup.store.create_mailbox(&sub1, "deep", true).unwrap();

        let names = |folders: Vec<Arc<Folder>>| {
            folders
                .iter()
                .map(|f| f.full_name().to_owned())
                .collect::<Vec<_>>()
        };

        assert_eq!(
            vec!["#mail.INBOX.sub1", "#mail.INBOX.sub2"],
            names(setup.store.list_mailboxes("INBOX.%").unwrap())
        );
        assert_eq!(
            vec![
                "#mail.INBOX.sub1",
                "#mail.INBOX.sub1.deep",
                "#mail.INBOX.sub2"
            ],
            names(setup.store.list_mailboxes("INBOX.*").unwrap())
        );
        assert_eq!(
            vec!["#mail.INBOX.sub1"],
            names(setup.store.list_mailboxes("INBOX.s%").unwrap())
        );
        assert_eq!(
            vec!["#mail.INBOX"],
            names(setup.store.list_mailboxes("#mail.INBOX").unwrap())
        );
        assert!(setup
            .store
            .list_mailboxes("Nonexistent.%")
            .unwrap()
            .is_empty());

        assert_matches!(
            Err(Error::BadListPattern),
            setup.store.list_mailboxes("INBOX.*sub")
        );
        assert_matches!(
            Err(Error::BadListPattern),
            setup.store.list_mailboxes("INB%OX")
        );
    }

    #[test]
    fn delete_guards() {
        let setup = set_up();
        let ns = namespace_root(&setup.store);
        let inbox = setup.store.create_mailbox(&ns, "INBOX", true).unwrap();
        let sub = setup.store.create_mailbox(&inbox, "sub", true).unwrap();

        assert_matches!(
            Err(Error::MailboxHasInferiors),
            setup.store.delete_mailbox(&inbox)
        );

        sub.store(b"a message").unwrap();
        assert_matches!(
            Err(Error::MailboxNotEmpty),
            setup.store.delete_mailbox(&sub)
        );

        sub.replace_flags(Flags::DELETED, sub.last_uid().unwrap(), None, false)
            .unwrap();
        sub.expunge(None).unwrap();
        let sub_path = sub.path().to_owned();
        setup.store.delete_mailbox(&sub).unwrap();
        assert!(!sub_path.exists());
        assert!(setup.store.get_mailbox("#mail.INBOX.sub").unwrap().is_none());

        // With the child gone, the parent can be deleted too
        setup.store.delete_mailbox(&inbox).unwrap();
    }

    #[test]
    fn rename_and_quota_are_unsupported() {
        let setup = set_up();
        let ns = namespace_root(&setup.store);
        let inbox = setup.store.create_mailbox(&ns, "INBOX", true).unwrap();

        assert!(!setup.store.is_quota_supported());
        assert_matches!(
            Err(Error::RenameUnsupported),
            setup.store.rename_mailbox(&inbox, "OUTBOX")
        );
        assert_matches!(
            Err(Error::QuotaUnsupported),
            setup.store.get_quota("INBOX")
        );
        assert_matches!(
            Err(Error::QuotaUnsupported),
            setup.store.set_quota(&Quota {
                resource: "STORAGE".to_owned(),
                usage: 0,
                limit: 0,
            })
        );
    }

    #[test]
    fn user_list_roundtrip() {
        let setup = set_up();
        assert!(setup.store.read_user_list().unwrap().is_empty());

        let users = vec![
            UserRecord {
                login: "alice".to_owned(),
                password: "s3cret".to_owned(),
                domain: None,
            },
            UserRecord {
                login: "bob".to_owned(),
                password: "pass:word".to_owned(),
                domain: Some("example.com".to_owned()),
            },
        ];
        setup.store.write_user_list(&users).unwrap();
        assert_eq!(users, setup.store.read_user_list().unwrap());

        // Rewrites replace the whole list
        setup.store.write_user_list(&users[..1]).unwrap();
        assert_eq!(users[..1].to_vec(), setup.store.read_user_list().unwrap());
    }

    #[test]
    fn user_record_parsing() {
        assert_eq!(
            UserRecord {
                login: "alice".to_owned(),
                password: "pw".to_owned(),
                domain: None,
            },
            UserRecord::parse("alice:pw").unwrap()
        );
        assert_eq!(
            UserRecord {
                login: "bob".to_owned(),
                password: "pw".to_owned(),
                domain: Some("example.com".to_owned()),
            },
            UserRecord::parse("bob:pw@example.com").unwrap()
        );
        assert_matches!(Err(Error::BadUserLine(_)), UserRecord::parse("nope"));
        assert_matches!(Err(Error::BadUserLine(_)), UserRecord::parse(":pw"));
    }

    #[test]
    fn pid_file_lifecycle() {
        let root = TempDir::new().unwrap();
        let pid_path = root.path().join(PID_FILE);

        let store = FileStore::open(root.path()).unwrap();
        let contents = fs::read_to_string(&pid_path).unwrap();
        assert_eq!(
            std::process::id(),
            contents.trim().parse::<u32>().unwrap()
        );

        store.shutdown().unwrap();
        assert!(!pid_path.exists());

        // A stale PID file does not prevent startup
        fs::write(&pid_path, "12345\n").unwrap();
        let store = FileStore::open(root.path()).unwrap();
        store.shutdown().unwrap();
    }

    #[test]
    fn uids_continue_across_clean_restart() {
        let root = TempDir::new().unwrap();
        let first;
        {
            let store = FileStore::open(root.path()).unwrap();
            let ns = namespace_root(&store);
            let inbox = store.create_mailbox(&ns, "INBOX", true).unwrap();
            first = inbox.store(b"one").unwrap();
            store.shutdown().unwrap();
        }

        let store = FileStore::open(root.path()).unwrap();
        let inbox = store.get_mailbox("INBOX").unwrap().unwrap();
        let second = inbox.store(b"two").unwrap();
        assert_eq!(first.0.get() + 1, second.0.get());
    }

    #[test]
    fn evict_from_cache_recurses() {
        let setup = set_up();
        let ns = namespace_root(&setup.store);
        let inbox = setup.store.create_mailbox(&ns, "INBOX", true).unwrap();
        let sub = setup.store.create_mailbox(&inbox, "sub", true).unwrap();

        setup.store.evict_from_cache("INBOX").unwrap();

        let inbox2 = setup.store.get_mailbox("INBOX").unwrap().unwrap();
        let sub2 = setup.store.get_child(&inbox2, "sub").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&inbox, &inbox2));
        assert!(!Arc::ptr_eq(&sub, &sub2));
    }
}
