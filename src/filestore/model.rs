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

use std::fmt;
use std::num::NonZeroU64;

use bitflags::bitflags;
use chrono::{DateTime, TimeZone, Utc};

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// mailbox. UIDs are never reused, even across process restarts; the
/// allocator persists a reservation watermark ahead of consumption to
/// guarantee this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU64);

impl Uid {
    pub fn of(uid: u64) -> Option<Self> {
        NonZeroU64::new(uid).map(Uid)
    }

    #[cfg(test)]
    pub fn u(uid: u64) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

bitflags! {
    /// The bitmask encoding of a message's flags.
    ///
    /// The bit values are part of the on-disk index format and must never
    /// change. They are the classic javax.mail flag constants, which keeps
    /// the files interchangeable with tools that read that encoding.
    pub struct Flags: u32 {
        const ANSWERED = 0x01;
        const DELETED = 0x02;
        const DRAFT = 0x04;
        const FLAGGED = 0x08;
        const RECENT = 0x10;
        const SEEN = 0x20;
    }
}

/// An inclusive range of message identifiers, either UIDs or message
/// sequence numbers depending on context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    pub fn new(start: u64, end: u64) -> Self {
        IdRange { start, end }
    }

    pub fn single(value: u64) -> Self {
        IdRange {
            start: value,
            end: value,
        }
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }
}

/// Whether any range in `ranges` contains `value`.
pub fn ranges_contain(ranges: &[IdRange], value: u64) -> bool {
    ranges.iter().any(|r| r.contains(value))
}

/// A message as returned from the store: its permanent identity, current
/// metadata, and raw content bytes.
///
/// The content is opaque to this crate; MIME interpretation is the business
/// of the protocol layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub uid: Uid,
    pub flags: Flags,
    pub received: DateTime<Utc>,
    pub content: Vec<u8>,
}

/// Receives notifications about changes to a folder.
///
/// Notification is synchronous: every callback completes before the store
/// operation that triggered it returns. Listener identity (for the
/// "exclude this listener" feature of the flag operations) is `Arc` pointer
/// identity.
pub trait FolderListener: Send + Sync {
    /// A message was appended at the given sequence number.
    fn added(&self, _msgnum: u32) {}

    /// The message at the given (pre-removal) sequence number was expunged.
    fn expunged(&self, _msgnum: u32) {}

    /// The flags of the message at the given sequence number changed.
    ///
    /// `uid` is populated only when the caller requested UID notification.
    fn flags_updated(&self, _msgnum: u32, _flags: Flags, _uid: Option<Uid>) {}

    /// The folder itself is being deleted.
    fn mailbox_deleted(&self) {}
}

/// A quota datum, present only so that the quota calls have a contract.
///
/// No backend in this crate supports quotas; the operations that traffic in
/// this type always fail with `Error::QuotaUnsupported`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quota {
    pub resource: String,
    pub usage: u64,
    pub limit: u64,
}

/// Convert a millisecond timestamp from an index record into a `DateTime`.
///
/// Out-of-range values (which can only arise from a corrupt record) clamp to
/// the epoch rather than failing the read.
pub(crate) fn datetime_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_bits_are_stable() {
        assert_eq!(0x01, Flags::ANSWERED.bits());
        assert_eq!(0x02, Flags::DELETED.bits());
        assert_eq!(0x04, Flags::DRAFT.bits());
        assert_eq!(0x08, Flags::FLAGGED.bits());
        assert_eq!(0x10, Flags::RECENT.bits());
        assert_eq!(0x20, Flags::SEEN.bits());
    }

    #[test]
    fn id_range_containment() {
        let ranges = [IdRange::single(3), IdRange::new(7, 9)];
        assert!(ranges_contain(&ranges, 3));
        assert!(ranges_contain(&ranges, 7));
        assert!(ranges_contain(&ranges, 8));
        assert!(ranges_contain(&ranges, 9));
        assert!(!ranges_contain(&ranges, 2));
        assert!(!ranges_contain(&ranges, 4));
        assert!(!ranges_contain(&ranges, 10));
    }

    #[test]
    fn bad_timestamp_clamps_to_epoch() {
        assert_eq!(0, datetime_from_millis(i64::MAX).timestamp_millis());
        assert_eq!(1234, datetime_from_millis(1234).timestamp_millis());
    }
}
