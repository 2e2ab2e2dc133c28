//! Last-writer-wins conflict resolution.
//!
//! Rules, for an incoming entry `E` against the local current entry `L`
//! of the same key:
//! 1. No `L`: `E` wins.
//! 2. Higher version wins.
//! 3. Equal version, different owner: lower `owner_pid` wins.
//! 4. Equal version and owner: the same entry re-delivered, keep `L`.
//!
//! The outcome only depends on `(version, owner_pid)`, so applying a set of
//! entries is idempotent and independent of arrival order. Tombstones are
//! compared like any other entry.

use std::cmp::Ordering;

use crate::store::Entry;

/// Conflict resolution outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Replace the local entry with the incoming one
    TakeIncoming,
    /// Leave the local entry unchanged
    KeepLocal,
}

/// Precedence of `a` over `b`: `Greater` means `a` wins
pub fn precedence(a: &Entry, b: &Entry) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| b.owner_pid.cmp(&a.owner_pid))
}

/// Decide whether `incoming` replaces `local`
pub fn resolve(local: Option<&Entry>, incoming: &Entry) -> Resolution {
    match local {
        None => Resolution::TakeIncoming,
        Some(local) => match precedence(incoming, local) {
            Ordering::Greater => Resolution::TakeIncoming,
            Ordering::Less | Ordering::Equal => Resolution::KeepLocal,
        },
    }
}
