//! Confirmation rounds gating phase changes on member acknowledgment.
//!
//! A round snapshots the members that were active when it opened. It settles
//! once every snapshotted member that is *still* active has confirmed; members
//! who went silent stop blocking as soon as they leave the activity window,
//! and members who became active later are never added. The deadline itself
//! lives on the session state and is enforced by the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ids::UserId;

/// The phase a confirmation round leads into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingPhase {
    Running,
    Rest { big: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRound {
    target: PendingPhase,
    opened_at: DateTime<Utc>,
    required: BTreeSet<UserId>,
    confirmed: BTreeSet<UserId>,
}

impl ConfirmationRound {
    pub(crate) fn open(
        target: PendingPhase,
        opened_at: DateTime<Utc>,
        active_members: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            target,
            opened_at,
            required: active_members.into_iter().collect(),
            confirmed: BTreeSet::new(),
        }
    }

    pub fn target(&self) -> PendingPhase {
        self.target
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// The snapshot taken when the round opened.
    pub fn required(&self) -> &BTreeSet<UserId> {
        &self.required
    }

    pub fn confirmed(&self) -> &BTreeSet<UserId> {
        &self.confirmed
    }

    /// Record an acknowledgment. Returns `true` when it counts toward the
    /// round, i.e. the user is part of the snapshot.
    pub(crate) fn confirm(&mut self, user: UserId) -> bool {
        if !self.required.contains(&user) {
            return false;
        }
        self.confirmed.insert(user);
        true
    }

    /// Snapshotted members still active that have not confirmed yet.
    pub fn outstanding<'a>(&'a self, still_active: &'a BTreeSet<UserId>) -> impl Iterator<Item = UserId> + 'a {
        self.required
            .iter()
            .filter(move |user| still_active.contains(*user) && !self.confirmed.contains(*user))
            .copied()
    }

    pub fn is_settled(&self, still_active: &BTreeSet<UserId>) -> bool {
        self.outstanding(still_active).next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn users(ids: &[i64]) -> BTreeSet<UserId> {
        ids.iter().copied().map(UserId).collect()
    }

    fn round(required: &[i64]) -> ConfirmationRound {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        ConfirmationRound::open(PendingPhase::Rest { big: false }, at, users(required))
    }

    #[test]
    fn settles_when_all_required_confirm() {
        let mut round = round(&[1, 2]);
        let active = users(&[1, 2]);
        assert!(round.confirm(UserId(1)));
        assert!(!round.is_settled(&active));
        assert!(round.confirm(UserId(2)));
        assert!(round.is_settled(&active));
    }

    #[test]
    fn late_joiners_are_not_required() {
        let mut round = round(&[1]);
        let active = users(&[1, 3]);
        assert!(!round.confirm(UserId(3)));
        assert!(!round.is_settled(&active));
        round.confirm(UserId(1));
        assert!(round.is_settled(&active));
    }

    #[test]
    fn silent_members_stop_blocking_once_inactive() {
        let mut round = round(&[1, 2]);
        round.confirm(UserId(1));
        assert!(!round.is_settled(&users(&[1, 2])));
        assert_eq!(round.outstanding(&users(&[1, 2])).collect::<Vec<_>>(), vec![UserId(2)]);
        assert!(round.is_settled(&users(&[1])));
    }

    #[test]
    fn confirming_twice_is_harmless() {
        let mut round = round(&[1, 2]);
        round.confirm(UserId(1));
        round.confirm(UserId(1));
        assert_eq!(round.confirmed().len(), 1);
    }

    #[test]
    fn empty_snapshot_is_settled() {
        assert!(round(&[]).is_settled(&users(&[5])));
    }
}
