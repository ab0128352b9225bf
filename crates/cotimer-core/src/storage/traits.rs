use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::timer::{Session, TimerId, TimerSettings, UserId};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-member activity record of a timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Acknowledged the current confirmation round.
    pub is_confirmed: bool,
}

/// Persistence for per-timer sessions.
///
/// `save` is a compare-and-swap: it only succeeds when the stored version
/// still equals `expected_version`, and fails with
/// [`StoreError::VersionMismatch`] otherwise.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: &Session) -> StoreResult<()>;

    fn load(&self, timer_id: TimerId) -> StoreResult<Option<Session>>;

    fn save(&self, session: &Session, expected_version: u64) -> StoreResult<()>;

    /// Returns whether a session was removed.
    fn delete(&self, timer_id: TimerId) -> StoreResult<bool>;

    fn timer_ids(&self) -> StoreResult<Vec<TimerId>>;

    fn get_settings(&self, timer_id: TimerId) -> StoreResult<Option<TimerSettings>> {
        Ok(self.load(timer_id)?.map(|session| *session.settings()))
    }

    /// Overwrite the settings of a stored session. Invalid settings are
    /// rejected before anything is written.
    fn set_settings(&self, timer_id: TimerId, settings: TimerSettings) -> StoreResult<()> {
        let mut session = self.load(timer_id)?.ok_or(StoreError::NotFound(timer_id))?;
        let expected = session.version();
        session.replace_settings(settings)?;
        session.bump_version();
        self.save(&session, expected)
    }
}

/// Membership and activity tracking for timers.
pub trait MembershipStore: Send + Sync {
    /// Returns `false` when the user already was a member.
    fn add_member(&self, timer_id: TimerId, user_id: UserId, joined_at: DateTime<Utc>) -> StoreResult<bool>;

    /// Returns `false` when the user was not a member.
    fn remove_member(&self, timer_id: TimerId, user_id: UserId) -> StoreResult<bool>;

    /// Drop every membership of a timer.
    fn remove_timer(&self, timer_id: TimerId) -> StoreResult<()>;

    fn is_member(&self, timer_id: TimerId, user_id: UserId) -> StoreResult<bool>;

    /// Members ordered by user id, starting after `after`.
    fn list_members(
        &self,
        timer_id: TimerId,
        after: Option<UserId>,
        count: usize,
    ) -> StoreResult<Vec<MemberRecord>>;

    /// Members whose last activity is strictly after `active_since`.
    fn list_active_members(
        &self,
        timer_id: TimerId,
        active_since: DateTime<Utc>,
    ) -> StoreResult<BTreeSet<UserId>>;

    fn record_activity(&self, timer_id: TimerId, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()>;

    fn set_confirmed(&self, timer_id: TimerId, user_id: UserId, confirmed: bool) -> StoreResult<()>;

    /// Clear every member's confirmation flag.
    fn reset_confirmations(&self, timer_id: TimerId) -> StoreResult<()>;
}
