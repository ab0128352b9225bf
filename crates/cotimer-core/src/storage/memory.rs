//! In-memory session and membership store.
//!
//! Backs tests and embedders that keep timers in process. Both traits are
//! implemented by one value so the engine can share a single `Arc`.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::traits::{MemberRecord, MembershipStore, SessionStore, StoreResult};
use crate::error::StoreError;
use crate::timer::{Session, TimerId, UserId};

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<TimerId, Session>>,
    members: Mutex<HashMap<TimerId, BTreeMap<UserId, MemberRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> StoreResult<MutexGuard<'_, HashMap<TimerId, Session>>> {
        self.sessions.lock().map_err(|_| StoreError::Poisoned)
    }

    fn members(&self) -> StoreResult<MutexGuard<'_, HashMap<TimerId, BTreeMap<UserId, MemberRecord>>>> {
        self.members.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SessionStore for MemoryStore {
    fn create(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions()?;
        if sessions.contains_key(&session.timer_id()) {
            return Err(StoreError::AlreadyExists(session.timer_id()));
        }
        sessions.insert(session.timer_id(), session.clone());
        Ok(())
    }

    fn load(&self, timer_id: TimerId) -> StoreResult<Option<Session>> {
        Ok(self.sessions()?.get(&timer_id).cloned())
    }

    fn save(&self, session: &Session, expected_version: u64) -> StoreResult<()> {
        let mut sessions = self.sessions()?;
        let stored = sessions
            .get_mut(&session.timer_id())
            .ok_or(StoreError::NotFound(session.timer_id()))?;
        if stored.version() != expected_version {
            return Err(StoreError::VersionMismatch {
                timer_id: session.timer_id(),
                expected: expected_version,
                found: stored.version(),
            });
        }
        *stored = session.clone();
        Ok(())
    }

    fn delete(&self, timer_id: TimerId) -> StoreResult<bool> {
        Ok(self.sessions()?.remove(&timer_id).is_some())
    }

    fn timer_ids(&self) -> StoreResult<Vec<TimerId>> {
        let mut ids: Vec<TimerId> = self.sessions()?.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

impl MembershipStore for MemoryStore {
    fn add_member(&self, timer_id: TimerId, user_id: UserId, joined_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut members = self.members()?;
        let timer = members.entry(timer_id).or_default();
        if timer.contains_key(&user_id) {
            return Ok(false);
        }
        timer.insert(
            user_id,
            MemberRecord {
                user_id,
                joined_at,
                last_activity: joined_at,
                is_confirmed: false,
            },
        );
        Ok(true)
    }

    fn remove_member(&self, timer_id: TimerId, user_id: UserId) -> StoreResult<bool> {
        Ok(self
            .members()?
            .get_mut(&timer_id)
            .and_then(|timer| timer.remove(&user_id))
            .is_some())
    }

    fn remove_timer(&self, timer_id: TimerId) -> StoreResult<()> {
        self.members()?.remove(&timer_id);
        Ok(())
    }

    fn is_member(&self, timer_id: TimerId, user_id: UserId) -> StoreResult<bool> {
        Ok(self
            .members()?
            .get(&timer_id)
            .is_some_and(|timer| timer.contains_key(&user_id)))
    }

    fn list_members(
        &self,
        timer_id: TimerId,
        after: Option<UserId>,
        count: usize,
    ) -> StoreResult<Vec<MemberRecord>> {
        let members = self.members()?;
        let Some(timer) = members.get(&timer_id) else {
            return Ok(Vec::new());
        };
        Ok(timer
            .values()
            .filter(|m| after.map_or(true, |after| m.user_id > after))
            .take(count)
            .cloned()
            .collect())
    }

    fn list_active_members(
        &self,
        timer_id: TimerId,
        active_since: DateTime<Utc>,
    ) -> StoreResult<BTreeSet<UserId>> {
        let members = self.members()?;
        Ok(members
            .get(&timer_id)
            .map(|timer| {
                timer
                    .values()
                    .filter(|m| m.last_activity > active_since)
                    .map(|m| m.user_id)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn record_activity(&self, timer_id: TimerId, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(member) = self
            .members()?
            .get_mut(&timer_id)
            .and_then(|timer| timer.get_mut(&user_id))
        {
            member.last_activity = member.last_activity.max(at);
        }
        Ok(())
    }

    fn set_confirmed(&self, timer_id: TimerId, user_id: UserId, confirmed: bool) -> StoreResult<()> {
        if let Some(member) = self
            .members()?
            .get_mut(&timer_id)
            .and_then(|timer| timer.get_mut(&user_id))
        {
            member.is_confirmed = confirmed;
        }
        Ok(())
    }

    fn reset_confirmations(&self, timer_id: TimerId) -> StoreResult<()> {
        if let Some(timer) = self.members()?.get_mut(&timer_id) {
            for member in timer.values_mut() {
                member.is_confirmed = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerName, TimerSettings};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn session() -> Session {
        Session::new(
            TimerId::new(),
            UserId(1),
            TimerName::new("team").unwrap(),
            TimerSettings::default(),
            t0(),
        )
    }

    #[test]
    fn save_is_compare_and_swap() {
        let store = MemoryStore::new();
        let mut s = session();
        store.create(&s).unwrap();
        assert!(matches!(store.create(&s), Err(StoreError::AlreadyExists(_))));

        s.bump_version();
        store.save(&s, 0).unwrap();
        let err = store.save(&s, 0).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionMismatch {
                expected: 0,
                found: 1,
                ..
            }
        ));
        assert_eq!(store.load(s.timer_id()).unwrap().unwrap().version(), 1);
    }

    #[test]
    fn settings_can_be_replaced_through_the_store() {
        let store = MemoryStore::new();
        let s = session();
        store.create(&s).unwrap();
        let settings = TimerSettings {
            big_rest_per: 2,
            ..TimerSettings::default()
        };
        store.set_settings(s.timer_id(), settings).unwrap();
        assert_eq!(store.get_settings(s.timer_id()).unwrap(), Some(settings));

        let invalid = TimerSettings {
            work_time_ms: 0,
            ..TimerSettings::default()
        };
        assert!(matches!(
            store.set_settings(s.timer_id(), invalid),
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(store.get_settings(s.timer_id()).unwrap(), Some(settings));
    }

    #[test]
    fn members_are_paginated_by_user_id() {
        let store = MemoryStore::new();
        let id = TimerId::new();
        for user in [5, 1, 3, 2, 4] {
            store.add_member(id, UserId(user), t0()).unwrap();
        }
        assert!(!store.add_member(id, UserId(3), t0()).unwrap());

        let first: Vec<_> = store.list_members(id, None, 2).unwrap().iter().map(|m| m.user_id).collect();
        assert_eq!(first, vec![UserId(1), UserId(2)]);
        let next: Vec<_> = store
            .list_members(id, Some(UserId(2)), 10)
            .unwrap()
            .iter()
            .map(|m| m.user_id)
            .collect();
        assert_eq!(next, vec![UserId(3), UserId(4), UserId(5)]);
    }

    #[test]
    fn active_members_follow_last_activity() {
        let store = MemoryStore::new();
        let id = TimerId::new();
        store.add_member(id, UserId(1), t0()).unwrap();
        store.add_member(id, UserId(2), t0()).unwrap();
        store.record_activity(id, UserId(2), t0() + Duration::minutes(10)).unwrap();

        let active = store.list_active_members(id, t0() + Duration::minutes(5)).unwrap();
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec![UserId(2)]);
    }

    #[test]
    fn confirmation_flags_reset_per_timer() {
        let store = MemoryStore::new();
        let id = TimerId::new();
        store.add_member(id, UserId(1), t0()).unwrap();
        store.set_confirmed(id, UserId(1), true).unwrap();
        assert!(store.list_members(id, None, 1).unwrap()[0].is_confirmed);
        store.reset_confirmations(id).unwrap();
        assert!(!store.list_members(id, None, 1).unwrap()[0].is_confirmed);
    }

    #[test]
    fn removing_members() {
        let store = MemoryStore::new();
        let id = TimerId::new();
        store.add_member(id, UserId(1), t0()).unwrap();
        assert!(store.remove_member(id, UserId(1)).unwrap());
        assert!(!store.remove_member(id, UserId(1)).unwrap());
        assert!(!store.is_member(id, UserId(1)).unwrap());
        store.add_member(id, UserId(2), t0()).unwrap();
        store.remove_timer(id).unwrap();
        assert!(store.list_members(id, None, 10).unwrap().is_empty());
    }
}
