//! Timer session engine.
//!
//! Orchestrates sessions, membership and confirmation for many timers. The
//! engine owns no thread: transitions happen inside the calls below, with
//! elapsed deadlines replayed lazily on access or by an external poller
//! calling [`TimerSessionEngine::refresh`].
//!
//! ## Concurrency
//!
//! Operations on the same timer are serialized by a per-timer lock; different
//! timers never wait on each other. External data (membership, activity) is
//! gathered before the lock is taken. Under the lock the session is reloaded
//! and its version compared with the snapshot the data was gathered for. A
//! mismatch retries once and then surfaces as [`TimerError::Conflict`].
//!
//! Membership writes an operation asks for are held back until the session
//! save succeeds, so an attempt that loses the compare-and-swap leaves the
//! membership store untouched and the retry sees the same starting point.
//!
//! ## Updates
//!
//! One update is published per committed call, carrying the state the call
//! ended in. A catch-up that crosses several boundaries at once (say
//! Running, then Confirmation, then Rest) publishes only the final state.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = TimerSessionEngine::with_store(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
//! let session = engine.create_timer(owner, "team", None)?;
//! engine.start(owner, session.timer_id())?;
//! // Later, from a poller:
//! engine.refresh(session.timer_id(), Utc::now())?;
//! ```

use chrono::{DateTime, Duration, Utc};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::ids::{TimerId, TimerName, UserId};
use super::session::{CycleResetPolicy, Session, TransitionContext};
use super::settings::{SettingsPatch, TimerSettings};
use super::state::TimerState;
use crate::clock::Clock;
use crate::error::{PublishError, Result, StoreError, TimerError};
use crate::events::{NoopPublisher, Publisher, TimerUpdate};
use crate::storage::{MemberRecord, MembershipStore, SessionStore};

/// Snapshot-then-lock attempts before giving up with `Conflict`.
const MAX_ATTEMPTS: usize = 2;

/// Engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// A member is active while its last activity lies within this window.
    pub activity_window: Duration,
    /// How long a confirmation round waits before advancing anyway.
    pub confirmation_timeout: Duration,
    pub cycle_reset: CycleResetPolicy,
    pub max_catch_up_steps: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            activity_window: Duration::minutes(5),
            confirmation_timeout: Duration::seconds(60),
            cycle_reset: CycleResetPolicy::Persist,
            max_catch_up_steps: 10_000,
        }
    }
}

/// One exclusive lock per timer, created on first use.
#[derive(Debug, Default)]
struct TimerLocks {
    locks: Mutex<HashMap<TimerId, Arc<Mutex<()>>>>,
}

impl TimerLocks {
    fn handle(&self, timer_id: TimerId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(timer_id).or_default())
    }

    fn forget(&self, timer_id: TimerId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&timer_id);
    }
}

/// What an operation sees once it holds the timer lock.
struct OpContext<'a> {
    timer_id: TimerId,
    now: DateTime<Utc>,
    caller: Option<UserId>,
    caller_is_member: bool,
    transition: TransitionContext<'a>,
    writes: RefCell<Vec<MemberWrite>>,
}

impl OpContext<'_> {
    /// Queue a membership write for after the session is saved.
    fn defer(&self, write: MemberWrite) {
        self.writes.borrow_mut().push(write);
    }

    /// Owner, or any member when the timer lets everyone pause.
    fn ensure_controller(&self, session: &Session) -> Result<UserId> {
        match self.caller {
            Some(user) if session.is_owner(user) => Ok(user),
            Some(user) if self.caller_is_member && session.settings().is_everyone_can_pause => Ok(user),
            _ => Err(TimerError::NotAuthorized),
        }
    }

    fn ensure_owner(&self, session: &Session) -> Result<UserId> {
        match self.caller {
            Some(user) if session.is_owner(user) => Ok(user),
            _ => Err(TimerError::NotAuthorized),
        }
    }

    fn ensure_member(&self) -> Result<UserId> {
        match self.caller {
            Some(user) if self.caller_is_member => Ok(user),
            _ => Err(TimerError::NotAuthorized),
        }
    }
}

/// Result of a serialized operation.
struct Applied<T> {
    session: Session,
    state_changed: bool,
    value: T,
}

/// Membership change applied once the session save has gone through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberWrite {
    Add(UserId),
    Remove(UserId),
    Confirm(UserId),
    Activity(UserId),
    ResetConfirmations,
}

enum Commit {
    Unchanged,
    Saved,
    Stale,
}

/// The shared timer session engine.
pub struct TimerSessionEngine {
    sessions: Arc<dyn SessionStore>,
    members: Arc<dyn MembershipStore>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn Publisher>,
    options: EngineOptions,
    locks: TimerLocks,
}

impl TimerSessionEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        members: Arc<dyn MembershipStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            members,
            clock,
            publisher: Arc::new(NoopPublisher),
            options: EngineOptions::default(),
            locks: TimerLocks::default(),
        }
    }

    /// Use one store for both sessions and membership.
    pub fn with_store<S>(store: Arc<S>, clock: Arc<dyn Clock>) -> Self
    where
        S: SessionStore + MembershipStore + 'static,
    {
        let sessions: Arc<dyn SessionStore> = store.clone();
        let members: Arc<dyn MembershipStore> = store;
        Self::new(sessions, members, clock)
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Create a timer owned by `owner`, who becomes its first member.
    pub fn create_timer(
        &self,
        owner: UserId,
        name: &str,
        settings: Option<TimerSettings>,
    ) -> Result<Session> {
        let name = TimerName::new(name).map_err(TimerError::InvalidName)?;
        let settings = settings.unwrap_or_default();
        settings.validate().map_err(TimerError::InvalidSettings)?;

        let now = self.clock.now();
        let session = Session::new(TimerId::new(), owner, name, settings, now);
        self.sessions.create(&session)?;
        self.members.add_member(session.timer_id(), owner, now)?;
        info!(timer = %session.timer_id(), owner = %owner, "timer created");
        Ok(session)
    }

    /// Remove a timer with all of its memberships. Owner only.
    pub fn delete_timer(&self, caller: UserId, timer_id: TimerId) -> Result<()> {
        {
            let handle = self.locks.handle(timer_id);
            let _guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
            let session = self.load(timer_id)?;
            if !session.is_owner(caller) {
                return Err(TimerError::NotAuthorized);
            }
            self.sessions.delete(timer_id)?;
            self.members.remove_timer(timer_id)?;
        }
        self.locks.forget(timer_id);
        info!(timer = %timer_id, "timer deleted");
        Ok(())
    }

    // ── State machine operations ─────────────────────────────────────

    pub fn start(&self, caller: UserId, timer_id: TimerId) -> Result<TimerState> {
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            op.ensure_controller(session)?;
            session.start(op.now)
        })?;
        Ok(applied.session.state())
    }

    pub fn pause(&self, caller: UserId, timer_id: TimerId) -> Result<TimerState> {
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            op.ensure_controller(session)?;
            session.pause(op.now)
        })?;
        Ok(applied.session.state())
    }

    pub fn resume(&self, caller: UserId, timer_id: TimerId) -> Result<TimerState> {
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            op.ensure_controller(session)?;
            session.resume(op.now)
        })?;
        Ok(applied.session.state())
    }

    /// Owner only, regardless of `is_everyone_can_pause`.
    pub fn stop(&self, caller: UserId, timer_id: TimerId) -> Result<TimerState> {
        let policy = self.options.cycle_reset;
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            op.ensure_owner(session)?;
            session.stop(op.now, policy);
            Ok(())
        })?;
        Ok(applied.session.state())
    }

    /// Acknowledge the pending confirmation round.
    pub fn confirm(&self, caller: UserId, timer_id: TimerId) -> Result<TimerState> {
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            if !op.caller_is_member {
                return Err(TimerError::NotAMember(caller));
            }
            let counted = session.confirm(caller, op.now, &op.transition)?;
            if counted {
                op.defer(MemberWrite::Confirm(caller));
            } else {
                debug!(timer = %op.timer_id, user = %caller, "confirmation outside the round snapshot");
            }
            Ok(())
        })?;
        Ok(applied.session.state())
    }

    /// Apply every deadline elapsed by `now`. Idempotent for a given `now`.
    pub fn refresh(&self, timer_id: TimerId, now: DateTime<Utc>) -> Result<TimerState> {
        let applied = self.mutate(timer_id, None, Some(now), |_, _| Ok(()))?;
        Ok(applied.session.state())
    }

    /// Merge `patch` into the settings. Owner only. The running deadline is
    /// kept; new durations apply from the next phase.
    pub fn update_settings(
        &self,
        caller: UserId,
        timer_id: TimerId,
        patch: &SettingsPatch,
    ) -> Result<TimerState> {
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            op.ensure_owner(session)?;
            session.apply_patch(patch).map_err(TimerError::InvalidSettings)
        })?;
        info!(timer = %timer_id, "settings updated");
        Ok(applied.session.state())
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Admit `user` to the timer. Owner only. Returns `false` when the user
    /// already was a member.
    pub fn add_member(&self, caller: UserId, timer_id: TimerId, user: UserId) -> Result<bool> {
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            op.ensure_owner(session)?;
            let added = !self.members.is_member(timer_id, user)?;
            if added {
                op.defer(MemberWrite::Add(user));
            }
            Ok(added)
        })?;
        if applied.value {
            info!(timer = %timer_id, user = %user, "member added");
        }
        Ok(applied.value)
    }

    /// Remove `user` from the timer. Owner only; the owner cannot be kicked.
    pub fn kick_member(&self, caller: UserId, timer_id: TimerId, user: UserId) -> Result<TimerState> {
        let applied = self.mutate(timer_id, Some(caller), None, |session, op| {
            op.ensure_owner(session)?;
            if session.is_owner(user) {
                return Err(TimerError::CannotRemoveOwner);
            }
            self.remove_and_settle(session, op, user)
        })?;
        info!(timer = %timer_id, user = %user, "member kicked");
        Ok(applied.session.state())
    }

    /// Leave a timer. The owner has to delete it instead.
    pub fn leave(&self, caller: UserId, timer_id: TimerId) -> Result<()> {
        self.mutate(timer_id, Some(caller), None, |session, op| {
            if session.is_owner(caller) {
                return Err(TimerError::CannotRemoveOwner);
            }
            self.remove_and_settle(session, op, caller)
        })?;
        info!(timer = %timer_id, user = %caller, "member left");
        Ok(())
    }

    /// Members ordered by user id, `count` at a time after `after`.
    pub fn members(
        &self,
        caller: UserId,
        timer_id: TimerId,
        after: Option<UserId>,
        count: usize,
    ) -> Result<Vec<MemberRecord>> {
        self.load(timer_id)?;
        if !self.members.is_member(timer_id, caller)? {
            return Err(TimerError::NotAuthorized);
        }
        Ok(self.members.list_members(timer_id, after, count)?)
    }

    /// Record that `caller` is still around and return the current state.
    pub fn heartbeat(&self, caller: UserId, timer_id: TimerId) -> Result<TimerState> {
        self.state(caller, timer_id)
    }

    /// Current state as seen by a member, with elapsed deadlines applied.
    pub fn state(&self, caller: UserId, timer_id: TimerId) -> Result<TimerState> {
        let applied = self.mutate(timer_id, Some(caller), None, |_, op| {
            op.ensure_member()?;
            Ok(())
        })?;
        Ok(applied.session.state())
    }

    /// Internal snapshot of a timer, refreshed to the current time.
    pub fn session(&self, timer_id: TimerId) -> Result<Session> {
        let applied = self.mutate(timer_id, None, None, |_, _| Ok(()))?;
        Ok(applied.session)
    }

    /// Refresh every stored timer. Returns the timers whose state changed.
    ///
    /// Timers deleted meanwhile are skipped and conflicts are logged; a
    /// store failure aborts the sweep.
    pub fn refresh_all(&self, now: DateTime<Utc>) -> Result<Vec<TimerUpdate>> {
        let mut changed = Vec::new();
        for timer_id in self.sessions.timer_ids()? {
            match self.mutate(timer_id, None, Some(now), |_, _| Ok(())) {
                Ok(applied) if applied.state_changed => changed.push(TimerUpdate {
                    timer_id,
                    state: applied.session.state(),
                }),
                Ok(_) | Err(TimerError::TimerNotFound(_)) => {}
                Err(TimerError::Conflict(_)) => {
                    warn!(timer = %timer_id, "refresh skipped after repeated conflicts");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(changed)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn load(&self, timer_id: TimerId) -> Result<Session> {
        self.sessions
            .load(timer_id)?
            .ok_or(TimerError::TimerNotFound(timer_id))
    }

    /// Run `op` against the caught-up session under the timer lock and
    /// persist the outcome.
    ///
    /// Elapsed deadlines are kept even when `op` fails, so a rejected action
    /// still moves the schedule forward.
    fn mutate<T>(
        &self,
        timer_id: TimerId,
        caller: Option<UserId>,
        at: Option<DateTime<Utc>>,
        op: impl Fn(&mut Session, &OpContext<'_>) -> Result<T>,
    ) -> Result<Applied<T>> {
        for attempt in 1..=MAX_ATTEMPTS {
            let snapshot = self.load(timer_id)?;
            let gathered_at = at.unwrap_or_else(|| self.clock.now());
            let caller_is_member = match caller {
                Some(user) => self.members.is_member(timer_id, user)?,
                None => false,
            };
            let mut active = self
                .members
                .list_active_members(timer_id, gathered_at - self.options.activity_window)?;
            if let Some(user) = caller.filter(|_| caller_is_member) {
                active.insert(user);
            }

            let handle = self.locks.handle(timer_id);
            let _guard = handle.lock().unwrap_or_else(PoisonError::into_inner);

            let now = at.unwrap_or_else(|| self.clock.now());
            let before = self.load(timer_id)?;
            if before.version() != snapshot.version() {
                debug!(timer = %timer_id, attempt, "session changed while gathering, retrying");
                continue;
            }

            let ctx = OpContext {
                timer_id,
                now,
                caller,
                caller_is_member,
                transition: TransitionContext {
                    active_members: &active,
                    confirmation_timeout: self.options.confirmation_timeout,
                    max_catch_up_steps: self.options.max_catch_up_steps,
                },
                writes: RefCell::new(Vec::new()),
            };

            let mut session = before.clone();
            session.catch_up(now, &ctx.transition);

            let mut writes = Vec::new();
            if opened_new_round(&before, &session) {
                writes.push(MemberWrite::ResetConfirmations);
            }
            if let Some(user) = caller.filter(|_| caller_is_member) {
                writes.push(MemberWrite::Activity(user));
            }

            let caught_up = session.clone();
            let result = op(&mut session, &ctx);
            match result {
                Ok(_) => writes.append(&mut ctx.writes.borrow_mut()),
                Err(_) => session = caught_up,
            }

            match self.commit(&before, &mut session)? {
                Commit::Stale => {
                    debug!(timer = %timer_id, attempt, "lost compare-and-swap, retrying");
                    continue;
                }
                Commit::Saved | Commit::Unchanged => {}
            }
            self.apply_writes(timer_id, now, &writes)?;

            let state_changed = session.state() != before.state();
            return result.map(|value| Applied {
                session,
                state_changed,
                value,
            });
        }

        warn!(timer = %timer_id, "giving up after concurrent modification");
        Err(TimerError::Conflict(timer_id))
    }

    /// Save a changed session and publish a changed state. Caller holds the
    /// timer lock.
    fn commit(&self, before: &Session, session: &mut Session) -> Result<Commit> {
        if session == before {
            return Ok(Commit::Unchanged);
        }
        session.bump_version();
        match self.sessions.save(session, before.version()) {
            Ok(()) => {}
            Err(StoreError::VersionMismatch { .. }) => return Ok(Commit::Stale),
            Err(err) => return Err(err.into()),
        }
        let state = session.state();
        if state != before.state() {
            debug!(timer = %session.timer_id(), phase = %state.phase(), "state changed");
            self.publish(session.timer_id(), &state);
        }
        Ok(Commit::Saved)
    }

    fn publish(&self, timer_id: TimerId, state: &TimerState) {
        match self.publisher.publish(timer_id, state) {
            Ok(()) => {}
            Err(PublishError::NoSubscribers) => {
                debug!(timer = %timer_id, "no subscribers for update");
            }
            Err(err) => {
                warn!(timer = %timer_id, error = %err, "failed to publish update");
            }
        }
    }

    fn apply_writes(&self, timer_id: TimerId, now: DateTime<Utc>, writes: &[MemberWrite]) -> Result<()> {
        for write in writes {
            match *write {
                MemberWrite::Add(user) => {
                    self.members.add_member(timer_id, user, now)?;
                }
                MemberWrite::Remove(user) => {
                    self.members.remove_member(timer_id, user)?;
                }
                MemberWrite::Confirm(user) => self.members.set_confirmed(timer_id, user, true)?,
                MemberWrite::Activity(user) => self.members.record_activity(timer_id, user, now)?,
                MemberWrite::ResetConfirmations => self.members.reset_confirmations(timer_id)?,
            }
        }
        Ok(())
    }

    /// Drop a member and let a pending round settle without them.
    fn remove_and_settle(&self, session: &mut Session, op: &OpContext<'_>, user: UserId) -> Result<TimerState> {
        if !self.members.is_member(op.timer_id, user)? {
            return Err(TimerError::NotAMember(user));
        }
        op.defer(MemberWrite::Remove(user));
        let remaining: BTreeSet<UserId> = op
            .transition
            .active_members
            .iter()
            .copied()
            .filter(|member| *member != user)
            .collect();
        let transition = TransitionContext {
            active_members: &remaining,
            ..op.transition
        };
        session.catch_up(op.now, &transition);
        Ok(session.state())
    }
}

/// Member flags mirror the open round; a fresh round starts unconfirmed.
fn opened_new_round(before: &Session, after: &Session) -> bool {
    let opened_before = before.confirmation().map(|round| round.opened_at());
    let opened_after = after.confirmation().map(|round| round.opened_at());
    opened_after.is_some() && opened_after != opened_before
}
