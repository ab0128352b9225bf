//! Per-timer session state machine.
//!
//! The session is a wall-clock-based state machine. It has no thread of its
//! own: every transition happens inside a call that passes `now` explicitly,
//! and elapsed deadlines are replayed lazily by [`Session::catch_up`].
//!
//! ## State Transitions
//!
//! ```text
//! Inactive -> Running -> [Confirmation ->] Rest -> [Confirmation ->] Running -> ...
//!             Running | Rest | Confirmation -> Pause -> (the interrupted phase)
//!             any -> Inactive (stop)
//! ```
//!
//! A phase reached through an elapsed deadline is anchored to that deadline,
//! not to the moment the expiry was observed, so the shared schedule does not
//! drift when polls arrive late.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use super::confirmation::{ConfirmationRound, PendingPhase};
use super::ids::{TimerId, TimerName, UserId};
use super::settings::{SettingsPatch, TimerSettings};
use super::state::{TimedPhase, TimerState};
use crate::error::{Result, TimerError, ValidationError};

/// What happens to the completed-cycle counter when a timer is stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleResetPolicy {
    /// The counter survives stop, like a real pomodoro tally.
    #[default]
    Persist,
    /// Stopping starts the big-rest count from zero.
    OnStop,
}

/// The timed phase a paused session will return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausedPhase {
    pub phase: TimedPhase,
    pub remaining_ms: i64,
}

/// Inputs a transition needs beyond the session itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// Members active as of the operation.
    pub active_members: &'a BTreeSet<UserId>,
    pub confirmation_timeout: Duration,
    /// Past this many replayed deadlines the schedule is re-anchored to `now`.
    pub max_catch_up_steps: usize,
}

/// Internal per-timer state. Mutated only through the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    timer_id: TimerId,
    owner_id: UserId,
    name: TimerName,
    settings: TimerSettings,
    state: TimerState,
    #[serde(default)]
    paused: Option<PausedPhase>,
    completed_work_cycles: u64,
    #[serde(default)]
    ever_started: bool,
    #[serde(default)]
    confirmation: Option<ConfirmationRound>,
    /// Incremented on every saved mutation; used for optimistic checks.
    version: u64,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        timer_id: TimerId,
        owner_id: UserId,
        name: TimerName,
        settings: TimerSettings,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            timer_id,
            owner_id,
            name,
            settings,
            state: TimerState::Inactive {
                publish_time: created_at,
            },
            paused: None,
            completed_work_cycles: 0,
            ever_started: false,
            confirmation: None,
            version: 0,
            created_at,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn is_owner(&self, user: UserId) -> bool {
        self.owner_id == user
    }

    pub fn name(&self) -> &TimerName {
        &self.name
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn completed_work_cycles(&self) -> u64 {
        self.completed_work_cycles
    }

    pub fn ever_started(&self) -> bool {
        self.ever_started
    }

    /// Remaining time of the interrupted phase; only set while paused.
    pub fn remaining_on_pause(&self) -> Option<Duration> {
        self.paused.map(|p| Duration::milliseconds(p.remaining_ms))
    }

    pub fn paused_phase(&self) -> Option<TimedPhase> {
        self.paused.map(|p| p.phase)
    }

    pub fn confirmation(&self) -> Option<&ConfirmationRound> {
        self.confirmation.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// `Inactive -> Running`. A paused session resumes instead.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            TimerState::Inactive { .. } => {
                if !self.ever_started {
                    self.ever_started = true;
                    self.completed_work_cycles = 0;
                }
                let ends_at = now + self.settings.work_time();
                self.enter_timed(TimedPhase::Running, ends_at, now);
                Ok(())
            }
            TimerState::Pause { .. } => self.resume(now),
            TimerState::Running { .. } | TimerState::Rest { .. } | TimerState::Confirmation { .. } => {
                Err(TimerError::AlreadyRunning)
            }
        }
    }

    /// Freeze the current timed phase, confirmation included.
    pub(crate) fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some((phase, ends_at)) = self.state.timed_phase() else {
            return Err(TimerError::NotPausable);
        };
        let remaining = (ends_at - now).max(Duration::zero());
        self.paused = Some(PausedPhase {
            phase,
            remaining_ms: remaining.num_milliseconds(),
        });
        self.state = TimerState::Pause {
            publish_time: self.stamp(now),
        };
        Ok(())
    }

    pub(crate) fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !matches!(self.state, TimerState::Pause { .. }) {
            return Err(TimerError::NotPaused);
        }
        let paused = self.paused.take().unwrap_or(PausedPhase {
            phase: TimedPhase::Running,
            remaining_ms: self.settings.work_time().num_milliseconds(),
        });
        let ends_at = now + Duration::milliseconds(paused.remaining_ms);
        self.enter_timed(paused.phase, ends_at, now);
        Ok(())
    }

    /// `* -> Inactive`. Returns whether anything changed.
    pub(crate) fn stop(&mut self, now: DateTime<Utc>, policy: CycleResetPolicy) -> bool {
        let before = self.clone();
        self.paused = None;
        self.confirmation = None;
        if policy == CycleResetPolicy::OnStop {
            self.completed_work_cycles = 0;
        }
        if !matches!(self.state, TimerState::Inactive { .. }) {
            self.state = TimerState::Inactive {
                publish_time: self.stamp(now),
            };
        }
        *self != before
    }

    /// Acknowledge the pending confirmation. Returns `true` when the
    /// acknowledgment counted toward the round.
    pub(crate) fn confirm(
        &mut self,
        user: UserId,
        now: DateTime<Utc>,
        ctx: &TransitionContext<'_>,
    ) -> Result<bool> {
        if !matches!(self.state, TimerState::Confirmation { .. }) {
            return Err(TimerError::NotWaitingForConfirmation);
        }
        let counted = self
            .confirmation
            .as_mut()
            .map(|round| round.confirm(user))
            .unwrap_or(false);
        self.settle_confirmation(now, now, ctx.active_members);
        Ok(counted)
    }

    /// Merge a settings patch. The current deadline is left as is; new
    /// values apply from the next phase on.
    pub(crate) fn apply_patch(&mut self, patch: &SettingsPatch) -> std::result::Result<(), ValidationError> {
        self.settings = self.settings.apply(patch)?;
        Ok(())
    }

    pub(crate) fn replace_settings(&mut self, settings: TimerSettings) -> std::result::Result<(), ValidationError> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Replay every deadline that has elapsed by `now`, in order.
    ///
    /// Returns the number of transitions applied; calling it again with the
    /// same `now` applies none.
    pub(crate) fn catch_up(&mut self, now: DateTime<Utc>, ctx: &TransitionContext<'_>) -> usize {
        let mut steps = 0;
        while let Some((phase, ends_at)) = self.state.timed_phase() {
            if ends_at <= now {
                let boundary = if steps < ctx.max_catch_up_steps {
                    ends_at
                } else {
                    now
                };
                self.expire(phase, boundary, now, ctx);
                steps += 1;
            } else if phase == TimedPhase::Confirmation
                && self.settle_confirmation(now, now, ctx.active_members)
            {
                steps += 1;
            } else {
                break;
            }
        }
        steps
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn expire(
        &mut self,
        phase: TimedPhase,
        boundary: DateTime<Utc>,
        now: DateTime<Utc>,
        ctx: &TransitionContext<'_>,
    ) {
        match phase {
            TimedPhase::Running => {
                self.completed_work_cycles += 1;
                let big = self.settings.is_big_rest(self.completed_work_cycles);
                debug!(
                    timer = %self.timer_id,
                    cycles = self.completed_work_cycles,
                    big,
                    "work phase finished"
                );
                self.advance_to(PendingPhase::Rest { big }, boundary, now, ctx);
            }
            TimedPhase::Rest => self.advance_to(PendingPhase::Running, boundary, now, ctx),
            TimedPhase::Confirmation => {
                debug!(timer = %self.timer_id, "confirmation deadline elapsed");
                self.close_confirmation(boundary, now);
            }
        }
    }

    fn advance_to(
        &mut self,
        next: PendingPhase,
        boundary: DateTime<Utc>,
        now: DateTime<Utc>,
        ctx: &TransitionContext<'_>,
    ) {
        if !self.settings.is_confirmation_required {
            self.enter_pending(next, boundary, now);
            return;
        }
        let round = ConfirmationRound::open(next, boundary, ctx.active_members.iter().copied());
        debug!(
            timer = %self.timer_id,
            required = round.required().len(),
            "waiting for confirmation"
        );
        self.confirmation = Some(round);
        self.enter_timed(TimedPhase::Confirmation, boundary + ctx.confirmation_timeout, now);
        self.settle_confirmation(boundary, now, ctx.active_members);
    }

    /// Close the round if nobody still active is outstanding.
    fn settle_confirmation(
        &mut self,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
        still_active: &BTreeSet<UserId>,
    ) -> bool {
        let settled = matches!(self.state, TimerState::Confirmation { .. })
            && self
                .confirmation
                .as_ref()
                .map_or(true, |round| round.is_settled(still_active));
        if settled {
            self.close_confirmation(at, now);
        }
        settled
    }

    fn close_confirmation(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) {
        let target = self
            .confirmation
            .take()
            .map(|round| round.target())
            .unwrap_or(PendingPhase::Running);
        self.enter_pending(target, at, now);
    }

    fn enter_pending(&mut self, next: PendingPhase, starts_at: DateTime<Utc>, now: DateTime<Utc>) {
        let (phase, duration) = match next {
            PendingPhase::Running => (TimedPhase::Running, self.settings.work_time()),
            PendingPhase::Rest { big: true } => (TimedPhase::Rest, self.settings.big_rest_time()),
            PendingPhase::Rest { big: false } => (TimedPhase::Rest, self.settings.rest_time()),
        };
        self.enter_timed(phase, starts_at + duration, now);
    }

    fn enter_timed(&mut self, phase: TimedPhase, ends_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.state = TimerState::timed(phase, ends_at, self.stamp(now));
    }

    /// Publish times never go backwards, even if the clock does.
    fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.state.publish_time())
    }
}
