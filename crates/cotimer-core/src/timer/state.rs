use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The observable state of a timer, as published to members.
///
/// `ends_at` exists only on phases with a deadline. `publish_time` is the
/// moment the state was computed and never decreases for a given timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TimerState {
    Inactive {
        publish_time: DateTime<Utc>,
    },
    Pause {
        publish_time: DateTime<Utc>,
    },
    Running {
        ends_at: DateTime<Utc>,
        publish_time: DateTime<Utc>,
    },
    Rest {
        ends_at: DateTime<Utc>,
        publish_time: DateTime<Utc>,
    },
    /// Waiting for member acknowledgments; `ends_at` is the confirmation
    /// deadline, not a work/rest boundary.
    Confirmation {
        ends_at: DateTime<Utc>,
        publish_time: DateTime<Utc>,
    },
}

/// Phase tag of a [`TimerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inactive,
    Pause,
    Running,
    Rest,
    Confirmation,
}

/// The phases that count down to a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimedPhase {
    Running,
    Rest,
    Confirmation,
}

impl TimerState {
    pub(crate) fn timed(phase: TimedPhase, ends_at: DateTime<Utc>, publish_time: DateTime<Utc>) -> Self {
        match phase {
            TimedPhase::Running => TimerState::Running { ends_at, publish_time },
            TimedPhase::Rest => TimerState::Rest { ends_at, publish_time },
            TimedPhase::Confirmation => TimerState::Confirmation { ends_at, publish_time },
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            TimerState::Inactive { .. } => Phase::Inactive,
            TimerState::Pause { .. } => Phase::Pause,
            TimerState::Running { .. } => Phase::Running,
            TimerState::Rest { .. } => Phase::Rest,
            TimerState::Confirmation { .. } => Phase::Confirmation,
        }
    }

    /// The running phase and its deadline, if any.
    pub fn timed_phase(&self) -> Option<(TimedPhase, DateTime<Utc>)> {
        match *self {
            TimerState::Running { ends_at, .. } => Some((TimedPhase::Running, ends_at)),
            TimerState::Rest { ends_at, .. } => Some((TimedPhase::Rest, ends_at)),
            TimerState::Confirmation { ends_at, .. } => Some((TimedPhase::Confirmation, ends_at)),
            TimerState::Inactive { .. } | TimerState::Pause { .. } => None,
        }
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.timed_phase().map(|(_, ends_at)| ends_at)
    }

    pub fn publish_time(&self) -> DateTime<Utc> {
        match *self {
            TimerState::Inactive { publish_time }
            | TimerState::Pause { publish_time }
            | TimerState::Running { publish_time, .. }
            | TimerState::Rest { publish_time, .. }
            | TimerState::Confirmation { publish_time, .. } => publish_time,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Inactive => "inactive",
            Phase::Pause => "pause",
            Phase::Running => "running",
            Phase::Rest => "rest",
            Phase::Confirmation => "confirmation",
        };
        f.write_str(name)
    }
}

impl From<TimedPhase> for Phase {
    fn from(phase: TimedPhase) -> Self {
        match phase {
            TimedPhase::Running => Phase::Running,
            TimedPhase::Rest => Phase::Rest,
            TimedPhase::Confirmation => Phase::Confirmation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, min, 0).unwrap()
    }

    #[test]
    fn ends_at_only_for_timed_phases() {
        assert_eq!(TimerState::Inactive { publish_time: t(0) }.ends_at(), None);
        assert_eq!(TimerState::Pause { publish_time: t(0) }.ends_at(), None);
        for phase in [TimedPhase::Running, TimedPhase::Rest, TimedPhase::Confirmation] {
            let state = TimerState::timed(phase, t(25), t(0));
            assert_eq!(state.ends_at(), Some(t(25)));
            assert_eq!(state.phase(), Phase::from(phase));
            assert_eq!(state.publish_time(), t(0));
        }
    }

    #[test]
    fn serializes_with_lowercase_type_tag() {
        let state = TimerState::Rest {
            ends_at: t(30),
            publish_time: t(25),
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["type"], "rest");
        assert!(json.get("ends_at").is_some());

        let paused = serde_json::to_value(TimerState::Pause { publish_time: t(1) }).unwrap();
        assert_eq!(paused["type"], "pause");
        assert!(paused.get("ends_at").is_none());
    }
}
