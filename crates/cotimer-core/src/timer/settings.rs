use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MINUTE_MS: u64 = 60 * 1000;

/// Upper bound for any single phase. Keeps deadline arithmetic far away
/// from overflow.
pub const MAX_PHASE_MS: u64 = 24 * 60 * MINUTE_MS;

/// Per-timer schedule and permission settings.
///
/// Durations are stored in milliseconds. A value produced by
/// [`TimerSettings::apply`] or accepted by [`TimerSettings::validate`] always
/// has positive durations and `big_rest_per >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    pub work_time_ms: u64,
    pub rest_time_ms: u64,
    pub big_rest_time_ms: u64,
    pub big_rest_enabled: bool,
    /// Completed work cycles between two big rests.
    pub big_rest_per: u32,
    /// When false only the owner may start, pause or resume.
    pub is_everyone_can_pause: bool,
    /// When true active members must acknowledge every phase change.
    pub is_confirmation_required: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_time_ms: 25 * MINUTE_MS,
            rest_time_ms: 5 * MINUTE_MS,
            big_rest_time_ms: 10 * MINUTE_MS,
            big_rest_enabled: true,
            big_rest_per: 4,
            is_everyone_can_pause: false,
            is_confirmation_required: false,
        }
    }
}

impl TimerSettings {
    pub fn work_time(&self) -> Duration {
        millis(self.work_time_ms)
    }

    pub fn rest_time(&self) -> Duration {
        millis(self.rest_time_ms)
    }

    pub fn big_rest_time(&self) -> Duration {
        millis(self.big_rest_time_ms)
    }

    /// Whether the rest following the `completed_cycles`-th work phase is a
    /// big rest.
    pub fn is_big_rest(&self, completed_cycles: u64) -> bool {
        self.big_rest_enabled
            && completed_cycles > 0
            && completed_cycles % u64::from(self.big_rest_per.max(1)) == 0
    }

    /// Check the settings invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_duration("work_time", self.work_time_ms)?;
        check_duration("rest_time", self.rest_time_ms)?;
        check_duration("big_rest_time", self.big_rest_time_ms)?;
        if self.big_rest_per == 0 {
            return Err(ValidationError::invalid("big_rest_per", "must be at least 1"));
        }
        Ok(())
    }

    /// Merge a patch over these settings. Unset fields keep their value; the
    /// merged result is validated as a whole and `self` is never modified.
    pub fn apply(&self, patch: &SettingsPatch) -> Result<Self, ValidationError> {
        let merged = Self {
            work_time_ms: patch.work_time_ms.unwrap_or(self.work_time_ms),
            rest_time_ms: patch.rest_time_ms.unwrap_or(self.rest_time_ms),
            big_rest_time_ms: patch.big_rest_time_ms.unwrap_or(self.big_rest_time_ms),
            big_rest_enabled: patch.big_rest_enabled.unwrap_or(self.big_rest_enabled),
            big_rest_per: patch.big_rest_per.unwrap_or(self.big_rest_per),
            is_everyone_can_pause: patch
                .is_everyone_can_pause
                .unwrap_or(self.is_everyone_can_pause),
            is_confirmation_required: patch
                .is_confirmation_required
                .unwrap_or(self.is_confirmation_required),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial settings update. `None` leaves the current value unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_rest_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_rest_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_rest_per: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_everyone_can_pause: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_confirmation_required: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn check_duration(field: &str, ms: u64) -> Result<(), ValidationError> {
    if ms == 0 {
        return Err(ValidationError::invalid(field, "must be greater than zero"));
    }
    if ms > MAX_PHASE_MS {
        return Err(ValidationError::invalid(
            field,
            format!("must not exceed {MAX_PHASE_MS} ms"),
        ));
    }
    Ok(())
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
