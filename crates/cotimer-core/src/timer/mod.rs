mod confirmation;
mod engine;
mod ids;
mod session;
mod settings;
mod state;

pub use confirmation::{ConfirmationRound, PendingPhase};
pub use engine::{EngineOptions, TimerSessionEngine};
pub use ids::{TimerId, TimerName, UserId};
pub use session::{CycleResetPolicy, PausedPhase, Session, TransitionContext};
pub use settings::{SettingsPatch, TimerSettings, MAX_PHASE_MS, MINUTE_MS};
pub use state::{Phase, TimedPhase, TimerState};
