//! # Cotimer Core Library
//!
//! This library provides the core business logic for cotimer, a shared
//! pomodoro timer. Groups of users co-own a timer that cycles through work
//! and rest phases, optionally gated by group confirmation, with big rests
//! every few cycles. The `cotimer` CLI is a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Session**: a wall-clock-based state machine per timer. Elapsed
//!   deadlines are replayed lazily whenever the timer is touched.
//! - **Engine**: serializes operations per timer, checks permissions and
//!   coordinates confirmation rounds with the membership store
//! - **Storage**: SQLite or in-memory session/membership stores and
//!   TOML-based configuration
//! - **Events**: best-effort publishing of every state change
//!
//! ## Key Components
//!
//! - [`TimerSessionEngine`]: Orchestrator exposing every timer operation
//! - [`Session`]: Per-timer state machine
//! - [`Database`]: SQLite persistence
//! - [`Config`]: Application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod storage;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, PublishError, StoreError, TimerError, ValidationError};
pub use events::{BroadcastPublisher, NoopPublisher, Publisher, RecordingPublisher, TimerUpdate};
pub use storage::{Config, Database, MemberRecord, MembershipStore, MemoryStore, SessionStore};
pub use timer::{
    CycleResetPolicy, EngineOptions, Phase, Session, SettingsPatch, TimerId, TimerSessionEngine,
    TimerSettings, TimerState, UserId,
};
