use chrono::Utc;
use clap::{Args, Subcommand};
use cotimer_core::timer::MINUTE_MS;
use cotimer_core::{Config, SettingsPatch, TimerId, TimerError};

use super::{caller, engine_error, open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Create a timer owned by the acting user
    Create {
        /// Display name (1-50 characters)
        name: String,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Start the work phase (resumes a paused timer)
    Start { timer_id: TimerId },
    /// Pause the current phase
    Pause { timer_id: TimerId },
    /// Resume a paused timer
    Resume { timer_id: TimerId },
    /// Stop the timer (owner only)
    Stop { timer_id: TimerId },
    /// Acknowledge the pending confirmation
    Confirm { timer_id: TimerId },
    /// Apply elapsed deadlines as of now
    Refresh { timer_id: TimerId },
    /// Print the current timer state as JSON
    Status { timer_id: TimerId },
    /// Print the internal session snapshot as JSON
    Session { timer_id: TimerId },
    /// Show timer settings, or update them and print the state (owner only for updates)
    Settings {
        timer_id: TimerId,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Delete the timer (owner only)
    Delete { timer_id: TimerId },
}

/// Settings overrides. Durations are in minutes.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Work phase length in minutes
    #[arg(long)]
    work: Option<u64>,
    /// Rest phase length in minutes
    #[arg(long)]
    rest: Option<u64>,
    /// Big rest length in minutes
    #[arg(long)]
    big_rest: Option<u64>,
    /// Completed work cycles per big rest
    #[arg(long)]
    big_rest_per: Option<u32>,
    #[arg(long)]
    big_rest_enabled: Option<bool>,
    /// Let every member start, pause and resume
    #[arg(long)]
    everyone_can_pause: Option<bool>,
    /// Wait for active members to confirm phase changes
    #[arg(long)]
    confirmation_required: Option<bool>,
}

impl SettingsArgs {
    fn to_patch(&self) -> SettingsPatch {
        let ms = |minutes: u64| minutes.saturating_mul(MINUTE_MS);
        SettingsPatch {
            work_time_ms: self.work.map(ms),
            rest_time_ms: self.rest.map(ms),
            big_rest_time_ms: self.big_rest.map(ms),
            big_rest_enabled: self.big_rest_enabled,
            big_rest_per: self.big_rest_per,
            is_everyone_can_pause: self.everyone_can_pause,
            is_confirmation_required: self.confirmation_required,
        }
    }
}

pub fn run(user: Option<i64>, action: TimerAction) -> CliResult {
    let config = Config::load()?;
    let engine = open_engine(&config)?;

    match action {
        TimerAction::Create { name, settings } => {
            let owner = caller(user)?;
            let settings = config
                .default_settings()?
                .apply(&settings.to_patch())
                .map_err(|e| engine_error(TimerError::InvalidSettings(e)))?;
            let session = engine
                .create_timer(owner, &name, Some(settings))
                .map_err(engine_error)?;
            print_json(&session)?;
        }
        TimerAction::Start { timer_id } => {
            print_json(&engine.start(caller(user)?, timer_id).map_err(engine_error)?)?;
        }
        TimerAction::Pause { timer_id } => {
            print_json(&engine.pause(caller(user)?, timer_id).map_err(engine_error)?)?;
        }
        TimerAction::Resume { timer_id } => {
            print_json(&engine.resume(caller(user)?, timer_id).map_err(engine_error)?)?;
        }
        TimerAction::Stop { timer_id } => {
            print_json(&engine.stop(caller(user)?, timer_id).map_err(engine_error)?)?;
        }
        TimerAction::Confirm { timer_id } => {
            print_json(&engine.confirm(caller(user)?, timer_id).map_err(engine_error)?)?;
        }
        TimerAction::Refresh { timer_id } => {
            print_json(&engine.refresh(timer_id, Utc::now()).map_err(engine_error)?)?;
        }
        TimerAction::Status { timer_id } => {
            print_json(&engine.state(caller(user)?, timer_id).map_err(engine_error)?)?;
        }
        TimerAction::Session { timer_id } => {
            print_json(&engine.session(timer_id).map_err(engine_error)?)?;
        }
        TimerAction::Settings { timer_id, settings } => {
            let patch = settings.to_patch();
            if patch.is_empty() {
                let session = engine.session(timer_id).map_err(engine_error)?;
                print_json(session.settings())?;
            } else {
                let state = engine
                    .update_settings(caller(user)?, timer_id, &patch)
                    .map_err(engine_error)?;
                print_json(&state)?;
            }
        }
        TimerAction::Delete { timer_id } => {
            engine.delete_timer(caller(user)?, timer_id).map_err(engine_error)?;
            println!("{{\"type\": \"timer_deleted\"}}");
        }
    }
    Ok(())
}
