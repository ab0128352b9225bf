use clap::Subcommand;
use cotimer_core::{Config, TimerId, UserId};
use serde_json::json;

use super::{caller, engine_error, open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum MemberAction {
    /// Add a user to the timer (owner only)
    Add { timer_id: TimerId, user_id: UserId },
    /// Remove a user from the timer (owner only)
    Kick { timer_id: TimerId, user_id: UserId },
    /// Leave the timer
    Leave { timer_id: TimerId },
    /// List members ordered by user id
    List {
        timer_id: TimerId,
        /// Only members with a larger user id
        #[arg(long)]
        after: Option<UserId>,
        #[arg(long, default_value = "50")]
        count: usize,
    },
    /// Mark the acting user as active and print the timer state
    Heartbeat { timer_id: TimerId },
}

pub fn run(user: Option<i64>, action: MemberAction) -> CliResult {
    let config = Config::load()?;
    let engine = open_engine(&config)?;
    let me = caller(user)?;

    match action {
        MemberAction::Add { timer_id, user_id } => {
            let added = engine.add_member(me, timer_id, user_id).map_err(engine_error)?;
            print_json(&json!({ "user_id": user_id, "added": added }))?;
        }
        MemberAction::Kick { timer_id, user_id } => {
            print_json(&engine.kick_member(me, timer_id, user_id).map_err(engine_error)?)?;
        }
        MemberAction::Leave { timer_id } => {
            engine.leave(me, timer_id).map_err(engine_error)?;
            println!("{{\"type\": \"member_left\"}}");
        }
        MemberAction::List {
            timer_id,
            after,
            count,
        } => {
            print_json(&engine.members(me, timer_id, after, count).map_err(engine_error)?)?;
        }
        MemberAction::Heartbeat { timer_id } => {
            print_json(&engine.heartbeat(me, timer_id).map_err(engine_error)?)?;
        }
    }
    Ok(())
}
