pub mod config;
pub mod member;
pub mod timer;
pub mod watch;

use std::error::Error;
use std::sync::Arc;

use cotimer_core::{Config, Database, SystemClock, TimerError, TimerSessionEngine, UserId};
use serde::Serialize;

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Engine over the on-disk database, tuned by the config file.
pub fn open_engine(config: &Config) -> CliResult<TimerSessionEngine> {
    let db = Arc::new(Database::open()?);
    Ok(TimerSessionEngine::with_store(db, Arc::new(SystemClock)).with_options(config.engine_options()))
}

/// The acting user from `--user` or COTIMER_USER.
pub fn caller(user: Option<i64>) -> CliResult<UserId> {
    if let Some(id) = user {
        return Ok(UserId(id));
    }
    match std::env::var("COTIMER_USER") {
        Ok(raw) => Ok(raw.parse::<UserId>()?),
        Err(_) => Err("no acting user: pass --user <ID> or set COTIMER_USER".into()),
    }
}

pub fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Engine failures keep their stable code in the CLI message.
pub fn engine_error(err: TimerError) -> Box<dyn Error> {
    format!("{} ({})", err, err.code()).into()
}
