//! Property tests for big-rest cycle selection and pause/resume.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use cotimer_core::{ManualClock, MemoryStore, Phase, TimerSessionEngine, TimerSettings, UserId};
use proptest::prelude::*;

const OWNER: UserId = UserId(7);
const MINUTE_MS: u64 = 60_000;

fn settings_strategy() -> impl Strategy<Value = TimerSettings> {
    (1u64..=60, 1u64..=30, 1u64..=60, 1u32..=6).prop_map(|(work, rest, big_rest, per)| TimerSettings {
        work_time_ms: work * MINUTE_MS,
        rest_time_ms: rest * MINUTE_MS,
        big_rest_time_ms: big_rest * MINUTE_MS,
        big_rest_enabled: true,
        big_rest_per: per,
        is_everyone_can_pause: false,
        is_confirmation_required: false,
    })
}

proptest! {
    #[test]
    fn big_rest_follows_every_nth_cycle(settings in settings_strategy()) {
        let start = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = TimerSessionEngine::with_store(Arc::new(MemoryStore::new()), clock);
        let id = engine.create_timer(OWNER, "prop", Some(settings)).unwrap().timer_id();

        let mut state = engine.start(OWNER, id).unwrap();
        let per = u64::from(settings.big_rest_per);
        for cycle in 1..=(2 * per + 1) {
            prop_assert_eq!(state.phase(), Phase::Running);
            let rest_start = state.ends_at().unwrap();
            state = engine.refresh(id, rest_start).unwrap();
            prop_assert_eq!(state.phase(), Phase::Rest);

            let expected = if cycle % per == 0 {
                settings.big_rest_time()
            } else {
                settings.rest_time()
            };
            prop_assert_eq!(state.ends_at().unwrap() - rest_start, expected);
            prop_assert_eq!(engine.session(id).unwrap().completed_work_cycles(), cycle);

            state = engine.refresh(id, state.ends_at().unwrap()).unwrap();
        }
    }

    #[test]
    fn disabled_big_rest_always_uses_normal_rest(settings in settings_strategy(), cycles in 1u64..12) {
        let settings = TimerSettings { big_rest_enabled: false, ..settings };
        let start = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = TimerSessionEngine::with_store(Arc::new(MemoryStore::new()), clock);
        let id = engine.create_timer(OWNER, "prop", Some(settings)).unwrap().timer_id();

        let mut state = engine.start(OWNER, id).unwrap();
        for _ in 0..cycles {
            let rest_start = state.ends_at().unwrap();
            state = engine.refresh(id, rest_start).unwrap();
            prop_assert_eq!(state.ends_at().unwrap() - rest_start, settings.rest_time());
            state = engine.refresh(id, state.ends_at().unwrap()).unwrap();
        }
    }

    #[test]
    fn pause_resume_at_same_instant_keeps_deadline(offset_secs in 0i64..(25 * 60)) {
        let start = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = TimerSessionEngine::with_store(Arc::new(MemoryStore::new()), clock.clone());
        let id = engine.create_timer(OWNER, "prop", None).unwrap().timer_id();

        let running = engine.start(OWNER, id).unwrap();
        clock.set(start + Duration::seconds(offset_secs));
        engine.pause(OWNER, id).unwrap();
        let resumed = engine.resume(OWNER, id).unwrap();
        prop_assert_eq!(resumed.ends_at(), running.ends_at());
    }
}
