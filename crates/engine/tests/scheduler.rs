mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use scriptd_core::script_types::ScriptLanguage;
use scriptd_db::models::script::CreateScript;
use scriptd_db::ScriptStore;
use scriptd_engine::ScheduleManager;
use scriptd_events::bus::EXECUTION_FINISHED;
use tokio_util::sync::CancellationToken;

use common::engine;

fn scheduled(name: &str, cron: &str) -> CreateScript {
    let mut dto = CreateScript::new(name, ScriptLanguage::Shell, "echo tick\n");
    dto.cron_expression = Some(cron.into());
    dto
}

#[tokio::test]
async fn tick_triggers_due_scripts_only() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = engine(dir.path());

    let due = store.create_script(&scheduled("due", "* * * * *")).await.unwrap();
    let nightly = store.create_script(&scheduled("nightly", "0 3 * * *")).await.unwrap();
    let broken = store.create_script(&scheduled("broken", "61 * * * *")).await.unwrap();
    let off = store.create_script(&scheduled("off", "* * * * *")).await.unwrap();
    store.set_enabled(off.id, false).await.unwrap();
    let manual = store
        .create_script(&CreateScript::new("manual", ScriptLanguage::Shell, "true\n"))
        .await
        .unwrap();

    let mut events = engine.events();
    let manager = ScheduleManager::new(engine.clone(), Duration::from_secs(60));
    let to = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 30).unwrap();
    let report = manager.tick(to - ChronoDuration::seconds(60), to).await.unwrap();

    assert_eq!(report.triggered, vec![due.id]);
    assert_eq!(report.invalid, vec![broken.id]);
    assert!(!report.triggered.contains(&nightly.id));
    assert!(!report.triggered.contains(&manual.id));

    // The spawned start lands asynchronously.
    let finished = tokio::time::timeout(common::WAIT, async {
        loop {
            if let Ok(event) = events.recv().await {
                if event.event_type == EXECUTION_FINISHED {
                    return event;
                }
            }
        }
    })
    .await
    .expect("scheduled run never finished");
    assert_eq!(finished.script_id, due.id);
    assert_eq!(store.count_logs(due.id).await.unwrap(), 1);
    assert_eq!(store.count_logs(off.id).await.unwrap(), 0);
}

#[tokio::test]
async fn window_excludes_its_start() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = engine(dir.path());
    store.create_script(&scheduled("hourly", "0 * * * *")).await.unwrap();

    let manager = ScheduleManager::new(engine, Duration::from_secs(60));
    let top = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();

    let report = manager
        .tick(top, top + ChronoDuration::seconds(60))
        .await
        .unwrap();
    assert!(report.triggered.is_empty());
}

#[tokio::test]
async fn scheduled_run_is_skipped_while_previous_is_active() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = engine(dir.path());
    let mut dto = scheduled("long", "* * * * *");
    dto.code = "sleep 1000\n".into();
    let script = store.create_script(&dto).await.unwrap();

    let manager = ScheduleManager::new(engine.clone(), Duration::from_secs(60));
    let to = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 30).unwrap();
    manager.tick(to - ChronoDuration::seconds(60), to).await.unwrap();
    common::wait_for_pid(&engine, script.id).await;

    let next = to + ChronoDuration::seconds(60);
    let report = manager.tick(to, next).await.unwrap();
    assert_eq!(report.triggered, vec![script.id]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.count_logs(script.id).await.unwrap(), 1);

    assert!(engine.shutdown(common::WAIT).await);
}

#[tokio::test]
async fn run_loop_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = engine(dir.path());
    let manager = ScheduleManager::new(engine, Duration::from_millis(20));
    let cancel = CancellationToken::new();

    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("schedule manager did not stop")
        .unwrap();
}
