use serde_json::json;
use std::sync::Arc;
use taskwarden::config::EnvSnapshot;
use taskwarden::observability::{labels, AlertSeverity};
use taskwarden::{Config, Platform, SubmitOptions, TaskStatus, TaskType};

mod common;
use common::test_helpers::*;
use common::{RecordingNotifier, ScriptedProber};

const VOICE_URL: &str = "http://voice.test:8880";

struct Fixture {
    platform: Platform,
    prober: Arc<ScriptedProber>,
    notifier: Arc<RecordingNotifier>,
}

fn fixture() -> Fixture {
    let prober = Arc::new(ScriptedProber::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let config = Config {
        controller: create_test_controller_config(),
        registry: create_test_registry_config(),
        ..Config::default()
    };
    let platform = Platform::builder(config)
        .env(EnvSnapshot::from_pairs([("VOICE_SERVICE_URL", VOICE_URL)]))
        .prober(prober.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap();
    Fixture {
        platform,
        prober,
        notifier,
    }
}

#[tokio::test]
async fn test_outage_raises_alert_and_metrics() {
    let f = fixture();
    f.prober.set_up(VOICE_URL, 10);
    tokio_test::assert_ok!(f.platform.start().await);

    let checks = f.platform.hub().run_health_checks().await;
    assert_eq!(checks.len(), 2);
    assert!(checks.iter().all(|c| c.healthy), "{:?}", checks);

    f.prober.set_down(VOICE_URL);
    f.platform.registry().check_all().await;

    let hub = f.platform.hub();
    assert!(wait_until(move || async move { !hub.active_alerts().await.is_empty() }).await);
    let alert = hub.active_alerts().await.remove(0);
    assert_eq!(alert.severity, AlertSeverity::Warning);
    assert_eq!(alert.source, "registry");
    assert!(alert.title.contains("env-voice-service-url"));

    let disconnected = labels([("kind", "disconnected")]);
    assert_eq!(hub.counter("registry_events_total", &disconnected).await, Some(1.0));
    assert!(wait_until(move || async move {
        hub.gauge("services_unhealthy", &Default::default()).await == Some(1.0)
    })
    .await);
    assert_eq!(f.notifier.events(), vec!["service_down".to_string()]);

    let metrics = hub.export_prometheus().await;
    assert!(metrics.contains("registry_events_total"));

    f.platform.stop().await;
}

#[tokio::test]
async fn test_failed_task_reaches_notifier_and_counters() {
    let f = fixture();
    f.platform.start().await.unwrap();

    let task = f
        .platform
        .controller()
        .submit_task(TaskType::Voice, json!({ "text": "hi" }), SubmitOptions::default())
        .await
        .unwrap();

    let controller = f.platform.controller();
    let task_id = task.id.as_str();
    assert!(wait_until(move || async move {
        controller
            .get_task(task_id)
            .await
            .map_or(false, |t| t.status == TaskStatus::Failed)
    })
    .await);

    let notifier = &f.notifier;
    assert!(wait_until(move || async move { notifier.events().contains(&"task_failed".to_string()) }).await);
    let (_, payload) = f
        .notifier
        .sent()
        .into_iter()
        .find(|(event, _)| event == "task_failed")
        .unwrap();
    assert_eq!(payload["task_id"], task.id.as_str());
    assert_eq!(payload["error"], "No capable agent available");

    let hub = f.platform.hub();
    let voice = labels([("type", "voice")]);
    assert_eq!(hub.counter("tasks_failed_total", &voice).await, Some(1.0));
    assert_eq!(hub.counter("tasks_queued_total", &voice).await, Some(1.0));

    let dashboard = hub.dashboard().await;
    assert!(dashboard.recent_logs.iter().any(|entry| entry.message == "task failed"));

    f.platform.stop().await;
    let checks = hub.run_health_checks().await;
    assert!(checks.iter().all(|c| !c.healthy));
}
