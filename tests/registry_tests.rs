use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use taskwarden::config::{DiscoveryPort, EnvSnapshot, RegistryConfig};
use taskwarden::registry::{ConfigEventKind, HttpProber, RegistryEvent};
use taskwarden::{DecisionType, EndpointStatus, ServiceEndpoint, ServiceRegistry, ServiceType};
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::test_helpers::*;
use common::{RecordingNotifier, ScriptedProber};

const VOICE_URL: &str = "http://voice.test:8880";
const RESEARCH_URL: &str = "http://research.test:8001";

struct Harness {
    registry: ServiceRegistry,
    prober: Arc<ScriptedProber>,
    notifier: Arc<RecordingNotifier>,
    events: UnboundedReceiver<RegistryEvent>,
}

fn harness(config: RegistryConfig, env: EnvSnapshot) -> Harness {
    let prober = Arc::new(ScriptedProber::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = ServiceRegistry::builder(config)
        .prober(prober.clone())
        .notifier(notifier.clone())
        .env(env)
        .build()
        .unwrap();
    let events = registry.subscribe();
    Harness {
        registry,
        prober,
        notifier,
        events,
    }
}

fn voice_env() -> EnvSnapshot {
    EnvSnapshot::from_pairs([("VOICE_SERVICE_URL", VOICE_URL), ("OPENAI_API_KEY", "sk-test")])
}

fn config_kinds(events: &mut UnboundedReceiver<RegistryEvent>) -> Vec<ConfigEventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RegistryEvent::ConfigEvent(config_event) = event {
            kinds.push(config_event.kind);
        }
    }
    kinds
}

#[tokio::test]
async fn test_env_endpoints_become_primaries() {
    let env = EnvSnapshot::from_pairs([
        ("VOICE_SERVICE_URL", VOICE_URL),
        ("VAPI_SERVER_URL", "http://vapi.test:5002"),
        ("RESEARCH_SERVICE_URL", RESEARCH_URL),
    ]);
    let h = harness(create_test_registry_config(), env);

    assert_eq!(h.registry.load_from_env().await, 3);
    let primary = h.registry.primary_endpoint(ServiceType::VoiceProvider).await.unwrap();
    assert_eq!(primary.id, "env-voice-service-url");
    assert_eq!(primary.url, VOICE_URL);
    assert_eq!(primary.config.unwrap()["variable"], "VOICE_SERVICE_URL");
    assert!(h.registry.primary_endpoint(ServiceType::ToolBridge).await.is_none());
    assert_eq!(h.registry.status().await.unknown, 3);
}

#[tokio::test]
async fn test_credentials_are_reported_by_presence_only() {
    let h = harness(create_test_registry_config(), voice_env());
    let flags = h.registry.credential_flags();

    let openai = flags.iter().find(|f| f.name == "OPENAI_API_KEY").unwrap();
    assert!(openai.present);
    let slack = flags.iter().find(|f| f.name == "SLACK_BOT_TOKEN").unwrap();
    assert!(!slack.present);
    assert!(!serde_json::to_string(&flags).unwrap().contains("sk-test"));
}

#[tokio::test]
async fn test_outage_and_recovery_cycle() {
    let mut h = harness(create_test_registry_config(), voice_env());
    h.prober.set_up(VOICE_URL, 12);

    tokio_test::assert_ok!(h.registry.start().await);
    assert!(h.registry.is_running().await);
    let endpoint = h.registry.service("env-voice-service-url").await.unwrap();
    assert_eq!(endpoint.status, EndpointStatus::Healthy);
    assert_eq!(endpoint.latency_ms, Some(12));
    assert!(endpoint.last_seen.is_some());
    assert_eq!(
        config_kinds(&mut h.events),
        vec![ConfigEventKind::Discovered, ConfigEventKind::Connected]
    );

    h.prober.set_down(VOICE_URL);
    let checks = h.registry.check_all().await;
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].previous, EndpointStatus::Healthy);
    assert_eq!(checks[0].status, EndpointStatus::Unhealthy);
    assert!(checks[0].error.as_deref().unwrap().contains("refused"));
    assert_eq!(config_kinds(&mut h.events), vec![ConfigEventKind::Disconnected]);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "service_down");
    assert_eq!(sent[0].1["id"], "env-voice-service-url");
    assert_eq!(sent[0].1["type"], "voice-provider");
    assert!(!sent[0].1["last_seen"].is_null());

    // Staying down does not notify again.
    h.registry.check_all().await;
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(config_kinds(&mut h.events).is_empty());

    h.prober.set_up(VOICE_URL, 8);
    h.registry.check_all().await;
    assert_eq!(config_kinds(&mut h.events), vec![ConfigEventKind::Healed]);
    let decisions = h.registry.decisions(10).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision_type, DecisionType::Heal);
    assert!(decisions[0].executed);

    h.registry.stop().await;
    assert!(!h.registry.is_running().await);
}

#[tokio::test]
async fn test_first_failed_probe_is_an_error_not_an_outage() {
    let mut h = harness(create_test_registry_config(), voice_env());

    h.registry.start().await.unwrap();
    let endpoint = h.registry.service("env-voice-service-url").await.unwrap();
    assert_eq!(endpoint.status, EndpointStatus::Unhealthy);
    assert!(endpoint.last_seen.is_none());
    assert_eq!(
        config_kinds(&mut h.events),
        vec![ConfigEventKind::Discovered, ConfigEventKind::Error]
    );
    assert!(h.notifier.sent().is_empty());
    h.registry.stop().await;
}

#[tokio::test]
async fn test_slow_answers_are_degraded_when_configured() {
    let mut h = harness(
        RegistryConfig {
            degraded_latency_ms: Some(100),
            ..create_test_registry_config()
        },
        voice_env(),
    );
    h.registry.load_from_env().await;

    h.prober.set_up(VOICE_URL, 40);
    h.registry.check_all().await;
    h.prober.set_up(VOICE_URL, 450);
    let checks = h.registry.check_all().await;
    assert_eq!(checks[0].status, EndpointStatus::Degraded);
    assert!(checks[0].status.is_available());

    h.prober.set_up(VOICE_URL, 20);
    h.registry.check_all().await;
    let kinds = config_kinds(&mut h.events);
    assert_eq!(kinds.last(), Some(&ConfigEventKind::Healed));
    assert_eq!(h.registry.status().await.healthy, 1);
}

#[tokio::test]
async fn test_register_service_upserts_into_unknown() {
    let mut h = harness(create_test_registry_config(), EnvSnapshot::default());
    h.prober.set_up(RESEARCH_URL, 5);

    let endpoint = ServiceEndpoint::new("research", "Research", ServiceType::ResearchAgent, RESEARCH_URL);
    h.registry.register_service(endpoint.clone()).await;
    h.registry.check_all().await;
    assert_eq!(h.registry.service("research").await.unwrap().status, EndpointStatus::Healthy);

    let moved = ServiceEndpoint {
        url: "http://research.test:8100".to_string(),
        ..endpoint
    }
    .with_config(json!({ "region": "eu" }));
    let stored = h.registry.register_service(moved).await;
    assert_eq!(stored.status, EndpointStatus::Unknown);
    assert!(stored.last_check.is_none());
    assert_eq!(h.registry.services().await.len(), 1);

    let kinds = config_kinds(&mut h.events);
    assert_eq!(kinds.first(), Some(&ConfigEventKind::ConfigChanged));
    assert_eq!(kinds.last(), Some(&ConfigEventKind::ConfigChanged));
}

#[tokio::test]
async fn test_registered_service_heals_on_first_cycle() {
    let mut h = harness(create_test_registry_config(), EnvSnapshot::default());
    h.prober.set_up(RESEARCH_URL, 5);

    h.registry
        .register_service(ServiceEndpoint::new("svc-1", "Research", ServiceType::ResearchAgent, RESEARCH_URL))
        .await;
    let checks = h.registry.check_all().await;
    assert_eq!(checks[0].previous, EndpointStatus::Unknown);
    assert_eq!(checks[0].status, EndpointStatus::Healthy);

    assert_eq!(
        config_kinds(&mut h.events),
        vec![ConfigEventKind::ConfigChanged, ConfigEventKind::Healed]
    );
    let decisions = h.registry.decisions(10).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision_type, DecisionType::Heal);
    assert_eq!(decisions[0].input["endpoint"], "svc-1");
}

#[tokio::test]
async fn test_slow_notifier_does_not_serialize_the_cycle() {
    let prober = Arc::new(ScriptedProber::default());
    let notifier = Arc::new(RecordingNotifier::with_delay(Duration::from_millis(400)));
    let registry = ServiceRegistry::builder(create_test_registry_config())
        .prober(prober.clone())
        .notifier(notifier.clone())
        .env(EnvSnapshot::default())
        .build()
        .unwrap();

    let urls: Vec<String> = (1..=4).map(|n| format!("http://bridge-{}.test:9000", n)).collect();
    for (n, url) in urls.iter().enumerate() {
        prober.set_up(url, 5);
        registry
            .register_service(ServiceEndpoint::new(format!("bridge-{}", n), "Bridge", ServiceType::ToolBridge, url))
            .await;
    }
    registry.check_all().await;

    for url in &urls {
        prober.set_down(url);
    }
    let started = std::time::Instant::now();
    let checks = registry.check_all().await;
    let elapsed = started.elapsed();

    assert_eq!(checks.len(), 4);
    assert!(checks.iter().all(|c| c.status == EndpointStatus::Unhealthy));
    assert_eq!(notifier.events(), vec!["service_down".to_string(); 4]);
    assert!(elapsed < Duration::from_millis(1200), "cycle took {:?}", elapsed);
}

#[tokio::test]
async fn test_discovery_finds_listening_ports_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let open_port = server.address().port();

    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = RegistryConfig {
        auto_discovery: true,
        discovery_hosts: vec!["127.0.0.1".to_string()],
        discovery_ports: vec![
            DiscoveryPort {
                service_type: ServiceType::ResearchAgent,
                port: open_port,
            },
            DiscoveryPort {
                service_type: ServiceType::ToolBridge,
                port: closed_port,
            },
        ],
        ..create_test_registry_config()
    };
    let registry = ServiceRegistry::builder(config)
        .prober(Arc::new(HttpProber::new(Duration::from_millis(500)).unwrap()))
        .env(EnvSnapshot::default())
        .build()
        .unwrap();

    let found = registry.discover().await;
    assert_eq!(found.len(), 1);
    let endpoint = &found[0];
    assert_eq!(endpoint.id, format!("auto-research-agent-127.0.0.1-{}", open_port));
    assert_eq!(endpoint.url, format!("http://127.0.0.1:{}", open_port));
    assert_eq!(endpoint.status, EndpointStatus::Healthy);
    assert!(endpoint.auto_discovered);

    // Known URLs are not probed twice.
    assert!(registry.discover().await.is_empty());
    assert_eq!(registry.services().await.len(), 1);
}
