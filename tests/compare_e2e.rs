use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arena_harness::compare::{Collector, CompareError, CompareOptions, Combo};
use arena_harness::pricing::PricingTable;
use arena_harness::registry::{default_catalog, ProviderRegistry};
use arena_harness::router::{Router, RouterConfig};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry_with(env: Vec<(String, String)>) -> Arc<ProviderRegistry> {
    let vars: HashMap<String, String> = env.into_iter().collect();
    Arc::new(ProviderRegistry::with_env_lookup(
        default_catalog(),
        move |key| vars.get(key).cloned(),
    ))
}

fn fast_config() -> RouterConfig {
    RouterConfig {
        max_retries: 1,
        timeout: Duration::from_secs(5),
        rate_limit_base_delay: Duration::from_millis(2),
        retry_pause: Duration::from_millis(2),
    }
}

async fn mock_provider(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": content } }]
        })))
        .mount(&server)
        .await;
    server
}

fn collector(registry: Arc<ProviderRegistry>) -> Collector {
    let router = Arc::new(Router::with_config(registry, fast_config()).unwrap());
    Collector::new(router, Arc::new(PricingTable::builtin()))
}

#[tokio::test]
async fn blind_run_labels_every_combo() {
    let openai = mock_provider("answer from openai").await;
    let anthropic = mock_provider("answer from anthropic").await;

    let registry = registry_with(vec![
        ("OPENAI_API_KEY".into(), "sk-test".into()),
        ("ANTHROPIC_API_KEY".into(), "sk-test".into()),
        ("ARENA_OPENAI_BASE_URL".into(), openai.uri()),
        ("ARENA_ANTHROPIC_BASE_URL".into(), anthropic.uri()),
    ]);
    let collector = collector(registry);

    let combos = vec![
        Combo::new("openai", "gpt-4o-mini"),
        Combo::new("anthropic", "claude-3-5-sonnet-20241022"),
    ];
    let run = collector
        .compare("Explain tail calls.", &combos, &CompareOptions::default())
        .await
        .unwrap();

    assert!(run.blind);
    assert!(run.priming_text.is_none());
    assert_eq!(run.temperature, 0.7);
    assert_eq!(run.prompt_sha256.len(), 64);
    assert_eq!(run.items.len(), 2);
    assert_eq!(run.mapping.len(), 2);

    let labels: BTreeSet<&str> = run.items.iter().map(|i| i.blind_label.as_str()).collect();
    assert_eq!(labels, BTreeSet::from(["A", "B"]));

    for item in &run.items {
        let mapped = &run.mapping[&item.blind_label];
        assert_eq!(mapped.provider, item.provider);
        assert_eq!(mapped.model, item.model);
        assert!(item.response_text.starts_with("answer from"));
        assert!(item.input_tokens_est > 0);
        assert!(item.output_tokens_est > 0);
        assert!(item.estimated_cost_usd > 0.0);
        assert!(item.error.is_none());
    }
}

#[tokio::test]
async fn failed_call_becomes_error_item_with_label() {
    let openai = mock_provider("fine here").await;

    // Anthropic has no credential, so its item fails during validation.
    let registry = registry_with(vec![
        ("OPENAI_API_KEY".into(), "sk-test".into()),
        ("ARENA_OPENAI_BASE_URL".into(), openai.uri()),
    ]);
    let collector = collector(registry);

    let combos = vec![
        Combo::new("openai", "gpt-4o-mini"),
        Combo::new("anthropic", "claude-3-haiku-20240307"),
    ];
    let run = collector
        .compare("hello", &combos, &CompareOptions::default())
        .await
        .unwrap();

    assert_eq!(run.items.len(), 2);
    let failed = run
        .items
        .iter()
        .find(|i| i.provider == "anthropic")
        .unwrap();
    assert!(!failed.blind_label.is_empty());
    assert!(failed.response_text.is_empty());
    assert_eq!(failed.output_tokens_est, 0);
    assert!(failed
        .error
        .as_deref()
        .unwrap()
        .contains("ANTHROPIC_API_KEY"));

    let ok = run.items.iter().find(|i| i.provider == "openai").unwrap();
    assert_eq!(ok.response_text, "fine here");
    assert!(ok.error.is_none());
}

#[tokio::test]
async fn reversed_shuffle_relabels_positionally() {
    let openai = mock_provider("first combo").await;
    let anthropic = mock_provider("second combo").await;

    let registry = registry_with(vec![
        ("OPENAI_API_KEY".into(), "sk-test".into()),
        ("ANTHROPIC_API_KEY".into(), "sk-test".into()),
        ("ARENA_OPENAI_BASE_URL".into(), openai.uri()),
        ("ARENA_ANTHROPIC_BASE_URL".into(), anthropic.uri()),
    ]);
    let collector = collector(registry).with_shuffle(|order| order.reverse());

    let combos = vec![
        Combo::new("openai", "gpt-4o-mini"),
        Combo::new("anthropic", "claude-3-haiku-20240307"),
    ];
    let run = collector
        .compare("hello", &combos, &CompareOptions::default())
        .await
        .unwrap();

    // Reversed permutation: label A is the combo that was called last.
    assert_eq!(run.items[0].blind_label, "A");
    assert_eq!(run.items[0].provider, "anthropic");
    assert_eq!(run.items[1].blind_label, "B");
    assert_eq!(run.items[1].provider, "openai");
    assert_eq!(run.mapping["A"].provider, "anthropic");
    assert_eq!(run.mapping["B"].provider, "openai");
}

#[tokio::test]
async fn default_shuffle_still_covers_every_combo() {
    let server = mock_provider("text").await;

    let registry = registry_with(vec![
        ("OPENAI_API_KEY".into(), "sk-test".into()),
        ("ARENA_OPENAI_BASE_URL".into(), server.uri()),
    ]);
    let collector = collector(registry);

    let combos = vec![
        Combo::new("openai", "gpt-4o-mini"),
        Combo::new("openai", "gpt-4o"),
        Combo::new("openai", "gpt-3.5-turbo"),
    ];
    let run = collector
        .compare("hello", &combos, &CompareOptions::default())
        .await
        .unwrap();

    let labels: BTreeSet<&str> = run.mapping.keys().map(String::as_str).collect();
    assert_eq!(labels, BTreeSet::from(["A", "B", "C"]));
    let models: BTreeSet<&str> = run.mapping.values().map(|c| c.model.as_str()).collect();
    assert_eq!(
        models,
        BTreeSet::from(["gpt-4o-mini", "gpt-4o", "gpt-3.5-turbo"])
    );
}

#[tokio::test]
async fn non_blind_run_is_marked_in_metadata() {
    let server = mock_provider("text").await;

    let registry = registry_with(vec![
        ("OPENAI_API_KEY".into(), "sk-test".into()),
        ("ARENA_OPENAI_BASE_URL".into(), server.uri()),
    ]);
    let collector = collector(registry);

    let options = CompareOptions {
        blind: false,
        ..CompareOptions::default()
    };
    let combos = vec![
        Combo::new("openai", "gpt-4o-mini"),
        Combo::new("openai", "gpt-4o"),
    ];
    let run = collector.compare("hello", &combos, &options).await.unwrap();
    assert!(!run.blind);
    // Labels are assigned either way.
    assert!(run.items.iter().all(|i| !i.blind_label.is_empty()));
}

#[tokio::test]
async fn priming_text_is_sent_as_system_message() {
    let server = mock_provider("ok").await;

    let registry = registry_with(vec![
        ("OPENAI_API_KEY".into(), "sk-test".into()),
        ("ARENA_OPENAI_BASE_URL".into(), server.uri()),
    ]);
    let collector = collector(registry);

    let options = CompareOptions {
        priming_text: Some("Answer in one sentence.".into()),
        ..CompareOptions::default()
    };
    let combos = vec![
        Combo::new("openai", "gpt-4o-mini"),
        Combo::new("openai", "gpt-4o"),
    ];
    let run = collector.compare("hello", &combos, &options).await.unwrap();
    assert_eq!(run.priming_text.as_deref(), Some("Answer in one sentence."));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    for request in &received {
        let body: serde_json::Value = request.body_json().unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "Answer in one sentence.");
        assert_eq!(body["messages"][1]["role"], "user");
    }
}

#[tokio::test]
async fn combo_count_bounds_are_enforced() {
    let registry = registry_with(vec![]);
    let collector = collector(registry);

    let one = vec![Combo::new("openai", "gpt-4o-mini")];
    let err = collector
        .compare("hello", &one, &CompareOptions::default())
        .await
        .unwrap_err();
    match err {
        CompareError::ComboCount { got } => assert_eq!(got, 1),
        other => panic!("expected ComboCount, got {other:?}"),
    }

    let too_many: Vec<Combo> = (0..27)
        .map(|i| Combo::new("openai", format!("model-{i}")))
        .collect();
    let err = collector
        .compare("hello", &too_many, &CompareOptions::default())
        .await
        .unwrap_err();
    match err {
        CompareError::ComboCount { got } => assert_eq!(got, 27),
        other => panic!("expected ComboCount, got {other:?}"),
    }
}
