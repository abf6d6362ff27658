//! Fetch client behavior against a scripted transport: pacing, backoff and
//! challenge escalation

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use mtbo_event_scraper::downloader::{PacingMode, PacingWindow};
use mtbo_event_scraper::fetcher::{
    CookieCache, EventSource, FetchClient, FetchConfig, FetchError, JsonDocumentParser, RemoteSource,
};
use mtbo_event_scraper::registry::SourceRegistry;
use mtbo_event_scraper::EventSummary;

use crate::support::{
    challenge, client, credential, date, fast_config, ok, status, timeout, FakeSolver,
    ScriptedTransport,
};

const URL: &str = "https://eventor.test/Events";

#[tokio::test(start_paused = true)]
async fn test_success_needs_no_escalation() {
    let transport = ScriptedTransport::new(vec![ok("[]")]);
    let solver = FakeSolver::passing();
    let client = client(transport.clone(), solver.clone(), &fast_config());

    let body = client.fetch(URL, &[], PacingMode::Standard).await.unwrap();
    assert_eq!(body, "[]");
    assert_eq!(transport.calls(), 1);
    assert_eq!(solver.calls(), 0);
    assert!(transport.seen()[0].cookie.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_then_succeed() {
    let transport = ScriptedTransport::new(vec![status(503), timeout(), ok("done")]);
    let client = client(transport.clone(), FakeSolver::passing(), &fast_config());

    let start = Instant::now();
    let body = client.fetch(URL, &[], PacingMode::Standard).await.unwrap();

    assert_eq!(body, "done");
    assert_eq!(transport.calls(), 3);
    // 1s then 2s of backoff
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(3), "waited {waited:?}");
    assert!(waited < Duration::from_secs(4), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_attempt_ceiling_yields_retryable_network_error() {
    let transport = ScriptedTransport::new(vec![status(502)]);
    let client = client(transport.clone(), FakeSolver::passing(), &fast_config());

    let err = client.fetch(URL, &[], PacingMode::Standard).await.unwrap_err();
    match err {
        FetchError::Network {
            status, retryable, ..
        } => {
            assert_eq!(status, Some(502));
            assert!(retryable);
        }
        other => panic!("expected network error, got {other:?}"),
    }
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_are_not_retried() {
    let transport = ScriptedTransport::new(vec![status(404)]);
    let client = client(transport.clone(), FakeSolver::passing(), &fast_config());

    let err = client.fetch(URL, &[], PacingMode::Standard).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::Network {
            status: Some(404),
            retryable: false,
            ..
        }
    ));
    assert!(!err.is_retryable());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_plain_forbidden_is_not_a_challenge() {
    let transport = ScriptedTransport::new(vec![status(403)]);
    let solver = FakeSolver::passing();
    let client = client(transport.clone(), solver.clone(), &fast_config());

    let err = client.fetch(URL, &[], PacingMode::Standard).await.unwrap_err();
    assert!(matches!(err, FetchError::Network { status: Some(403), .. }));
    assert_eq!(solver.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_escalates_once_and_reuses_credential() {
    let transport = ScriptedTransport::new(vec![challenge(), ok("listing")]);
    let solver = FakeSolver::passing();
    let client = client(transport.clone(), solver.clone(), &fast_config());

    let body = client.fetch(URL, &[], PacingMode::Standard).await.unwrap();
    assert_eq!(body, "listing");
    assert_eq!(solver.calls(), 1);

    let seen = transport.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].cookie.is_none());
    assert_eq!(seen[1].cookie.as_deref(), Some("cf_clearance=clearance-1"));
    assert!(seen[1].user_agent.as_deref().unwrap().contains("HeadlessChrome"));
    assert_eq!(client.cookies().len(), 1);

    // Later requests to the same domain go straight through with the cookie
    client
        .fetch("https://eventor.test/Events/Show/1", &[], PacingMode::Standard)
        .await
        .unwrap();
    assert_eq!(solver.calls(), 1);
    assert_eq!(
        transport.seen()[2].cookie.as_deref(),
        Some("cf_clearance=clearance-1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_persistent_challenge_fails_after_one_escalation() {
    let transport = ScriptedTransport::new(vec![challenge()]);
    let solver = FakeSolver::passing();
    let client = client(transport.clone(), solver.clone(), &fast_config());

    let err = client.fetch(URL, &[], PacingMode::Standard).await.unwrap_err();
    match &err {
        FetchError::Cloudflare { challenge, .. } => assert_eq!(challenge, "challenge"),
        other => panic!("expected cloudflare error, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(solver.calls(), 1);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_solver_failure_is_a_cloudflare_error() {
    let transport = ScriptedTransport::new(vec![challenge()]);
    let solver = FakeSolver::failing();
    let client = client(transport.clone(), solver.clone(), &fast_config());

    let err = client.fetch(URL, &[], PacingMode::History).await.unwrap_err();
    assert!(matches!(err, FetchError::Cloudflare { .. }));
    assert_eq!(transport.calls(), 1);
    assert!(client.cookies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_cached_credential_is_replaced() {
    let transport = ScriptedTransport::new(vec![challenge(), ok("fresh")]);
    let solver = FakeSolver::passing();
    let cookies = Arc::new(CookieCache::new());
    cookies.put("eventor.test", credential("stale"));
    let client = FetchClient::new(transport.clone(), solver.clone(), cookies.clone(), &fast_config());

    assert_eq!(client.fetch(URL, &[], PacingMode::Standard).await.unwrap(), "fresh");

    let seen = transport.seen();
    assert_eq!(seen[0].cookie.as_deref(), Some("cf_clearance=stale"));
    assert_eq!(seen[1].cookie.as_deref(), Some("cf_clearance=clearance-1"));
    assert_eq!(
        cookies.get("eventor.test").unwrap().cookies[0].value,
        "clearance-1"
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_parameters_are_encoded() {
    let transport = ScriptedTransport::new(vec![ok("[]")]);
    let client = client(transport.clone(), FakeSolver::passing(), &fast_config());

    client
        .fetch(
            URL,
            &[("startDate", "2025-01-01".to_string()), ("culture", "en-GB".to_string())],
            PacingMode::Standard,
        )
        .await
        .unwrap();
    assert_eq!(
        transport.seen()[0].url,
        "https://eventor.test/Events?startDate=2025-01-01&culture=en-GB"
    );
}

#[tokio::test(start_paused = true)]
async fn test_detail_request_selects_english_culture() {
    let transport = ScriptedTransport::new(vec![ok(
        r#"{"status": "Planned", "stages": [{"name": "Middle", "discipline": "Middle"}]}"#,
    )]);
    let client = client(transport.clone(), FakeSolver::passing(), &fast_config());
    let descriptor = SourceRegistry::load_embedded().unwrap().resolve("SWE").unwrap().clone();
    let source = RemoteSource::new(descriptor, Arc::new(client), Arc::new(JsonDocumentParser));

    let summary = EventSummary {
        id: "SWE_50597".to_string(),
        source: "SWE".to_string(),
        name: "MTBO Middle".to_string(),
        start_date: date(2025, 5, 1),
        url: "/Events/Show/50597".to_string(),
    };
    let event = source.fetch_detail(&summary, PacingMode::Standard).await.unwrap();

    assert_eq!(event.id, "SWE_50597");
    assert_eq!(
        transport.seen()[0].url,
        "https://eventor.orientering.se/Events/Show/50597?culture=en-GB"
    );
}

// Timer resolution is 1 ms, hence the small allowance on the upper bound
async fn gaps(mode: PacingMode) -> Vec<Duration> {
    let config = FetchConfig {
        standard_pacing: PacingWindow::from_secs(1.0, 3.0),
        history_pacing: PacingWindow::from_secs(5.0, 15.0),
        ..fast_config()
    };
    let transport = ScriptedTransport::new(vec![ok("x")]);
    let client = client(transport, FakeSolver::passing(), &config);

    let mut finished = Vec::new();
    for _ in 0..4 {
        client.fetch(URL, &[], mode).await.unwrap();
        finished.push(Instant::now());
    }
    finished.windows(2).map(|w| w[1] - w[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn test_standard_pacing_bounds() {
    for gap in gaps(PacingMode::Standard).await {
        assert!(gap >= Duration::from_secs(1) && gap <= Duration::from_millis(3_010), "gap {gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_history_pacing_bounds() {
    for gap in gaps(PacingMode::History).await {
        assert!(gap >= Duration::from_secs(5) && gap <= Duration::from_millis(15_010), "gap {gap:?}");
    }
}
