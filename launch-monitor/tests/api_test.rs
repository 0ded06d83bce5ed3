use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use alloy_primitives::{Address, B256, U256};
use chrono::Utc;
use launch_monitor::{
    api::{create_router, ApiState, EventKind},
    catalog::{CatalogClient, FactoryTag, PoolType, Project, ProjectStatus, SelectedProject},
    config::Settings,
    machine::{LifecycleContext, Phase},
    monitors::whale::TradeSide,
    monitors::WhaleTrade,
    rpc::RpcPool,
};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

const SAMPLE_CONFIG: &str = r#"
chain:
  rpc:
    http: ["http://localhost:1"]
    wss: ["ws://localhost:1"]
  avgBlockTimeSecs: 2.0
virtuals:
  apiBase: "http://localhost:1/api"
  pollIntervalMs: 1000
  maxProjectAgeMinutes: 720
addresses:
  buybackAddr: "0x8888888888888888888888888888888888888888"
  virtualToken: "0x0b3e328455c4059eeb9e3f84b5543f74e24e7e1b"
thresholds:
  bigTradeVirtual: "1000"
  taxWindowMinutes: 100
  buybackRateWindowMinutes: 20
  stallAlertMinutes: 5
logging:
  level: "info"
"#;

fn create_test_state() -> Arc<ApiState> {
    let settings = Settings::from_yaml(SAMPLE_CONFIG).unwrap();
    let pool = Arc::new(
        RpcPool::new(
            settings.chain.rpc.http.clone(),
            settings.chain.rpc.wss.clone(),
        )
        .unwrap(),
    );
    let catalog = Arc::new(CatalogClient::new(settings.virtuals.api_base.clone()));
    Arc::new(ApiState::new(
        settings,
        pool,
        catalog,
        tokio_util::sync::CancellationToken::new(),
    ))
}

fn selected_project() -> SelectedProject {
    let t0 = Utc::now() - chrono::Duration::minutes(30);
    SelectedProject {
        project: Project {
            id: 7,
            name: "Aurora".into(),
            symbol: "AUR".into(),
            factory: FactoryTag::BondingV2,
            status: ProjectStatus::Undergrad,
            pre_token_pair: Some(Address::repeat_byte(0x42)),
            lp_address: None,
            token_address: None,
            created_at: t0,
            launched_at: Some(t0),
            lp_created_at: None,
            mcap_in_virtual: Some(5000.0),
        },
        pool_address: Address::repeat_byte(0x42),
        pool_type: PoolType::Curve,
        t0,
    }
}

fn whale_trade(seed: u8, amount: u64) -> WhaleTrade {
    WhaleTrade {
        side: TradeSide::Buy,
        amount_virtual: U256::from(amount) * U256::from(10u64).pow(U256::from(18u64)),
        amount_token: U256::ZERO,
        trader: Address::repeat_byte(0x01),
        tx_hash: B256::repeat_byte(seed),
        block_number: 42,
        timestamp: Utc::now(),
    }
}

async fn get_json(state: Arc<ApiState>, uri: &str) -> (StatusCode, Value) {
    let app = create_router(state);
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_initial_state_snapshot() {
    let state = create_test_state();
    let (status, json) = get_json(state, "/api/state").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "DISCOVER");
    assert_eq!(json["project"], Value::Null);
    assert_eq!(json["taxTotal"], "0");
    assert_eq!(json["tax"], Value::Null);
    assert_eq!(json["buyback"], Value::Null);
}

#[tokio::test]
async fn test_state_reflects_selected_project() {
    let state = create_test_state();
    let mut ctx = LifecycleContext::new();
    ctx.set_project(selected_project(), std::time::Duration::from_secs(100 * 60));
    ctx.phase = Phase::LaunchWindow;
    state.update_context(&ctx);

    let (status, json) = get_json(state, "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "LAUNCH_WINDOW");
    assert_eq!(json["project"]["symbol"], "AUR");
    assert_eq!(json["project"]["poolType"], "curve");
    assert_eq!(json["elapsedMinutes"], 30);
    assert_eq!(json["remainingMinutes"], 70);
    assert!(json["t0"].is_string());
    assert!(json["t1"].is_string());
}

#[tokio::test]
async fn test_update_context_is_idempotent() {
    let state = create_test_state();
    let mut ctx = LifecycleContext::new();
    ctx.phase = Phase::WaitT0;

    state.update_context(&ctx);
    state.update_context(&ctx);
    state.update_context(&ctx);

    let state_changes = state
        .events()
        .iter()
        .filter(|e| e.kind == EventKind::StateChange)
        .count();
    assert_eq!(state_changes, 1, "same context must broadcast at most once");
}

#[tokio::test]
async fn test_record_trade_dedups_by_hash() {
    let state = create_test_state();
    state.record_trade(whale_trade(0xAA, 1500));
    state.record_trade(whale_trade(0xAA, 1500));
    state.record_trade(whale_trade(0xBB, 2000));

    let (status, json) = get_json(state.clone(), "/api/trades").await;
    assert_eq!(status, StatusCode::OK);
    let trades = json.as_array().unwrap();
    assert_eq!(trades.len(), 2);
    // Newest first, amounts as decimal strings.
    assert_eq!(trades[0]["amountVirtual"], "2000000000000000000000");
    assert_eq!(trades[1]["amountVirtual"], "1500000000000000000000");
    assert_eq!(trades[0]["side"], "buy");
}

#[tokio::test]
async fn test_trade_ring_caps_at_hundred() {
    let state = create_test_state();
    for i in 0..120u32 {
        let mut trade = whale_trade((i % 256) as u8, 1000);
        // Unique hashes beyond the single-byte seed space.
        trade.tx_hash = B256::from(U256::from(i));
        state.record_trade(trade);
    }

    let (_, json) = get_json(state, "/api/trades").await;
    assert_eq!(json.as_array().unwrap().len(), 100);
}

#[tokio::test]
async fn test_events_endpoint_newest_first() {
    let state = create_test_state();
    state.emit(EventKind::TaxUpdate, serde_json::json!({"seq": 1}));
    state.emit(EventKind::BuybackUpdate, serde_json::json!({"seq": 2}));

    let (status, json) = get_json(state, "/api/events").await;
    assert_eq!(status, StatusCode::OK);
    let events = json.as_array().unwrap();
    assert_eq!(events[0]["type"], "buyback_update");
    assert_eq!(events[0]["data"]["seq"], 2);
    assert_eq!(events[1]["type"], "tax_update");
    assert!(events[0]["timestamp"].is_string());
}

#[tokio::test]
async fn test_config_redacts_secrets_and_round_trips() {
    let state = create_test_state();
    let settings = state.settings.clone();
    let (status, json) = get_json(state, "/api/config").await;

    assert_eq!(status, StatusCode::OK);
    // Exposed shape is {chain, thresholds, virtuals} only.
    let top = json.as_object().unwrap();
    assert_eq!(top.len(), 3);
    assert!(top.contains_key("chain"));
    assert!(top.contains_key("thresholds"));
    assert!(top.contains_key("virtuals"));

    // Endpoint URLs are withheld; only counts surface.
    assert_eq!(json["chain"]["rpc"]["httpEndpoints"], 1);
    assert!(json["chain"]["rpc"]["http"].is_null());

    // Env-substituted strings never leave the process.
    let virtuals = json["virtuals"].as_object().unwrap();
    assert!(!virtuals.contains_key("usdPriceUrl"));
    assert!(!virtuals.contains_key("preferredSymbol"));
    assert_eq!(json["virtuals"]["apiBase"], settings.virtuals.api_base);
    assert_eq!(
        json["virtuals"]["pollIntervalMs"],
        settings.virtuals.poll_interval_ms
    );
    assert_eq!(
        json["virtuals"]["maxProjectAgeMinutes"],
        settings.virtuals.max_project_age_minutes
    );

    let thresholds: launch_monitor::config::settings::ThresholdSettings =
        serde_json::from_value(json["thresholds"].clone()).unwrap();
    assert_eq!(
        thresholds.big_trade_virtual,
        settings.thresholds.big_trade_virtual
    );
    assert_eq!(
        thresholds.tax_window_minutes,
        settings.thresholds.tax_window_minutes
    );
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let state = create_test_state();
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/state")
                .header(header::ORIGIN, "https://dashboard.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_push_greeting_is_state_change() {
    let state = create_test_state();
    let mut ctx = LifecycleContext::new();
    ctx.phase = Phase::BuybackPhase;
    state.update_context(&ctx);

    let greeting = state.initial_event();
    assert_eq!(greeting.kind, EventKind::StateChange);
    assert_eq!(greeting.payload["state"], "BUYBACK_PHASE");
}

#[tokio::test]
async fn test_broadcast_order_preserved_per_client() {
    let state = create_test_state();
    let mut rx = state.subscribe_events();

    state.emit(EventKind::TaxUpdate, serde_json::json!({"seq": 1}));
    state.emit(EventKind::TaxUpdate, serde_json::json!({"seq": 2}));
    state.emit(EventKind::TaxUpdate, serde_json::json!({"seq": 3}));

    for expected in 1..=3 {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["seq"], expected);
    }
}
