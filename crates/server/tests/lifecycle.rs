//! Authentication, idle expiry and the HTTP surface

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

use voice_session_config::Settings;
use voice_session_core::{ClientMessage, ServerMessage};
use voice_session_server::create_router;

use common::*;

fn harness(settings: Settings) -> Harness {
    let (stt, _links) = MockStt::new();
    Harness::start(app_state(
        settings,
        stt,
        ScriptedLlm::new(Vec::new()),
        MockTts::new(TtsMode::Finish, 1),
    ))
}

fn auth_enabled() -> Settings {
    let mut settings = Settings::default();
    settings.server.auth.enabled = true;
    settings.server.auth.api_key = Some("secret".into());
    settings
}

#[tokio::test]
async fn test_auth_flow() {
    let mut h = harness(auth_enabled());

    h.control(ClientMessage::AudioStart).await;
    h.wait_for_error("validation").await;

    h.control(ClientMessage::Auth { token: "wrong".into() }).await;
    h.wait_for_error("auth").await;
    assert_eq!(h.state.sessions.count(), 0);

    let id = h.authenticate("secret").await;
    assert!(h.state.sessions.get(&id).is_some());

    h.control(ClientMessage::Auth { token: "secret".into() }).await;
    h.wait_for_error("validation").await;
    assert_eq!(h.state.sessions.count(), 1);
}

#[tokio::test]
async fn test_session_limit_is_reported() {
    let mut settings = Settings::default();
    settings.session.max_sessions = 1;
    let state = harness(settings).state;

    let mut first = Harness::start(state.clone());
    first.authenticate("token").await;

    let mut second = Harness::start(state);
    second
        .control(ClientMessage::Auth { token: "token".into() })
        .await;
    second.wait_for_error("capacity").await;
}

#[tokio::test]
async fn test_expire_closes_live_session() {
    let mut h = harness(Settings::default());
    let id = h.authenticate("token").await;

    assert!(h.state.sessions.expire(&id));
    h.wait_for_status("closed", Some("expired")).await;
    tokio::time::timeout(Duration::from_secs(5), &mut h.task)
        .await
        .unwrap()
        .unwrap();
    assert!(h.state.sessions.get(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_is_swept_and_lookup_fails() {
    let mut settings = Settings::default();
    settings.session.idle_timeout_secs = 600;
    settings.session.cleanup_interval_secs = 30;
    let mut h = harness(settings);
    let cleanup = h.state.sessions.start_cleanup_task();

    let id = h.authenticate("token").await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(h.state.sessions.get(&id).is_some());

    tokio::time::sleep(Duration::from_secs(400)).await;
    h.wait_for_status("closed", Some("expired")).await;
    assert!(h.state.sessions.get(&id).is_none());

    let response = create_router(h.state.clone())
        .oneshot(
            Request::get(format!("/api/sessions/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    cleanup.send(true).unwrap();
}

#[tokio::test]
async fn test_session_api() {
    let mut h = harness(Settings::default());
    let id = h.authenticate("token").await;
    let router = create_router(h.state.clone());

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/sessions/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(
            Request::delete(format!("/api/sessions/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    h.wait_for_status("closed", Some("expired")).await;

    let response = router
        .oneshot(
            Request::delete(format!("/api/sessions/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_api_requires_bearer_when_enabled() {
    let router = create_router(harness(auth_enabled()).state);

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/sessions/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/sessions/unknown")
                .header(header::AUTHORIZATION, "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_messages_serialize_with_dotted_types() {
    let json = serde_json::to_value(ServerMessage::status_with_detail("listening", "barge_in")).unwrap();
    assert_eq!(json["type"], "status");
    assert_eq!(json["detail"], "barge_in");
}
