//! Server-Sent Events stream of a session's events.
//!
//! The SSE `id` of each message is the event sequence number, so a browser
//! reconnecting with `Last-Event-ID` resumes exactly after the last event it
//! saw.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use journey_common::{Event, SessionId};
use serde::Deserialize;

use super::api::{ApiError, SharedState};

const LAST_EVENT_ID: &str = "last-event-id";
const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub after: Option<u64>,
}

/// Replay cursor for a (re)connecting client. A `Last-Event-ID` header wins
/// over the query string, since browsers resend the original URL on reconnect.
pub fn resume_cursor(headers: &HeaderMap, after: Option<u64>) -> u64 {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(after)
        .unwrap_or(0)
}

pub async fn session_events(
    State(state): State<SharedState>,
    Path(id): Path<SessionId>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let after = resume_cursor(&headers, query.after);
    let subscription = state.engine.subscribe(id, after)?;
    tracing::debug!(session_id = %id, after, "sse subscriber attached");

    // The subscription ends after session.ended or its first error.
    let stream = subscription.into_stream().map(|item| {
        Ok(match item {
            Ok(event) => to_sse(&event),
            // Fell behind the retained window; the client must refetch a snapshot.
            Err(e) => SseEvent::default().event("stream.error").data(e.to_string()),
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE)))
}

fn to_sse(event: &Event) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!(sequence = event.sequence, error = %e, "failed to encode event");
        "{}".to_string()
    });
    SseEvent::default()
        .id(event.sequence.to_string())
        .event(event.type_name())
        .data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRegistry;
    use crate::orchestrator::{Engine, EngineConfig};
    use crate::producer::ScriptedProducer;
    use crate::server::{AppState, build_router};
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode, header};
    use http_body_util::BodyExt;
    use journey_common::{JourneyBrief, Mode};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn engine_with_session() -> (Arc<Engine>, SessionId) {
        let config = EngineConfig {
            autosave: false,
            ..EngineConfig::default()
        };
        let engine = Arc::new(Engine::new(
            AgentRegistry::builtin().unwrap(),
            Arc::new(ScriptedProducer::new()),
            config,
        ));
        let id = engine
            .create_session(Mode::Understand, JourneyBrief::new("What is entropy?"))
            .await
            .unwrap()
            .session_id;
        (engine, id)
    }

    #[test]
    fn test_resume_cursor_prefers_last_event_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(resume_cursor(&headers, None), 0);
        assert_eq!(resume_cursor(&headers, Some(4)), 4);

        headers.insert(LAST_EVENT_ID, HeaderValue::from_static("9"));
        assert_eq!(resume_cursor(&headers, Some(4)), 9);

        headers.insert(LAST_EVENT_ID, HeaderValue::from_static("garbage"));
        assert_eq!(resume_cursor(&headers, Some(4)), 4);
    }

    #[tokio::test]
    async fn test_stream_replays_from_start() {
        let (engine, id) = engine_with_session().await;
        let app = build_router(Arc::new(AppState { engine }));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{id}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let mut body = resp.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: session.started"));
        assert!(text.contains("id: 1"));
    }

    #[tokio::test]
    async fn test_stream_of_ended_session_closes() {
        let (engine, id) = engine_with_session().await;
        engine.abandon(id).await.unwrap();
        let app = build_router(Arc::new(AppState { engine }));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{id}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = tokio::time::timeout(Duration::from_secs(5), resp.into_body().collect())
            .await
            .expect("stream should close after session.ended")
            .unwrap()
            .to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("event: session.started"));
        assert!(text.contains("event: session.ended"));
    }

    #[tokio::test]
    async fn test_cursor_ahead_is_rejected() {
        let (engine, id) = engine_with_session().await;
        let app = build_router(Arc::new(AppState { engine }));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{id}/events?after=50"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_session_stream_is_404() {
        let (engine, _) = engine_with_session().await;
        let app = build_router(Arc::new(AppState { engine }));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{}/events", SessionId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
