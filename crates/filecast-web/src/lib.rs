//! Filecast Web Server
//!
//! Axum-based HTTP surface: uploads, file listing, summaries and the
//! live notification stream.

pub mod auth;
pub mod events;
pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use state::{AppState, Shutdown};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload = post(routes::files::upload).layer(DefaultBodyLimit::max(state.max_upload_bytes));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/events", get(events::events_handler))
        .route("/upload", upload)
        .route("/files", get(routes::files::list_files))
        .route("/summary", get(routes::files::get_summary))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the web server until ctrl-c.
///
/// On shutdown the shared [`Shutdown`] signal is triggered first so open
/// event streams end and graceful shutdown can complete.
pub async fn run_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutdown requested, closing event streams");
            shutdown.trigger();
        })
        .await?;

    tracing::info!("Web server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use filecast_core::memory::{MemoryQueue, MemoryStore};
    use filecast_core::{
        Broadcaster, MessageQueue, NotificationEvent, ObjectLocation, ObjectStore, TaskMessage,
    };
    use futures::StreamExt;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        state: AppState,
        store: Arc<MemoryStore>,
        work_queue: Arc<MemoryQueue>,
    }

    fn test_app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let work_queue = Arc::new(MemoryQueue::new("task-queue", Duration::from_secs(30)));
        let state = AppState::new(
            Broadcaster::new(),
            store.clone(),
            work_queue.clone(),
            "uploads",
        );
        TestApp {
            state,
            store,
            work_queue,
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart_upload(user: &str, file_name: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--XBOUNDARY\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {}\r\n\
             --XBOUNDARY--\r\n",
            file_name, contents
        );
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("x-user-id", user)
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let response = create_router(app.state)
            .oneshot(get_request("/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Server is running!");
    }

    #[tokio::test]
    async fn test_event_stream_delivers_and_unsubscribes() {
        let app = test_app();
        let broadcaster = app.state.broadcaster.clone();

        let response = create_router(app.state)
            .oneshot(get_request("/events", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(broadcaster.subscriber_count(), 1);

        let mut body = response.into_body().into_data_stream();
        broadcaster.publish(&NotificationEvent {
            user_id: "42".to_string(),
            content: "summary text".to_string(),
        });

        let frame = body.next().await.unwrap().unwrap();
        assert_eq!(
            std::str::from_utf8(&frame).unwrap(),
            "data: {\"userId\":\"42\",\"content\":\"summary text\"}\n\n"
        );

        drop(body);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_stream_ends_on_shutdown() {
        let app = test_app();
        let broadcaster = app.state.broadcaster.clone();
        let shutdown = app.state.shutdown.clone();

        let response = create_router(app.state)
            .oneshot(get_request("/events", None))
            .await
            .unwrap();
        let mut body = response.into_body().into_data_stream();

        shutdown.trigger();
        assert!(body.next().await.is_none());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_stores_and_emits_task() {
        let app = test_app();
        let response = create_router(app.state)
            .oneshot(multipart_upload("42", "report.txt", "hello world"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "file uploaded successfully");
        assert_eq!(body["file"], "report.txt");

        let location = ObjectLocation::new("uploads", "users/42/report.txt");
        assert_eq!(app.store.get(&location).await.unwrap(), b"hello world".to_vec());

        let batch = app
            .work_queue
            .receive(1, Duration::from_secs(5))
            .await
            .unwrap();
        let task: TaskMessage = serde_json::from_str(&batch[0].payload).unwrap();
        assert_eq!(task, TaskMessage::new(&location, "42"));
    }

    #[tokio::test]
    async fn test_upload_succeeds_when_queue_is_down() {
        let app = test_app();
        app.work_queue.fail_next(1);
        let response = create_router(app.state)
            .oneshot(multipart_upload("7", "notes.md", "text"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(app
            .store
            .get(&ObjectLocation::new("uploads", "users/7/notes.md"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_upload_store_failure_is_500() {
        let app = test_app();
        app.store.fail_next(1);
        let response = create_router(app.state)
            .oneshot(multipart_upload("7", "notes.md", "text"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(app.work_queue.is_empty());
    }

    #[tokio::test]
    async fn test_requires_user() {
        let app = test_app();
        let response = create_router(app.state)
            .oneshot(get_request("/files", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_files_is_scoped_to_user() {
        let app = test_app();
        for key in ["users/1/a.txt", "users/1/b.txt", "users/2/c.txt"] {
            app.store
                .put(&ObjectLocation::new("uploads", key), b"x".to_vec())
                .await
                .unwrap();
        }

        let response = create_router(app.state)
            .oneshot(get_request("/files", Some("1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await["files"],
            serde_json::json!(["users/1/a.txt", "users/1/b.txt"])
        );
    }

    #[tokio::test]
    async fn test_summary_lookup() {
        let app = test_app();
        app.store
            .put(
                &ObjectLocation::new("uploads", "users/1/report_overview.txt"),
                b"two sentences".to_vec(),
            )
            .await
            .unwrap();
        let router = create_router(app.state);

        let found = router
            .clone()
            .oneshot(get_request("/summary?file=report.txt", Some("1")))
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        let body = json_body(found).await;
        assert_eq!(body["file"], "users/1/report_overview.txt");
        assert_eq!(body["summary"], "two sentences");

        let missing = router
            .clone()
            .oneshot(get_request("/summary?file=other.txt", Some("1")))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let no_param = router
            .oneshot(get_request("/summary", Some("1")))
            .await
            .unwrap();
        assert_eq!(no_param.status(), StatusCode::BAD_REQUEST);
    }
}
