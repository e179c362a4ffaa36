pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;
use crate::transform::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/templates", get(handlers::handle_list_templates))
        .route("/api/v1/history", get(handlers::handle_get_history))
        .route("/api/v1/transform", post(handlers::handle_transform))
        .route(
            "/api/v1/transform/stream",
            post(handlers::handle_transform_stream),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::history::HistoryStore;
    use crate::llm_client::testing::{client_with, MapEnv, MockTransport, Scripted};
    use crate::transform::TransformService;

    async fn app(transport: Arc<MockTransport>, env: MapEnv, dir: &TempDir) -> Router {
        let history = Arc::new(HistoryStore::load(dir.path(), 5).await);
        build_router(AppState {
            transform: TransformService::new(client_with(transport, env), history),
        })
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    /// Splits an SSE body into `(event, data)` pairs, skipping comment frames.
    fn sse_events(body: &str) -> Vec<(String, Value)> {
        body.split("\n\n")
            .filter_map(|frame| {
                let mut event = None;
                let mut data = None;
                for line in frame.lines() {
                    if let Some(name) = line.strip_prefix("event: ") {
                        event = Some(name.to_string());
                    } else if let Some(payload) = line.strip_prefix("data: ") {
                        data = Some(serde_json::from_str(payload).unwrap());
                    }
                }
                Some((event?, data?))
            })
            .collect()
    }

    async fn history_items(app: Router) -> Vec<Value> {
        let history = body_json(app.oneshot(get_request("/api/v1/history")).await.unwrap()).await;
        history["items"].as_array().unwrap().clone()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = app(Arc::new(MockTransport::default()), MapEnv::default(), &dir).await;

        let response = app.oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_templates() {
        let dir = TempDir::new().unwrap();
        let app = app(Arc::new(MockTransport::default()), MapEnv::default(), &dir).await;

        let response = app.oneshot(get_request("/api/v1/templates")).await.unwrap();
        let body = body_json(response).await;

        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["public", "private", "custom"]);
        assert_eq!(body[2]["dynamic"], true);
        assert_eq!(body[0]["columns"][0], "日期");
    }

    #[tokio::test]
    async fn test_transform_returns_clean_tsv_and_records_history() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::streaming(&[
            "```tsv\n",
            "2024/05/20\t张三\t3\n",
            "```\n",
        ]));
        let app = app(transport, MapEnv::with_key("secret"), &dir).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/transform",
                json!({
                    "raw_text": "张三 5月20日 客资3",
                    "template": "custom",
                    "custom_columns": "日期, 姓名, 客资"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["text"], "2024/05/20\t张三\t3");
        assert_eq!(body["history_item"]["template"], "✨ 自定义");

        let history = body_json(app.oneshot(get_request("/api/v1/history")).await.unwrap()).await;
        assert_eq!(history["limit"], 5);
        assert_eq!(history["items"].as_array().unwrap().len(), 1);
        assert_eq!(history["items"][0]["text"], "2024/05/20\t张三\t3");
    }

    #[tokio::test]
    async fn test_transform_blank_input_is_no_content() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::streaming(&["x"]));
        let app = app(transport.clone(), MapEnv::with_key("secret"), &dir).await;

        let response = app
            .oneshot(post_json(
                "/api/v1/transform",
                json!({ "raw_text": "   ", "template": "public" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_transform_empty_custom_columns_rejected() {
        let dir = TempDir::new().unwrap();
        let app = app(
            Arc::new(MockTransport::default()),
            MapEnv::with_key("secret"),
            &dir,
        )
        .await;

        let response = app
            .oneshot(post_json(
                "/api/v1/transform",
                json!({ "raw_text": "report", "template": "custom", "custom_columns": " ,\n," }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["code"],
            "VALIDATION_ERROR"
        );
    }

    #[tokio::test]
    async fn test_transform_malformed_body_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::streaming(&["x"]));
        let app = app(transport.clone(), MapEnv::with_key("secret"), &dir).await;

        for uri in ["/api/v1/transform", "/api/v1/transform/stream"] {
            let response = app
                .clone()
                .oneshot(post_json(uri, json!({ "raw_text": "report" })))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
            assert!(body["error"]["message"].as_str().unwrap().contains("template"));
        }
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_transform_unknown_template_not_found() {
        let dir = TempDir::new().unwrap();
        let app = app(
            Arc::new(MockTransport::default()),
            MapEnv::with_key("secret"),
            &dir,
        )
        .await;

        let response = app
            .oneshot(post_json(
                "/api/v1/transform",
                json!({ "raw_text": "report", "template": "weekly" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transform_without_credential_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::streaming(&["x"]));
        let app = app(transport.clone(), MapEnv::default(), &dir).await;

        let response = app
            .oneshot(post_json(
                "/api/v1/transform/stream",
                json!({ "raw_text": "report", "template": "public" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await["error"]["code"],
            "CONFIGURATION_ERROR"
        );
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_transform_upstream_failure_is_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::rejecting(429, "Quota exceeded"));
        let app = app(transport, MapEnv::with_key("secret"), &dir).await;

        let response = app
            .oneshot(post_json(
                "/api/v1/transform",
                json!({ "raw_text": "report", "template": "private" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_json(response).await["error"]["message"],
            "Quota exceeded"
        );
    }

    #[tokio::test]
    async fn test_stream_relays_chunks_then_done() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::streaming(&[
            "张三\t2024/05/20\t3\t0\n",
            "李四\t2024/05/20\t1\t2\n",
        ]));
        let app = app(transport, MapEnv::with_key("secret"), &dir).await;

        let response = app
            .oneshot(post_json(
                "/api/v1/transform/stream",
                json!({ "raw_text": "张三 李四", "template": "public" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await).unwrap();

        let chunk_pos = body.find("event: chunk").expect("chunk event");
        let done_pos = body.find("event: done").expect("done event");
        assert!(chunk_pos < done_pos);
        assert_eq!(body.matches("event: chunk").count(), 2);
        assert!(body.contains(r#"李四\t2024/05/20\t1\t2"#));
    }
    #[tokio::test]
    async fn test_stream_done_carries_clean_text_and_records_history() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::streaming(&[
            "```tsv\n",
            "张三\t2024/05/20\t3\t0\n",
            "```",
        ]));
        let app = app(transport, MapEnv::with_key("secret"), &dir).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/transform/stream",
                json!({ "raw_text": "张三 客资3", "template": "public" }),
            ))
            .await
            .unwrap();
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        let events = sse_events(&body);

        let (name, done) = events.last().expect("final event");
        assert_eq!(name, "done");
        assert_eq!(done["text"], "张三\t2024/05/20\t3\t0");
        assert_eq!(done["history_item"]["text"], "张三\t2024/05/20\t3\t0");
        assert_eq!(done["history_item"]["template"], "公域流量");
        assert_eq!(events.iter().filter(|(n, _)| n == "done").count(), 1);

        let items = history_items(app).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0], done["history_item"]);
    }

    #[tokio::test]
    async fn test_stream_upstream_error_ends_with_error_event() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::scripted(vec![
            Scripted::Text("张三\t2024/05/20"),
            Scripted::Error("Quota exceeded"),
        ]));
        let app = app(transport, MapEnv::with_key("secret"), &dir).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/transform/stream",
                json!({ "raw_text": "张三", "template": "private" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        let events = sse_events(&body);

        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["chunk", "error"]);
        assert_eq!(events[0].1["text"], "张三\t2024/05/20");
        assert_eq!(events[1].1["message"], "Quota exceeded");

        assert!(history_items(app).await.is_empty());
    }
}
