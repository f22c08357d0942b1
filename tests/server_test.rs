//! Integration tests for the triage agent HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use vitals_triage_agent::analysis::{AnalysisClient, AnalysisConfig};
    use vitals_triage_agent::collector::NoopSource;
    use vitals_triage_agent::messages::{Message, MessageLog};
    use vitals_triage_agent::pipeline::TriagePipeline;
    use vitals_triage_agent::scheduler::{trigger_channel, Trigger};
    use vitals_triage_agent::server::{run, ServerConfig, ServerState};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_pipeline(endpoint: &str) -> Arc<TriagePipeline> {
        let client = AnalysisClient::new(
            AnalysisConfig::new(endpoint).with_timeout(Duration::from_millis(500)),
        )
        .expect("Failed to create client");
        Arc::new(TriagePipeline::new(
            Arc::new(NoopSource::new()),
            Arc::new(client),
            Arc::new(MessageLog::in_memory()),
            chrono_tz::Tz::UTC,
        ))
    }

    async fn start(
        pipeline: Arc<TriagePipeline>,
    ) -> (
        std::net::SocketAddr,
        tokio::sync::oneshot::Sender<()>,
        mpsc::Receiver<Trigger>,
    ) {
        let (trigger_tx, trigger_rx) = trigger_channel();
        let state = ServerState::new(pipeline, trigger_tx);
        let (addr, shutdown_tx) = run(ServerConfig::new(0), state)
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx, trigger_rx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx, _triggers) = start(test_pipeline("http://127.0.0.1:9/unused")).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
        assert_eq!(body["messages"], 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_messages_endpoint_lists_and_clears() {
        let pipeline = test_pipeline("http://127.0.0.1:9/unused");
        pipeline.log().append(Message::user("one")).unwrap();
        pipeline.log().append(Message::ai("two")).unwrap();
        let (addr, shutdown_tx, _triggers) = start(pipeline.clone()).await;

        let client = reqwest::Client::new();
        let body: serde_json::Value = client
            .get(format!("http://{}/messages?limit=1", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        let messages = body.as_array().expect("expected an array");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "two");
        assert_eq!(messages[0]["origin"], "ai");

        let response = client
            .delete(format!("http://{}/messages", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        assert!(pipeline.log().is_empty());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_chat_records_both_turns() {
        let analysis = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": "Hi!" })),
            )
            .expect(1)
            .mount(&analysis)
            .await;

        let pipeline = test_pipeline(&format!("{}/api/health-feedback", analysis.uri()));
        let (addr, shutdown_tx, _triggers) = start(pipeline.clone()).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/chat", addr))
            .json(&serde_json::json!({ "message": "hello" }))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["reply"], "Hi!");
        assert_eq!(body["delivered"], true);

        let contents: Vec<_> = pipeline.log().messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["hello", "Hi!"]);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_empty_chat_is_rejected() {
        let (addr, shutdown_tx, _triggers) = start(test_pipeline("http://127.0.0.1:9/unused")).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/chat", addr))
            .json(&serde_json::json!({ "message": "   " }))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "INVALID_MESSAGE");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_refresh_queues_manual_trigger() {
        let (addr, shutdown_tx, mut triggers) =
            start(test_pipeline("http://127.0.0.1:9/unused")).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/refresh", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        assert!(matches!(triggers.try_recv(), Ok(Trigger::Manual)));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx, _triggers) = start(test_pipeline("http://127.0.0.1:9/unused")).await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/chat", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }
}
