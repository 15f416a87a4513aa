//! Test server harness for E2E testing
//!
//! Provides `TestCallServer` for spawning real call service instances in tests.

use call_service::config::Config;
use call_service::routes::{self, AppState};
use common::api::PARTICIPANT_HEADER;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the call service in E2E tests.
///
/// Each instance owns a fresh in-memory session store.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestCallServer::spawn().await?;
///     let client = reqwest::Client::new();
///
///     let response = client
///         .get(&format!("{}/v1/health", server.url()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestCallServer {
    addr: SocketAddr,
    config: Config,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestCallServer {
    /// Spawn a test server with default configuration.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn a test server with configuration overrides (e.g. `MAX_PAYLOAD_BYTES`).
    pub async fn spawn_with_vars(
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string())]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = Arc::new(AppState::new(config.clone()));

        // A non-installed recorder: every test server gets its own handle
        // without touching the process-global recorder.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the shared application state, for asserting on store contents.
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

impl Drop for TestCallServer {
    fn drop(&mut self) {
        // Abort the server task so the port is released when the test ends
        self._handle.abort();
    }
}

/// Raw HTTP access to a test server on behalf of one participant.
///
/// Adds the `X-Participant-Id` header to every request. Intended for
/// asserting on status codes and error envelopes directly.
#[derive(Clone)]
pub struct ParticipantHttp {
    base_url: String,
    participant: String,
    client: reqwest::Client,
}

impl ParticipantHttp {
    /// Create a helper for `participant` against `server`.
    pub fn new(server: &TestCallServer, participant: &str) -> Self {
        Self {
            base_url: server.url(),
            participant: participant.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Start a GET request.
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    /// Start a POST request.
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    /// Start a PUT request.
    pub fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::PUT, path)
    }

    /// Start a DELETE request.
    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::DELETE, path)
    }

    /// Send `{"payload": payload}` with PUT or POST.
    pub fn payload(
        &self,
        method: reqwest::Method,
        path: &str,
        payload: &str,
    ) -> reqwest::RequestBuilder {
        self.request(method, path)
            .json(&serde_json::json!({ "payload": payload }))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(PARTICIPANT_HEADER, &self.participant)
    }
}
