//! HTTP transport to the MT5 Web API.
//!
//! A `Transport` opens connections; a `Connection` issues GET requests and
//! keeps its own cookie jar, so one connection is one authenticated session
//! on the server side. The production implementation is reqwest-based;
//! tests swap in a scripted stub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::GatewayError;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// GET `path` (relative to the server address) with query parameters.
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse, GatewayError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh connection with an empty cookie jar.
    async fn connect(&self) -> Result<Arc<dyn Connection>, GatewayError>;
}

/// reqwest-backed transport.
///
/// Certificate verification is disabled: MT5 management endpoints are
/// private and routinely run on self-signed certificates.
pub struct HttpTransport {
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<Arc<dyn Connection>, GatewayError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Arc::new(HttpConnection {
            client,
            base_url: self.base_url.clone(),
        }))
    }
}

/// One reqwest client, and therefore one cookie jar.
/// Clone is cheap - reqwest::Client uses Arc internally.
#[derive(Clone)]
struct HttpConnection {
    client: Client,
    base_url: String,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse, GatewayError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(path, status, bytes = body.len(), "MT5 response received");

        Ok(RawResponse { status, body })
    }
}

/// Scripted in-process MT5 server for unit tests.
#[cfg(test)]
pub(crate) mod stub {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use md5::{Digest, Md5};

    use super::{Connection, RawResponse, Transport};
    use crate::api::GatewayError;
    use crate::auth::codec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ProofMode {
        Valid,
        Corrupt,
        Omitted,
    }

    pub struct FakeServer {
        pub secret: String,
        pub srv_rand: String,
        pub retcode: Mutex<String>,
        pub proof: Mutex<ProofMode>,
        pub probe_status: AtomicU16,
        pub op_statuses: Mutex<VecDeque<u16>>,
        pub op_body: Mutex<String>,
        pub start_delay: Mutex<Duration>,
        pub transport_down: Mutex<bool>,
        hits: Mutex<HashMap<String, usize>>,
        connects: AtomicUsize,
    }

    impl FakeServer {
        pub fn new(secret: &str) -> Arc<Self> {
            Arc::new(Self {
                secret: secret.to_string(),
                srv_rand: "aa11".to_string(),
                retcode: Mutex::new("0 Done".to_string()),
                proof: Mutex::new(ProofMode::Valid),
                probe_status: AtomicU16::new(200),
                op_statuses: Mutex::new(VecDeque::new()),
                op_body: Mutex::new("{}".to_string()),
                start_delay: Mutex::new(Duration::ZERO),
                transport_down: Mutex::new(false),
                hits: Mutex::new(HashMap::new()),
                connects: AtomicUsize::new(0),
            })
        }

        /// Queue statuses for the next operation calls; 200 once exhausted
        pub fn script_ops(&self, statuses: &[u16]) {
            self.op_statuses.lock().unwrap().extend(statuses.iter().copied());
        }

        pub fn set_op_body(&self, body: &str) {
            *self.op_body.lock().unwrap() = body.to_string();
        }

        pub fn hits(&self, path: &str) -> usize {
            self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
        }

        pub fn handshakes(&self) -> usize {
            self.hits("/api/auth/start")
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn respond(&self, path: &str, query: &[(String, String)]) -> RawResponse {
            let param = |name: &str| {
                query
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            };

            match path {
                "/api/auth/start" => RawResponse::new(
                    200,
                    serde_json::json!({ "retcode": "0 Done", "srv_rand": self.srv_rand }).to_string(),
                ),
                "/api/auth/answer" => {
                    let fingerprint = codec::derive_secret_fingerprint(&self.secret);
                    let expected = codec::compute_challenge_response(&fingerprint, &self.srv_rand)
                        .expect("stub srv_rand is valid hex");
                    if param("srv_rand_answer") != expected {
                        return RawResponse::new(200, r#"{"retcode":"3 Invalid parameters"}"#);
                    }

                    let retcode = self.retcode.lock().unwrap().clone();
                    let cli_rand = hex::decode(param("cli_rand")).unwrap_or_default();
                    let mut proof = {
                        let mut hasher = Md5::new();
                        hasher.update(fingerprint.as_bytes());
                        hasher.update(&cli_rand);
                        hex::encode(hasher.finalize())
                    };
                    let body = match *self.proof.lock().unwrap() {
                        ProofMode::Valid => {
                            serde_json::json!({ "retcode": retcode, "cli_rand_answer": proof })
                        }
                        ProofMode::Corrupt => {
                            proof.replace_range(0..2, if proof.starts_with("00") { "ff" } else { "00" });
                            serde_json::json!({ "retcode": retcode, "cli_rand_answer": proof })
                        }
                        ProofMode::Omitted => serde_json::json!({ "retcode": retcode }),
                    };
                    RawResponse::new(200, body.to_string())
                }
                "/api/test/access" => {
                    let status = self.probe_status.load(Ordering::SeqCst);
                    RawResponse::new(status, r#"{"retcode":"0 Done"}"#)
                }
                _ => {
                    let status = self.op_statuses.lock().unwrap().pop_front().unwrap_or(200);
                    if status == 200 {
                        RawResponse::new(200, self.op_body.lock().unwrap().clone())
                    } else {
                        RawResponse::new(status, format!(r#"{{"retcode":"{} error"}}"#, status))
                    }
                }
            }
        }
    }

    /// Transport whose connections are all answered by one `FakeServer`.
    pub struct StubTransport {
        pub server: Arc<FakeServer>,
    }

    impl StubTransport {
        pub fn new(server: Arc<FakeServer>) -> Arc<Self> {
            Arc::new(Self { server })
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn connect(&self) -> Result<Arc<dyn Connection>, GatewayError> {
            self.server.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubConnection {
                server: Arc::clone(&self.server),
            }))
        }
    }

    struct StubConnection {
        server: Arc<FakeServer>,
    }

    #[async_trait]
    impl Connection for StubConnection {
        async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse, GatewayError> {
            *self
                .server
                .hits
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_insert(0) += 1;

            if *self.server.transport_down.lock().unwrap() {
                return Err(GatewayError::Transport("connection refused".into()));
            }

            if path == "/api/auth/start" {
                let delay = *self.server.start_delay.lock().unwrap();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            Ok(self.server.respond(path, query))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_connection_sends_query_and_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/user/get"))
            .and(query_param("login", "46108"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"login":"46108"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&format!("{}/", server.uri()), Duration::from_secs(5));
        let connection = transport.connect().await.unwrap();
        let response = connection
            .get("/api/user/get", &[("login".to_string(), "46108".to_string())])
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.body, r#"{"login":"46108"}"#);
    }

    #[tokio::test]
    async fn test_http_connection_keeps_cookies_between_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/start"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "session=abc123; Path=/")
                    .set_body_string(r#"{"srv_rand":"aa11"}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/answer"))
            .and(wiremock::matchers::header("cookie", "session=abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"retcode":"0 Done"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), Duration::from_secs(5));
        let connection = transport.connect().await.unwrap();
        connection.get("/api/auth/start", &[]).await.unwrap();
        let answer = connection.get("/api/auth/answer", &[]).await.unwrap();

        assert_eq!(answer.status, 200);
    }

    #[tokio::test]
    async fn test_http_connection_timeout_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), Duration::from_millis(50));
        let connection = transport.connect().await.unwrap();
        let err = connection.get("/api/time/server", &[]).await.unwrap_err();

        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[test]
    fn test_raw_response_success_range() {
        assert!(RawResponse::new(200, "").is_success());
        assert!(RawResponse::new(204, "").is_success());
        assert!(!RawResponse::new(401, "").is_success());
        assert!(!RawResponse::new(500, "").is_success());
    }
}
