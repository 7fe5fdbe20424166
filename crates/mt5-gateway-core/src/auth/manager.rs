//! Session lifecycle against the MT5 Web API.
//!
//! `SessionManager` owns the single authenticated `Session`. It runs the
//! two-step handshake (`/api/auth/start`, `/api/auth/answer`), reports
//! validity, and keeps the session warm with a background probe.
//!
//! Handshakes are single-flight: the first caller spawns the attempt and
//! parks a shared future in `inflight`; everyone arriving while it runs
//! awaits that same future and sees the same outcome. The attempt runs on
//! its own task so a waiter being dropped never leaves it half done.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec;
use super::session::{Session, SessionState, SessionStatus, SESSION_VALIDITY};
use super::Credentials;
use crate::api::{Connection, GatewayError, Transport};
use crate::api::error::HandshakeError;

const AUTH_START_PATH: &str = "/api/auth/start";
const AUTH_ANSWER_PATH: &str = "/api/auth/answer";

/// Default keep-alive probe target.
pub const DEFAULT_PROBE_PATH: &str = "/api/test/access";

/// Interval between keep-alive probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// The server discards a challenge that is not answered within 10 seconds.
/// We only log when we go over; the server's verdict is what counts.
const HANDSHAKE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct AuthStartResponse {
    srv_rand: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthAnswerResponse {
    retcode: Option<String>,
    cli_rand_answer: Option<String>,
}

/// What to do when the server's `cli_rand_answer` does not check out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProofPolicy {
    /// Log a warning and keep the session. Some servers omit or garble it.
    #[default]
    Warn,
    /// Fail the handshake on mismatch or absence.
    Require,
}

impl FromStr for ServerProofPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(ServerProofPolicy::Warn),
            "require" => Ok(ServerProofPolicy::Require),
            other => Err(format!("unknown server proof policy '{}' (expected warn or require)", other)),
        }
    }
}

impl fmt::Display for ServerProofPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerProofPolicy::Warn => f.write_str("warn"),
            ServerProofPolicy::Require => f.write_str("require"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub validity: Duration,
    pub keepalive_interval: Duration,
    pub probe_path: String,
    pub proof_policy: ServerProofPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            validity: SESSION_VALIDITY,
            keepalive_interval: KEEPALIVE_INTERVAL,
            probe_path: DEFAULT_PROBE_PATH.to_string(),
            proof_policy: ServerProofPolicy::default(),
        }
    }
}

/// Result of one keep-alive cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeOutcome {
    /// No valid session to probe
    Skipped,
    Alive,
    /// Probe failed, re-authentication succeeded
    Recovered,
    /// Probe failed and so did re-authentication
    Failed,
}

type HandshakeFlight = Shared<BoxFuture<'static, Result<Arc<dyn Connection>, HandshakeError>>>;

#[derive(Default)]
struct Slot {
    session: Option<Session>,
    authenticating: bool,
    closed: bool,
}

struct KeepAlive {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    options: SessionOptions,
    slot: RwLock<Slot>,
    inflight: Mutex<Option<HandshakeFlight>>,
    keepalive: Mutex<Option<KeepAlive>>,
}

/// Owner of the authenticated MT5 session.
/// Clone is cheap - all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                options,
                slot: RwLock::new(Slot::default()),
                inflight: Mutex::new(None),
                keepalive: Mutex::new(None),
            }),
        }
    }

    /// Run a handshake, or join the one already in flight.
    pub async fn authenticate(&self) -> Result<(), GatewayError> {
        self.inner.acquire(true).await.map(|_| ())
    }

    /// Whether a session exists and is inside its validity window
    pub async fn is_valid(&self) -> bool {
        matches!(self.inner.valid_connection().await, Ok(Some(_)))
    }

    /// Live connection, authenticating first if the session is missing or
    /// expired.
    pub async fn connection(&self) -> Result<Arc<dyn Connection>, GatewayError> {
        if let Some(connection) = self.inner.valid_connection().await? {
            return Ok(connection);
        }
        debug!("No valid MT5 session, authenticating");
        self.inner
            .acquire(false)
            .await
            .map_err(GatewayError::into_unavailable)
    }

    /// Force a fresh handshake regardless of validity and return the new
    /// connection. Used after the server rejects the current session.
    pub async fn reauthenticate(&self) -> Result<Arc<dyn Connection>, GatewayError> {
        self.inner
            .acquire(true)
            .await
            .map_err(GatewayError::into_unavailable)
    }

    pub async fn status(&self) -> SessionStatus {
        let slot = self.inner.slot.read().await;
        let validity = self.inner.options.validity;

        let state = match (&slot.session, slot.authenticating) {
            (_, true) => SessionState::Authenticating,
            (Some(session), false) if !session.is_expired(validity) => SessionState::Authenticated,
            (Some(_), false) => SessionState::Expired,
            (None, false) => SessionState::Unauthenticated,
        };

        SessionStatus {
            state,
            authenticated_at: slot.session.as_ref().map(Session::authenticated_at),
            expires_in_secs: slot
                .session
                .as_ref()
                .map(|s| s.time_until_expiry(validity).as_secs()),
        }
    }

    /// Stop the keep-alive task and drop the session. New connection
    /// requests fail with `ShutDown`; calls already in flight finish.
    pub async fn shutdown(&self) {
        let was_closed = {
            let mut slot = self.inner.slot.write().await;
            let was_closed = slot.closed;
            slot.closed = true;
            slot.session = None;
            was_closed
        };

        let keepalive = self.inner.keepalive.lock().await.take();
        if let Some(keepalive) = keepalive {
            keepalive.cancel.cancel();
            if let Err(e) = keepalive.handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Keep-alive task panicked");
                }
            }
        }

        if !was_closed {
            info!("MT5 session manager shut down");
        }
    }

    #[cfg(test)]
    pub(crate) async fn keepalive_cycle(&self) -> ProbeOutcome {
        self.inner.keepalive_cycle().await
    }

    #[cfg(test)]
    pub(crate) async fn keepalive_running(&self) -> bool {
        self.inner
            .keepalive
            .lock()
            .await
            .as_ref()
            .is_some_and(|k| !k.handle.is_finished())
    }
}

impl Inner {
    async fn valid_connection(&self) -> Result<Option<Arc<dyn Connection>>, GatewayError> {
        let slot = self.slot.read().await;
        if slot.closed {
            return Err(GatewayError::ShutDown);
        }
        Ok(slot
            .session
            .as_ref()
            .filter(|s| !s.is_expired(self.options.validity))
            .map(Session::connection))
    }

    /// Join the in-flight handshake or start one. With `force == false` a
    /// session that became valid while we waited for the lock is reused.
    async fn acquire(self: &Arc<Self>, force: bool) -> Result<Arc<dyn Connection>, GatewayError> {
        let flight = {
            let mut inflight = self.inflight.lock().await;
            match inflight.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight MT5 handshake");
                    flight.clone()
                }
                None => {
                    if !force {
                        if let Some(connection) = self.valid_connection().await? {
                            return Ok(connection);
                        }
                    } else if self.slot.read().await.closed {
                        return Err(GatewayError::ShutDown);
                    }

                    let attempt = tokio::spawn(Arc::clone(self).handshake_task());
                    let flight = async move {
                        attempt.await.unwrap_or_else(|e| {
                            error!(error = %e, "MT5 handshake task failed");
                            Err(HandshakeError::Aborted)
                        })
                    }
                    .boxed()
                    .shared();

                    *inflight = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await.map_err(GatewayError::Handshake)
    }

    /// Spawnable handshake that clears `inflight` when done. The boxed
    /// return type keeps the handshake and keep-alive futures from
    /// depending on each other's concrete types.
    fn handshake_task(self: Arc<Self>) -> BoxFuture<'static, Result<Arc<dyn Connection>, HandshakeError>> {
        async move {
            let result = self.handshake().await;
            self.inflight.lock().await.take();
            result
        }
        .boxed()
    }

    /// One handshake attempt, committing its outcome to the slot.
    async fn handshake(self: &Arc<Self>) -> Result<Arc<dyn Connection>, HandshakeError> {
        self.slot.write().await.authenticating = true;

        let result = self.run_handshake().await;

        let mut slot = self.slot.write().await;
        slot.authenticating = false;
        match result {
            Ok(session) if slot.closed => {
                // Waiters may still finish their call; the session is not kept
                debug!("MT5 session authenticated during shutdown, not retaining it");
                Ok(session.connection())
            }
            Ok(session) => {
                let connection = session.connection();
                slot.session = Some(session);
                drop(slot);
                self.restart_keepalive().await;
                Ok(connection)
            }
            Err(e) => {
                slot.session = None;
                warn!(error = %e, "MT5 authentication error");
                Err(e)
            }
        }
    }

    async fn run_handshake(&self) -> Result<Session, HandshakeError> {
        let credentials = &self.credentials;
        info!(server = %credentials.server, login = %credentials.login, "Authenticating with MT5 server");

        let connection = self.transport.connect().await.map_err(transport_failure)?;
        let started = Instant::now();

        // Step 1: request a challenge
        let response = connection
            .get(AUTH_START_PATH, &credentials.start_params())
            .await
            .map_err(transport_failure)?;
        if !response.is_success() {
            return Err(HandshakeError::ChallengeFailed(response.status));
        }
        let challenge: AuthStartResponse = response
            .json()
            .map_err(|e| HandshakeError::MalformedChallenge(e.to_string()))?;
        let srv_rand = challenge
            .srv_rand
            .filter(|r| !r.is_empty())
            .ok_or_else(|| HandshakeError::MalformedChallenge("No srv_rand in response".to_string()))?;

        // Step 2: answer it
        let fingerprint = credentials.fingerprint();
        let srv_rand_answer = codec::compute_challenge_response(&fingerprint, &srv_rand)?;
        let cli_rand = codec::generate_client_random();
        let answer_params = [
            ("srv_rand_answer".to_string(), srv_rand_answer),
            ("cli_rand".to_string(), cli_rand.clone()),
        ];
        let response = connection
            .get(AUTH_ANSWER_PATH, &answer_params)
            .await
            .map_err(transport_failure)?;

        let elapsed = started.elapsed();
        if elapsed > HANDSHAKE_WINDOW {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "MT5 handshake exceeded the auth window");
        }

        if !response.is_success() {
            return Err(HandshakeError::AnswerFailed(response.status));
        }
        let answer: AuthAnswerResponse = response
            .json()
            .map_err(|e| HandshakeError::MalformedAnswer(e.to_string()))?;

        let retcode = answer.retcode.unwrap_or_default();
        if !retcode.starts_with('0') {
            return Err(HandshakeError::Rejected(if retcode.is_empty() {
                "missing retcode".to_string()
            } else {
                retcode
            }));
        }

        // Step 3: check the server knows the password too
        let session = Session::new(connection, fingerprint);
        match (answer.cli_rand_answer, self.options.proof_policy) {
            (Some(proof), policy) if !session.verify_server_proof(&cli_rand, &proof) => match policy {
                ServerProofPolicy::Warn => warn!("MT5 server authentication validation failed"),
                ServerProofPolicy::Require => return Err(HandshakeError::ServerProofMismatch),
            },
            (None, ServerProofPolicy::Require) => return Err(HandshakeError::ServerProofMissing),
            _ => {}
        }

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "MT5 authentication successful");
        Ok(session)
    }

    /// Replace the keep-alive task. The previous task is cancelled before
    /// the new one is spawned; it may be the caller itself, so it is not
    /// awaited here.
    async fn restart_keepalive(self: &Arc<Self>) {
        let mut keepalive = self.keepalive.lock().await;
        if let Some(previous) = keepalive.take() {
            previous.cancel.cancel();
            debug!("Superseded previous keep-alive task");
        }

        if self.slot.read().await.closed {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_keepalive_loop(
            Arc::downgrade(self),
            self.options.keepalive_interval,
            cancel.clone(),
        ));
        *keepalive = Some(KeepAlive { cancel, handle });
    }

    async fn keepalive_cycle(self: &Arc<Self>) -> ProbeOutcome {
        let connection = match self.valid_connection().await {
            Ok(Some(connection)) => connection,
            _ => {
                debug!("No valid MT5 session, skipping keep-alive probe");
                return ProbeOutcome::Skipped;
            }
        };

        match connection.get(&self.options.probe_path, &[]).await {
            Ok(response) if response.is_success() => {
                debug!("Keep-alive probe succeeded");
                return ProbeOutcome::Alive;
            }
            Ok(response) => {
                warn!(status = response.status, "Keep-alive probe rejected, re-authenticating");
            }
            Err(e) => {
                warn!(error = %e, "Keep-alive probe failed, re-authenticating");
            }
        }

        match self.acquire(true).await {
            Ok(_) => {
                info!("Keep-alive re-authentication succeeded");
                ProbeOutcome::Recovered
            }
            Err(e) => {
                error!(error = %e, "Keep-alive re-authentication failed");
                ProbeOutcome::Failed
            }
        }
    }
}

async fn run_keepalive_loop(inner: Weak<Inner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(interval_secs = period.as_secs(), "Keep-alive task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    debug!("Session manager dropped, stopping keep-alive");
                    break;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = inner.keepalive_cycle() => {}
                }
            }
        }
    }

    debug!("Keep-alive task stopped");
}

fn transport_failure(e: GatewayError) -> HandshakeError {
    match e {
        GatewayError::Transport(msg) => HandshakeError::Transport(msg),
        other => HandshakeError::Transport(other.to_string()),
    }
}
