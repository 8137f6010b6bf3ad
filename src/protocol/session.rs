//! # Session Engine
//!
//! Owns the single hardware session and the card capability behind one
//! exclusive lock.
//!
//! ```text
//! Idle --connect--> Connected --open--> ChannelOpen --close--> Connected
//!   ^                  |                    |
//!   +---- disconnect / idle expiry / shutdown ----+
//! ```
//!
//! ## Invariants
//! - At most one session exists; a capability exists iff a session does
//! - Every operation holds the lock for its whole duration, driver call
//!   included, so card access is strictly serialized
//! - Requests are authenticated by the exact (IP, port) origin of the
//!   session owner
//! - Expiry is checked lazily on every operation; the server's reaper is
//!   only a backstop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_SESSION_TIMEOUT;
use crate::core::packet::ConnectParams;
use crate::driver::{to_hex, CardChannel, DriverRegistry, INVALID_CHANNEL};
use crate::error::{constants, BridgeError, Result};
use crate::utils::metrics::{Metrics, Timer};

/// Record of the tenant currently holding the card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub owner: SocketAddr,
    /// Logical channel opened through this session, if any
    pub logical_channel: Option<u8>,
    pub started_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    fn new(owner: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            owner,
            logical_channel: None,
            started_at: now,
            last_activity: now,
        }
    }

    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_time() > timeout
    }

    /// Open channel id, or [`INVALID_CHANNEL`] when none is open
    pub fn channel_or_invalid(&self) -> u8 {
        self.logical_channel.unwrap_or(INVALID_CHANNEL)
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

struct Active {
    session: Session,
    card: Box<dyn CardChannel>,
}

/// Single-tenant session manager for one physical card.
pub struct SessionEngine {
    registry: DriverRegistry,
    timeout: Duration,
    metrics: Arc<Metrics>,
    state: Mutex<Option<Active>>,
}

impl SessionEngine {
    pub fn new(registry: DriverRegistry) -> Self {
        Self::with_timeout(registry, DEFAULT_SESSION_TIMEOUT)
    }

    pub fn with_timeout(registry: DriverRegistry, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            metrics: Arc::new(Metrics::new()),
            state: Mutex::new(None),
        }
    }

    /// Share an existing metrics collector instead of the engine's own
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Copy of the active session record, expired or not
    pub async fn session(&self) -> Option<Session> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Claim the card for `origin`.
    ///
    /// An expired session held by anyone is evicted first.
    pub async fn connect(&self, params: &ConnectParams, origin: SocketAddr) -> Result<()> {
        let mut state = self.state.lock().await;

        let held = state
            .as_ref()
            .map(|active| (active.session.owner, active.session.is_expired(self.timeout)));
        if let Some((owner, expired)) = held {
            if !expired {
                return Err(BridgeError::Busy(owner));
            }
            warn!(client = %owner, "Forcing cleanup of expired session");
            self.evict(&mut state).await;
        }

        let mut card = self.registry.build(params)?;
        {
            let _timer = Timer::start("connect");
            card.connect().await.map_err(BridgeError::into_driver)?;
        }

        *state = Some(Active {
            session: Session::new(origin),
            card,
        });
        self.metrics.session_opened();

        info!(
            client = %origin,
            protocol = %params.protocol,
            device = %params.device,
            slot = params.slot,
            "Session started"
        );
        Ok(())
    }

    /// Release the card held by `origin`.
    ///
    /// The session is cleared even when the driver fails to disconnect; that
    /// failure is still returned.
    pub async fn disconnect(&self, origin: SocketAddr) -> Result<()> {
        let mut state = self.state.lock().await;

        let Active { session, mut card } = match state.take() {
            None => return Err(BridgeError::NoActiveSession),
            Some(active) if active.session.owner != origin => {
                let owner = active.session.owner;
                *state = Some(active);
                return Err(BridgeError::Unauthorized(owner));
            }
            Some(active) => active,
        };

        if let Some(channel) = session.logical_channel {
            if let Err(e) = card.close_logical_channel(channel).await {
                warn!(channel, error = %e, "Failed to close logical channel");
            }
        }

        let result = {
            let _timer = Timer::start("disconnect");
            card.disconnect().await.map_err(BridgeError::into_driver)
        };
        self.metrics.session_closed();

        info!(
            client = %origin,
            duration_ms = session.started_at.elapsed().as_millis() as u64,
            "Session ended"
        );
        result
    }

    pub async fn open_logical_channel(&self, aid: &[u8], origin: SocketAddr) -> Result<u8> {
        let mut state = self.state.lock().await;
        let active = self.authorize(&mut state, origin).await?;

        if aid.is_empty() {
            return Err(BridgeError::InvalidArgument(constants::ERR_EMPTY_AID.to_string()));
        }

        let channel = {
            let _timer = Timer::start("open_logical_channel");
            active
                .card
                .open_logical_channel(aid)
                .await
                .map_err(BridgeError::into_driver)?
        };

        active.session.logical_channel = Some(channel);
        active.session.touch();

        debug!(channel, aid = %to_hex(aid), "Logical channel opened");
        Ok(channel)
    }

    /// Close `channel` on the card.
    ///
    /// The tracked channel is forgotten when it matches, even if the driver
    /// reports a failure.
    pub async fn close_logical_channel(&self, channel: u8, origin: SocketAddr) -> Result<()> {
        let mut state = self.state.lock().await;
        let active = self.authorize(&mut state, origin).await?;

        let result = {
            let _timer = Timer::start("close_logical_channel");
            active
                .card
                .close_logical_channel(channel)
                .await
                .map_err(BridgeError::into_driver)
        };

        if active.session.logical_channel == Some(channel) {
            active.session.logical_channel = None;
        }
        active.session.touch();

        match &result {
            Ok(()) => debug!(channel, "Logical channel closed"),
            Err(e) => warn!(channel, error = %e, "Logical channel close failed"),
        }
        result
    }

    pub async fn transmit(&self, apdu: &[u8], origin: SocketAddr) -> Result<Vec<u8>> {
        let mut state = self.state.lock().await;
        let active = self.authorize(&mut state, origin).await?;

        if apdu.is_empty() {
            return Err(BridgeError::InvalidArgument(constants::ERR_EMPTY_APDU.to_string()));
        }

        let response = {
            let _timer = Timer::start("transmit");
            active
                .card
                .transmit(apdu)
                .await
                .map_err(|e| {
                    warn!(error = %e, "Transmit failed");
                    e.into_driver()
                })?
        };

        active.session.touch();

        debug!(
            apdu_len = apdu.len(),
            response_len = response.len(),
            "Transmit completed"
        );
        Ok(response)
    }

    /// Check that `origin` may use the session without touching the card.
    ///
    /// An expired session is evicted as a side effect.
    pub async fn check_auth(&self, origin: SocketAddr) -> Result<()> {
        let mut state = self.state.lock().await;
        self.authorize(&mut state, origin).await.map(|_| ())
    }

    /// Evict the session if it has been idle past the timeout.
    ///
    /// Returns whether a session was evicted.
    pub async fn reap_expired(&self) -> bool {
        let mut state = self.state.lock().await;
        let expired = match state.as_ref() {
            Some(active) if active.session.is_expired(self.timeout) => {
                info!(
                    client = %active.session.owner,
                    idle_ms = active.session.idle_time().as_millis() as u64,
                    "Cleaning up expired session"
                );
                true
            }
            _ => false,
        };

        if expired {
            self.evict(&mut state).await;
        }
        expired
    }

    /// Tear down any active session; used when the server stops.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let owner = state.as_ref().map(|active| active.session.owner);
        if let Some(owner) = owner {
            info!(client = %owner, "Releasing session on shutdown");
            self.evict(&mut state).await;
        }
    }

    async fn authorize<'a>(
        &self,
        state: &'a mut Option<Active>,
        origin: SocketAddr,
    ) -> Result<&'a mut Active> {
        let (owner, expired) = match state.as_ref() {
            None => return Err(BridgeError::NoActiveSession),
            Some(active) => (
                active.session.owner,
                active.session.is_expired(self.timeout),
            ),
        };

        if owner != origin {
            return Err(BridgeError::Unauthorized(owner));
        }

        if expired {
            warn!(client = %owner, "Session expired during operation");
            self.evict(state).await;
            return Err(BridgeError::SessionExpired);
        }

        state.as_mut().ok_or(BridgeError::NoActiveSession)
    }

    /// Best-effort teardown; driver failures are logged, never returned.
    async fn evict(&self, state: &mut Option<Active>) {
        let Some(Active { session, mut card }) = state.take() else {
            return;
        };

        if let Some(channel) = session.logical_channel {
            if let Err(e) = card.close_logical_channel(channel).await {
                debug!(channel, error = %e, "Ignoring channel close failure during eviction");
            }
        }
        if let Err(e) = card.disconnect().await {
            debug!(error = %e, "Ignoring disconnect failure during eviction");
        }
        self.metrics.session_evicted();
    }
}
