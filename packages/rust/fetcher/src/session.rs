//! Per-batch HTTP session: one client identity, one cookie jar, one pool.
//!
//! Every request of a batch goes through the same [`FetchSession`] so the
//! remote host sees a single browsing session rather than a fresh client per
//! download. A new batch builds a new session and thereby rotates the identity.

use std::time::Duration;

use affilscan_shared::{AffilscanError, FetchConfig, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::Client;
use tracing::debug;

/// Desktop browser identities a session may present.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// Shared network client for one batch.
///
/// Cheap to clone; clones share the connection pool and cookie store.
#[derive(Debug, Clone)]
pub struct FetchSession {
    client: Client,
    user_agent: &'static str,
    delay_min: Duration,
    delay_max: Duration,
}

impl FetchSession {
    /// Build a session with a randomly chosen identity.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        Self::with_user_agent(config, user_agent)
    }

    /// Build a session presenting a fixed identity.
    pub fn with_user_agent(config: &FetchConfig, user_agent: &'static str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.total_timeout)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| AffilscanError::Network(format!("failed to build HTTP client: {e}")))?;

        debug!(user_agent, "created fetch session");

        Ok(Self {
            client,
            user_agent,
            delay_min: config.delay_min,
            delay_max: config.delay_max,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn user_agent(&self) -> &'static str {
        self.user_agent
    }

    /// Draw the randomized pause taken before each request.
    pub fn next_delay(&self) -> Duration {
        let min = self.delay_min.as_millis() as u64;
        let max = self.delay_max.as_millis() as u64;
        if max <= min {
            return self.delay_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..max))
    }

    /// Sleep for a freshly drawn delay so requests do not arrive on a fixed cadence.
    pub async fn pre_request_delay(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
