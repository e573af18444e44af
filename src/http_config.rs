//! HTTP client configuration module
//!
//! Centralized timeouts and retry settings for the hosted data store client.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

use crate::error::PersistenceError;
use crate::utils::retry::{Backoff, RetryPolicies, RetryPolicy};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Total request timeout
    pub timeout: Duration,
    /// How long idle pooled connections are kept
    pub pool_idle_timeout: Duration,
    /// Retries for interactive writes
    pub max_retries: u32,
    /// Base delay for interactive write retries
    pub base_retry_delay: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            max_retries: 2,
            base_retry_delay: Duration::from_millis(250),
        }
    }
}

impl HttpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tighter limits for flaky or metered connections: fail fast, retry once.
    pub fn fail_fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            pool_idle_timeout: Duration::from_secs(30),
            max_retries: 1,
            base_retry_delay: Duration::from_millis(200),
        }
    }

    /// Build a reqwest client with this configuration
    pub fn build_client(&self) -> Result<Client, PersistenceError> {
        ClientBuilder::new()
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| PersistenceError::network(format!("Failed to create HTTP client: {}", e)))
    }

    /// Engine retry policies matching this client. Interactive writes follow
    /// `max_retries`/`base_retry_delay`; the initial load stays more patient.
    pub fn to_retry_policies(&self) -> RetryPolicies {
        RetryPolicies {
            interactive: RetryPolicy::persistence(self.max_retries, self.base_retry_delay, Backoff::Linear),
            ..RetryPolicies::default()
        }
    }
}
