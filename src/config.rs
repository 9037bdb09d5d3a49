//! Configuration module for the feed runtime

use serde::Deserialize;
use std::env;

/// Runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Maximum logical subscriptions multiplexed onto one physical connection
    pub max_subscriptions_per_handle: usize,

    /// Minimum spacing between outbound subscribe/unsubscribe frames per handle
    pub rest_throttle_ms: u64,

    /// Longest silence tolerated on a connection before it is torn down
    pub reconnect_interval_ms: u64,

    /// Delay enforced after every REST snapshot attempt, success or failure
    pub rest_request_delay_ms: u64,

    /// Simultaneous in-flight snapshot requests per exchange
    pub rest_concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            max_subscriptions_per_handle: env::var("FEEDMUX_MAX_SUBSCRIPTIONS_PER_HANDLE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
            rest_throttle_ms: env::var("FEEDMUX_REST_THROTTLE_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .unwrap_or(250),
            reconnect_interval_ms: env::var("FEEDMUX_RECONNECT_INTERVAL_MS")
                .unwrap_or_else(|_| "90000".to_string())
                .parse()
                .unwrap_or(90_000),
            rest_request_delay_ms: env::var("FEEDMUX_REST_REQUEST_DELAY_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .unwrap_or(250),
            rest_concurrency: env::var("FEEDMUX_REST_CONCURRENCY")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_subscriptions_per_handle: 100,
            rest_throttle_ms: 250,
            reconnect_interval_ms: 90_000,
            rest_request_delay_ms: 250,
            rest_concurrency: 3,
        }
    }
}
