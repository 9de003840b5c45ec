//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

const SANDBOX_BASE_URL: &str = "https://api.sandbox.midtrans.com/v2";
const PRODUCTION_BASE_URL: &str = "https://api.midtrans.com/v2";

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `MIDTRANS_SERVER_KEY` (required): gateway server key, also the notification signing secret
/// - `MIDTRANS_SANDBOX` (optional): use the sandbox gateway, defaults to true
/// - `GATEWAY_TIMEOUT_SECS` (optional): timeout for every gateway call, defaults to 10
/// - `REQUIRE_SIGNATURE` (optional): reject unsigned notifications, defaults to true
/// - `DEFAULT_CURRENCY` (optional): currency assumed for notifications, defaults to IDR
/// - `RETRY_INTERVAL_SECS` (optional): deferred reconciliation period, defaults to 30
/// - `RETRY_MAX_ATTEMPTS` (optional): attempts before a delivery is parked, defaults to 5
/// - `RETRY_RECEIVED_GRACE_SECS` (optional): age at which an unfinished delivery is replayed, defaults to 300
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub midtrans_server_key: String,

    #[serde(default = "default_true")]
    pub midtrans_sandbox: bool,

    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub require_signature: bool,

    #[serde(default = "default_currency")]
    pub default_currency: String,

    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: i32,

    #[serde(default = "default_retry_received_grace")]
    pub retry_received_grace_secs: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_gateway_timeout() -> u64 {
    10
}

fn default_currency() -> String {
    "IDR".to_string()
}

fn default_retry_interval() -> u64 {
    30
}

fn default_retry_max_attempts() -> i32 {
    5
}

/// Well above the time one synchronous pass can take.
fn default_retry_received_grace() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Gateway connection settings derived from this configuration.
    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            server_key: self.midtrans_server_key.clone(),
            base_url: if self.midtrans_sandbox {
                SANDBOX_BASE_URL.to_string()
            } else {
                PRODUCTION_BASE_URL.to_string()
            },
            timeout: Duration::from_secs(self.gateway_timeout_secs),
        }
    }

    pub fn webhook_policy(&self) -> WebhookPolicy {
        WebhookPolicy {
            require_signature: self.require_signature,
            default_currency: self.default_currency.clone(),
        }
    }
}

/// Connection settings for the payment gateway.
///
/// Built once per process and handed to the gateway client.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// How inbound notifications are accepted.
#[derive(Debug, Clone)]
pub struct WebhookPolicy {
    /// When false, unsigned notifications are accepted with a warning.
    pub require_signature: bool,
    pub default_currency: String,
}

impl Default for WebhookPolicy {
    fn default() -> Self {
        Self {
            require_signature: true,
            default_currency: default_currency(),
        }
    }
}
