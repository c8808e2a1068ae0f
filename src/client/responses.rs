//! Wire types for the pairing, entitlement and payment endpoints.
//!
//! The backend speaks camelCase JSON. Optional fields default when absent so
//! older servers keep deserializing.

use serde::{Deserialize, Serialize};

use crate::devices::DeviceSession;

// === Pairing ===

/// Body of `POST /pairing/generate-code`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeRequest {
    pub account_id: String,
    pub display_name: String,
}

/// Response of `POST /pairing/generate-code`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeResponse {
    pub success: bool,
    #[serde(default)]
    pub code: Option<String>,
    /// Seconds until the code expires; the client falls back to its default.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Set when the server handed back a code that was already active.
    #[serde(default)]
    pub existing: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Connection state reported for a pairing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Pending,
    Connected,
    #[serde(other)]
    Unknown,
}

/// Response of `GET /pairing/connection-status/{code}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionStatusResponse {
    pub success: bool,
    #[serde(default)]
    pub status: ConnectionStatus,
}

impl ConnectionStatusResponse {
    pub fn is_connected(&self) -> bool {
        self.success && self.status == ConnectionStatus::Connected
    }
}

// === Device sessions ===

/// Response of `GET /pairing/connected-devices/{accountId}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedDevicesResponse {
    pub success: bool,
    #[serde(default)]
    pub devices: Vec<DeviceSession>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /pairing/disconnect-device`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub session_id: String,
    pub account_id: String,
}

/// Response of `POST /pairing/disconnect-device`.
#[derive(Debug, Clone, Deserialize)]
pub struct DisconnectResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

// === Payments ===

/// Body of `POST /payments/verify-checkout`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub session_id: String,
    pub account_id: String,
}

/// Response of `POST /payments/verify-checkout`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CheckoutResponse {
    /// Server text explaining the outcome, whichever field it came in.
    pub fn message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}
