//! Tether - device pairing, payment verification and entitlement-driven
//! session revocation for desktop clients.
//!
//! # Flows
//!
//! - [`pairing::PairingSession`] issues a short-lived code, shows it as a QR
//!   rendering, polls until a second device connects, and expires or cancels
//!   cleanly.
//! - [`checkout::CheckoutVerifier`] confirms a completed payment with bounded
//!   exponential backoff, then refreshes entitlement.
//! - [`entitlement::EntitlementMonitor`] checks access and, when it is lost,
//!   revokes every paired session through
//!   [`devices::DeviceSessionRegistry`].
//!
//! All timers go through [`scheduler::Scheduler`]. The backend is reached
//! through the [`client::backend::Backend`] trait; [`client::http::HttpBackend`]
//! is the `reqwest` implementation.
//!
//! # Features
//!
//! - `cli` - the `tether_client` binary. Enabled by default.
//!
//! ```toml
//! # Library only
//! tether = { version = "0.1", default-features = false }
//! ```

// Core modules
pub mod config;
pub mod errors;
pub mod hardware;
pub mod logging;
pub mod notice;
pub mod retry;
pub mod scheduler;

// Collaborator seams and helpers
pub mod deeplink;
pub mod identity;
pub mod qr;

// Flows
pub mod checkout;
pub mod devices;
pub mod entitlement;
pub mod pairing;

// Backend access
pub mod client {
    pub mod backend;
    pub mod errors;
    pub mod http;
    pub mod responses;
}

pub use errors::{TetherError, TetherResult};
