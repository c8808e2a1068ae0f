//! Stable hardware identifier used for entitlement checks.
//!
//! The platform machine id is read once and hashed with SHA-256 before use,
//! so the raw identifier never leaves the machine. The same hardware always
//! produces the same hex digest.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::warn;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

static HARDWARE_ID: OnceLock<String> = OnceLock::new();

/// Returns the hashed identifier for the current machine.
pub fn get_hardware_id() -> String {
    HARDWARE_ID
        .get_or_init(|| {
            let raw = read_machine_id().unwrap_or_else(|| {
                warn!("machine id unavailable, falling back to a platform-wide identifier");
                format!("unknown-{}-{}", std::env::consts::OS, std::env::consts::ARCH)
            });
            hash_machine_id(&raw)
        })
        .clone()
}

/// SHA-256 hex digest of a raw machine id, after trimming whitespace.
pub fn hash_machine_id(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.trim().as_bytes()))
}

fn read_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        linux::get_machine_id()
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_machine_id()
    }
    #[cfg(target_os = "windows")]
    {
        windows::get_machine_id()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}
