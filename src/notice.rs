//! User-facing notices emitted by the flows.
//!
//! Only outcomes a user can see or act on cross this boundary. Everything
//! else is logged and handled inside the owning component.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A pairing code is ready to display.
    PairingCodeIssued { code: String, existing: bool },
    /// The second device connected with the displayed code.
    PairingConnected,
    /// The code ran out; a new one must be requested explicitly.
    PairingCodeExpired,
    PairingCancelled,
    /// The device list could not be fetched; the cached list is empty.
    DeviceListUnavailable { reason: String },
    /// One device refused to disconnect; the rest of the batch continued.
    DeviceRevokeFailed { session_id: String, reason: String },
    /// Access was lost and paired sessions were torn down.
    AccessRevoked { revoked: usize, failed: usize },
    TrialEndingSoon { days_remaining: i64 },
    /// First payment verification retry is pending; show for `wait`.
    PaymentVerifying { wait: Duration },
    PaymentVerified { session_id: String },
    /// Terminal payment verification failure. Stays until dismissed.
    PaymentFailed { session_id: String, message: String },
}

impl Notice {
    pub fn level(&self) -> NoticeLevel {
        match self {
            Notice::PairingCodeIssued { .. }
            | Notice::PairingCancelled
            | Notice::PaymentVerifying { .. } => NoticeLevel::Info,
            Notice::PairingConnected | Notice::PaymentVerified { .. } => NoticeLevel::Success,
            Notice::PairingCodeExpired
            | Notice::DeviceListUnavailable { .. }
            | Notice::DeviceRevokeFailed { .. }
            | Notice::TrialEndingSoon { .. } => NoticeLevel::Warning,
            Notice::AccessRevoked { .. } | Notice::PaymentFailed { .. } => NoticeLevel::Error,
        }
    }

    /// Persistent notices stay on screen until the user dismisses them.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Notice::PaymentFailed { .. })
    }

    /// How long a transient notice should stay visible, when it matters.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Notice::PaymentVerifying { wait } => Some(*wait),
            _ => None,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PairingCodeIssued { code, existing: false } => {
                write!(f, "Pairing code {code} is ready")
            }
            Notice::PairingCodeIssued { code, existing: true } => {
                write!(f, "Pairing code {code} is still active")
            }
            Notice::PairingConnected => write!(f, "Device connected successfully"),
            Notice::PairingCodeExpired => {
                write!(f, "Pairing code expired. Generate a new code to try again")
            }
            Notice::PairingCancelled => write!(f, "Pairing cancelled"),
            Notice::DeviceListUnavailable { reason } => {
                write!(f, "Could not load connected devices: {reason}")
            }
            Notice::DeviceRevokeFailed { session_id, reason } => {
                write!(f, "Could not disconnect device {session_id}: {reason}")
            }
            Notice::AccessRevoked { revoked, failed: 0 } => {
                write!(f, "Access ended. Disconnected {revoked} device(s)")
            }
            Notice::AccessRevoked { revoked, failed } => write!(
                f,
                "Access ended. Disconnected {revoked} device(s), {failed} could not be disconnected"
            ),
            Notice::TrialEndingSoon { days_remaining } => {
                write!(f, "Your trial ends in {days_remaining} day(s)")
            }
            Notice::PaymentVerifying { .. } => {
                write!(f, "Verifying payment, please wait...")
            }
            Notice::PaymentVerified { .. } => write!(f, "Payment verified. Thank you!"),
            Notice::PaymentFailed {
                session_id,
                message,
            } => write!(
                f,
                "{message}. If you were charged, contact support with Session ID: {session_id}"
            ),
        }
    }
}

/// Receives notices for display.
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Forwards notices over an unbounded channel to the UI task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NoticeSink for ChannelSink {
    fn notify(&self, notice: Notice) {
        // A closed receiver means the UI is gone; nothing left to tell.
        let _ = self.tx.send(notice);
    }
}
