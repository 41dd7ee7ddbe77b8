//! Workspace-wide error type.

use std::time::Duration;

use thiserror::Error;

/// Stable snake_case reason codes carried by outbound `error` messages.
pub mod codes {
    pub const INVALID_JSON: &str = "invalid_json";
    pub const INVALID_ENVELOPE: &str = "invalid_envelope";
    pub const INVALID_PAYLOAD: &str = "invalid_payload";
    pub const UNKNOWN_COMMAND: &str = "unknown_command";
    pub const UNKNOWN_COMPONENT: &str = "unknown_component";
    pub const UNKNOWN_ACTION: &str = "unknown_action";
    pub const CALIBRATION_BUSY: &str = "calibration_busy";
    pub const PROCESS_ACTIVE: &str = "process_active";
    pub const COMPONENTS_NOT_CALIBRATED: &str = "components_not_calibrated";
    pub const BATCH_ACTIVE: &str = "batch_active";
    pub const NOT_PROCESSING: &str = "not_processing";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const LINK_DEGRADED: &str = "link_degraded";
    pub const DEVICE_ERROR: &str = "device_error";
    pub const INTERNAL: &str = "internal";
}

/// Global error type spanning the hardware link, the wire protocol and
/// state-machine rejections.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeggError {
    #[error("hardware link timed out after {0:?}")]
    LinkTimeout(Duration),

    #[error("hardware link I/O error on {port}: {details}")]
    LinkIo { port: String, details: String },

    #[error("hardware link unavailable: {0}")]
    LinkUnavailable(String),

    #[error("controller board reported an error: {0}")]
    Device(String),

    #[error("{message}")]
    Protocol { code: &'static str, message: String },

    #[error("{message}")]
    Rejected { code: &'static str, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bind error on {addr}: {details}")]
    Bind { addr: String, details: String },

    #[error("channel error: {0}")]
    Channel(String),
}

impl MeggError {
    /// Malformed or unknown inbound message.
    pub fn protocol(code: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Illegal state transition; the target state machine is unchanged.
    pub fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Reason code reported to clients in `error{code, message}`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol { code, .. } | Self::Rejected { code, .. } => code,
            Self::LinkTimeout(_) | Self::LinkIo { .. } | Self::LinkUnavailable(_) => {
                codes::LINK_DEGRADED
            }
            Self::Device(_) => codes::DEVICE_ERROR,
            Self::Config(_) | Self::Bind { .. } | Self::Channel(_) => codes::INTERNAL,
        }
    }

    /// `true` for failures of the physical channel itself (as opposed to a
    /// well-formed error reply from the board).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::LinkTimeout(_) | Self::LinkIo { .. } | Self::LinkUnavailable(_)
        )
    }
}
