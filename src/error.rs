use serde::{Deserialize, Serialize};

/// User-facing failure category attached to fatal session errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Capture permission was refused
    Permission,
    /// No usable capture device or context
    Device,
    /// Webhook transport problem
    Network,
    /// Encoder, state store or anything else
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorCategory::Permission => "permission",
            ErrorCategory::Device => "device",
            ErrorCategory::Network => "network",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(label)
    }
}
