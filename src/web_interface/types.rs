use serde::{Deserialize, Serialize};

/// Error payload for requests rejected before reaching a tool.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Body of `POST /devices/{serial}/proxy`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    pub host: String,
    pub port: u16,
}

/// Body of `POST /devices/{serial}/reverse`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReverseRequest {
    pub remote: String,
    pub local: String,
}
