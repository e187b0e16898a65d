use thiserror::Error;

/// Errors raised while opening or running a feed connection.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("pusher error {code:?}: {message}")]
    Protocol { code: Option<i64>, message: String },

    #[error("no pong within {secs}s")]
    PongTimeout { secs: u64 },
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let err = FeedError::Protocol {
            code: Some(4001),
            message: "App disabled".into(),
        };
        assert_eq!(err.to_string(), "pusher error Some(4001): App disabled");
    }

    #[test]
    fn frame_error_from_serde() {
        let err: FeedError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, FeedError::Frame(_)));
    }
}
