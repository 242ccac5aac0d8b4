use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid link URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Unknown link factory: {name}")]
    UnknownFactory { name: String },

    #[error("Unknown attribute {name} for factory {factory}")]
    UnknownAttribute { factory: String, name: String },

    #[error("Invalid value {value:?} for attribute {name}: expected {expected}")]
    InvalidAttributeValue {
        name: String,
        value: String,
        expected: String,
    },

    #[error("Missing required attribute {name} for factory {factory}")]
    MissingAttribute { factory: String, name: String },

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("{0} registry already installed")]
    AlreadyInstalled(&'static str),

    #[error("Invalid configuration {uri}: {source}")]
    Configuration {
        uri: String,
        #[source]
        source: Box<Error>,
    },

    // Transport errors
    #[error("Connection to {target} failed: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Connection to {target} timed out after {timeout_ms}ms")]
    ConnectTimeout { target: String, timeout_ms: u64 },

    #[error("Serial port {port}: {reason}")]
    Serial { port: String, reason: String },

    #[error("Connection to {target} is closed")]
    Disconnected { target: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Protocol errors
    #[error("Protocol {protocol} cannot encode {message}")]
    UnsupportedMessage {
        protocol: String,
        message: &'static str,
    },

    // Link errors
    #[error("Link is closed")]
    LinkClosed,

    // QoS errors
    #[error("timed out waiting for reply to id={id} after {timeout_ms}ms")]
    ReplyTimeout { id: u64, timeout_ms: u64 },

    #[error("device replied not-ok to id={id}")]
    ReplyRejected { id: u64 },
}

impl Error {
    /// Create an invalid attribute value error.
    pub fn invalid_value(
        name: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidAttributeValue {
            name: name.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a connection failure error.
    pub fn connection_failed(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a disconnected error.
    pub fn disconnected(target: impl Into<String>) -> Self {
        Self::Disconnected {
            target: target.into(),
        }
    }

    /// Attach the offending URI to a configuration error.
    pub fn in_uri(self, uri: impl Into<String>) -> Self {
        Self::Configuration {
            uri: uri.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through [`Error::Configuration`].
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Configuration { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns `true` for errors raised while binding or validating configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::InvalidUri { .. }
                | Self::UnknownFactory { .. }
                | Self::UnknownAttribute { .. }
                | Self::InvalidAttributeValue { .. }
                | Self::MissingAttribute { .. }
                | Self::UnknownProtocol(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_timeout_message() {
        let error = Error::ReplyTimeout {
            id: 7,
            timeout_ms: 500,
        };
        assert_eq!(
            error.to_string(),
            "timed out waiting for reply to id=7 after 500ms"
        );
    }

    #[test]
    fn test_timeout_distinct_from_rejection() {
        let timeout = Error::ReplyTimeout {
            id: 7,
            timeout_ms: 1,
        };
        let rejected = Error::ReplyRejected { id: 7 };

        assert!(matches!(timeout, Error::ReplyTimeout { .. }));
        assert!(matches!(rejected, Error::ReplyRejected { .. }));
        assert_ne!(timeout.to_string(), rejected.to_string());
    }

    #[test]
    fn test_invalid_value_carries_context() {
        let error = Error::invalid_value("port", "abc", "integer");
        assert_eq!(
            error.to_string(),
            "Invalid value \"abc\" for attribute port: expected integer"
        );
        assert!(error.is_configuration());
    }

    #[test]
    fn test_in_uri_keeps_cause() {
        let error = Error::UnknownAttribute {
            factory: "tcp".into(),
            name: "colour".into(),
        }
        .in_uri("boardlink://tcp?colour=red");

        assert_eq!(
            error.to_string(),
            "Invalid configuration boardlink://tcp?colour=red: Unknown attribute colour for factory tcp"
        );
        assert!(matches!(error.root_cause(), Error::UnknownAttribute { .. }));
        assert!(error.is_configuration());
    }

    #[test]
    fn test_transport_errors_are_not_configuration() {
        let error = Error::connection_failed("127.0.0.1:4478", "refused");
        assert!(!error.is_configuration());
        assert!(!Error::LinkClosed.is_configuration());
    }
}
