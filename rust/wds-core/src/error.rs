// rust/wds-core/src/error.rs

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WdsError {

    #[error("Failed to open shard '{shard}': {message}")]
    Open {
        shard: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Malformed archive '{shard}' at offset {offset}: {message}")]
    MalformedArchive {
        shard: String,
        offset: u64,
        message: String,
    },

    #[error("Entry '{key}' in shard '{shard}' has an empty base name")]
    EmptyBaseName {
        shard: String,
        key: String,
    },

    #[error("I/O error reading shard '{shard}': {source}")]
    Io {
        shard: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Timed out after {waited:?} waiting for a sample")]
    Timeout {
        waited: Duration,
    },

    #[error("Pipeline error: {message}")]
    Pipeline {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, WdsError>;

// Convenience constructors
impl WdsError {

    pub fn open(shard: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            shard: shard.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn open_with_source(
        shard: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Open {
            shard: shard.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn malformed(shard: impl Into<String>, offset: u64, message: impl Into<String>) -> Self {
        Self::MalformedArchive {
            shard: shard.into(),
            offset,
            message: message.into(),
        }
    }

    pub fn empty_base_name(shard: impl Into<String>, key: impl Into<String>) -> Self {
        Self::EmptyBaseName {
            shard: shard.into(),
            key: key.into(),
        }
    }

    pub fn io(shard: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            shard: shard.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn timeout(waited: Duration) -> Self {
        Self::Timeout { waited }
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }

    /// Returns true for the transient "nothing yet, try again" condition.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_shard() {
        let err = WdsError::malformed("shard-000.tar", 1024, "short header read");
        let msg = err.to_string();
        assert!(msg.contains("shard-000.tar"));
        assert!(msg.contains("1024"));

        let err = WdsError::empty_base_name("shard-001.tar", ".jpg");
        assert!(err.to_string().contains(".jpg"));
    }

    #[test]
    fn test_timeout_is_distinguishable() {
        assert!(WdsError::timeout(Duration::from_millis(5)).is_timeout());
        assert!(!WdsError::open("x.tar", "missing").is_timeout());
    }
}
