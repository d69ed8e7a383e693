use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Database(anyhow::Error),
    DatabaseError(String),
    /// A shard group was read before anything activated it
    NoActiveShard {
        group: String,
    },
    /// A shard-routed entity was used outside any shard activation
    ShardNotConfigured {
        entity: String,
        group: String,
    },
    UnknownConnectionConfig {
        name: String,
        known: Vec<String>,
    },
    IncompatibleConcurrencyMode {
        entity: String,
    },
    UnboundEntity {
        entity: String,
    },
    /// Connection-lost class of failure; the proxy retries these once
    TransientConnectionFailure {
        connection: String,
        message: String,
    },
    DuplicateMigrationVersion {
        version: i64,
    },
    ConfigurationError(String),
    Io(std::io::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Database(err) => write!(f, "Database error: {}", err),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::NoActiveShard { group } => write!(f, "No active shard for {}", group),
            AppError::ShardNotConfigured { entity, group } => write!(
                f,
                "A shard must be selected: {} is routed by shard group {} and none is active",
                entity, group
            ),
            AppError::UnknownConnectionConfig { name, known } => write!(
                f,
                "Unknown database config: {}, have [{}]",
                name,
                known.join(", ")
            ),
            AppError::IncompatibleConcurrencyMode { entity } => write!(
                f,
                "{} shares connections across requests (allow_concurrency) and cannot be shard routed",
                entity
            ),
            AppError::UnboundEntity { entity } => {
                write!(f, "Entity {} has no connection binding", entity)
            }
            AppError::TransientConnectionFailure {
                connection,
                message,
            } => write!(f, "Connection {} lost: {}", connection, message),
            AppError::DuplicateMigrationVersion { version } => write!(
                f,
                "Duplicate migration {}. Please renumber your migrations to resolve the conflict.",
                version
            ),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Database(err) => Some(&**err),
            AppError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ConfigurationError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_config_lists_known_names() {
        let err = AppError::UnknownConnectionConfig {
            name: "prod_gamma".to_string(),
            known: vec!["prod_alpha".to_string(), "prod_directory".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("prod_gamma"));
        assert!(msg.contains("prod_alpha, prod_directory"));
    }

    #[test]
    fn test_transient_failure_names_connection() {
        let err = AppError::TransientConnectionFailure {
            connection: "test_hewey".to_string(),
            message: "server has gone away".to_string(),
        };
        assert_eq!(err.to_string(), "Connection test_hewey lost: server has gone away");
    }
}
