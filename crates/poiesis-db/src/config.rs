use std::env;

/// Document-store configuration.
///
/// The connection string arrives in the pod environment as
/// `MONGODB_CONNECTION_STRING` (projected from the secret named by
/// `POIESIS_MONGO_SECRET_NAME`, key `POIESIS_MONGODB_URI_SECRET_KEY`).
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full MongoDB connection URI.
    pub connection_string: String,
    /// Database holding the `tasks` and `services` collections.
    pub database: String,
    /// Maximum number of pooled connections.
    pub max_pool_size: u32,
}

impl DbConfig {
    pub const DEFAULT_URI: &str = "mongodb://localhost:27017";
    pub const DEFAULT_DATABASE: &str = "poiesis";
    pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        let connection_string = env::var("MONGODB_CONNECTION_STRING")
            .unwrap_or_else(|_| Self::DEFAULT_URI.to_owned());
        Self {
            connection_string,
            database: Self::DEFAULT_DATABASE.to_owned(),
            max_pool_size: Self::DEFAULT_MAX_POOL_SIZE,
        }
    }

    /// Build a config from an explicit URI (useful for tests).
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            database: Self::DEFAULT_DATABASE.to_owned(),
            max_pool_size: Self::DEFAULT_MAX_POOL_SIZE,
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_uri() {
        let cfg = DbConfig::new("mongodb://db:27017");
        assert_eq!(cfg.connection_string, "mongodb://db:27017");
        assert_eq!(cfg.database, "poiesis");
    }
}
