#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid tile coordinate {zoom}/{x}/{y}.")]
    InvalidCoordinate { zoom: String, x: String, y: String },

    #[error("Tile query failed.")]
    Store(#[from] sqlx::Error),

    #[error("Invalid tile view configuration: {0}")]
    Configuration(String),

    #[error("Invalid YAML in configuration.")]
    Config(#[from] serde_yaml::Error),

    #[error("Unable to read configuration.")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_coordinate(
        zoom: impl ToString,
        x: impl ToString,
        y: impl ToString,
    ) -> Self {
        Error::InvalidCoordinate {
            zoom: zoom.to_string(),
            x: x.to_string(),
            y: y.to_string(),
        }
    }

    /// Whether the error was caused by the client rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidCoordinate { .. })
    }
}
