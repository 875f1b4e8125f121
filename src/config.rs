//! Server configuration, read from a YAML document.
use crate::{error::Error, view::TileSpec};

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

const DEBUG_CACHE_TIME: Duration = Duration::from_secs(30);
const CACHE_TIME: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub debug: bool,
    /// Seconds a tile response is cached for.
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    pub endpoints: Vec<Endpoint>,
}

/// A tile view mounted under `/{path}/{z}/{x}/{y}`.
#[derive(Clone, Deserialize, Debug)]
pub struct Endpoint {
    pub path: String,
    #[serde(flatten)]
    pub spec: TileSpec,
}

fn default_listen() -> String {
    String::from("127.0.0.1:8000")
}

fn default_max_connections() -> u32 {
    10
}

impl Config {
    /// Parses a configuration document.
    pub fn from(data: &str) -> Result<Config, Error> {
        let mut result: Config = serde_yaml::from_str(data)?;

        for endpoint in result.endpoints.iter_mut() {
            endpoint.path = endpoint.path.trim().trim_matches('/').to_owned();
        }

        Ok(result)
    }

    /// Reads and parses the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let data = fs::read_to_string(path)?;
        Config::from(&data)
    }

    /// How long responses stay in the response cache.
    pub fn cache_time(&self) -> Duration {
        match self.cache_ttl {
            Some(seconds) => Duration::from_secs(seconds),
            None if self.debug => DEBUG_CACHE_TIME,
            None => CACHE_TIME,
        }
    }

    /// The database URL; `DATABASE_URL` in the environment wins over the file.
    pub fn database_url(&self) -> Result<String, Error> {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.database_url.clone())
            .ok_or_else(|| Error::Configuration(String::from("no database URL configured")))
    }

    pub fn endpoint(&self, path: &str) -> Option<&Endpoint> {
        let path = path.trim_matches('/');
        self.endpoints.iter().find(|endpoint| endpoint.path == path)
    }
}
