use std::path::PathBuf;

use serde::Deserialize;

/// Server settings used to open a connection.
///
/// Deserializable so the host can load it from its own configuration files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// Unix socket directory. Takes precedence over `host` when set.
    #[serde(default)]
    pub socket: Option<PathBuf>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl ConnectionConfig {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: None,
            socket: None,
            user: user.into(),
            password: None,
            database: None,
            connect_timeout_secs: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket = Some(path.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Human readable description of how the session reaches the server,
    /// e.g. `db.internal via TCP/IP`.
    pub fn host_description(&self) -> String {
        match &self.socket {
            Some(path) => format!("Localhost via UNIX socket {}", path.display()),
            None => format!("{} via TCP/IP", self.host),
        }
    }
}
