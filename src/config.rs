use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,
    pub backlog_size: i32,

    // Connection settings
    pub max_connections: usize,
    pub max_events: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,

    // Thread configuration
    pub worker_threads: usize,

    // File serving
    pub document_root: PathBuf,
    pub path_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 8080,
            backlog_size: 1024,

            max_connections: 65536,
            max_events: 10000,
            read_buffer_size: 2048,
            write_buffer_size: 1024,

            worker_threads: num_cpus::get(),

            document_root: PathBuf::from("/var/www/html"),
            path_buffer_size: 200,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the directory files are served from
    pub fn with_document_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.document_root = root.into();
        self
    }

    /// Set the fixed read and write buffer sizes for connections
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Set the capacity of the resolved path buffer
    pub fn with_path_buffer_size(mut self, size: usize) -> Self {
        self.path_buffer_size = size;
        self
    }

    /// Set the maximum number of simultaneously open connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Check the values that cannot be fixed up at runtime
    pub fn validate(&self) -> ServerResult<()> {
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(ServerError::Config("buffer sizes must be non-zero".to_string()));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::Config("at least one worker thread is required".to_string()));
        }
        if self.max_events == 0 {
            return Err(ServerError::Config("max_events must be non-zero".to_string()));
        }
        let root_len = self.document_root.as_os_str().len();
        if root_len >= self.path_buffer_size {
            return Err(ServerError::Config(format!(
                "document root ({} bytes) does not fit the path buffer ({} bytes)",
                root_len, self.path_buffer_size
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
