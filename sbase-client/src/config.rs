/// Connection settings for the gRPC transport
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "http://127.0.0.1:50051"
    pub endpoint: String,

    /// Maximum time to establish the connection
    pub connect_timeout: Duration,

    /// Timeout sent with every request (None = rely on the caller's context)
    pub request_timeout: Option<Duration>,

    /// Disable Nagle's algorithm on the underlying socket
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:50051".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
            tcp_nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set a timeout attached to every request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(format!(
                "endpoint must start with http:// or https://, got \"{}\"",
                self.endpoint
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than zero".to_string());
        }

        if self.request_timeout.map_or(false, |t| t.is_zero()) {
            return Err("request_timeout must be greater than zero".to_string());
        }

        Ok(())
    }
}
