//! Proxy tuning configuration
//!
//! All values can be overridden via environment variables for flexible
//! deployment.

use tracing::info;

/// Per-connection tuning knobs
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// TCP keepalive time in seconds (detects dead connections)
    pub tcp_keepalive_secs: u64,
    /// Read buffer size for each forwarding direction, in bytes
    pub read_buffer_bytes: usize,
    /// Reassembly buffer size that triggers a one-time warning, in bytes.
    /// The buffer is never capped; a stream that never validates keeps
    /// growing it while forwarding continues untouched.
    pub reassembly_warn_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive_secs: std::env::var("PGSCOPE_TCP_KEEPALIVE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            read_buffer_bytes: std::env::var("PGSCOPE_READ_BUFFER_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(32 * 1024), // 32KB, matches typical TCP window
            reassembly_warn_bytes: std::env::var("PGSCOPE_REASSEMBLY_WARN_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4 * 1024 * 1024), // 4MB
        }
    }
}

impl ProxyConfig {
    /// Log configuration on startup
    pub fn log_config(&self) {
        info!(
            "Proxy config: keepalive={}s, read_buffer={}KB, reassembly_warn={}KB",
            self.tcp_keepalive_secs,
            self.read_buffer_bytes / 1024,
            self.reassembly_warn_bytes / 1024
        );
    }
}
