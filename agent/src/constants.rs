//! Application-wide constants
//!
//! Single source of truth for configuration defaults.

/// Network port configuration
pub mod ports {
    /// Default port for the control surface
    pub const CONTROL: u16 = 5080;
}

/// Server host configuration
pub mod hosts {
    /// Default host for local server binding
    pub const LOCAL: &str = "127.0.0.1";
}

/// Timeout configuration (in seconds)
pub mod timeouts {
    /// Per-request timeout for result uploads and notifications
    pub const REQUEST_SECS: u64 = 10;
}

/// Default values for result capture
pub mod defaults {
    /// Bytes per chunk of a streamed image upload
    pub const IMAGE_CHUNK_BYTES: usize = 64 * 1024;
    /// Images above this many pixels are replaced by a downscaled preview
    pub const PREVIEW_MAX_PIXELS: u64 = 1920 * 1080;
    /// Project snapshots kept by the in-memory cache
    pub const SNAPSHOT_CAPACITY: usize = 32;
    /// zstd level for cached snapshots
    pub const SNAPSHOT_COMPRESSION_LEVEL: i32 = 3;
    /// Agent identity used when none is configured
    pub const AGENT_ID: &str = "flow-agent";
}

/// Data storage paths
pub mod paths {
    /// Directory under the platform data dir
    pub const APP_DIR: &str = "flow-agent";
    /// Configuration file name
    pub const CONFIG_FILE: &str = "config.json";
    /// Environment variable overriding the configuration path
    pub const CONFIG_ENV: &str = "FLOW_AGENT_CONFIG";
}
