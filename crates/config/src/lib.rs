//! # RPC Gate Configuration
//!
//! Configuration parsing for the RPC Gate admission and upstream-selection
//! layer. All settings are defined in one `rpcgate.toml` file.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rpcgate_config::Config;
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("rpcgate.toml"))?;
//! println!("Archiver: {}", config.archiver_url());
//! println!("Window: {}ms", config.admission.window_ms);
//! ```
//!
//! ## Configuration Sections
//!
//! - `[gateway]` - Node selection mode, tx status reporting, verbosity
//! - `[archiver_ip_info]` - Where the node list is fetched from
//! - `[node_ip_info]` - Static upstream node and private-IP override
//! - `[admission]` - Sliding windows, bans, allow-list and ban-list files
//! - `[dispatcher]` - Upstream retry count and randomized backoff
//! - `[schedule]` - Prune, report and node list refresh intervals
//! - `[logging]` - Logging settings (level, format)

mod config;
mod error;

pub use config::*;
pub use error::*;
