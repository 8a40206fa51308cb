//! # RPC Gate Upstream
//!
//! Everything between an accepted request and a consensus node:
//! - [`NodeDirectory`] - the last node list fetched from the archiver
//! - [`NodeSelector`] - round-robin or static choice of the active node
//! - [`RetryingDispatcher`] - bounded retries with randomized backoff
//!
//! Network access goes through the [`DirectorySource`] and
//! [`UpstreamTransport`] traits; `reqwest` implementations are provided.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rpcgate_upstream::{ArchiverDirectorySource, NodeDirectory, NodeSelector, SelectionMode};
//! use std::sync::Arc;
//!
//! let source = ArchiverDirectorySource::new(reqwest::Client::new(), "http://127.0.0.1:4000");
//! let directory = Arc::new(NodeDirectory::new(Arc::new(source)));
//! directory.refresh().await;
//!
//! let selector = NodeSelector::new(directory, SelectionMode::dynamic(false), configured_node);
//! let url = selector.base_url();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod directory;
pub mod dispatcher;
pub mod selector;

pub use directory::{
    spawn_directory_refresher, ArchiverDirectorySource, DirectorySource, MockDirectorySource,
    NodeDirectory, NodeRecord, RefreshOutcome,
};
pub use dispatcher::{
    HttpMethod, MockTransport, ReqwestTransport, RetryingDispatcher, UpstreamResponse,
    UpstreamTransport,
};
pub use selector::{NodeSelector, SelectionMode};

/// Result type alias for upstream operations
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Upstream error types
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("{url} returned status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    Decode(String),

    /// Upstream could not be reached
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}
