//! Typed client for the droplet cloud provider's REST API.
//!
//! The provider signals its own errors two ways: transport-level HTTP status
//! codes, and sentinel `id` strings embedded in otherwise 2xx-shaped bodies
//! (`unauthorized`, `unprocessable_entity`, `forbidden`). Both are decoded in
//! exactly one place ([`client::Client`]'s response handling) so call sites
//! only ever see [`ProviderError`].

use thiserror::Error;

mod client;
mod types;

pub use client::{Client, DEFAULT_API_URL};
pub use types::{
    Action, ActionLink, ActionLinks, CreateDropletRequest, Droplet, DropletCreated, DropletStatus,
    Image, Networks, NetworkV4, Region, Size, SshKey, VmRecord,
};

/// Provider API errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the request, either via HTTP status or via a
    /// sentinel `id` in the response body. Carries the raw message for
    /// diagnosis.
    #[error("provider rejected request ({id}): {message}")]
    Api { id: String, message: String },

    /// Transport-level failure (connect, TLS, read).
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A 2xx response whose body did not match the expected shape.
    #[error("failed to decode {what} response: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
