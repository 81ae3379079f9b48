//! Error taxonomy and display for the pipeline.
//!
//! Lower layers recover only what is explicitly transient (the runner's
//! exit-255 retry); everything here is fatal and bubbles to `main`.

use std::time::Duration;

use colored::Colorize;
use dropforge_provider::ProviderError;
use dropforge_readiness::PollError;
use dropforge_remote_exec::ExecError;
use thiserror::Error;

use crate::config::SpecError;

/// Fatal provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid provisioning spec: {0}")]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("found more than one droplet named `{name}`")]
    AmbiguousTarget { name: String },

    #[error("no image matches distribution `{distribution}` and name pattern `{pattern}`")]
    NoImageMatch {
        distribution: String,
        pattern: String,
    },

    #[error("region `{0}` not offered by the provider")]
    UnknownRegion(String),

    #[error("size `{0}` not offered by the provider")]
    UnknownSize(String),

    #[error("size `{size}` is not available in region `{region}`")]
    SizeNotInRegion { size: String, region: String },

    #[error("droplet `{0}` not found")]
    NotFound(String),

    #[error("droplet {0} has no public address")]
    NoPublicAddress(u64),

    #[error("timeout after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<PollError<ProvisionError>> for ProvisionError {
    fn from(err: PollError<ProvisionError>) -> Self {
        match err {
            PollError::Timeout { what, elapsed } => Self::Timeout { what, elapsed },
            PollError::Failed(e) => e,
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(provision_err) = err.downcast_ref::<ProvisionError>() {
        match provision_err {
            ProvisionError::Provider(ProviderError::Api { id, .. }) if id == "unauthorized" => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the provider API token (--token or DROPFORGE_TOKEN).".yellow()
                );
            }
            ProvisionError::Timeout { what, .. } => {
                let hint = format!(
                    "Hint: Gave up waiting for {what}. The provider may be degraded; re-running resumes where possible."
                );
                eprintln!("\n{}", hint.as_str().yellow());
            }
            ProvisionError::Spec(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the provisioning manifest for missing fields.".yellow()
                );
            }
            _ => {}
        }
    }
}
