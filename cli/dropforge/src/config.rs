//! Provisioning manifest loading, validation, and defaults.
//!
//! The manifest is a TOML file with a `[droplet]` table describing the
//! target and an optional `[credentials]` table. The API token can also be
//! supplied on the command line or via `DROPFORGE_TOKEN`, which takes
//! precedence over the manifest.
//!
//! Validation runs before any network call: a missing required field is a
//! configuration error, not a runtime failure.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_SIZE: &str = "1gb";
pub const DEFAULT_REGION: &str = "sfo1";
pub const DEFAULT_DISTRIBUTION: &str = "Ubuntu";
pub const DEFAULT_IMAGE_PATTERN: &str = "Docker.+on 14";

/// Spec validation errors.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("missing required field `{0}` in provisioning manifest")]
    MissingField(&'static str),

    #[error("invalid image name pattern `{pattern}`: {source}")]
    InvalidImagePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Raw manifest as written on disk. Everything is optional here; required
/// fields are enforced by [`Manifest::resolve`].
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub droplet: DropletManifest,

    #[serde(default)]
    pub credentials: CredentialsManifest,
}

#[derive(Debug, Default, Deserialize)]
pub struct DropletManifest {
    pub name: Option<String>,
    pub key_id: Option<String>,
    pub key_path: Option<PathBuf>,
    pub key_pub_path: Option<PathBuf>,
    pub ssh_user: Option<String>,
    pub size: Option<String>,
    pub region: Option<String>,
    pub distribution: Option<String>,
    pub image_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CredentialsManifest {
    pub token: Option<String>,
    pub token_name: Option<String>,
}

/// Validated, defaulted spec for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisioningSpec {
    pub name: String,
    pub key_id: String,
    pub key_path: PathBuf,
    pub key_pub_path: PathBuf,
    pub ssh_user: String,
    pub size: String,
    pub region: String,
    pub distribution: String,
    /// Compiled image-name pattern (case-sensitive).
    pub image_pattern: Regex,
    pub token: String,
    /// Human label for the credential, used only in log output.
    pub token_name: String,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid manifest TOML: {}", path.display()))
    }

    /// Validate required fields and apply defaults, producing the spec.
    ///
    /// `token_override` (CLI flag or environment) wins over the manifest's
    /// credentials table.
    pub fn resolve(self, token_override: Option<String>) -> Result<ProvisioningSpec, SpecError> {
        let name = require(self.droplet.name, "droplet.name")?;
        let key_id = require(self.droplet.key_id, "droplet.key_id")?;
        let key_path = require_path(self.droplet.key_path, "droplet.key_path")?;
        let key_pub_path = require_path(self.droplet.key_pub_path, "droplet.key_pub_path")?;
        let token = require(
            token_override.or(self.credentials.token),
            "credentials.token",
        )?;

        let pattern = self
            .droplet
            .image_name
            .unwrap_or_else(|| DEFAULT_IMAGE_PATTERN.to_string());
        let image_pattern =
            Regex::new(&pattern).map_err(|source| SpecError::InvalidImagePattern {
                pattern: pattern.clone(),
                source,
            })?;

        Ok(ProvisioningSpec {
            name,
            key_id,
            key_path,
            key_pub_path,
            ssh_user: self
                .droplet
                .ssh_user
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            size: self.droplet.size.unwrap_or_else(|| DEFAULT_SIZE.to_string()),
            region: self
                .droplet
                .region
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            distribution: self
                .droplet
                .distribution
                .unwrap_or_else(|| DEFAULT_DISTRIBUTION.to_string()),
            image_pattern,
            token,
            token_name: self
                .credentials
                .token_name
                .unwrap_or_else(|| "default".to_string()),
        })
    }
}

fn require(value: Option<String>, field: &'static str) -> Result<String, SpecError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SpecError::MissingField(field)),
    }
}

fn require_path(value: Option<PathBuf>, field: &'static str) -> Result<PathBuf, SpecError> {
    match value {
        Some(v) if !v.as_os_str().is_empty() => Ok(v),
        _ => Err(SpecError::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_manifest() -> Manifest {
        toml::from_str(
            r#"
            [droplet]
            name = "alpha"
            key_id = "deploy"
            key_path = "/home/ci/.ssh/id_rsa"
            key_pub_path = "/home/ci/.ssh/id_rsa.pub"

            [credentials]
            token = "tok-123"
            token_name = "ci"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let spec = full_manifest().resolve(None).unwrap();
        assert_eq!(spec.ssh_user, "root");
        assert_eq!(spec.size, "1gb");
        assert_eq!(spec.region, "sfo1");
        assert_eq!(spec.distribution, "Ubuntu");
        assert!(spec.image_pattern.is_match("Docker 1.3.2 on 14.04"));
        assert_eq!(spec.token_name, "ci");
    }

    #[test]
    fn missing_name_is_a_spec_error() {
        let mut manifest = full_manifest();
        manifest.droplet.name = None;

        let err = manifest.resolve(None).unwrap_err();
        assert!(matches!(err, SpecError::MissingField("droplet.name")));
    }

    #[test]
    fn empty_key_path_is_a_spec_error() {
        let mut manifest = full_manifest();
        manifest.droplet.key_path = Some(PathBuf::new());

        let err = manifest.resolve(None).unwrap_err();
        assert!(matches!(err, SpecError::MissingField("droplet.key_path")));
    }

    #[test]
    fn missing_token_is_a_spec_error() {
        let mut manifest = full_manifest();
        manifest.credentials.token = None;

        let err = manifest.resolve(None).unwrap_err();
        assert!(matches!(err, SpecError::MissingField("credentials.token")));
    }

    #[test]
    fn token_override_wins_over_manifest() {
        let spec = full_manifest()
            .resolve(Some("tok-override".to_string()))
            .unwrap();
        assert_eq!(spec.token, "tok-override");
    }

    #[test]
    fn invalid_image_pattern_is_rejected() {
        let mut manifest = full_manifest();
        manifest.droplet.image_name = Some("Docker(".to_string());

        let err = manifest.resolve(None).unwrap_err();
        assert!(matches!(err, SpecError::InvalidImagePattern { .. }));
    }

    #[test]
    fn image_pattern_match_is_case_sensitive() {
        let mut manifest = full_manifest();
        manifest.droplet.image_name = Some("docker.+on 14".to_string());

        let spec = manifest.resolve(None).unwrap();
        assert!(!spec.image_pattern.is_match("Docker 1.3.2 on 14.04"));
    }
}
