//! Create-or-find resolution of the target droplet.

use std::time::Duration;

use anyhow::Context;
use dropforge_provider::{Client, CreateDropletRequest, VmRecord};
use dropforge_readiness::{poll_until, DEFAULT_POLL_DEADLINE};
use tracing::{debug, info, warn};

use crate::config::ProvisioningSpec;
use crate::error::ProvisionError;
use crate::state::TargetState;

/// Interval and deadline for provider-side waits (droplet-active,
/// action-completion).
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            deadline: DEFAULT_POLL_DEADLINE,
        }
    }
}

/// Idempotent create-or-find against the provider.
pub struct VmResolver<'a> {
    client: &'a Client,
    spec: &'a ProvisioningSpec,
    state: &'a TargetState,
    poll: PollSettings,
}

impl<'a> VmResolver<'a> {
    pub fn new(client: &'a Client, spec: &'a ProvisioningSpec, state: &'a TargetState) -> Self {
        Self {
            client,
            spec,
            state,
            poll: PollSettings::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Find the droplet by name, creating it first if it does not exist.
    ///
    /// Creation responses are shaped differently from list responses, so
    /// after a create the droplet is re-fetched by name to normalize on one
    /// representation.
    pub async fn ensure(&self) -> Result<VmRecord, ProvisionError> {
        if let Some(record) = self.get_by_name().await? {
            info!(droplet_id = record.id, ip = %record.public_ip, "adopting existing droplet");
            return Ok(record);
        }

        self.create().await?;

        self.get_by_name()
            .await?
            .ok_or_else(|| ProvisionError::NotFound(self.spec.name.clone()))
    }

    /// Look the droplet up by exact name.
    ///
    /// Zero matches is "not found", not an error. More than one match is a
    /// fatal configuration problem. A droplet that exists but has not
    /// finished booting is polled until active.
    pub async fn get_by_name(&self) -> Result<Option<VmRecord>, ProvisionError> {
        let droplets = self.client.list_droplets().await?;
        let mut matches: Vec<_> = droplets
            .into_iter()
            .filter(|d| d.name == self.spec.name)
            .collect();

        if matches.len() > 1 {
            return Err(ProvisionError::AmbiguousTarget {
                name: self.spec.name.clone(),
            });
        }

        let Some(droplet) = matches.pop() else {
            return Ok(None);
        };

        if droplet.status.is_active() {
            return Ok(Some(droplet.to_record()));
        }

        let client = self.client;
        let id = droplet.id;
        let record = poll_until(
            "droplet to become active",
            self.poll.interval,
            self.poll.deadline,
            move || async move {
                let droplet = client.get_droplet(id).await?;
                info!(status = %droplet.status, "waiting for vm to boot");
                Ok(droplet.status.is_active().then(|| droplet.to_record()))
            },
        )
        .await?;

        Ok(Some(record))
    }

    /// Return the fingerprint of the named provider-side key, uploading the
    /// local public key if the provider does not hold one yet.
    ///
    /// Identity is the key *name* only: an existing provider key is reused
    /// without comparing its material against the local public key, so a
    /// locally rotated key under an unchanged name goes undetected.
    pub async fn ensure_key(&self) -> Result<String, ProvisionError> {
        let keys = self.client.list_keys().await?;
        if let Some(key) = keys.into_iter().find(|k| k.name == self.spec.key_id) {
            info!(name = %key.name, fingerprint = %key.fingerprint, "ssh key already on provider");
            return Ok(key.fingerprint);
        }

        let public_key = std::fs::read_to_string(&self.spec.key_pub_path).with_context(|| {
            format!(
                "failed to read public key: {}",
                self.spec.key_pub_path.display()
            )
        })?;

        info!(name = %self.spec.key_id, "uploading ssh key to provider");
        let key = self
            .client
            .create_key(&self.spec.key_id, public_key.trim_end())
            .await?;
        Ok(key.fingerprint)
    }

    /// Create the droplet and wait for the creation action to complete.
    async fn create(&self) -> Result<(), ProvisionError> {
        let sizes = self.client.list_sizes().await?;
        let images = self.client.list_images().await?;
        let regions = self.client.list_regions().await?;

        let matching: Vec<_> = images
            .iter()
            .filter(|image| {
                image.distribution == self.spec.distribution
                    && self.spec.image_pattern.is_match(&image.name)
            })
            .collect();

        let image = match matching.as_slice() {
            [] => {
                return Err(ProvisionError::NoImageMatch {
                    distribution: self.spec.distribution.clone(),
                    pattern: self.spec.image_pattern.as_str().to_string(),
                })
            }
            [only] => only,
            [first, ..] => {
                warn!(
                    count = matching.len(),
                    chosen = %first.name,
                    "more than one image matches, taking the first"
                );
                first
            }
        };
        debug!(image_id = image.id, image = %image.name, "chosen image");

        let region = regions
            .iter()
            .find(|r| r.slug == self.spec.region)
            .ok_or_else(|| ProvisionError::UnknownRegion(self.spec.region.clone()))?;

        let size = sizes
            .iter()
            .find(|s| s.slug == self.spec.size)
            .ok_or_else(|| ProvisionError::UnknownSize(self.spec.size.clone()))?;

        if !size.regions.contains(&region.slug) {
            return Err(ProvisionError::SizeNotInRegion {
                size: size.slug.clone(),
                region: region.slug.clone(),
            });
        }

        let fingerprint = self.ensure_key().await?;
        // Persisted before the create call: a crash between here and a
        // successful smoke test must leave the cache in place so the next
        // run re-verifies SSH access.
        self.state.write_fingerprint(&fingerprint)?;

        info!(
            name = %self.spec.name,
            region = %region.slug,
            size = %size.slug,
            token = %self.spec.token_name,
            "creating droplet"
        );
        let created = self
            .client
            .create_droplet(&CreateDropletRequest {
                name: self.spec.name.clone(),
                region: region.slug.clone(),
                size: size.slug.clone(),
                image: image.id,
                ssh_keys: vec![fingerprint],
                private_networking: false,
                backups: false,
                ipv6: false,
            })
            .await?;

        let droplet_id = created.droplet.id;
        let action_id = created
            .links
            .actions
            .first()
            .context("creation response carried no action link")?
            .id;

        let client = self.client;
        poll_until(
            "droplet creation action to complete",
            self.poll.interval,
            self.poll.deadline,
            move || async move {
                let action = client.get_action(droplet_id, action_id).await?;
                info!(status = %action.status, "waiting for vm to boot");
                Ok(action.is_completed().then_some(()))
            },
        )
        .await?;

        Ok(())
    }
}
