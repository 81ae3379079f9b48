//! Top-level provisioning pipeline.
//!
//! One run walks a fixed sequence: resolve the droplet (create-or-find),
//! wait for SSH to answer, prove authenticated shell access with a trivial
//! smoke test, then retire the transient provider-side key. Each stage takes
//! its inputs and returns a value; the final [`ResolvedConfig`] is assembled
//! once at the end rather than mutated in place as stages go.
//!
//! Ordering guarantees: SSH is never attempted before the provider reports
//! the droplet active, and the key is never removed before a successful
//! smoke test (or a legitimate skip).

use std::time::Duration;

use dropforge_provider::{Client, VmRecord};
use dropforge_readiness::{poll_until, tcp_reachable, DEFAULT_PROBE_TIMEOUT};
use dropforge_remote_exec::{RemoteCommand, SshRunner};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::ProvisioningSpec;
use crate::error::ProvisionError;
use crate::resolver::{PollSettings, VmResolver};
use crate::state::{RunRecord, TargetState};

/// Provisioning status of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStatus {
    Unknown,
    Provisioned,
}

/// Authoritative result of one provisioning run.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub vm: VmRecord,
    pub status: ProvisionStatus,
}

/// How the smoke test concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmokeOutcome {
    /// The remote `ls` ran and exited cleanly.
    Verified,
    /// A previous run already verified this exact droplet.
    Skipped,
}

/// Pipeline tuning knobs. Defaults match production behavior; tests shrink
/// them.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Overall deadline for the SSH-readiness stage.
    pub ssh_deadline: Duration,

    /// Interval between reachability probes.
    pub probe_interval: Duration,

    /// Connect timeout for one probe.
    pub probe_timeout: Duration,

    /// Port probed and used for the smoke test.
    pub ssh_port: u16,

    /// Hard kill timeout for one smoke-test session.
    pub smoke_timeout: Duration,

    /// Provider-side poll settings.
    pub poll: PollSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ssh_deadline: Duration::from_secs(120),
            probe_interval: Duration::from_secs(5),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            ssh_port: 22,
            smoke_timeout: Duration::from_secs(10),
            poll: PollSettings::default(),
        }
    }
}

/// The provisioning pipeline for one target.
pub struct Pipeline<'a> {
    client: &'a Client,
    spec: &'a ProvisioningSpec,
    state: &'a TargetState,
    runner: SshRunner,
    settings: PipelineSettings,
}

impl<'a> Pipeline<'a> {
    pub fn new(client: &'a Client, spec: &'a ProvisioningSpec, state: &'a TargetState) -> Self {
        Self {
            client,
            spec,
            state,
            runner: SshRunner::default(),
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_runner(mut self, runner: SshRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run the full pipeline.
    pub async fn run(&self) -> Result<ResolvedConfig, ProvisionError> {
        let previous = self.state.load_run_record()?;

        let resolver = VmResolver::new(self.client, self.spec, self.state)
            .with_poll_settings(self.settings.poll);
        let vm = resolver.ensure().await?;

        // Fail right away rather than probing an empty host string until
        // the SSH deadline fires.
        if vm.public_ip.is_empty() {
            return Err(ProvisionError::NoPublicAddress(vm.id));
        }

        let outcome = self.wait_for_ssh(&vm, previous.as_ref()).await?;
        info!(droplet_id = vm.id, outcome = ?outcome, "ssh access confirmed");

        // Idempotency reset: removing the cache tells future runs that
        // reachability is already proven, and removing the provider key
        // bounds its exposure to "until first successful boot".
        if self.state.fingerprint_exists() {
            let fingerprint = self.state.read_fingerprint()?;
            self.client.delete_key(&fingerprint).await?;
            self.state.remove_fingerprint()?;
        }

        self.state.save_run_record(&RunRecord {
            droplet_id: vm.id,
            status: ProvisionStatus::Provisioned,
            provisioned_at: chrono::Utc::now(),
        })?;

        Ok(ResolvedConfig {
            vm,
            status: ProvisionStatus::Provisioned,
        })
    }

    /// Wait until the droplet answers on the SSH port and shell access is
    /// verified, all under one overall deadline.
    ///
    /// The outer `timeout` is the real cancellation: the runner retries
    /// connection failures internally without bound, and only a preemptive
    /// deadline can cut that off.
    async fn wait_for_ssh(
        &self,
        vm: &VmRecord,
        previous: Option<&RunRecord>,
    ) -> Result<SmokeOutcome, ProvisionError> {
        let cache_exists = self.state.fingerprint_exists();
        let skip_smoke = !cache_exists
            && previous.is_some_and(|p| {
                p.status == ProvisionStatus::Provisioned && p.droplet_id == vm.id
            });

        let wait = poll_until(
            "ssh access",
            self.settings.probe_interval,
            self.settings.ssh_deadline,
            move || self.ssh_ready_once(vm, skip_smoke),
        );

        match tokio::time::timeout(self.settings.ssh_deadline, wait).await {
            Ok(result) => result.map_err(ProvisionError::from),
            Err(_) => Err(ProvisionError::Timeout {
                what: "ssh access".to_string(),
                elapsed: self.settings.ssh_deadline,
            }),
        }
    }

    /// One readiness check: probe the port, then (unless skipped) run the
    /// smoke test. Any smoke-test failure is downgraded to "not ready yet"
    /// at this layer; only the stage deadline turns that into an error.
    async fn ssh_ready_once(
        &self,
        vm: &VmRecord,
        skip_smoke: bool,
    ) -> Result<Option<SmokeOutcome>, ProvisionError> {
        debug!(ip = %vm.public_ip, port = self.settings.ssh_port, "probing ssh port");
        if !tcp_reachable(&vm.public_ip, self.settings.ssh_port, self.settings.probe_timeout).await
        {
            debug!("waiting for ssh port to open");
            return Ok(None);
        }

        if skip_smoke {
            info!(droplet_id = vm.id, "ssh already verified on a previous run, skipping smoke test");
            return Ok(Some(SmokeOutcome::Skipped));
        }

        let command = RemoteCommand {
            user: self.spec.ssh_user.clone(),
            host: vm.public_ip.clone(),
            key_path: self.spec.key_path.clone(),
            working_dir: "/".to_string(),
            commands: vec!["ls".to_string()],
            timeout: Some(self.settings.smoke_timeout),
        };

        match self.runner.run(&command).await {
            Ok(_) => Ok(Some(SmokeOutcome::Verified)),
            Err(err) => {
                error!(error = %err, "ssh not yet ready");
                Ok(None)
            }
        }
    }
}
