//! Website/container watchdog: probe, alert, recover.
//!
//! A bad HTTP status means the host is fine but the application is not, so
//! only the container is restarted. No response at all means the host itself
//! is suspect: it is rebooted, waited for, given time to settle, and then the
//! container is restarted.

use std::time::Duration;

use serde::Serialize;

use crate::backoff::BackoffPolicy;
use crate::health::{classify, Health, RecoveryAction};
use crate::poll::poll_until;
use crate::retry::with_retry;
use crate::{
    ComputeApi, CoreError, HealthProbe, InstanceId, InstanceState, InstanceStatus, Notifier,
    RemoteShell, Sleeper,
};

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub instance_id: InstanceId,
    /// Container started on the host after recovery.
    pub container_id: String,
    pub alert_subject: String,
    /// Budget for the instance to report `running` after a reboot.
    pub reboot_wait: BackoffPolicy,
    /// Pause between the instance reporting `running` and the container
    /// restart, so the host's services can come up.
    pub settle_delay: Duration,
    /// Retry policy for the status lookup and the reboot call.
    pub api_retry: BackoffPolicy,
}

impl WatchdogSettings {
    pub fn container_start_command(&self) -> String {
        format!("sudo docker start {}", self.container_id)
    }
}

/// Whether the alert for an unhealthy probe went out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AlertDelivery {
    NotNeeded,
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchdogOutcome {
    pub health: Health,
    pub action: RecoveryAction,
    pub alert: AlertDelivery,
    /// Instance status recorded just before a reboot.
    pub status_before_reboot: Option<InstanceStatus>,
    /// Observations until the instance was running again.
    pub reboot_polls: Option<u32>,
    /// Captured stdout of the container restart.
    pub container_output: Option<String>,
}

pub struct Watchdog<A, N, R, P, S>
where
    A: ComputeApi,
    N: Notifier,
    R: RemoteShell,
    P: HealthProbe,
    S: Sleeper,
{
    api: A,
    notifier: N,
    shell: R,
    probe: P,
    sleeper: S,
    settings: WatchdogSettings,
}

impl<A, N, R, P, S> Watchdog<A, N, R, P, S>
where
    A: ComputeApi,
    N: Notifier,
    R: RemoteShell,
    P: HealthProbe,
    S: Sleeper,
{
    pub fn new(
        api: A,
        notifier: N,
        shell: R,
        probe: P,
        sleeper: S,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            api,
            notifier,
            shell,
            probe,
            sleeper,
            settings,
        }
    }

    pub fn settings(&self) -> &WatchdogSettings {
        &self.settings
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn shell(&self) -> &R {
        &self.shell
    }

    /// One probe-and-recover round.
    pub fn check_once(&self) -> Result<WatchdogOutcome, CoreError> {
        self.check_once_with(|_, _| {})
    }

    /// Like [`check_once`](Self::check_once); `on_wait` sees every
    /// observation of the rebooting instance that was not yet `running`.
    pub fn check_once_with<F>(&self, on_wait: F) -> Result<WatchdogOutcome, CoreError>
    where
        F: FnMut(u32, &Result<InstanceState, CoreError>),
    {
        let health = classify(self.probe.probe());
        let action = health.recovery();
        let mut outcome = WatchdogOutcome {
            health: health.clone(),
            action,
            alert: AlertDelivery::NotNeeded,
            status_before_reboot: None,
            reboot_polls: None,
            container_output: None,
        };
        if action == RecoveryAction::None {
            return Ok(outcome);
        }

        // A failed alert must not stop recovery.
        if let Some(body) = health.alert_message() {
            outcome.alert = match self.notifier.notify(&self.settings.alert_subject, &body) {
                Ok(()) => AlertDelivery::Sent,
                Err(e) => AlertDelivery::Failed(e.to_string()),
            };
        }

        if action == RecoveryAction::RebootAndRestart {
            let (before, polls) = self.reboot_and_wait(on_wait)?;
            outcome.status_before_reboot = before;
            outcome.reboot_polls = Some(polls);
            self.sleeper.sleep(self.settings.settle_delay);
        }

        outcome.container_output = Some(self.restart_container()?);
        Ok(outcome)
    }

    fn restart_container(&self) -> Result<String, CoreError> {
        self.shell.run(&self.settings.container_start_command())
    }

    fn reboot_and_wait<F>(&self, on_wait: F) -> Result<(Option<InstanceStatus>, u32), CoreError>
    where
        F: FnMut(u32, &Result<InstanceState, CoreError>),
    {
        let id = std::slice::from_ref(&self.settings.instance_id);
        let retry = &self.settings.api_retry;
        let before = with_retry(retry, &self.sleeper, || self.api.instance_statuses(id))?
            .into_iter()
            .next();
        with_retry(retry, &self.sleeper, || {
            self.api.reboot_instance(&self.settings.instance_id)
        })?;

        let polls = poll_until(
            &self.settings.reboot_wait,
            &self.sleeper,
            &format!("instance {} to be running", self.settings.instance_id),
            &InstanceState::Running,
            || {
                // No status record yet counts as not running.
                Ok(self
                    .api
                    .instance_statuses(id)?
                    .into_iter()
                    .next()
                    .map(|s| s.state)
                    .unwrap_or_else(|| InstanceState::Other("unreported".into())))
            },
            on_wait,
        )?;
        Ok((before, polls))
    }
}
