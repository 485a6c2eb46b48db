//! Classification of an application probe into a recovery decision.

use serde::Serialize;

use crate::CoreError;

/// Result of one probe of the application endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Health {
    /// The endpoint answered 200.
    Healthy,
    /// The endpoint answered with any other status.
    BadStatus(u16),
    /// No response was obtained. DNS failures, refused connections and
    /// timeouts all land here without further distinction.
    Unreachable(String),
}

/// What the watchdog does about a probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryAction {
    None,
    /// Restart the application container on the host.
    RestartContainer,
    /// Reboot the host, wait for it, then restart the container.
    RebootAndRestart,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }

    pub fn recovery(&self) -> RecoveryAction {
        match self {
            Health::Healthy => RecoveryAction::None,
            Health::BadStatus(_) => RecoveryAction::RestartContainer,
            Health::Unreachable(_) => RecoveryAction::RebootAndRestart,
        }
    }

    /// Body of the alert sent for an unhealthy result.
    pub fn alert_message(&self) -> Option<String> {
        match self {
            Health::Healthy => None,
            Health::BadStatus(code) => Some(format!("Application returned status code {}", code)),
            Health::Unreachable(_) => Some("Application not accessible at all".to_string()),
        }
    }
}

pub fn classify(probe: Result<u16, CoreError>) -> Health {
    match probe {
        Ok(200) => Health::Healthy,
        Ok(code) => Health::BadStatus(code),
        Err(e) => Health::Unreachable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_200_is_healthy() {
        assert_eq!(classify(Ok(200)), Health::Healthy);
        assert_eq!(classify(Ok(204)), Health::BadStatus(204));
        assert_eq!(classify(Ok(503)), Health::BadStatus(503));
        assert_eq!(classify(Ok(301)), Health::BadStatus(301));
    }

    #[test]
    fn any_error_means_unreachable() {
        for e in [
            CoreError::Transient("connection refused".into()),
            CoreError::Fatal("dns error".into()),
            CoreError::Transient("operation timed out".into()),
        ] {
            assert!(matches!(classify(Err(e)), Health::Unreachable(_)));
        }
    }

    #[test]
    fn unreachable_maps_to_the_heavier_recovery() {
        assert_eq!(Health::Healthy.recovery(), RecoveryAction::None);
        assert_eq!(Health::BadStatus(500).recovery(), RecoveryAction::RestartContainer);
        assert_eq!(
            Health::Unreachable("refused".into()).recovery(),
            RecoveryAction::RebootAndRestart
        );
    }

    #[test]
    fn alert_messages_match_the_failure_kind() {
        assert_eq!(Health::Healthy.alert_message(), None);
        assert_eq!(
            Health::BadStatus(502).alert_message().as_deref(),
            Some("Application returned status code 502")
        );
        assert_eq!(
            Health::Unreachable("x".into()).alert_message().as_deref(),
            Some("Application not accessible at all")
        );
    }
}
