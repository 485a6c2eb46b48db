//! Poll-until-state loop with a bounded budget.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::{CoreError, Sleeper};

/// Repeatedly observe a resource until it reports `target`.
///
/// Returns the number of observations made. Only an observation equal to
/// `target` ends the loop successfully; any other state, and any transient
/// observation error, is reported to `on_pending` and followed by a backoff
/// delay. Fatal errors end the loop immediately. When the policy's attempts or
/// time budget run out a [`CoreError::Timeout`] is returned. The time budget
/// counts time spent waiting between observations.
pub fn poll_until<S, F, P>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    what: &str,
    target: &S,
    mut observe: F,
    mut on_pending: P,
) -> Result<u32, CoreError>
where
    S: PartialEq,
    F: FnMut() -> Result<S, CoreError>,
    P: FnMut(u32, &Result<S, CoreError>),
{
    let mut waited = Duration::ZERO;
    let mut attempt = 0;
    while attempt < policy.max_attempts {
        attempt += 1;
        let observed = observe();
        match &observed {
            Ok(state) if state == target => return Ok(attempt),
            Err(e) if !e.is_transient() => return Err(e.clone()),
            _ => on_pending(attempt, &observed),
        }

        if attempt == policy.max_attempts {
            break;
        }
        let delay = policy.delay_for_attempt(attempt);
        if waited + delay > policy.timeout {
            break;
        }
        sleeper.sleep(delay);
        waited += delay;
    }
    Err(CoreError::Timeout {
        waited_for: what.to_string(),
        attempts: attempt,
        elapsed: waited,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_cloud::RecordingSleeper;
    use crate::{InstanceState, VolumeState};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn stops_exactly_on_target_state() {
        let sleeper = RecordingSleeper::default();
        let mut seq = vec![
            VolumeState::Creating,
            VolumeState::Creating,
            VolumeState::Available,
            VolumeState::InUse,
        ]
        .into_iter();
        let mut pending = Vec::new();
        let n = poll_until(
            &fast_policy(10),
            &sleeper,
            "volume",
            &VolumeState::Available,
            || Ok(seq.next().unwrap_or(VolumeState::Error)),
            |i, s| pending.push((i, s.clone())),
        )
        .expect("reaches available");
        assert_eq!(n, 3);
        assert_eq!(pending.len(), 2);
        assert_eq!(sleeper.total(), Duration::from_millis(30));
    }

    #[test]
    fn other_states_never_terminate_the_loop() {
        let sleeper = RecordingSleeper::default();
        let err = poll_until(
            &fast_policy(5),
            &sleeper,
            "instance running",
            &InstanceState::Running,
            || Ok(InstanceState::Stopped),
            |_, _| {},
        )
        .unwrap_err();
        match err {
            CoreError::Timeout { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(sleeper.calls(), 4);
    }

    #[test]
    fn transient_errors_keep_polling_fatal_ones_stop() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let n = poll_until(
            &fast_policy(5),
            &sleeper,
            "instance running",
            &InstanceState::Running,
            || {
                calls += 1;
                if calls == 1 {
                    Err(CoreError::Transient("throttled".into()))
                } else {
                    Ok(InstanceState::Running)
                }
            },
            |_, _| {},
        )
        .expect("recovers after transient error");
        assert_eq!(n, 2);

        let err = poll_until(
            &fast_policy(5),
            &sleeper,
            "instance running",
            &InstanceState::Running,
            || Err::<InstanceState, _>(CoreError::Fatal("denied".into())),
            |_, _| {},
        )
        .unwrap_err();
        assert_eq!(err, CoreError::Fatal("denied".into()));
    }

    #[test]
    fn time_budget_ends_the_wait() {
        let sleeper = RecordingSleeper::default();
        let policy = BackoffPolicy {
            timeout: Duration::from_millis(25),
            ..fast_policy(100)
        };
        let err = poll_until(
            &policy,
            &sleeper,
            "volume",
            &VolumeState::Available,
            || Ok(VolumeState::Creating),
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(sleeper.total() <= Duration::from_millis(25));
    }
}
