//! Target resolution and dialing strategies.
//!
//! Every target gets one deadline (`ClientOptions::timeout`) covering all of
//! its attempts. Inside it, failed attempts are retried with exponential
//! backoff doubling from the configured seed. Trust failures and
//! not-implemented transports are final and never retried. A trust prompt
//! runs outside the deadline; once answered, the target gets a fresh one.

pub mod connector;

use crate::dial::connector::{Attempt, confirm, open_channel};
use crate::error::ClientError;
use crate::options::{ClientOptions, DialMode};

use models::Target;

use std::str::FromStr;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use log::{debug, info, trace, warn};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

/// A channel together with the target that produced it.
#[derive(Debug, Clone)]
pub struct Dialed {
    pub target: Target,
    pub channel: Channel,
}

/// Parse one target string (`unix:`, `pipe:`, `p2p:` or `host:port`).
#[track_caller]
pub fn parse_target(value: &str) -> Result<Target, ClientError> {
    Ok(Target::from_str(value)?)
}

/// Configured targets, highest priority first.
pub fn resolve(options: &ClientOptions) -> Vec<Target> {
    let targets = options.targets();
    debug!(
        "Resolved {} target(s): {}",
        targets.len(),
        targets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    targets
}

/// Dial per the configured mode.
pub async fn dial(
    targets: &[Target],
    options: &ClientOptions,
    cancel: &CancellationToken,
) -> Result<Dialed, ClientError> {
    if targets.is_empty() {
        return Err(ClientError::invalid_argument("No targets to dial"));
    }

    match options.dial_mode() {
        DialMode::Sequential => dial_sequential(targets, options, cancel).await,
        DialMode::Racing => dial_racing(targets, options, cancel).await,
    }
}

/// Try targets in order; the first success wins.
pub async fn dial_sequential(
    targets: &[Target],
    options: &ClientOptions,
    cancel: &CancellationToken,
) -> Result<Dialed, ClientError> {
    let mut last_error = None;

    for target in targets {
        match dial_with_retry(target, options, cancel).await {
            Ok(channel) => {
                info!("Connected to {target}");
                return Ok(Dialed {
                    target: target.clone(),
                    channel,
                });
            }
            Err(e @ ClientError::Cancelled { .. }) => return Err(e),
            Err(e) if e.is_trust_failure() => {
                warn!("Not trying further targets after trust failure on {target}");
                return Err(e);
            }
            Err(e) => {
                warn!("Target {target} failed: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ClientError::invalid_argument("No targets to dial")))
}

/// Dial every target at once. The first success cancels the rest.
///
/// When every target fails, a trust mismatch is reported in preference to
/// ordinary failures; otherwise the most recent error is returned.
pub async fn dial_racing(
    targets: &[Target],
    options: &ClientOptions,
    cancel: &CancellationToken,
) -> Result<Dialed, ClientError> {
    let race = cancel.child_token();
    let mut attempts = JoinSet::new();

    for target in targets {
        let target = target.clone();
        let options = options.clone();
        let race = race.clone();
        attempts.spawn(async move {
            let result = dial_with_retry(&target, &options, &race).await;
            (target, result)
        });
    }

    let mut last_error = None;
    let mut mismatch = None;

    while let Some(joined) = attempts.join_next().await {
        let (target, result) = match joined {
            Ok(finished) => finished,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                last_error = Some(ClientError::internal(format!("dial task failed: {e}")));
                continue;
            }
        };

        match result {
            Ok(channel) => {
                info!("Racing dial won by {target}");
                race.cancel();
                attempts.abort_all();
                return Ok(Dialed { target, channel });
            }
            Err(e @ ClientError::TrustMismatch { .. }) => {
                warn!("Racing dial to {target} hit a trust mismatch");
                mismatch = Some(e);
            }
            Err(e) => {
                debug!("Racing dial to {target} lost: {e}");
                last_error = Some(e);
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(ClientError::cancelled("dial cancelled by caller"));
    }

    Err(mismatch
        .or(last_error)
        .unwrap_or_else(|| ClientError::invalid_argument("No targets to dial")))
}

/// Dial one target with retry and backoff under its deadline.
pub async fn dial_with_retry(
    target: &Target,
    options: &ClientOptions,
    cancel: &CancellationToken,
) -> Result<Channel, ClientError> {
    let mut deadline = Instant::now() + options.timeout();
    let mut backoff = ExponentialBackoff {
        current_interval: options.backoff_seed(),
        initial_interval: options.backoff_seed(),
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: options.timeout(),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0u32;
    let mut failures = 0u32;
    let mut confirmed = false;
    loop {
        attempt += 1;
        trace!("Dialing {target} (attempt {attempt})");

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ClientError::cancelled(format!("dial to {target} cancelled")));
            }
            outcome = timeout_at(deadline, open_channel(target, options)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ClientError::connection_failed(
                    target.to_string(),
                    format!("timed out after {:?}", options.timeout()),
                )),
            },
        };

        let error = match result {
            Ok(Attempt::Connected(channel)) => return Ok(channel),
            Ok(Attempt::NeedsConfirmation(prompt)) if confirmed => {
                return Err(ClientError::connection_failed(
                    target.to_string(),
                    format!(
                        "certificate for '{}' changed again during confirmation",
                        prompt.identity()
                    ),
                ));
            }
            Ok(Attempt::NeedsConfirmation(prompt)) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(ClientError::cancelled(format!(
                            "trust confirmation for {target} cancelled"
                        )));
                    }
                    decided = confirm(&prompt, options) => decided?,
                }
                info!("Trust confirmed for '{}', redialing {target}", prompt.identity());
                confirmed = true;
                deadline = Instant::now() + options.timeout();
                continue;
            }
            Err(e) => e,
        };

        failures += 1;
        if !matches!(error, ClientError::ConnectionFailed { .. }) || failures > options.retries() {
            return Err(error);
        }

        let Some(delay) = backoff.next_backoff() else {
            return Err(error);
        };
        if Instant::now() + delay >= deadline {
            debug!("No time left to retry {target} before its deadline");
            return Err(error);
        }

        warn!("Dial to {target} failed (attempt {attempt}): {error}; retrying in {delay:?}");
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ClientError::cancelled(format!("dial to {target} cancelled")));
            }
            _ = sleep(delay) => {}
        }
    }
}
