//! Periodic transfer agent.
//!
//! Sends a fixed transfer through the [`Executor`] on every tick. Recoverable
//! rejections (a cap reached for this window, a failed submission) are
//! counted and retried on the next tick; an expired or revoked session stops
//! the agent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use sesskey_core::error::Rejection;
use sesskey_core::{Action, Address, Amount};

use crate::executor::Executor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    Terminal(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReport {
    pub sent: u64,
    pub failed: u64,
    pub stopped: StopReason,
}

pub struct TransferAgent {
    executor: Arc<Executor>,
    target: Address,
    value: Amount,
    interval: Duration,
}

impl TransferAgent {
    pub fn new(executor: Arc<Executor>, target: Address, value: impl Into<Amount>, interval: Duration) -> Self {
        Self {
            executor,
            target,
            value: value.into(),
            interval,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<AgentReport> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> AgentReport {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (mut sent, mut failed) = (0u64, 0u64);

        let interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(target_addr = %self.target, value = %self.value, interval_ms, "transfer agent started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(sent, failed, "transfer agent shut down");
                        return AgentReport { sent, failed, stopped: StopReason::Shutdown };
                    }
                }
                _ = ticker.tick() => {
                    let action = Action::transfer(self.target, self.value.clone());
                    match self.executor.execute(action).await {
                        Ok(receipt) => {
                            sent += 1;
                            tracing::debug!(tx_hash = %receipt.tx_hash, sent, "periodic transfer sent");
                        }
                        Err(e) => match e.rejection() {
                            Some(r) if r.is_terminal() => {
                                tracing::warn!(code = %r.code(), error = %r, sent, "transfer agent stopped");
                                return AgentReport { sent, failed, stopped: StopReason::Terminal(r.clone()) };
                            }
                            _ => {
                                failed += 1;
                                tracing::warn!(code = %e.code(), error = %e, "periodic transfer not sent");
                            }
                        },
                    }
                }
            }
        }
    }
}
