//! Voting coordinator: the dispatch / retry / eviction state machine.
//!
//! An entry is PENDING while `dispatch_time` is unset. The first sweep that
//! sees it sends it to a fresh delegate sample and moves it to DISPATCHED.
//! Each expired vote window counts one attempt; while attempts remain the
//! entry is re-sent to a new sample, and once `max_attempts` windows have
//! failed it is evicted together with its votes. A quorate entry is not
//! re-sent: its expired windows still count, so one the finalizer cannot
//! take is evicted on the same schedule.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use casechain_common::{wire::DispatchPayload, Peer, PeerRole, PoolEntry, PoolId, Result};

use super::core::Cluster;
use crate::consensus::DelegateSelector;

/// What one sweep did. `in_flight` holds the detached dispatch calls; the
/// sweep itself never waits for them.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub dispatched: Vec<PoolId>,
    pub redispatched: Vec<PoolId>,
    pub evicted: Vec<PoolId>,
    /// Quorate entries whose window expired without being finalized.
    pub held: Vec<PoolId>,
    pub waiting: usize,
    pub in_flight: Vec<JoinHandle<bool>>,
}

impl DispatchReport {
    /// Waits for every dispatch call of this sweep; returns how many succeeded.
    pub async fn settle(&mut self) -> usize {
        let handles = std::mem::take(&mut self.in_flight);
        futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count()
    }
}

enum Step {
    Dispatch,
    Redispatch(u32),
    Hold(u32),
    Evict,
    Wait,
}

pub struct VotingCoordinator {
    cluster: Cluster,
    selector: DelegateSelector,
}

impl VotingCoordinator {
    pub fn new(cluster: Cluster) -> Self {
        let selector = DelegateSelector::new(cluster.settings.policy.delegate_percent);
        Self { cluster, selector }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let entries = self.cluster.pool().list_pending().await?;
        if entries.is_empty() {
            return Ok(report);
        }

        let voters = self.cluster.voter_count().await;
        let mut live_voters: Option<Vec<Peer>> = None;

        for entry in entries {
            let step = match self.next_step(&entry, voters, now).await {
                Ok(step) => step,
                Err(e) => {
                    warn!("skipping pool entry {}: {}", entry.id, e);
                    continue;
                }
            };

            match step {
                Step::Wait => report.waiting += 1,
                Step::Hold(attempt) => {
                    if self.cluster.store.mark_dispatched(entry.id, &entry.hash, now, attempt).await? {
                        debug!("pool entry {} is quorate but unfinalized, attempt {}", entry.id, attempt);
                        report.held.push(entry.id);
                    }
                }
                Step::Evict => {
                    if self.cluster.store.evict_entry(entry.id, &entry.hash).await? {
                        info!(
                            target: "consensus",
                            "EVENT:EVICT case={} pool_id={} attempts={}",
                            entry.case_id, entry.id, self.cluster.settings.max_attempts
                        );
                        report.evicted.push(entry.id);
                    }
                }
                Step::Dispatch | Step::Redispatch(_) => {
                    let attempt = match step {
                        Step::Redispatch(attempt) => attempt,
                        _ => 0,
                    };
                    if !self
                        .cluster
                        .store
                        .mark_dispatched(entry.id, &entry.hash, now, attempt)
                        .await?
                    {
                        debug!("pool entry {} changed under the sweep, skipping", entry.id);
                        continue;
                    }

                    if live_voters.is_none() {
                        let peers = self.cluster.peer_list().await;
                        live_voters = Some(self.cluster.probe().live_with_role(&peers, PeerRole::Voter).await);
                    }
                    let delegates = self.selector.select(live_voters.as_deref().unwrap_or_default());
                    let addresses: Vec<&str> = delegates.iter().map(|p| p.address.as_str()).collect();

                    if attempt == 0 {
                        info!(
                            target: "consensus",
                            "EVENT:DISPATCH case={} pool_id={} seq={} delegates={:?}",
                            entry.case_id, entry.id, entry.sequence_number, addresses
                        );
                        report.dispatched.push(entry.id);
                    } else {
                        info!(
                            target: "consensus",
                            "EVENT:REDISPATCH case={} pool_id={} attempt={} delegates={:?}",
                            entry.case_id, entry.id, attempt, addresses
                        );
                        report.redispatched.push(entry.id);
                    }
                    report.in_flight.extend(self.send(&entry, delegates));
                }
            }
        }
        Ok(report)
    }

    async fn next_step(&self, entry: &PoolEntry, voters: usize, now: DateTime<Utc>) -> Result<Step> {
        let max_attempts = self.cluster.settings.max_attempts;

        if !entry.is_dispatched() {
            return Ok(Step::Dispatch);
        }
        if entry.attempt_count >= max_attempts {
            return Ok(Step::Evict);
        }
        if !entry.window_expired(now, self.cluster.settings.vote_window()) {
            return Ok(Step::Wait);
        }

        let attempt = entry.attempt_count + 1;
        if attempt >= max_attempts {
            return Ok(Step::Evict);
        }
        if self.cluster.evaluator().is_quorate(entry.id, voters).await? {
            return Ok(Step::Hold(attempt));
        }
        Ok(Step::Redispatch(attempt))
    }

    /// Fires the candidate at every delegate through the worker pool.
    /// Failures are logged and dropped.
    fn send(&self, entry: &PoolEntry, delegates: Vec<Peer>) -> Vec<JoinHandle<bool>> {
        let payload = DispatchPayload::single(entry.candidate());

        delegates
            .into_iter()
            .map(|peer| {
                let transport = self.cluster.transport.clone();
                let workers = self.cluster.workers.dispatch.clone();
                let payload = payload.clone();
                tokio::spawn(async move {
                    let label = format!("dispatch to {}", peer);
                    match workers.run(&label, transport.dispatch(&peer, &payload)).await {
                        Ok(ack) => {
                            debug!("{} accepted {} candidate(s)", peer, ack.accepted);
                            true
                        }
                        Err(e) => {
                            debug!("{} failed: {}", label, e);
                            false
                        }
                    }
                })
            })
            .collect()
    }
}
