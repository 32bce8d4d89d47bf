use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use casechain_common::{Block, PoolEntry, PoolId, Result, TrackedHead, Vote};

use crate::{state::LedgerState, store::LedgerStore};

/// In-memory [`LedgerStore`] guarded by a single `RwLock`, with optional
/// JSON snapshots so a node can stop and resume.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: LedgerState) -> Self {
        Self { state: Arc::new(RwLock::new(state)) }
    }

    /// Loads a snapshot, or starts empty if the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            tracing::info!("no snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let raw = tokio::fs::read(path).await?;
        let state: LedgerState = serde_json::from_slice(&raw)?;
        tracing::info!(
            "loaded snapshot {} ({} cases, {} pending)",
            path.display(),
            state.chains.len(),
            state.pool.len()
        );
        Ok(Self::from_state(state))
    }

    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state)?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(path, raw).await?;
        tracing::debug!("snapshot written to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn last_block(&self, case_id: &str) -> Result<Option<Block>> {
        Ok(self.state.read().await.last_block(case_id).cloned())
    }

    async fn chain_length(&self, case_id: &str) -> Result<u64> {
        Ok(self.state.read().await.chain_length(case_id))
    }

    async fn blocks_from(&self, case_id: &str, from: u64) -> Result<Vec<Block>> {
        let state = self.state.read().await;
        Ok(state
            .chain(case_id)
            .iter()
            .skip(from as usize)
            .cloned()
            .collect())
    }

    async fn case_ids(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .chains
            .iter()
            .filter(|(_, blocks)| !blocks.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn append_blocks(&self, case_id: &str, blocks: Vec<Block>) -> Result<u64> {
        self.state.write().await.append_blocks(case_id, blocks)
    }

    async fn stage_entry(&self, entry: PoolEntry) -> Result<PoolEntry> {
        Ok(self.state.write().await.stage_entry(entry))
    }

    async fn pool_entries(&self) -> Result<Vec<PoolEntry>> {
        Ok(self.state.read().await.pool_entries())
    }

    async fn pool_entry(&self, id: PoolId) -> Result<Option<PoolEntry>> {
        Ok(self.state.read().await.pool.get(&id).cloned())
    }

    async fn pool_entries_for_case(&self, case_id: &str) -> Result<Vec<PoolEntry>> {
        let state = self.state.read().await;
        Ok(state
            .pool
            .values()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn update_pool_entry(&self, entry: PoolEntry) -> Result<()> {
        self.state.write().await.update_pool_entry(entry)
    }

    async fn remove_pool_entry(&self, id: PoolId) -> Result<Option<PoolEntry>> {
        Ok(self.state.write().await.remove_pool_entry(id))
    }

    async fn mark_dispatched(
        &self,
        id: PoolId,
        expected_hash: &str,
        at: DateTime<Utc>,
        attempt_count: u32,
    ) -> Result<bool> {
        Ok(self
            .state
            .write()
            .await
            .mark_dispatched(id, expected_hash, at, attempt_count))
    }

    async fn evict_entry(&self, id: PoolId, expected_hash: &str) -> Result<bool> {
        Ok(self.state.write().await.evict_entry(id, expected_hash))
    }

    async fn upsert_vote(&self, vote: Vote) -> Result<bool> {
        Ok(self.state.write().await.upsert_vote(vote))
    }

    async fn votes_for(&self, id: PoolId) -> Result<Vec<Vote>> {
        Ok(self.state.read().await.votes_for(id))
    }

    async fn clear_votes(&self, id: PoolId) -> Result<()> {
        self.state.write().await.votes.remove(&id);
        Ok(())
    }

    async fn finalize_entry(&self, id: PoolId, block: Block) -> Result<()> {
        self.state.write().await.finalize_entry(id, block)
    }

    async fn tracked_head(&self, case_id: &str) -> Result<Option<TrackedHead>> {
        Ok(self.state.read().await.heads.get(case_id).cloned())
    }

    async fn tracked_heads(&self) -> Result<Vec<TrackedHead>> {
        Ok(self.state.read().await.heads.values().cloned().collect())
    }

    async fn put_tracked_head(&self, head: TrackedHead) -> Result<()> {
        self.state
            .write()
            .await
            .heads
            .insert(head.case_id.clone(), head);
        Ok(())
    }

    async fn grant_access(&self, username: &str, case_id: &str) -> Result<bool> {
        Ok(self.state.write().await.grant_access(username, case_id))
    }

    async fn revoke_access(&self, username: &str, case_id: &str) -> Result<bool> {
        Ok(self.state.write().await.revoke_access(username, case_id))
    }

    async fn cases_for_user(&self, username: &str) -> Result<Vec<String>> {
        Ok(self.state.read().await.cases_for_user(username))
    }
}
