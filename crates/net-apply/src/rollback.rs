//! Rollback points for transactional configuration changes

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use nettx_core::error::SystemError;
use nettx_core::{NetError, NetworkState, Result};

/// Rollback point metadata; the state snapshot lives in a sibling file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPoint {
    /// Unique rollback point ID
    pub id: String,
    /// Transaction this rollback point belongs to
    pub transaction_id: String,
    /// Creation timestamp (epoch seconds)
    pub timestamp: u64,
    /// Path of the state snapshot file
    pub state_path: PathBuf,
    /// md5 checksum of the snapshot file contents
    pub checksum: String,
}

/// Statistics about stored rollback points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStats {
    pub total_rollback_points: usize,
    pub oldest_timestamp: Option<u64>,
    pub newest_timestamp: Option<u64>,
}

/// Manages state snapshots taken before a transaction is applied
pub struct RollbackManager {
    /// Directory for rollback point files
    rollback_dir: PathBuf,
    /// Maximum number of rollback points to keep
    max_rollback_points: usize,
    /// Maximum age of rollback points in seconds
    max_age_seconds: u64,
}

impl RollbackManager {
    pub async fn new(rollback_dir: PathBuf) -> Result<Self> {
        if !rollback_dir.exists() {
            fs::create_dir_all(&rollback_dir).await?;
        }

        let manager = Self {
            rollback_dir,
            max_rollback_points: 50,
            max_age_seconds: 7 * 24 * 3600,
        };

        if let Err(e) = manager.prune_old_rollback_points().await {
            warn!("failed to prune old rollback points: {}", e);
        }

        Ok(manager)
    }

    /// Snapshot the given state before a transaction is applied
    pub async fn create_rollback_point(
        &self,
        transaction_id: &str,
        state: &NetworkState,
    ) -> Result<RollbackPoint> {
        let id = format!("rb_{}", transaction_id);
        let timestamp = epoch_secs();

        let state_path = self.rollback_dir.join(format!("{}.state.json", id));
        let snapshot = serde_json::to_string_pretty(state)?;
        let checksum = format!("{:x}", md5::compute(snapshot.as_bytes()));
        fs::write(&state_path, &snapshot).await?;

        let point = RollbackPoint {
            id: id.clone(),
            transaction_id: transaction_id.to_string(),
            timestamp,
            state_path,
            checksum,
        };

        let meta_path = self.rollback_dir.join(format!("{}.json", id));
        fs::write(&meta_path, serde_json::to_string_pretty(&point)?).await?;

        info!(
            "created rollback point {} for transaction {}",
            id, transaction_id
        );
        Ok(point)
    }

    /// Load and verify the snapshot taken for the given transaction
    pub async fn restore_rollback_point(&self, transaction_id: &str) -> Result<NetworkState> {
        let point = self.find_by_transaction(transaction_id).await?;

        let snapshot = fs::read(&point.state_path).await?;
        let checksum = format!("{:x}", md5::compute(&snapshot));
        if checksum != point.checksum {
            return Err(NetError::System(SystemError::Snapshot {
                path: format!("{} (checksum mismatch)", point.state_path.display()),
            }));
        }

        let state: NetworkState = serde_json::from_slice(&snapshot)?;
        info!(
            "restored rollback point {} for transaction {}",
            point.id, transaction_id
        );
        Ok(state)
    }

    /// Remove the rollback point for a committed or reverted transaction
    pub async fn cleanup_rollback_point(&self, transaction_id: &str) -> Result<()> {
        if let Ok(point) = self.find_by_transaction(transaction_id).await {
            if point.state_path.exists() {
                if let Err(e) = fs::remove_file(&point.state_path).await {
                    warn!(
                        "failed to remove snapshot {}: {}",
                        point.state_path.display(),
                        e
                    );
                }
            }

            let meta_path = self.rollback_dir.join(format!("{}.json", point.id));
            if meta_path.exists() {
                fs::remove_file(&meta_path).await?;
            }

            info!("cleaned up rollback point {}", point.id);
        }

        Ok(())
    }

    /// List all stored rollback points, newest first
    pub async fn list_rollback_points(&self) -> Result<Vec<RollbackPoint>> {
        let mut points = Vec::new();
        let mut entries = fs::read_dir(&self.rollback_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".json") && !name.ends_with(".state.json") {
                match self.load_rollback_point(&path).await {
                    Ok(point) => points.push(point),
                    Err(e) => warn!("failed to load rollback point {}: {}", path.display(), e),
                }
            }
        }

        points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(points)
    }

    /// Get rollback statistics
    pub async fn stats(&self) -> Result<RollbackStats> {
        let points = self.list_rollback_points().await?;
        Ok(RollbackStats {
            total_rollback_points: points.len(),
            oldest_timestamp: points.last().map(|p| p.timestamp),
            newest_timestamp: points.first().map(|p| p.timestamp),
        })
    }

    async fn find_by_transaction(&self, transaction_id: &str) -> Result<RollbackPoint> {
        let points = self.list_rollback_points().await?;
        points
            .into_iter()
            .find(|p| p.transaction_id == transaction_id)
            .ok_or_else(|| {
                NetError::System(SystemError::Snapshot {
                    path: format!("rollback point for transaction {}", transaction_id),
                })
            })
    }

    async fn load_rollback_point(&self, path: &Path) -> Result<RollbackPoint> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Remove rollback points that are too old or exceed the retention count
    async fn prune_old_rollback_points(&self) -> Result<()> {
        let points = self.list_rollback_points().await?;
        let now = epoch_secs();
        let mut pruned = 0;

        for (index, point) in points.iter().enumerate() {
            let expired = now.saturating_sub(point.timestamp) > self.max_age_seconds;
            if expired || index >= self.max_rollback_points {
                if let Err(e) = self.cleanup_rollback_point(&point.transaction_id).await {
                    warn!("failed to prune rollback point {}: {}", point.id, e);
                } else {
                    pruned += 1;
                }
            }
        }

        if pruned > 0 {
            info!("pruned {} old rollback points", pruned);
        }
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
