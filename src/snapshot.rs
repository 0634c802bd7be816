// src/snapshot.rs - Condition state persistence for restart recovery
use crate::{
    condition::{
        ActivationMachine, AckState, ConditionId, EventId, Observation, ShelvingState,
    },
    error::Result,
    value::Quality,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild a condition's runtime state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    pub id: ConditionId,
    /// Last sequence number assigned to a published notification
    pub sequence: u64,
    pub event_id: EventId,
    pub enabled: bool,
    pub quality: Quality,
    pub severity: u16,
    pub last_severity: u16,
    pub comment: Option<String>,
    pub last_transition_time: DateTime<Utc>,
    pub activation: ActivationMachine,
    pub ack: AckState,
    pub shelving: ShelvingState,
    #[serde(default)]
    pub one_shot_armed: bool,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub out_of_service: bool,
    #[serde(default)]
    pub silenced: bool,
    #[serde(default)]
    pub last_observation: Option<Observation>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub conditions: Vec<ConditionSnapshot>,
}

/// Write snapshots atomically (temp file + rename)
pub async fn save(path: impl AsRef<Path>, conditions: Vec<ConditionSnapshot>) -> Result<()> {
    let path = path.as_ref();
    let file = SnapshotFile {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        conditions,
    };
    let bytes = serde_json::to_vec_pretty(&file)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!("Saved {} condition snapshots to {}", file.conditions.len(), path.display());
    Ok(())
}

/// Load snapshots; a missing file is not an error
pub async fn load(path: impl AsRef<Path>) -> Result<Option<SnapshotFile>> {
    let path = path.as_ref();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file: SnapshotFile = serde_json::from_slice(&bytes)?;
    info!(
        "Loaded {} condition snapshots from {} (saved {})",
        file.conditions.len(),
        path.display(),
        file.saved_at
    );
    Ok(Some(file))
}
