// ---------------------------------------------------------------------------
// QID -> finding key aggregation
// ---------------------------------------------------------------------------
//
// Finding stages record which finding keys belong to each QID. The enrichment
// stage merges every producer's partial, fetches exactly those catalog
// entries and attaches them to the recorded findings.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vulngraph_db::{DbError, JobState};

/// Wire form of a collector: `[qid, [finding keys]]` pairs.
pub type SerializedFindingKeys = Vec<(u64, Vec<String>)>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindingKeyCollector {
    keys: BTreeMap<u64, BTreeSet<String>>,
}

impl FindingKeyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, qid: u64, finding_key: impl Into<String>) {
        self.keys.entry(qid).or_default().insert(finding_key.into());
    }

    /// Merge a partial produced elsewhere; existing keys are kept.
    pub fn load_serialized(&mut self, partial: SerializedFindingKeys) {
        for (qid, keys) in partial {
            self.keys.entry(qid).or_default().extend(keys);
        }
    }

    pub fn serialize(&self) -> SerializedFindingKeys {
        self.keys
            .iter()
            .map(|(qid, keys)| (*qid, keys.iter().cloned().collect()))
            .collect()
    }

    /// Every QID seen, ascending.
    pub fn all_qids(&self) -> Vec<u64> {
        self.keys.keys().copied().collect()
    }

    /// `None` when the QID was never recorded.
    pub fn get(&self, qid: u64) -> Option<&BTreeSet<String>> {
        self.keys.get(&qid)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn qid_count(&self) -> usize {
        self.keys.len()
    }

    pub fn finding_key_count(&self) -> usize {
        self.keys.values().map(BTreeSet::len).sum()
    }
}

/// Result of taking a partial out of the job store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialLoad {
    Loaded(SerializedFindingKeys),
    /// An earlier pop already took this partial.
    AlreadyConsumed,
    /// No producer wrote this key.
    NeverProduced,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum StoredPartial {
    Pending { keys: SerializedFindingKeys },
    Consumed,
}

/// Write `collector` under `data_key`, merging with a partial still pending there.
pub async fn store_partial<S: JobState + ?Sized>(
    state: &S,
    data_key: &str,
    collector: &FindingKeyCollector,
) -> Result<(), DbError> {
    let mut merged = collector.clone();
    if let Some(value) = state.get_data(data_key).await?
        && let StoredPartial::Pending { keys } = serde_json::from_value(value)?
    {
        merged.load_serialized(keys);
    }
    debug!(
        data_key,
        qids = merged.qid_count(),
        "storing finding key partial"
    );
    let stored = StoredPartial::Pending {
        keys: merged.serialize(),
    };
    state.set_data(data_key, serde_json::to_value(&stored)?).await
}

/// Take the partial under `data_key`, leaving a consumed marker behind.
pub async fn pop_partial<S: JobState + ?Sized>(
    state: &S,
    data_key: &str,
) -> Result<PartialLoad, DbError> {
    let Some(value) = state.get_data(data_key).await? else {
        return Ok(PartialLoad::NeverProduced);
    };
    match serde_json::from_value(value)? {
        StoredPartial::Consumed => Ok(PartialLoad::AlreadyConsumed),
        StoredPartial::Pending { keys } => {
            state
                .set_data(data_key, serde_json::to_value(&StoredPartial::Consumed)?)
                .await?;
            Ok(PartialLoad::Loaded(keys))
        }
    }
}
