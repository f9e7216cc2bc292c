//! Collapses duplicate `(symbol, date)` rows in a fetched batch.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::PriceRecord;

/// Which row survives when a batch holds more than one row for a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Highest close wins; on equal closes the first row encountered is kept.
    #[default]
    MaxClose,
    /// The last row encountered wins.
    LastSeen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deduplicated {
    /// Surviving rows ordered by `(symbol, date)`.
    pub records: Vec<PriceRecord>,
    pub dropped: usize,
}

impl DedupPolicy {
    pub fn apply(self, rows: Vec<PriceRecord>) -> Deduplicated {
        let total = rows.len();
        let mut kept = BTreeMap::new();

        for row in rows {
            match kept.entry(row.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(row);
                }
                Entry::Occupied(mut slot) => {
                    let replace = match self {
                        Self::MaxClose => row.close > slot.get().close,
                        Self::LastSeen => true,
                    };
                    if replace {
                        slot.insert(row);
                    }
                }
            }
        }

        let records: Vec<PriceRecord> = kept.into_values().collect();
        Deduplicated {
            dropped: total - records.len(),
            records,
        }
    }
}
