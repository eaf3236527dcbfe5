//! Consensus group analysis.
//!
//! Every call samples each ant's chain tip, appends it to the ant's
//! seen-blocks history, and then partitions the ants from scratch:
//!
//! ```text
//!   ant A  h=100 -> 0xaa   h=101 -> 0xab
//!   ant B  h=100 -> 0xaa                    } same id at h=100 -> same group
//!   ant C  h=101 -> 0xff                    } no shared id     -> own group
//! ```
//!
//! Two ants agree if any of the last [`CONSENSUS_WINDOW`] heights (counting
//! down from the joining ant's current height) maps to the same block id in
//! both histories. An ant is compared against each group's founding member
//! only.

use crate::ant::Ant;
use crate::error::Result;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Number of recent heights compared when grouping ants.
pub const CONSENSUS_WINDOW: u64 = 8;

/// Block ids an ant has reported, keyed by height. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenBlocks {
    blocks: BTreeMap<u64, String>,
}

impl SeenBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tip. An existing entry for `height` is kept as is.
    pub fn record(&mut self, height: u64, block_id: impl Into<String>) {
        self.blocks.entry(height).or_insert_with(|| block_id.into());
    }

    pub fn get(&self, height: u64) -> Option<&str> {
        self.blocks.get(&height).map(String::as_str)
    }

    /// Highest recorded height.
    pub fn tip_height(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// True if `self` and `other` hold the same block id at any height in
    /// `[height - CONSENSUS_WINDOW + 1, height]`.
    pub fn agrees_with(&self, other: &SeenBlocks, height: u64) -> bool {
        let low = height.saturating_sub(CONSENSUS_WINDOW - 1);
        (low..=height).rev().any(|h| match (self.get(h), other.get(h)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        })
    }
}

/// Partition histories into agreement groups, returning indices into the
/// input. `heights[i]` is the current height of ant `i`.
///
/// Every index appears in exactly one group, and groups keep input order.
pub fn partition(histories: &[SeenBlocks], heights: &[u64]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, history) in histories.iter().enumerate() {
        let height = heights
            .get(i)
            .copied()
            .or_else(|| history.tip_height())
            .unwrap_or(0);
        let found = groups
            .iter_mut()
            .find(|group| history.agrees_with(&histories[group[0]], height));
        match found {
            Some(group) => group.push(i),
            None => groups.push(vec![i]),
        }
    }
    groups
}

/// Sample every ant's tip and group the ants by agreement.
///
/// # Errors
///
/// Returns the first failed tip query, labelled with the ant it came from.
/// Tips from ants that did answer are still recorded.
pub async fn consensus_groups(ants: &[Arc<Ant>]) -> Result<Vec<Vec<Arc<Ant>>>> {
    let tips = join_all(ants.iter().map(|ant| ant.client().consensus())).await;

    let mut heights = Vec::with_capacity(ants.len());
    let mut first_err = None;
    for (ant, tip) in ants.iter().zip(tips) {
        match tip {
            Ok(tip) => {
                ant.record_block(tip.height, &tip.current_block);
                heights.push(tip.height);
            }
            Err(e) => {
                first_err.get_or_insert_with(|| e.for_ant(ant.label()));
            }
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    let histories: Vec<SeenBlocks> = ants.iter().map(|ant| ant.seen_blocks()).collect();
    let groups = partition(&histories, &heights);
    debug!(
        ants = ants.len(),
        groups = groups.len(),
        "computed consensus groups"
    );

    Ok(groups
        .into_iter()
        .map(|group| group.into_iter().map(|i| ants[i].clone()).collect())
        .collect())
}
