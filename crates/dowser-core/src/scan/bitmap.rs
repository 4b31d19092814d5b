//! Traversal bitmap precompute.
//!
//! For every traversal node and batch, one 32-bit word per 0x80-byte
//! chunk of offset space: bit `k` of word `s` says whether
//! `value + (s*32 + k)*4` is an address of that batch. The descent ANDs
//! these words across batches to find offsets every snapshot agrees on.
//! [`window_word`] is the single source of those words; the descent's
//! on-the-fly fallback calls the same function, so the two paths can
//! never disagree.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::scan::BatchRow;
use crate::{Address, Value};

/// Scratch budget for the store: 80 MiB of 32-bit words.
const BITMAP_BUDGET_WORDS: usize = 20 << 20;

/// One batch's agreement word for 32 consecutive offsets starting at
/// `window_start`.
pub(crate) fn window_word(
    index: &HashMap<Address, usize>,
    value: Value,
    window_start: u32,
) -> u32 {
    let mut word = 0u32;
    let base = value.wrapping_add(window_start);
    for bit in 0..32u32 {
        if index.contains_key(&base.wrapping_add(bit * 4)) {
            word |= 1 << bit;
        }
    }
    word
}

pub struct BitmapStore {
    words: Vec<u32>,
    node_ids: HashMap<Address, u32>,
    batch_count: usize,
    /// Chunks covered per node; chunks at or past this fall back to the
    /// on-the-fly path
    pub words_per_node: usize,
}

impl BitmapStore {
    /// Precompute words for every traversal node (union of batch
    /// addresses minus base pointers). Word count per node is bounded by
    /// the chunk span of `max_breadth` and by the 80 MiB budget; returns
    /// None when there is nothing to cover.
    pub fn precompute(
        batches: &[Vec<BatchRow>],
        indexes: &[HashMap<Address, usize>],
        base_addresses: &HashSet<Address>,
        max_breadth: u32,
    ) -> Option<BitmapStore> {
        let batch_count = batches.len();
        let nodes: BTreeSet<Address> = batches
            .iter()
            .flatten()
            .map(|row| row.address)
            .filter(|address| !base_addresses.contains(address))
            .collect();
        if nodes.is_empty() || batch_count == 0 {
            return None;
        }

        let span = (max_breadth as usize + 127) / 128;
        let budget = BITMAP_BUDGET_WORDS / (nodes.len() * batch_count);
        let words_per_node = span.min(budget).max(1);

        let node_ids: HashMap<Address, u32> = nodes
            .iter()
            .enumerate()
            .map(|(id, &address)| (address, id as u32))
            .collect();
        let mut words = vec![0u32; nodes.len() * batch_count * words_per_node];

        for (id, &address) in nodes.iter().enumerate() {
            for batch in 0..batch_count {
                let Some(&row) = indexes[batch].get(&address) else {
                    continue;
                };
                let value = batches[batch][row].value;
                let slot = (id * batch_count + batch) * words_per_node;
                for chunk in 0..words_per_node {
                    words[slot + chunk] =
                        window_word(&indexes[batch], value, (chunk * 128) as u32);
                }
            }
        }

        debug!(
            "precomputed {} words for {} nodes x {} batches ({} chunks each)",
            words.len(),
            nodes.len(),
            batch_count,
            words_per_node
        );
        Some(BitmapStore {
            words,
            node_ids,
            batch_count,
            words_per_node,
        })
    }

    /// The precomputed word for `(address, batch, chunk)`, or None when
    /// the node or chunk is outside coverage.
    pub fn word(&self, address: Address, batch: usize, chunk: usize) -> Option<u32> {
        if chunk >= self.words_per_node {
            return None;
        }
        let &id = self.node_ids.get(&address)?;
        Some(self.words[(id as usize * self.batch_count + batch) * self.words_per_node + chunk])
    }
}
