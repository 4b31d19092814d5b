//! Offset-following chain walker.
//!
//! A pure routine over `(pool, offset, value lookup, options)`: it holds
//! no pipeline state, so both detection passes drive it with nothing but
//! a different value closure and target pool. Heads — pool members no
//! other member points to — are walked first, in ascending address
//! order, so a chain roots at its true head even when the list's
//! addresses are not laid out in traversal order. Whatever remains
//! unprocessed afterwards (closed rings have no head) is walked in a
//! second ascending pass from its lowest member. Every walked node is
//! marked processed and is never walked again, neither as a start nor as
//! a continuation, which both terminates rings and keeps chains disjoint
//! within one invocation. [`resolve_chain_conflicts`] settles
//! overlapping chains wherever a caller accumulates them across
//! invocations.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::Address;

#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Chains shorter than this are not emitted
    pub min_chain_length: usize,
    /// Ghost budget per chain
    pub max_ghost_nodes: usize,
}

#[derive(Debug, Clone)]
pub struct Chain {
    /// Nodes in walk order; the first is the chain's root
    pub nodes: Vec<Address>,
    /// Bridged-over addresses, in walk order
    pub ghosts: Vec<Address>,
    pub is_head: bool,
}

impl Chain {
    pub fn root(&self) -> Address {
        self.nodes[0]
    }
}

#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub chains: Vec<Chain>,
    /// Chains that terminated inside the target pool
    pub entry_chains: Vec<Chain>,
}

pub fn walk_chains_at_offset<F>(
    pool: &BTreeSet<Address>,
    offset: u32,
    get_value: F,
    options: WalkOptions,
    target_pool: Option<&HashSet<Address>>,
) -> WalkOutcome
where
    F: Fn(Address) -> Option<u32>,
{
    // Head identification: a node is a head iff nothing in the pool
    // points to it through this offset.
    let mut pointed_to: HashSet<Address> = HashSet::with_capacity(pool.len());
    for &addr in pool {
        if let Some(value) = get_value(addr) {
            let next = value.wrapping_add(offset);
            if pool.contains(&next) {
                pointed_to.insert(next);
            }
        }
    }

    let mut outcome = WalkOutcome::default();
    let mut processed: HashSet<Address> = HashSet::with_capacity(pool.len());

    let heads: Vec<Address> = pool
        .iter()
        .copied()
        .filter(|addr| !pointed_to.contains(addr))
        .collect();
    for start in heads {
        // A ghost bridge may have resumed through a later head already
        if processed.contains(&start) {
            continue;
        }
        walk_from(
            start, pool, offset, &get_value, options, target_pool, &mut processed, &mut outcome,
        );
    }

    // Closed rings have no head; walk them from their lowest member
    let leftovers: Vec<Address> = pool
        .iter()
        .copied()
        .filter(|addr| !processed.contains(addr))
        .collect();
    for start in leftovers {
        if processed.contains(&start) {
            continue;
        }
        walk_from(
            start, pool, offset, &get_value, options, target_pool, &mut processed, &mut outcome,
        );
    }

    outcome
}

#[allow(clippy::too_many_arguments)]
fn walk_from<F>(
    start: Address,
    pool: &BTreeSet<Address>,
    offset: u32,
    get_value: &F,
    options: WalkOptions,
    target_pool: Option<&HashSet<Address>>,
    processed: &mut HashSet<Address>,
    outcome: &mut WalkOutcome,
) where
    F: Fn(Address) -> Option<u32>,
{
    // Ghosts sit on the forward path at expected + k*step; at offset 0 the
    // step falls back to the 4-byte alignment.
    let step = if offset == 0 { 4 } else { offset };

    let mut nodes: Vec<Address> = Vec::new();
    let mut ghosts: Vec<Address> = Vec::new();
    let mut current = start;
    let mut hit_target = false;

    loop {
        if target_pool.is_some_and(|targets| targets.contains(&current)) {
            hit_target = true;
            break;
        }
        if !pool.contains(&current) {
            // Bridge across entries missing from the pool, within the
            // chain-wide ghost budget.
            let budget = options.max_ghost_nodes - ghosts.len();
            let mut bridge = current;
            let mut skipped: Vec<Address> = Vec::new();
            let mut resumed = None;
            for _ in 0..budget {
                skipped.push(bridge);
                let after = bridge.wrapping_add(step);
                if pool.contains(&after) {
                    resumed = Some(after);
                    break;
                }
                bridge = after;
            }
            match resumed {
                Some(next) => {
                    ghosts.extend(skipped);
                    current = next;
                    continue;
                }
                None => break,
            }
        }
        if !processed.insert(current) {
            break;
        }
        let Some(value) = get_value(current) else {
            break;
        };
        nodes.push(current);
        current = value.wrapping_add(offset);
    }

    if hit_target {
        if !nodes.is_empty() {
            outcome.entry_chains.push(Chain {
                nodes,
                ghosts,
                is_head: true,
            });
        }
    } else if !nodes.is_empty() && nodes.len() >= options.min_chain_length {
        outcome.chains.push(Chain {
            nodes,
            ghosts,
            is_head: true,
        });
    }
}

/// Settle chains that share nodes: group them transitively, keep the
/// longest chain of each group as head (ties broken by lowest root; roots
/// are unique within a group, so the order is total).
pub fn resolve_chain_conflicts(mut chains: Vec<Chain>) -> Vec<Chain> {
    if chains.len() <= 1 {
        return chains;
    }

    let mut owners: HashMap<Address, Vec<usize>> = HashMap::new();
    for (index, chain) in chains.iter().enumerate() {
        for &node in &chain.nodes {
            owners.entry(node).or_default().push(index);
        }
    }

    let mut parent: Vec<usize> = (0..chains.len()).collect();
    fn find(parent: &mut [usize], mut index: usize) -> usize {
        while parent[index] != index {
            parent[index] = parent[parent[index]];
            index = parent[index];
        }
        index
    }
    for indices in owners.values() {
        for pair in indices.windows(2) {
            let a = find(&mut parent, pair[0]);
            let b = find(&mut parent, pair[1]);
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for index in 0..chains.len() {
        let root = find(&mut parent, index);
        groups.entry(root).or_default().push(index);
    }

    for members in groups.values() {
        if members.len() <= 1 {
            continue;
        }
        let mut ranked = members.clone();
        ranked.sort_by_key(|&i| (std::cmp::Reverse(chains[i].nodes.len()), chains[i].root()));
        for &loser in &ranked[1..] {
            chains[loser].is_head = false;
        }
    }

    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn pool_of(addresses: &[Address]) -> BTreeSet<Address> {
        addresses.iter().copied().collect()
    }

    fn value_map(addresses: &[Address], values: &[u32]) -> HashMap<Address, u32> {
        addresses.iter().copied().zip(values.iter().copied()).collect()
    }

    const LOOSE: WalkOptions = WalkOptions {
        min_chain_length: 2,
        max_ghost_nodes: 10,
    };

    #[test]
    fn test_closed_ring_is_one_chain_from_lowest_member() {
        let (addresses, values) = fixtures::ring(0x8000_0100, 6, 4);
        let map = value_map(&addresses, &values);
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            LOOSE,
            None,
        );
        assert_eq!(outcome.chains.len(), 1);
        let chain = &outcome.chains[0];
        assert_eq!(chain.root(), 0x8000_0100);
        assert_eq!(chain.nodes.len(), 6);
        assert!(chain.ghosts.is_empty());
    }

    #[test]
    fn test_ghost_bridging_at_offset_zero() {
        // Dropping 0x108 breaks the ring: 0x10C becomes the head, the
        // walk runs through the wrap and bridges the gap
        let (addresses, values) = fixtures::ring(0x8000_0100, 6, 4);
        let (addresses, values) = fixtures::without(&addresses, &values, 0x8000_0108);
        let map = value_map(&addresses, &values);
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            LOOSE,
            None,
        );
        assert_eq!(outcome.chains.len(), 1);
        let chain = &outcome.chains[0];
        assert_eq!(
            chain.nodes,
            vec![0x8000_010C, 0x8000_0110, 0x8000_0114, 0x8000_0100, 0x8000_0104]
        );
        assert_eq!(chain.ghosts, vec![0x8000_0108]);
    }

    #[test]
    fn test_ghost_budget_zero_stops_at_the_gap() {
        let (addresses, values) = fixtures::ring(0x8000_0100, 6, 4);
        let (addresses, values) = fixtures::without(&addresses, &values, 0x8000_0108);
        let map = value_map(&addresses, &values);
        let options = WalkOptions {
            min_chain_length: 2,
            max_ghost_nodes: 0,
        };
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            options,
            None,
        );
        // The gap cannot be bridged: the head's walk covers every
        // surviving node and ends where the missing entry was
        assert_eq!(outcome.chains.len(), 1);
        let chain = &outcome.chains[0];
        assert_eq!(
            chain.nodes,
            vec![0x8000_010C, 0x8000_0110, 0x8000_0114, 0x8000_0100, 0x8000_0104]
        );
        assert!(chain.ghosts.is_empty());
    }

    #[test]
    fn test_head_walks_before_lower_addressed_tail_nodes() {
        // Traversal order 0x300 -> 0x100 -> 0x200 -> 0x400 diverges from
        // address order; the chain must root at 0x300, not at whichever
        // member sorts first
        let (addresses, values) = fixtures::scrambled_chain(&[
            0x8000_0300,
            0x8000_0100,
            0x8000_0200,
            0x8000_0400,
        ]);
        let map = value_map(&addresses, &values);
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            LOOSE,
            None,
        );
        assert_eq!(outcome.chains.len(), 1);
        let chain = &outcome.chains[0];
        assert_eq!(chain.root(), 0x8000_0300);
        assert_eq!(
            chain.nodes,
            vec![0x8000_0300, 0x8000_0100, 0x8000_0200, 0x8000_0400]
        );
        assert!(chain.ghosts.is_empty());
    }

    #[test]
    fn test_ghost_budget_caps_the_whole_chain() {
        // Two gaps of two missing entries each: bridging both needs 4
        // ghosts, a budget of 3 stops at the second gap
        let (addresses, values) = fixtures::chain(0x8000_0100, 12, 4);
        let (addresses, values) = fixtures::without(&addresses, &values, 0x8000_0110);
        let (addresses, values) = fixtures::without(&addresses, &values, 0x8000_0114);
        let (addresses, values) = fixtures::without(&addresses, &values, 0x8000_0120);
        let (addresses, values) = fixtures::without(&addresses, &values, 0x8000_0124);
        let map = value_map(&addresses, &values);
        let options = WalkOptions {
            min_chain_length: 2,
            max_ghost_nodes: 3,
        };
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            options,
            None,
        );
        let first = &outcome.chains[0];
        assert_eq!(first.root(), 0x8000_0100);
        // Bridged the first gap (two ghosts), gave up inside the second
        assert_eq!(first.ghosts, vec![0x8000_0110, 0x8000_0114]);
        assert_eq!(first.nodes.last(), Some(&0x8000_011C));
    }

    #[test]
    fn test_short_chains_are_not_emitted() {
        let (addresses, values) = fixtures::chain(0x8000_0100, 3, 4);
        let map = value_map(&addresses, &values);
        let options = WalkOptions {
            min_chain_length: 15,
            max_ghost_nodes: 0,
        };
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            options,
            None,
        );
        assert!(outcome.chains.is_empty());
    }

    #[test]
    fn test_target_termination_emits_entry_chain() {
        let (addresses, values) = fixtures::chain(0x8000_0100, 4, 4);
        let map = value_map(&addresses, &values);
        // The last node's successor is the target
        let targets: HashSet<Address> = [0x8000_0110].into();
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            LOOSE,
            Some(&targets),
        );
        assert!(outcome.chains.is_empty());
        assert_eq!(outcome.entry_chains.len(), 1);
        assert_eq!(outcome.entry_chains[0].nodes.len(), 4);
    }

    #[test]
    fn test_walk_is_idempotent() {
        let (addresses, values) = fixtures::ring(0x8000_0100, 8, 8);
        let map = value_map(&addresses, &values);
        let pool = pool_of(&addresses);
        let first = walk_chains_at_offset(&pool, 0, |a| map.get(&a).copied(), LOOSE, None);
        let second = walk_chains_at_offset(&pool, 0, |a| map.get(&a).copied(), LOOSE, None);
        assert_eq!(first.chains.len(), second.chains.len());
        for (a, b) in first.chains.iter().zip(&second.chains) {
            assert_eq!(a.nodes, b.nodes);
            assert_eq!(a.ghosts, b.ghosts);
        }
    }

    #[test]
    fn test_conflict_resolution_keeps_one_head_per_group() {
        let shared_tail = vec![0x8000_0300, 0x8000_0304, 0x8000_0308];
        let mut long = vec![0x8000_0100];
        long.extend(&shared_tail);
        let mut short = vec![0x8000_0200];
        short.extend(&shared_tail[1..]);

        let chains = vec![
            Chain { nodes: short, ghosts: vec![], is_head: true },
            Chain { nodes: long, ghosts: vec![], is_head: true },
            Chain {
                nodes: vec![0x8000_0500, 0x8000_0504],
                ghosts: vec![],
                is_head: true,
            },
        ];
        let resolved = resolve_chain_conflicts(chains);
        // The longer of the two overlapping chains wins its group
        assert!(!resolved[0].is_head);
        assert!(resolved[1].is_head);
        // The disjoint chain is untouched
        assert!(resolved[2].is_head);
    }

    #[test]
    fn test_conflict_resolution_ties_break_on_lowest_root() {
        let chains = vec![
            Chain {
                nodes: vec![0x8000_0200, 0x8000_0300],
                ghosts: vec![],
                is_head: true,
            },
            Chain {
                nodes: vec![0x8000_0100, 0x8000_0300],
                ghosts: vec![],
                is_head: true,
            },
        ];
        let resolved = resolve_chain_conflicts(chains);
        assert!(!resolved[0].is_head);
        assert!(resolved[1].is_head);
    }

    #[test]
    fn test_disjoint_rings_each_produce_a_chain() {
        let (a_addr, a_val) = fixtures::ring(0x8000_0100, 4, 4);
        let (b_addr, b_val) = fixtures::ring(0x8000_0200, 4, 4);
        let addresses: Vec<Address> = a_addr.iter().chain(&b_addr).copied().collect();
        let values: Vec<u32> = a_val.iter().chain(&b_val).copied().collect();
        let map = value_map(&addresses, &values);
        let outcome = walk_chains_at_offset(
            &pool_of(&addresses),
            0,
            |a| map.get(&a).copied(),
            LOOSE,
            None,
        );
        let chains = resolve_chain_conflicts(outcome.chains);
        assert_eq!(chains.iter().filter(|c| c.is_head).count(), 2);
        assert_eq!(chains[0].root(), 0x8000_0100);
        assert_eq!(chains[1].root(), 0x8000_0200);
    }
}
