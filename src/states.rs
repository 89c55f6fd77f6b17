use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::arg::{Arg, NodeId};
use crate::model::time_index_in;

/// A coalescent state: an attachment point for an additional lineage,
/// identified by the local-tree branch (node below the attachment) and a
/// discretized time index in `[0, ntimes-1)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct State {
    pub node: String,
    pub time: usize,
}

impl State {
    pub fn new(node: impl Into<String>, time: usize) -> Self {
        State {
            node: node.into(),
            time,
        }
    }
}

/// Per-time-point branch and opportunity counts for one local tree.
///
/// `nrecombs[t]` and `ncoals[t]` count the enumerated states at time `t`
/// (so pass-through single-lineage nodes never contribute); the top
/// `nbranches` entry is forced to 1 for the basal lineage above the root.
#[derive(Debug, Clone)]
pub struct LineageCounts {
    pub nbranches: Vec<usize>,
    pub nrecombs: Vec<usize>,
    pub ncoals: Vec<usize>,
}

fn preorder(tree: &Arg) -> Result<Vec<NodeId>> {
    let root = tree.tree_root()?;
    let mut order = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        order.push(id);
        for &c in tree.node(id).children.iter().rev() {
            stack.push(c);
        }
    }
    Ok(order)
}

/// Coalescent parent of `id`, skipping pass-through nodes.
fn coal_parent(tree: &Arg, id: NodeId) -> Option<NodeId> {
    let mut p = tree.node(id).parents.first().copied()?;
    while tree.node(p).children.len() == 1 {
        p = tree.node(p).parents.first().copied()?;
    }
    Some(p)
}

/// Enumerate the coalescent states of a local tree in a fixed order:
/// preorder over branches, increasing time within a branch. The top grid
/// point is excluded; single-child nodes carry no state.
pub fn iter_coal_states(tree: &Arg, times: &[f64]) -> Result<Vec<State>> {
    let ntimes = times.len() - 1;
    let mut states = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::new();

    for id in preorder(tree)? {
        let node = tree.node(id);
        if node.children.len() == 1 {
            continue;
        }
        let mut i = time_index_in(times, node.age)?;

        match node.parents.first().copied() {
            Some(first) => {
                // climb past pass-through parents to the enclosing
                // coalescent node
                let mut p = first;
                while !seen.contains(&p) {
                    match tree.node(p).parents.first() {
                        Some(&q) => p = q,
                        None => break,
                    }
                }
                let parent_age = tree.node(p).age;
                while i < ntimes && times[i] <= parent_age {
                    states.push(State::new(node.name.clone(), i));
                    i += 1;
                }
            }
            None => {
                while i < ntimes {
                    states.push(State::new(node.name.clone(), i));
                    i += 1;
                }
            }
        }
        seen.insert(id);
    }
    Ok(states)
}

/// Count branches, recombination opportunities, and coalescence
/// opportunities at each time point of a local tree.
pub fn count_lineages(tree: &Arg, times: &[f64]) -> Result<LineageCounts> {
    let n = times.len();
    let mut nbranches = vec![0usize; n];
    let mut nrecombs = vec![0usize; n];
    let mut ncoals = vec![0usize; n];

    for state in iter_coal_states(tree, times)? {
        let id = tree.require(&state.node)?;
        let parent = coal_parent(tree, id);
        let crosses = match parent {
            Some(p) => times[state.time] < tree.node(p).age,
            None => true,
        };
        if crosses {
            nbranches[state.time] += 1;
        }
        nrecombs[state.time] += 1;
        ncoals[state.time] += 1;
    }
    nbranches[n - 1] = 1;

    Ok(LineageCounts {
        nbranches,
        nrecombs,
        ncoals,
    })
}

/// Lookup table from state to its index in an enumeration.
pub fn state_lookup(states: &[State]) -> HashMap<State, usize> {
    states
        .iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), i))
        .collect()
}
