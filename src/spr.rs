use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use anyhow::{bail, Result};

use crate::arg::{Arg, NodeId};
use crate::error::InvariantError;

/// Next recombination strictly to the right of `pos`, either in the
/// marginal tree at `pos` (`whole_arg = false`) or over the whole graph.
pub fn find_tree_next_recomb(arg: &Arg, pos: f64, whole_arg: bool) -> Option<NodeId> {
    let nodes: Vec<NodeId> = if whole_arg {
        arg.node_ids().collect()
    } else {
        arg.postorder_marginal_tree(pos)
    };

    let mut best: Option<NodeId> = None;
    let mut nextpos = f64::INFINITY;
    for id in nodes {
        let node = arg.node(id);
        if node.event == crate::arg::Event::Recomb && node.pos > pos && node.pos < nextpos {
            best = Some(id);
            nextpos = node.pos;
        }
    }
    best
}

/// Recombinations visible from the local trees, in genomic order.
pub fn iter_visible_recombs(arg: &Arg) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut pos = arg.start as f64;
    while let Some(id) = find_tree_next_recomb(arg, pos, false) {
        out.push(id);
        pos = arg.node(id).pos;
    }
    out
}

/// True when `id` is a coalescence of two distinct lineages that are both
/// local at query position `at`.
pub fn is_local_coal(arg: &Arg, id: NodeId, at: f64, local: &HashSet<NodeId>) -> bool {
    let children = &arg.node(id).children;
    children.len() == 2
        && local.contains(&children[0])
        && arg.get_local_parent(children[0], at) == Some(id)
        && local.contains(&children[1])
        && arg.get_local_parent(children[1], at) == Some(id)
        && children[0] != children[1]
}

/// Least common ancestor of `leaves` in the marginal tree left of `pos`,
/// optionally walked further up to (but not past) `time`.
///
/// `ignore` names a branch whose private lineage is excluded from the
/// local set, so a partially inserted lineage cannot capture its own
/// earlier attachment point. Climbing stops at the first genuine local
/// coalescence at or below `time`; a parent strictly below `time` after
/// the walk means the requested attachment does not exist and is fatal.
pub fn arg_lca(
    arg: &Arg,
    leaves: &[String],
    time: Option<f64>,
    pos: f64,
    ignore: Option<&str>,
) -> Result<NodeId> {
    let at = pos - 0.5;
    let order_vec = arg.postorder_marginal_tree(at);
    let order: HashMap<NodeId, usize> =
        order_vec.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let mut local: HashSet<NodeId> = order_vec.iter().copied().collect();

    // Prune the ignored branch's private chain out of the local set.
    if let Some(name) = ignore {
        if let Some(start) = arg.id_of(name) {
            let mut ptr = if local.contains(&start) {
                local.remove(&start);
                arg.get_local_parent(start, at)
            } else {
                None
            };
            while let Some(p) = ptr {
                if !local.contains(&p) {
                    break;
                }
                let children = &arg.node(p).children;
                let still_joins = children.len() == 2
                    && ((local.contains(&children[0])
                        && arg.get_local_parent(children[0], at) == Some(p))
                        || (local.contains(&children[1])
                            && arg.get_local_parent(children[1], at) == Some(p)));
                if still_joins {
                    break;
                }
                local.remove(&p);
                ptr = arg.get_local_parent(p, at);
            }
        }
    }

    if leaves.is_empty() {
        bail!("lca of empty leaf set");
    }
    let mut heap: BinaryHeap<Reverse<(usize, NodeId)>> = BinaryHeap::new();
    let mut seen: HashSet<NodeId> = HashSet::new();
    for name in leaves {
        let id = arg.require(name)?;
        let rank = match order.get(&id) {
            Some(&r) => r,
            None => bail!("leaf '{name}' is not in the local tree"),
        };
        heap.push(Reverse((rank, id)));
        seen.insert(id);
    }

    while heap.len() > 1 {
        let Reverse((_, id)) = heap.pop().expect("heap underflow");
        if let Some(p) = arg.get_local_parent(id, at) {
            if seen.insert(p) {
                let rank = match order.get(&p) {
                    Some(&r) => r,
                    None => bail!("local parent fell outside the marginal tree"),
                };
                heap.push(Reverse((rank, p)));
            }
        }
    }
    let mut node = heap.peek().expect("heap underflow").0 .1;
    let mut parent = arg.get_local_parent(node, at);

    if let Some(target) = time {
        while let Some(p) = parent {
            if arg.node(p).age > target {
                break;
            }
            if is_local_coal(arg, p, at, &local) {
                break;
            }
            node = p;
            parent = arg.get_local_parent(node, at);
        }
        if let Some(p) = parent {
            if arg.node(p).age < target {
                return Err(InvariantError::WalkUpOvershoot {
                    clade: leaves.to_vec(),
                    target,
                    reached: arg.node(p).age,
                    tree: arg.get_marginal_tree(at).render(),
                }
                .into());
            }
        }
    }
    Ok(node)
}

/// Time-bounded LCA walk used during thread insertion.
pub fn walk_up(
    arg: &Arg,
    leaves: &[String],
    time: f64,
    pos: i64,
    ignore: Option<&str>,
) -> Result<NodeId> {
    arg_lca(arg, leaves, Some(time), pos as f64, ignore)
}

/// The SPR move between two adjacent local trees.
#[derive(Debug, Clone, PartialEq)]
pub struct Spr {
    pub recomb: (String, f64),
    pub coal: (String, f64),
}

/// Locate the recombination and re-coalescence points of the SPR between
/// `last_tree` and `tree` (full marginal trees sharing node names).
///
/// When `recomb_name` is `None` the recombination is looked up as the
/// first one right of `pos - 1` in `last_tree`.
pub fn find_recomb_coal(
    tree: &Arg,
    last_tree: &Arg,
    recomb_name: Option<&str>,
    pos: Option<i64>,
) -> Result<Spr> {
    let rname = match recomb_name {
        Some(n) => n.to_string(),
        None => {
            let p = match pos {
                Some(p) => p,
                None => bail!("find_recomb_coal needs a recomb name or a position"),
            };
            match find_tree_next_recomb(last_tree, (p - 1) as f64, true) {
                Some(id) => last_tree.node(id).name.clone(),
                None => bail!("no recombination right of position {}", p - 1),
            }
        }
    };

    let rid = tree.require(&rname)?;
    let recomb_time = tree.node(rid).age;

    // climb to the re-coalescence point shared with the previous tree
    let mut coal = match tree.node(rid).parents.first().copied() {
        Some(p) => p,
        None => bail!("recombination node '{rname}' has no parent"),
    };
    while !last_tree.contains(&tree.node(coal).name) {
        match tree.node(coal).parents.first().copied() {
            Some(p) => coal = p,
            None => break,
        }
    }
    let coal_time = tree.node(coal).age;

    let coal_branch = if !last_tree.contains(&tree.node(coal).name) {
        last_tree.node(last_tree.tree_root()?).name.clone()
    } else {
        let mut ptr = last_tree.require(&tree.node(coal).name)?;
        while last_tree.node(ptr).children.len() == 1 {
            ptr = last_tree.node(ptr).children[0];
        }
        last_tree.node(ptr).name.clone()
    };

    let mut recomb = rid;
    while tree.node(recomb).children.len() == 1 {
        recomb = tree.node(recomb).children[0];
    }
    let recomb_branch = tree.node(recomb).name.clone();

    Ok(Spr {
        recomb: (recomb_branch, recomb_time),
        coal: (coal_branch, coal_time),
    })
}

/// One genomic block of an ARG: its interval, the collapsed local tree,
/// and the SPR relating it to the previous block (None for the first).
#[derive(Debug)]
pub struct SprBlock {
    pub block: (i64, i64),
    pub tree: Arg,
    pub spr: Option<Spr>,
}

/// Sweep the ARG left to right, yielding each local-tree block with the
/// SPR that produced it.
pub fn iter_arg_sprs(arg: &Arg) -> Result<Vec<SprBlock>> {
    let mut breaks = vec![arg.start];
    for id in iter_visible_recombs(arg) {
        breaks.push(arg.node(id).pos as i64);
    }
    breaks.push(arg.end);

    let mut out: Vec<SprBlock> = Vec::new();
    let mut last_full: Option<Arg> = None;
    for w in breaks.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        if lo >= hi {
            continue;
        }
        let tree_full = arg.get_marginal_tree(lo as f64 + 0.5);
        let spr = match &last_full {
            Some(last) => {
                let rid = tree_full
                    .recomb_ids()
                    .find(|&id| tree_full.node(id).pos as i64 == lo);
                let rname = match rid {
                    Some(id) => tree_full.node(id).name.clone(),
                    None => bail!("no recombination at block start {lo}"),
                };
                Some(find_recomb_coal(&tree_full, last, Some(&rname), None)?)
            }
            None => None,
        };

        let mut tree = tree_full.clone();
        tree.remove_single_lineages();
        out.push(SprBlock {
            block: (lo, hi),
            tree,
            spr,
        });
        last_full = Some(tree_full);
    }
    Ok(out)
}

/// Map node names of one collapsed local tree onto the next. Every branch
/// maps to itself except the broken one (the recomb node's parent), which
/// maps to `None`. Requires an SMC-style ARG: the broken and regrafted
/// branches are distinct.
pub fn local_node_mapping(
    last_tree: &Arg,
    spr: &Spr,
) -> Result<HashMap<String, Option<String>>> {
    if spr.recomb.0 == spr.coal.0 {
        return Err(InvariantError::NotAnSpr {
            recomb: spr.recomb.0.clone(),
            coal: spr.coal.0.clone(),
        }
        .into());
    }

    let rid = last_tree.require(&spr.recomb.0)?;
    let broken = match last_tree.node(rid).parents.first().copied() {
        Some(p) => last_tree.node(p).name.clone(),
        None => bail!("recombination branch '{}' has no parent", spr.recomb.0),
    };

    let mut mapping = HashMap::new();
    for id in last_tree.node_ids() {
        let name = last_tree.node(id).name.clone();
        mapping.insert(name.clone(), Some(name));
    }
    mapping.insert(broken, None);
    Ok(mapping)
}
