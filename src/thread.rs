use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use crate::arg::{Arg, Event, NodeId};
use crate::error::InvariantError;
use crate::spr::{is_local_coal, iter_visible_recombs, walk_up};

/// One genomic block of a thread: the inserted lineage attaches to
/// `node` at age `age` for every position in `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadBlock {
    pub start: i64,
    pub end: i64,
    pub node: String,
    pub age: f64,
}

/// The per-block trajectory of one lineage across the genome.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    blocks: Vec<ThreadBlock>,
}

impl Thread {
    /// Blocks must be non-empty, ascending, and contiguous.
    pub fn new(blocks: Vec<ThreadBlock>) -> Result<Self> {
        if blocks.is_empty() {
            bail!("thread has no blocks");
        }
        for w in blocks.windows(2) {
            if w[0].end != w[1].start {
                bail!(
                    "thread blocks are not contiguous: [{}, {}) then [{}, {})",
                    w[0].start,
                    w[0].end,
                    w[1].start,
                    w[1].end
                );
            }
        }
        for b in &blocks {
            if b.start >= b.end {
                bail!("empty thread block [{}, {})", b.start, b.end);
            }
        }
        Ok(Thread { blocks })
    }

    /// A thread with a single constant state over `[start, end)`.
    pub fn single(start: i64, end: i64, node: impl Into<String>, age: f64) -> Self {
        Thread {
            blocks: vec![ThreadBlock {
                start,
                end,
                node: node.into(),
                age,
            }],
        }
    }

    pub fn blocks(&self) -> &[ThreadBlock] {
        &self.blocks
    }

    /// State at genomic position `pos`.
    pub fn at(&self, pos: i64) -> Result<(&str, f64)> {
        let i = self.blocks.partition_point(|b| b.end <= pos);
        match self.blocks.get(i) {
            Some(b) if b.start <= pos => Ok((&b.node, b.age)),
            _ => bail!("position {pos} outside thread range"),
        }
    }
}

/// A recombination the inserted lineage introduces: the new local tree
/// starts at `pos`; the displaced lineage breaks off branch `node` at
/// age `age`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecomb {
    pub pos: i64,
    pub node: String,
    pub age: f64,
}

/// Where the lineage above `leaf` coalesces in the marginal tree left of
/// `pos`: the sibling branch it joins and the age of the join.
pub fn get_coal_point(arg: &Arg, leaf: &str, pos: f64) -> Result<(String, f64)> {
    let at = pos - 0.5;
    let mut last = arg.require(leaf)?;
    let mut parent = match arg.get_local_parent(last, at) {
        Some(p) => p,
        None => bail!("leaf '{leaf}' has no parent in the local tree"),
    };
    while arg.get_local_children(parent, at).len() == 1 {
        last = parent;
        parent = match arg.get_local_parent(parent, at) {
            Some(p) => p,
            None => bail!("lineage above '{leaf}' never coalesces"),
        };
    }

    let children = arg.get_local_children(parent, at);
    let mut sib = if children[0] == last {
        children[1]
    } else {
        children[0]
    };
    loop {
        let ch = arg.get_local_children(sib, at);
        if ch.len() != 1 {
            break;
        }
        sib = ch[0];
    }
    Ok((arg.node(sib).name.clone(), arg.node(parent).age))
}

/// A point along a branch of the ARG, expressed as the clade of sample
/// leaves below it plus the age. Points above the local root map to the
/// full leaf set; an unknown name denotes a not-yet-inserted lineage.
pub fn get_clade_point(arg: &Arg, node: &str, time: f64, pos: f64) -> Result<(Vec<String>, f64)> {
    if !arg.contains(node) {
        return Ok((vec![node.to_string()], time));
    }
    let tree = arg.get_marginal_tree(pos - 0.5);
    let root = tree.tree_root()?;
    let root_age = tree.node(root).age;
    if time > root_age || (time == root_age && !tree.contains(node)) {
        return Ok((tree.clade_leaves(None)?, time));
    }
    let id = tree.require(node)?;
    Ok((tree.clade_leaves(Some(id))?, time))
}

/// Extract the thread of an existing leaf: its coalescence point per
/// genomic block, with blocks split at the visible recombinations.
pub fn thread_blocks(arg: &Arg, leaf: &str) -> Result<Thread> {
    let mut breaks: Vec<i64> = iter_visible_recombs(arg)
        .into_iter()
        .map(|id| arg.node(id).pos as i64)
        .collect();
    breaks.push(arg.end - 1);

    let mut blocks = Vec::new();
    let mut start = arg.start;
    for rpos in breaks {
        if start >= arg.end {
            continue;
        }
        let (node, age) = get_coal_point(arg, leaf, rpos as f64)?;
        blocks.push(ThreadBlock {
            start,
            end: rpos + 1,
            node,
            age,
        });
        start = rpos + 1;
    }
    Thread::new(blocks)
}

fn attach_new_leaf(arg: &mut Arg, coal: NodeId, name: &str) -> NodeId {
    let leaf = arg.new_node(Some(name), Event::Gene, 0.0);
    arg.node_mut(leaf).parents.push(coal);
    arg.node_mut(coal).children.push(leaf);
    leaf
}

/// Graft the lineage `new_name` into `arg` along `thread`, creating the
/// recombination events in `new_recombs` plus the re-threaded versions of
/// the ARG's own recombinations. Returns a new ARG; the input is not
/// modified.
///
/// The thread must be exactly compatible with the ARG: every breakpoint
/// re-derives the inserted lineage's coalescence point on the right-hand
/// tree and a mismatch with the thread's stated age is fatal, as are a
/// recombination above its paired coalescence and an LCA walk that
/// overshoots its target time.
pub fn add_arg_thread(
    arg: &Arg,
    new_name: &str,
    thread: &Thread,
    new_recombs: &[NewRecomb],
) -> Result<Arg> {
    let arg_recomb: HashMap<i64, NodeId> = iter_visible_recombs(arg)
        .into_iter()
        .map(|id| (arg.node(id).pos as i64, id))
        .collect();

    // merged breakpoint sweep: (breakpoint, existing recomb name, clade
    // of the recombining branch, recomb age)
    let mut clades: Vec<(i64, Option<String>, Vec<String>, f64)> = Vec::new();
    for nr in new_recombs {
        let (leaves, rtime) = get_clade_point(arg, &nr.node, nr.age, (nr.pos - 1) as f64)?;
        clades.push((nr.pos - 1, None, leaves, rtime));
    }
    for id in iter_visible_recombs(arg) {
        let node = arg.node(id);
        let (leaves, rtime) = get_clade_point(arg, &node.name, node.age, node.pos)?;
        clades.push((node.pos as i64, Some(node.name.clone()), leaves, rtime));
    }
    clades.sort_by_key(|c| c.0);

    // working ARG: leftmost local tree plus the initial attachment
    let mut arg2 = arg.get_marginal_tree(-1.0);
    arg2.remove_single_lineages();

    let (first_node, first_age) = thread.at(arg.start)?;
    let (start_leaves, start_age) = get_clade_point(arg, first_node, first_age, arg.start as f64)?;
    let node = walk_up(&arg2, &start_leaves, start_age, -1, None)?;
    let coal0 = arg2.splice_node_above(node, Event::Coal, start_age, 0.0, -1.5);
    attach_new_leaf(&mut arg2, coal0, new_name);

    for (rpos, rname, rleaves, rtime) in clades {
        let (node1, node2, r_age, c_age);

        if let Some(&arg_rid) = rname.as_ref().and_then(|_| arg_recomb.get(&rpos)) {
            // breakpoint already in the ARG: re-derive its
            // re-coalescence point in the thread-augmented right tree
            let (cur_node, cur_age) = thread.at(rpos)?;
            let (_, next_age) = thread.at(rpos + 1)?;
            if cur_age != next_age && rtime > cur_age.min(next_age) {
                return Err(InvariantError::RecombAboveCoal {
                    pos: rpos,
                    rtime,
                    ctime: cur_age.min(next_age),
                }
                .into());
            }

            // the breakpoint must still recoalesce somewhere local
            let at = rpos as f64 + 0.5;
            let local2: HashSet<NodeId> = arg.postorder_marginal_tree(at).into_iter().collect();
            let mut up = match arg.get_local_parent(arg_rid, at) {
                Some(p) => p,
                None => bail!("recombination at {rpos} has no local parent"),
            };
            while !is_local_coal(arg, up, at, &local2) {
                up = match arg.get_local_parent(up, at) {
                    Some(p) => p,
                    None => bail!("recombination at {rpos} never recoalesces"),
                };
            }

            // right-hand local tree with the new branch grafted in
            let mut tree = arg.get_marginal_tree(at);
            tree.remove_single_lineages();
            let (tnode, tage) = thread.at(rpos + 1)?;
            let tid = tree.require(tnode)?;
            let new_coal = tree.splice_node_above(tid, Event::Coal, tage, 0.0, at);
            attach_new_leaf(&mut tree, new_coal, new_name);

            let mut recomb = walk_up(&tree, &rleaves, rtime, rpos + 1, Some(new_name))?;
            if recomb == new_coal && rtime == tree.node(new_coal).age {
                // recomb and the new coal state touch; for a mediated
                // SPR the recombination goes below the new attachment
                if tree.node(tree.node(new_coal).children[0]).name != cur_node {
                    recomb = tree.node(new_coal).children[0];
                }
            }

            let coal = match tree.node(recomb).parents.first().copied() {
                Some(p) => p,
                None => bail!("recombining branch at {rpos} has no parent"),
            };
            let cch = &tree.node(coal).children;
            let child = if cch[1] == recomb { cch[0] } else { cch[1] };

            let (rleaves2, rtime2) =
                get_clade_point(&tree, &tree.node(recomb).name, rtime, (rpos + 1) as f64)?;
            let (cleaves, ctime2) = get_clade_point(
                &tree,
                &tree.node(child).name,
                tree.node(coal).age,
                (rpos + 1) as f64,
            )?;

            node1 = walk_up(&arg2, &rleaves2, rtime2, rpos + 1, None)?;
            let node1_name = arg2.node(node1).name.clone();
            node2 = walk_up(&arg2, &cleaves, ctime2, rpos + 1, Some(&node1_name))?;
            r_age = rtime2;
            c_age = ctime2;
        } else {
            // newly required breakpoint: the clade is read directly off
            // the thread
            let (_, cur_age) = thread.at(rpos)?;
            if rtime > cur_age {
                return Err(InvariantError::RecombAboveCoal {
                    pos: rpos,
                    rtime,
                    ctime: cur_age,
                }
                .into());
            }

            let (cleaves, ctime) = if rleaves == [new_name] {
                // recomb on the new branch, coal given by the thread
                let (next_node, next_age) = thread.at(rpos + 1)?;
                get_clade_point(arg, next_node, next_age, rpos as f64 + 0.5)?
            } else {
                // recomb in the ARG, coal on the new branch
                (vec![new_name.to_string()], thread.at(rpos + 1)?.1)
            };
            if ctime < rtime {
                return Err(InvariantError::RecombAboveCoal {
                    pos: rpos,
                    rtime,
                    ctime,
                }
                .into());
            }

            node1 = walk_up(&arg2, &rleaves, rtime, rpos + 1, None)?;
            let node1_name = arg2.node(node1).name.clone();
            node2 = walk_up(&arg2, &cleaves, ctime, rpos + 1, Some(&node1_name))?;
            r_age = rtime;
            c_age = ctime;
        }

        if arg2.node(node1).parents.is_empty() {
            bail!(
                "recombining branch '{}' has no parent at {rpos}:\n{}",
                arg2.node(node1).name,
                arg2.get_marginal_tree(rpos as f64 + 0.5).render()
            );
        }
        if r_age > c_age {
            return Err(InvariantError::RecombAboveCoal {
                pos: rpos,
                rtime: r_age,
                ctime: c_age,
            }
            .into());
        }

        let at = rpos as f64 - 0.5;
        let recomb = arg2.splice_node_above(node1, Event::Recomb, r_age, rpos as f64, at);
        let graft = if node1 == node2 { recomb } else { node2 };
        let coal = arg2.splice_node_above(graft, Event::Coal, c_age, 0.0, at);
        arg2.node_mut(recomb).parents.push(coal);
        arg2.node_mut(coal).children.push(recomb);

        let (_, got_age) = get_coal_point(&arg2, new_name, (rpos + 1) as f64)?;
        let (_, want_age) = thread.at(rpos + 1)?;
        if got_age != want_age {
            return Err(InvariantError::CoalTimeMismatch {
                pos: rpos + 1,
                computed: got_age,
                stated: want_age,
                last_tree: arg2.get_marginal_tree(rpos as f64 - 0.5).render(),
                tree: arg2.get_marginal_tree(rpos as f64 + 0.5).render(),
            }
            .into());
        }
    }

    Ok(arg2)
}
