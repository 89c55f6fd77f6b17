use anyhow::{bail, Result};
use ndarray::Array2;

use crate::arg::Arg;
use crate::error::InvariantError;
use crate::model::{time_index_in, ArgModel};
use crate::states::{state_lookup, LineageCounts, State};

fn tree_length(tree: &Arg) -> f64 {
    let mut total = 0.0;
    for id in tree.node_ids() {
        if let Some(&p) = tree.node(id).parents.first() {
            total += tree.node(p).age - tree.node(id).age;
        }
    }
    total
}

/// Total branch length of a local tree, optionally including the basal
/// interval above the root.
pub fn get_treelen(tree: &Arg, times: &[f64], use_basal: bool) -> Result<f64> {
    let mut treelen = tree_length(tree);
    if use_basal {
        let root = tree.tree_root()?;
        let rooti = time_index_in(times, tree.node(root).age)?;
        if rooti + 1 >= times.len() {
            bail!("tree root sits at the top of the time grid");
        }
        treelen += times[rooti + 1] - times[rooti];
    }
    Ok(treelen)
}

/// Tree length with an extra lineage attached to `node` at age `time`.
pub fn get_treelen_branch(
    tree: &Arg,
    times: &[f64],
    node: &str,
    time: f64,
    use_basal: bool,
) -> Result<f64> {
    let treelen = tree_length(tree);
    let root = tree.tree_root()?;
    let root_age = tree.node(root).age;

    let blen = time;
    let mut treelen2 = treelen + blen;
    let rooti = if node == tree.node(root).name {
        treelen2 += blen - root_age;
        time_index_in(times, time)?
    } else {
        time_index_in(times, root_age)?
    };
    if use_basal {
        if rooti + 1 >= times.len() {
            bail!("tree root sits at the top of the time grid");
        }
        treelen2 += times[rooti + 1] - times[rooti];
    }
    Ok(treelen2)
}

/// Probability of a recombination at time `k` given the current state,
/// conditioned on at least one recombination having occurred.
fn prob_recomb(
    tree: &Arg,
    state: &State,
    counts: &LineageCounts,
    model: &ArgModel,
    k: usize,
) -> Result<f64> {
    let a = state.time;
    let times = &model.times;
    let treelen_b = get_treelen_branch(tree, times, &state.node, times[a], true)?;
    let treelen = get_treelen_branch(tree, times, &state.node, times[a], false)?;
    let root = tree.tree_root()?;
    let w = a.max(time_index_in(times, tree.node(root).age)?);

    let nbranches_k = counts.nbranches[k] as f64 + if k < a { 1.0 } else { 0.0 };
    let nrecombs_k = counts.nrecombs[k] as f64
        + if k <= a { 1.0 } else { 0.0 }
        + if k == a && a < w { 1.0 } else { 0.0 };

    Ok(nbranches_k * model.time_steps[k] / (nrecombs_k * treelen_b)
        * (1.0 - (-model.rho * treelen.max(1.0)).exp()))
}

/// Probability that the displaced lineage, recombining at time `k`,
/// recoalesces in interval `b`: survival of the discretized hazard from
/// `k` to `b`, then the interval's coalescence mass spread over the
/// branches eligible to receive it (except in the top interval, which
/// absorbs all remaining mass).
fn prob_recoal(counts: &LineageCounts, model: &ArgModel, k: usize, b: usize) -> f64 {
    let ntimes = model.ntimes;
    let mut s = 0.0;
    for m in k..b {
        s += model.time_steps[m] * counts.nbranches[m] as f64 / (2.0 * model.popsizes[m]);
    }
    let mut p = (-s).exp();

    if b < ntimes - 2 {
        let hazard = model.time_steps[b] * counts.nbranches[b] as f64 / (2.0 * model.popsizes[b]);
        p *= (1.0 - (-hazard).exp()) / counts.ncoals[b] as f64;
    }
    p
}

/// Recombination times compatible with the transition `state1 -> state2`.
/// Times on the occupied branch and on the new lineage itself are listed
/// separately, so a shared time contributes twice.
fn transition_recomb_times(
    tree: &Arg,
    state1: &State,
    state2: &State,
    times: &[f64],
) -> Result<Vec<usize>> {
    let end_time = state1.time.min(state2.time);
    let mut ks = Vec::new();

    if state1.node == state2.node {
        let id = tree.require(&state1.node)?;
        let start = time_index_in(times, tree.node(id).age)?;
        for k in start..=end_time {
            ks.push(k);
        }
    }
    for k in 0..=end_time {
        ks.push(k);
    }
    Ok(ks)
}

/// Reference within-block transition matrix in log space.
///
/// This is the brute-force form used for validation: every entry sums the
/// recombination and recoalescence probabilities over all compatible
/// recombination times, and the diagonal adds the no-recombination
/// survival term. `counts` must belong to `tree`.
pub fn calc_transition_probs(
    tree: &Arg,
    states: &[State],
    counts: &LineageCounts,
    model: &ArgModel,
) -> Result<Array2<f64>> {
    let mut tree2 = tree.clone();
    tree2.remove_single_lineages();

    let n = states.len();
    let mut mat = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            let b = states[j].time;
            let mut p = 0.0;
            for k in transition_recomb_times(&tree2, &states[i], &states[j], &model.times)? {
                p += prob_recomb(&tree2, &states[i], counts, model, k)?
                    * prob_recoal(counts, model, k, b);
            }
            if i == j {
                let treelen = get_treelen_branch(
                    &tree2,
                    &model.times,
                    &states[i].node,
                    model.times[states[i].time],
                    false,
                )?;
                p += (-model.rho * treelen.max(1.0)).exp();
            }
            mat[[i, j]] = p.ln();
        }
    }
    Ok(mat)
}

/// Prior log-probability of each state under the discretized coalescent.
pub fn calc_state_priors(states: &[State], counts: &LineageCounts, model: &ArgModel) -> Vec<f64> {
    states
        .iter()
        .map(|state| {
            let b = state.time;
            let mut s = 0.0;
            for m in 0..b {
                s += model.time_steps[m] * counts.nbranches[m] as f64 / (2.0 * model.popsizes[m]);
            }
            let hazard =
                model.time_steps[b] * counts.nbranches[b] as f64 / (2.0 * model.popsizes[b]);
            ((1.0 - (-hazard).exp()) / counts.ncoals[b] as f64 * (-s).exp()).ln()
        })
        .collect()
}

/// For each state of `states1` not on the recomb or coal branch, the
/// index of its single topological successor in `states2`; `None` marks
/// the probabilistic recoal-branch row.
///
/// Both trees must be collapsed and share node names. A missing successor
/// means the two state spaces disagree and is fatal.
pub fn get_deterministic_transitions(
    states1: &[State],
    states2: &[State],
    times: &[f64],
    tree: &Arg,
    last_tree: &Arg,
    recomb_branch: &str,
    recomb_time: usize,
    coal_branch: &str,
    coal_time: usize,
) -> Result<Vec<Option<usize>>> {
    let lookup2 = state_lookup(states2);
    let find2 = |node: &str, time: usize| -> Result<usize> {
        lookup2
            .get(&State::new(node, time))
            .copied()
            .ok_or_else(|| {
                InvariantError::UnknownState {
                    node: node.to_string(),
                    time,
                }
                .into()
            })
    };

    let mut next_states = Vec::with_capacity(states1.len());
    for state1 in states1 {
        let (node1, a) = (state1.node.as_str(), state1.time);

        if node1 == coal_branch && a == coal_time {
            // probabilistic, handled by the switch-matrix recoal row
            next_states.push(None);
        } else if node1 != recomb_branch {
            // the SPR removes at most a subtree below us; trace up from
            // an undisturbed child to find the surviving identity
            let id = match last_tree.id_of(node1) {
                Some(id) => id,
                None => bail!(
                    "unknown node name '{node1}' in previous local tree:\n{}",
                    last_tree.render()
                ),
            };
            let node = last_tree.node(id);

            let node2 = if node.is_leaf() {
                node1.to_string()
            } else {
                let child1 = last_tree.node(node.children[0]).name.clone();
                let child2 = last_tree.node(node.children[1]).name.clone();
                if recomb_branch == child1 {
                    child2
                } else if recomb_branch == child2 {
                    child1
                } else {
                    node1.to_string()
                }
            };

            // if the regraft lands at or below us, our branch gains a new
            // parent and the state advances one step
            let node2 = if (coal_branch == node1 || coal_branch == node2) && coal_time <= a {
                let id2 = tree.require(&node2)?;
                match tree.node(id2).parents.first().copied() {
                    Some(p) => tree.node(p).name.clone(),
                    None => bail!("branch '{node2}' lost its parent across the breakpoint"),
                }
            } else {
                node2
            };
            next_states.push(Some(find2(&node2, a)?));
        } else if recomb_time >= a {
            // the break is above us, we move with the pruned subtree
            next_states.push(Some(find2(recomb_branch, a)?));
        } else {
            // the subtree moves out from underneath us; we coalesce with
            // the branch that was above it. A regraft back onto the same
            // branch would be a self cycle, forbidden by SMC.
            if coal_branch == node1 {
                return Err(InvariantError::NotAnSpr {
                    recomb: recomb_branch.to_string(),
                    coal: coal_branch.to_string(),
                }
                .into());
            }
            let (next_node, b) =
                recomb_displaced_state(tree, last_tree, recomb_branch, coal_branch, times)?;
            next_states.push(Some(find2(&next_node, b)?));
        }
    }
    Ok(next_states)
}

/// State reached by a lineage sitting on the recomb branch when the
/// pruned subtree moves out from underneath it: the former sibling, or
/// that sibling's new parent if the regraft landed on it.
fn recomb_displaced_state(
    tree: &Arg,
    last_tree: &Arg,
    recomb_branch: &str,
    coal_branch: &str,
    times: &[f64],
) -> Result<(String, usize)> {
    let rid = last_tree.require(recomb_branch)?;
    let parent = match last_tree.node(rid).parents.first().copied() {
        Some(p) => p,
        None => bail!("recombination branch '{recomb_branch}' has no parent"),
    };
    let b = time_index_in(times, last_tree.node(parent).age)?;

    let children = &last_tree.node(parent).children;
    let other = if children[1] == rid {
        children[0]
    } else {
        children[1]
    };
    let other_name = last_tree.node(other).name.clone();

    if other_name == coal_branch {
        let oid = tree.require(&other_name)?;
        match tree.node(oid).parents.first().copied() {
            Some(p) => Ok((tree.node(p).name.clone(), b)),
            None => bail!("branch '{other_name}' lost its parent across the breakpoint"),
        }
    } else {
        Ok((other_name, b))
    }
}

/// Indices in `states2` of the two admissible successors of the
/// recomb-branch state: staying with the pruned subtree, or moving to
/// the branch formerly above it.
pub fn get_recomb_transition_switch(
    tree: &Arg,
    last_tree: &Arg,
    recomb_branch: &str,
    recomb_time: usize,
    coal_branch: &str,
    states2: &[State],
    times: &[f64],
) -> Result<(usize, usize)> {
    let lookup2 = state_lookup(states2);
    let find2 = |node: &str, time: usize| -> Result<usize> {
        lookup2
            .get(&State::new(node, time))
            .copied()
            .ok_or_else(|| {
                InvariantError::UnknownState {
                    node: node.to_string(),
                    time,
                }
                .into()
            })
    };

    let (next_node, b) =
        recomb_displaced_state(tree, last_tree, recomb_branch, coal_branch, times)?;
    let stay = find2(recomb_branch, recomb_time)?;
    let moved = find2(&next_node, b)?;
    Ok((stay, moved))
}

/// Transition matrix across a recombination breakpoint, from the states
/// of `last_tree_full` to the states of `tree_full`, in log space.
///
/// Rows fall into three classes: the recomb-branch state (a placeholder
/// 50/50 split over its two admissible successors, kept as a documented
/// approximation), the recoal-branch state (hazard-weighted mass over all
/// states at or above the regraft point, row-renormalized; a structurally
/// empty row maps everything to `NEG_INFINITY`), and deterministic rows.
/// `counts` must belong to the previous local tree.
pub fn calc_transition_probs_switch(
    tree_full: &Arg,
    last_tree_full: &Arg,
    recomb_name: &str,
    states1: &[State],
    states2: &[State],
    counts: &LineageCounts,
    model: &ArgModel,
) -> Result<Array2<f64>> {
    let spr = crate::spr::find_recomb_coal(tree_full, last_tree_full, Some(recomb_name), None)?;
    let (recomb_branch, coal_branch) = (spr.recomb.0.clone(), spr.coal.0.clone());
    let k = model.time_index(spr.recomb.1)?;
    let coal_time = model.time_index(spr.coal.1)?;

    let mut last_tree = last_tree_full.clone();
    last_tree.remove_single_lineages();
    let mut tree = tree_full.clone();
    tree.remove_single_lineages();

    let (n1, n2) = (states1.len(), states2.len());
    let mut mat = Array2::from_elem((n1, n2), f64::NEG_INFINITY);

    let determ = get_deterministic_transitions(
        states1,
        states2,
        &model.times,
        &tree,
        &last_tree,
        &recomb_branch,
        k,
        &coal_branch,
        coal_time,
    )?;

    for (i, state1) in states1.iter().enumerate() {
        let (node1, a) = (state1.node.as_str(), state1.time);

        if node1 == recomb_branch && a == k {
            // recomb-branch row: placeholder 50/50 split, pending a
            // proper probabilistic treatment
            let (stay, moved) = get_recomb_transition_switch(
                &tree,
                &last_tree,
                &recomb_branch,
                k,
                &coal_branch,
                states2,
                &model.times,
            )?;
            mat[[i, stay]] = 0.5f64.ln();
            mat[[i, moved]] = 0.5f64.ln();
        } else if node1 == coal_branch && a == coal_time {
            // recoal-branch row: the broken branch is gone on the right
            // side, so lineage counts shift by one
            let last_rid = last_tree.require(&recomb_branch)?;
            let last_parent = match last_tree.node(last_rid).parents.first().copied() {
                Some(p) => p,
                None => bail!("recombination branch '{recomb_branch}' has no parent"),
            };
            let node3 = if last_tree.node(last_parent).name == node1 {
                // the recomb breaks our branch; the other child carries
                // the identity forward
                let children = &last_tree.node(last_parent).children;
                let other = if children[1] == last_rid {
                    children[0]
                } else {
                    children[1]
                };
                last_tree.node(other).name.clone()
            } else {
                node1.to_string()
            };
            let last_parent_age = model.time_index(last_tree.node(last_parent).age)?;

            let rid = tree.require(&recomb_branch)?;
            let parent = match tree.node(rid).parents.first().copied() {
                Some(p) => p,
                None => bail!(
                    "recombination branch '{recomb_branch}' has no parent after the breakpoint"
                ),
            };
            let n3id = tree.require(&node3)?;
            if tree.node(n3id).parents.first() != Some(&parent) {
                bail!(
                    "branches '{recomb_branch}' and '{node3}' do not share a parent \
                     after the breakpoint:\n{}",
                    tree.render()
                );
            }
            let parent_name = tree.node(parent).name.clone();
            let parent_age = tree.node(parent).age;

            let mut row = vec![0.0f64; n2];
            for (j, state2) in states2.iter().enumerate() {
                let (node2, b) = (state2.node.as_str(), state2.time);
                let admissible = (node2 == recomb_branch && b >= k)
                    || (node2 == node3 && b == a)
                    || (node2 == parent_name && b == a);
                if !admissible {
                    continue;
                }

                let mut kbn = counts.nbranches[b] as f64;
                let mut kcn = counts.ncoals[b] as f64 + 1.0;
                if model.times[b] < parent_age {
                    kbn -= 1.0;
                    kcn -= 1.0;
                }
                if b < a {
                    kbn += 1.0;
                }
                let twon = 2.0 * model.popsizes[b];

                let mut s = 0.0;
                for m in k..b {
                    let nb = counts.nbranches[m] as f64 + 1.0
                        - if m < last_parent_age { 1.0 } else { 0.0 };
                    s += model.time_steps[m] * nb / (2.0 * model.popsizes[m]);
                }
                row[j] = (1.0 - (-model.time_steps[b] * kbn / twon).exp()) / kcn * (-s).exp();
            }

            let tot: f64 = row.iter().sum();
            for (j, &x) in row.iter().enumerate() {
                mat[[i, j]] = if tot > 0.0 && x > 0.0 {
                    (x / tot).ln()
                } else {
                    f64::NEG_INFINITY
                };
            }
        } else {
            match determ[i] {
                Some(j) => mat[[i, j]] = 0.0,
                None => {
                    return Err(InvariantError::UndefinedTransition {
                        node: node1.to_string(),
                        time: a,
                    }
                    .into())
                }
            }
        }
    }
    Ok(mat)
}
