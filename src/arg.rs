use std::collections::HashMap;

use anyhow::{bail, Result};

/// Arena index of a node within one [`Arg`]. Ids are never meaningful
/// across different `Arg` values; cross-tree identity is by node name.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Gene,
    Coal,
    Recomb,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub event: Event,
    pub age: f64,
    /// Genomic breakpoint for recomb nodes; 0 otherwise. Sites at
    /// positions `< pos` follow the first parent, the rest the second.
    pub pos: f64,
    pub children: Vec<NodeId>,
    pub parents: Vec<NodeId>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// An ancestral recombination graph over the genomic interval
/// `[start, end)`.
///
/// Nodes live in an arena and refer to each other by [`NodeId`]; the graph
/// exclusively owns its nodes. Marginal trees are extracted as independent
/// `Arg` copies and may be mutated freely without touching the source.
#[derive(Debug, Clone, Default)]
pub struct Arg {
    pub start: i64,
    pub end: i64,
    nodes: Vec<Option<Node>>,
    index: HashMap<String, NodeId>,
    next_auto: usize,
}

impl Arg {
    pub fn new(start: i64, end: i64) -> Self {
        Arg {
            start,
            end,
            nodes: Vec::new(),
            index: HashMap::new(),
            next_auto: 0,
        }
    }

    /// Create a node with no edges. When `name` is `None` an unused
    /// auto-generated name is assigned.
    pub fn new_node(&mut self, name: Option<&str>, event: Event, age: f64) -> NodeId {
        let name = match name {
            Some(n) => n.to_string(),
            None => loop {
                let candidate = format!("n{}", self.next_auto);
                self.next_auto += 1;
                if !self.index.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        let id = self.nodes.len();
        self.index.insert(name.clone(), id);
        self.nodes.push(Some(Node {
            name,
            event,
            age,
            pos: 0.0,
            children: Vec::new(),
            parents: Vec::new(),
        }));
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id].as_ref().expect("stale node id")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id].as_mut().expect("stale node id")
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn require(&self, name: &str) -> Result<NodeId> {
        match self.id_of(name) {
            Some(id) => Ok(id),
            None => bail!("unknown node name '{name}'"),
        }
    }

    /// Live node ids in arena order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
    }

    pub fn leaf_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids()
            .filter(move |&id| self.node(id).event == Event::Gene)
    }

    pub fn recomb_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids()
            .filter(move |&id| self.node(id).event == Event::Recomb)
    }

    pub fn n_leaves(&self) -> usize {
        self.leaf_ids().count()
    }

    pub fn leaf_names(&self) -> Vec<String> {
        self.leaf_ids().map(|id| self.node(id).name.clone()).collect()
    }

    /// Parent of `id` on the marginal tree at genomic position `pos`.
    pub fn get_local_parent(&self, id: NodeId, pos: f64) -> Option<NodeId> {
        let node = self.node(id);
        match node.event {
            Event::Recomb if node.parents.len() == 2 => {
                if pos < node.pos {
                    Some(node.parents[0])
                } else {
                    Some(node.parents[1])
                }
            }
            _ => node.parents.first().copied(),
        }
    }

    /// Children of `id` that attach to it on the marginal tree at `pos`.
    pub fn get_local_children(&self, id: NodeId, pos: f64) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &c in &self.node(id).children {
            if self.get_local_parent(c, pos) == Some(id) && !out.contains(&c) {
                out.push(c);
            }
        }
        out
    }

    /// Nodes of the marginal tree at `pos` in postorder (local root last).
    ///
    /// The tree runs from the sample leaves up to their most recent common
    /// ancestor at `pos` and includes pass-through single-lineage nodes
    /// (recombs crossed at this position).
    pub fn postorder_marginal_tree(&self, pos: f64) -> Vec<NodeId> {
        let leaves: Vec<NodeId> = self.leaf_ids().collect();
        if leaves.is_empty() {
            return Vec::new();
        }

        // Climb each leaf's local ancestor chain; the local root is the
        // first chain entry shared by every leaf.
        let mut count: HashMap<NodeId, usize> = HashMap::new();
        let mut chains: Vec<Vec<NodeId>> = Vec::with_capacity(leaves.len());
        for &leaf in &leaves {
            let mut chain = vec![leaf];
            let mut cur = leaf;
            while let Some(p) = self.get_local_parent(cur, pos) {
                chain.push(p);
                cur = p;
            }
            for &n in &chain {
                *count.entry(n).or_insert(0) += 1;
            }
            chains.push(chain);
        }
        let nleaves = leaves.len();
        let root = match chains[0].iter().copied().find(|n| count[n] == nleaves) {
            Some(r) => r,
            None => return Vec::new(),
        };

        let mut local: HashMap<NodeId, ()> = HashMap::new();
        for chain in &chains {
            for &n in chain {
                local.insert(n, ());
                if n == root {
                    break;
                }
            }
        }

        // Postorder DFS from the root over local children, keeping the
        // arena child order for determinism.
        let mut order = Vec::with_capacity(local.len());
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            let mut seen_children = Vec::new();
            for &c in &self.node(id).children {
                if local.contains_key(&c)
                    && self.get_local_parent(c, pos) == Some(id)
                    && !seen_children.contains(&c)
                {
                    seen_children.push(c);
                }
            }
            for &c in seen_children.iter().rev() {
                stack.push((c, false));
            }
        }
        order
    }

    /// Extract the marginal tree at `pos` as an independent `Arg`.
    ///
    /// Node names are preserved; edges are restricted to the local
    /// parent/child relations at `pos`.
    pub fn get_marginal_tree(&self, pos: f64) -> Arg {
        let order = self.postorder_marginal_tree(pos);
        let mut tree = Arg::new(self.start, self.end);
        tree.next_auto = self.next_auto;

        let mut map: HashMap<NodeId, NodeId> = HashMap::new();
        for &id in &order {
            let src = self.node(id);
            let nid = tree.new_node(Some(&src.name), src.event, src.age);
            tree.node_mut(nid).pos = src.pos;
            map.insert(id, nid);
        }
        for &id in &order {
            let children = self.get_local_children(id, pos);
            let pid = map[&id];
            for c in children {
                if let Some(&cid) = map.get(&c) {
                    tree.node_mut(pid).children.push(cid);
                    tree.node_mut(cid).parents.push(pid);
                }
            }
        }
        tree
    }

    /// Root of a tree-shaped `Arg` (the unique parentless node).
    pub fn tree_root(&self) -> Result<NodeId> {
        let mut roots = self.node_ids().filter(|&id| self.node(id).parents.is_empty());
        let root = match roots.next() {
            Some(r) => r,
            None => bail!("tree has no root"),
        };
        if roots.next().is_some() {
            bail!("tree has multiple roots");
        }
        Ok(root)
    }

    /// Sample leaves below `under` (or all of them) in a tree-shaped
    /// `Arg`, in a fixed DFS order.
    pub fn clade_leaves(&self, under: Option<NodeId>) -> Result<Vec<String>> {
        let top = match under {
            Some(id) => id,
            None => self.tree_root()?,
        };
        let mut out = Vec::new();
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.event == Event::Gene {
                out.push(node.name.clone());
            }
            for &c in node.children.iter().rev() {
                stack.push(c);
            }
        }
        Ok(out)
    }

    /// Splice a new node of the given event above `child` on the lineage
    /// local at query position `at`, as one atomic replace-child /
    /// replace-parent edge update. Returns the new node's id.
    pub fn splice_node_above(
        &mut self,
        child: NodeId,
        event: Event,
        age: f64,
        pos: f64,
        at: f64,
    ) -> NodeId {
        let id = self.new_node(None, event, age);
        if event == Event::Recomb {
            self.node_mut(id).pos = pos;
        }
        self.node_mut(id).children.push(child);

        match self.get_local_parent(child, at) {
            Some(parent) => {
                let slot = self
                    .node(child)
                    .parents
                    .iter()
                    .position(|&p| p == parent)
                    .expect("local parent not in parent list");
                self.node_mut(child).parents[slot] = id;
                let cslot = self
                    .node(parent)
                    .children
                    .iter()
                    .position(|&c| c == child)
                    .expect("child not in parent's child list");
                self.node_mut(parent).children[cslot] = id;
                self.node_mut(id).parents.push(parent);
            }
            None => {
                self.node_mut(child).parents.push(id);
            }
        }
        id
    }

    /// Remove pass-through nodes (one child, at most one parent) by
    /// splicing their edges together. Intended for marginal-tree copies.
    pub fn remove_single_lineages(&mut self) {
        let ids: Vec<NodeId> = self.node_ids().collect();
        for id in ids {
            let node = self.node(id);
            if node.children.len() != 1 || node.parents.len() > 1 {
                continue;
            }
            let child = node.children[0];
            match node.parents.first().copied() {
                Some(parent) => {
                    let slot = self
                        .node(child)
                        .parents
                        .iter()
                        .position(|&p| p == id)
                        .expect("child does not list spliced parent");
                    self.node_mut(child).parents[slot] = parent;
                    let cslot = self
                        .node(parent)
                        .children
                        .iter()
                        .position(|&c| c == id)
                        .expect("parent does not list spliced child");
                    self.node_mut(parent).children[cslot] = child;
                }
                None => {
                    self.node_mut(child).parents.retain(|&p| p != id);
                }
            }
            self.remove_node(id);
        }
    }

    fn remove_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes[id].take() {
            self.index.remove(&node.name);
        }
    }

    /// Human-readable dump used in invariant diagnostics: one line per
    /// node from each root down, indented by depth.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let roots: Vec<NodeId> = self
            .node_ids()
            .filter(|&id| self.node(id).parents.is_empty())
            .collect();
        for root in roots {
            let mut stack = vec![(root, 0usize)];
            while let Some((id, depth)) = stack.pop() {
                let node = self.node(id);
                let kind = match node.event {
                    Event::Gene => "gene",
                    Event::Coal => "coal",
                    Event::Recomb => "recomb",
                };
                out.push_str(&"  ".repeat(depth));
                out.push_str(&format!("{} {} age={}", node.name, kind, node.age));
                if node.event == Event::Recomb {
                    out.push_str(&format!(" pos={}", node.pos));
                }
                out.push('\n');
                for &c in node.children.iter().rev() {
                    stack.push((c, depth + 1));
                }
            }
        }
        out
    }
}

/// A single-sample "trunk" genealogy spanning `[start, end)`.
pub fn make_trunk_arg(start: i64, end: i64, name: &str) -> Arg {
    let mut arg = Arg::new(start, end);
    arg.new_node(Some(name), Event::Gene, 0.0);
    arg
}
