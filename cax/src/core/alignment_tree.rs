//! Arena-backed alignment tree with rounds bound to nodes by name.
//!
//! Nodes live in a flat `Vec` addressed by [`NodeId`]; parent links are plain
//! indices so there are no ownership cycles. Bound rounds are stored as
//! [`RoundId`] indices into [`Plan::rounds`], which lets the planner observe
//! round edits without rebuilding the tree.

use std::collections::{HashMap, HashSet};

use crate::core::newick::{NewickNode, parse_newick};
use crate::error::NewickError;
use crate::plan::{Plan, RoundId};

/// Index of a node within an [`AlignmentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentNode {
    pub name: String,
    pub length: Option<f64>,
    pub support: Option<f64>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub round: Option<RoundId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentTree {
    nodes: Vec<AlignmentNode>,
    root: NodeId,
    by_name: HashMap<String, NodeId>,
}

impl AlignmentTree {
    /// Parse `text` and bind the plan's rounds.
    pub fn build(text: &str, plan: &Plan) -> Result<Self, NewickError> {
        let mut tree = Self::from_newick(parse_newick(text)?);
        tree.bind_rounds(plan);
        Ok(tree)
    }

    /// Flatten a parsed Newick tree into an arena with no rounds bound.
    pub fn from_newick(root: NewickNode) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            by_name: HashMap::new(),
        };
        tree.root = tree.insert(root, None);
        tree
    }

    fn insert(&mut self, node: NewickNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        if !node.name.is_empty() {
            self.by_name.entry(node.name.clone()).or_insert(id);
        }
        self.nodes.push(AlignmentNode {
            name: node.name,
            length: node.length,
            support: node.support,
            children: Vec::new(),
            parent,
            round: None,
        });
        for child in node.children {
            let child_id = self.insert(child, Some(id));
            self.nodes[id.0].children.push(child_id);
        }
        id
    }

    /// Bind each round to the node named by its `root`.
    ///
    /// The first declared round wins when several share a root. Unmatched
    /// rounds go to an unnamed, unbound root when there is exactly one of them;
    /// otherwise each becomes a synthetic leaf child of the root.
    pub fn bind_rounds(&mut self, plan: &Plan) {
        let mut attached: HashSet<&str> = HashSet::new();
        let mut unmatched: Vec<RoundId> = Vec::new();
        for (idx, round) in plan.rounds.iter().enumerate() {
            if attached.contains(round.root.as_str()) {
                continue;
            }
            match self.find(&round.root) {
                Some(node) if self.nodes[node.0].round.is_none() => {
                    self.nodes[node.0].round = Some(RoundId(idx));
                    attached.insert(round.root.as_str());
                }
                _ => unmatched.push(RoundId(idx)),
            }
        }

        let root = self.root;
        if let [only] = unmatched.as_slice()
            && self.nodes[root.0].name.is_empty()
            && self.nodes[root.0].round.is_none()
        {
            self.nodes[root.0].round = Some(*only);
            return;
        }

        for id in unmatched {
            let name = &plan.rounds[id.0].root;
            let exists = self.nodes[root.0]
                .children
                .iter()
                .any(|child| &self.nodes[child.0].name == name);
            if exists {
                continue;
            }
            let child = self.insert(NewickNode::leaf(name.clone()), Some(root));
            self.nodes[root.0].children.push(child);
            self.nodes[child.0].round = Some(id);
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &AlignmentNode {
        &self.nodes[id.0]
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Pre-order node ids starting at the root.
    pub fn walk(&self) -> Vec<NodeId> {
        self.walk_from(self.root)
    }

    /// Pre-order node ids of the subtree rooted at `start`.
    pub fn walk_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        out
    }

    /// Bound rounds in pre-order.
    pub fn iter_rounds(&self) -> impl Iterator<Item = RoundId> + '_ {
        self.subtree_rounds(self.root)
    }

    pub fn subtree_rounds(&self, start: NodeId) -> impl Iterator<Item = RoundId> + '_ {
        self.walk_from(start)
            .into_iter()
            .filter_map(|id| self.nodes[id.0].round)
    }

    pub fn has_round(&self, start: NodeId) -> bool {
        self.subtree_rounds(start).next().is_some()
    }

    /// Ancestors of `id`, nearest first. Excludes `id` itself.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.nodes[id.0].parent,
        }
    }
}

pub struct Ancestors<'a> {
    tree: &'a AlignmentTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.nodes[current.0].parent;
        Some(current)
    }
}
