//! Mux-Evolve: genetic programming search for boolean multiplexer circuits.
//!
//! Candidate solutions are logical-expression trees over the multiplexer's
//! input lines, evolved via fitness-proportionate selection, elitist
//! duplication, subtree crossover, and subtree-replacement mutation.

pub mod evolution;
pub mod fitness;

use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::fitness::FitnessCase;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structural corruption discovered while interpreting a tree. Always fatal:
/// a corrupted tree indicates a logic defect, never a transient condition.
#[derive(Debug, thiserror::Error)]
pub enum GpError {
    #[error("terminal index {index} out of range for {lines} multiplexer lines")]
    TerminalOutOfRange { index: usize, lines: usize },

    #[error("{op} node has {found} children, expected {expected}")]
    ArityMismatch {
        op: Op,
        found: usize,
        expected: usize,
    },
}

// ---------------------------------------------------------------------------
// Operator vocabulary
// ---------------------------------------------------------------------------

/// A boolean operator in the expression language. Arities are fixed per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    And,
    Or,
    Not,
    If,
}

impl Op {
    /// Number of children a node carrying this operator must have.
    pub fn arity(self) -> usize {
        match self {
            Op::Not => 1,
            Op::And | Op::Or => 2,
            Op::If => 3,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::And => write!(f, "and"),
            Op::Or => write!(f, "or"),
            Op::Not => write!(f, "not"),
            Op::If => write!(f, "if"),
        }
    }
}

// ---------------------------------------------------------------------------
// Program tree
// ---------------------------------------------------------------------------

/// Index of a node within its tree's arena.
pub type NodeId = usize;

/// Payload of a tree node: either a terminal reading one multiplexer line,
/// or an operator applied to an ordered list of children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Reads the multiplexer line with this index (address lines first,
    /// then data lines).
    Terminal(usize),
    /// An operator over `op.arity()` children, left to right.
    Function { op: Op, children: Vec<NodeId> },
}

/// One node of a program tree.
///
/// `subtree_size` counts the nodes in the subtree rooted here, this node
/// included; it is kept exact across every structural edit. `parent` is a
/// non-owning back-reference, `None` only for the root.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub subtree_size: usize,
    pub parent: Option<NodeId>,
}

/// A program tree: an arena of nodes plus the id of the root.
///
/// The arena owns every node exclusively; subtrees are never shared between
/// two live trees. Structural edits (`replace_at`) splice a detached donor in
/// and then compact, so the arena always holds exactly the reachable nodes in
/// pre-order.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    // -- construction -------------------------------------------------------

    /// Build a single-terminal tree reading line `index`.
    pub fn leaf(index: usize) -> Tree {
        Tree {
            nodes: vec![Node {
                kind: NodeKind::Terminal(index),
                subtree_size: 1,
                parent: None,
            }],
            root: 0,
        }
    }

    /// Build a function node over the given child trees.
    /// The child count must match the operator's arity.
    pub fn branch(op: Op, children: Vec<Tree>) -> Tree {
        assert_eq!(
            children.len(),
            op.arity(),
            "{op} node requires {} children",
            op.arity()
        );
        let size = 1 + children.iter().map(Tree::size).sum::<usize>();
        let mut tree = Tree {
            nodes: vec![Node {
                kind: NodeKind::Terminal(0),
                subtree_size: size,
                parent: None,
            }],
            root: 0,
        };
        let ids: Vec<NodeId> = children
            .iter()
            .map(|child| tree.graft(child, child.root, Some(0)))
            .collect();
        tree.nodes[0].kind = NodeKind::Function { op, children: ids };
        tree
    }

    /// Generate a random tree with exactly `target_size` nodes. Terminals are
    /// drawn uniformly from `[0, num_lines)`.
    ///
    /// A budget of 0 is a programming invariant violation, not runtime input.
    pub fn generate(target_size: usize, num_lines: usize, rng: &mut impl Rng) -> Tree {
        let mut tree = Tree {
            nodes: Vec::with_capacity(target_size),
            root: 0,
        };
        tree.root = tree.generate_node(target_size, None, num_lines, rng);
        tree
    }

    fn generate_node(
        &mut self,
        size: usize,
        parent: Option<NodeId>,
        num_lines: usize,
        rng: &mut impl Rng,
    ) -> NodeId {
        assert!(size >= 1, "tree generation requires a positive node budget");

        let id = self.nodes.len();
        self.nodes.push(Node {
            kind: NodeKind::Terminal(0),
            subtree_size: size,
            parent,
        });

        let kind = match size {
            1 => NodeKind::Terminal(rng.gen_range(0..num_lines)),
            2 => NodeKind::Function {
                op: Op::Not,
                children: vec![self.generate_node(1, Some(id), num_lines, rng)],
            },
            3 => NodeKind::Function {
                op: if rng.gen_bool(0.5) { Op::And } else { Op::Or },
                children: vec![
                    self.generate_node(1, Some(id), num_lines, rng),
                    self.generate_node(1, Some(id), num_lines, rng),
                ],
            },
            _ => {
                // One node spent here; the rest is split among the children.
                let budget = size - 1;
                match rng.gen_range(0..3) {
                    0 => NodeKind::Function {
                        op: Op::Not,
                        children: vec![self.generate_node(budget, Some(id), num_lines, rng)],
                    },
                    1 => {
                        let parts = split_budget(budget, 2, rng);
                        NodeKind::Function {
                            op: if rng.gen_bool(0.5) { Op::And } else { Op::Or },
                            children: parts
                                .into_iter()
                                .map(|p| self.generate_node(p, Some(id), num_lines, rng))
                                .collect(),
                        }
                    }
                    _ => {
                        let parts = split_budget(budget, 3, rng);
                        NodeKind::Function {
                            op: Op::If,
                            children: parts
                                .into_iter()
                                .map(|p| self.generate_node(p, Some(id), num_lines, rng))
                                .collect(),
                        }
                    }
                }
            }
        };
        self.nodes[id].kind = kind;
        id
    }

    // -- read-only structure ------------------------------------------------

    /// Id of the root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total node count of the tree.
    pub fn size(&self) -> usize {
        self.nodes[self.root].subtree_size
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn subtree_size(&self, id: NodeId) -> usize {
        self.nodes[id].subtree_size
    }

    /// Return the id of the `n`th node under pre-order numbering: a parent
    /// precedes its children, each child's subtree is consumed fully before
    /// the next sibling begins. Position 0 is the root.
    ///
    /// `n < self.size()` is a caller contract.
    pub fn node_at(&self, n: usize) -> NodeId {
        debug_assert!(n < self.size(), "node index {n} out of range");
        self.node_at_rec(self.root, n)
    }

    fn node_at_rec(&self, id: NodeId, n: usize) -> NodeId {
        if n == 0 {
            return id;
        }
        let mut n = n - 1;
        if let NodeKind::Function { children, .. } = &self.nodes[id].kind {
            for &child in children {
                let sz = self.nodes[child].subtree_size;
                if n < sz {
                    return self.node_at_rec(child, n);
                }
                n -= sz;
            }
        }
        unreachable!("node index exceeds subtree size");
    }

    // -- structural edits ---------------------------------------------------

    /// Deep-copy the subtree rooted at `id` into a new detached tree.
    /// The copy shares no node with this tree.
    pub fn subtree_copy(&self, id: NodeId) -> Tree {
        let mut copy = Tree {
            nodes: Vec::with_capacity(self.nodes[id].subtree_size),
            root: 0,
        };
        copy.root = copy.graft(self, id, None);
        copy
    }

    /// Copy `donor`'s subtree at `donor_id` into this arena in pre-order,
    /// returning the id of the copied root.
    fn graft(&mut self, donor: &Tree, donor_id: NodeId, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind: NodeKind::Terminal(0),
            subtree_size: donor.nodes[donor_id].subtree_size,
            parent,
        });
        let kind = match &donor.nodes[donor_id].kind {
            NodeKind::Terminal(index) => NodeKind::Terminal(*index),
            NodeKind::Function { op, children } => NodeKind::Function {
                op: *op,
                children: children
                    .iter()
                    .map(|&c| self.graft(donor, c, Some(id)))
                    .collect(),
            },
        };
        self.nodes[id].kind = kind;
        id
    }

    /// Recompute the cached subtree sizes of every ancestor of `id`, walking
    /// parent links up to the root. Must run after any edit that changed the
    /// shape beneath an ancestor.
    pub fn resize(&mut self, id: NodeId) {
        let mut cur = self.nodes[id].parent;
        while let Some(p) = cur {
            let size = match &self.nodes[p].kind {
                NodeKind::Terminal(_) => 1,
                NodeKind::Function { children, .. } => {
                    1 + children
                        .iter()
                        .map(|&c| self.nodes[c].subtree_size)
                        .sum::<usize>()
                }
            };
            self.nodes[p].subtree_size = size;
            cur = self.nodes[p].parent;
        }
    }

    /// Replace the subtree rooted at `id` with a copy of `donor`, rewiring
    /// the parent's child slot and the spliced root's parent link, then
    /// resizing ancestors and compacting the arena.
    ///
    /// Replacing the root is the explicit whole-tree case: the tree simply
    /// becomes a copy of the donor.
    pub fn replace_at(&mut self, id: NodeId, donor: &Tree) {
        match self.nodes[id].parent {
            None => {
                *self = donor.subtree_copy(donor.root);
            }
            Some(parent) => {
                let spliced = self.graft(donor, donor.root, Some(parent));
                if let NodeKind::Function { children, .. } = &mut self.nodes[parent].kind {
                    for slot in children.iter_mut() {
                        if *slot == id {
                            *slot = spliced;
                            break;
                        }
                    }
                }
                self.resize(spliced);
                self.compact();
            }
        }
    }

    /// Drop unreachable nodes by rebuilding the arena from the root.
    fn compact(&mut self) {
        *self = self.subtree_copy(self.root);
    }

    // -- interpretation -----------------------------------------------------

    /// Interpret the tree against one fitness case, producing the circuit's
    /// output bit.
    pub fn evaluate(&self, case: &FitnessCase) -> Result<bool, GpError> {
        self.eval_node(self.root, case)
    }

    fn eval_node(&self, id: NodeId, case: &FitnessCase) -> Result<bool, GpError> {
        match &self.nodes[id].kind {
            NodeKind::Terminal(index) => case.line(*index),
            NodeKind::Function { op, children } => match (op, children.as_slice()) {
                (Op::And, &[a, b]) => Ok(self.eval_node(a, case)? & self.eval_node(b, case)?),
                (Op::Or, &[a, b]) => Ok(self.eval_node(a, case)? | self.eval_node(b, case)?),
                (Op::Not, &[a]) => Ok(!self.eval_node(a, case)?),
                // A false condition selects the second child, true the third.
                (Op::If, &[cond, when_false, when_true]) => {
                    if self.eval_node(cond, case)? {
                        self.eval_node(when_true, case)
                    } else {
                        self.eval_node(when_false, case)
                    }
                }
                (&op, children) => Err(GpError::ArityMismatch {
                    op,
                    found: children.len(),
                    expected: op.arity(),
                }),
            },
        }
    }

    fn fmt_node(&self, id: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.nodes[id].kind {
            NodeKind::Terminal(index) => write!(f, "x{index}"),
            NodeKind::Function { op, children } => {
                write!(f, "({op}")?;
                for &child in children {
                    write!(f, " ")?;
                    self.fmt_node(child, f)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Structural equality: same shape, same operators, same terminal indices.
/// Arena layout and node identity are irrelevant.
impl PartialEq for Tree {
    fn eq(&self, other: &Tree) -> bool {
        node_eq(self, self.root, other, other.root)
    }
}

impl Eq for Tree {}

fn node_eq(a: &Tree, a_id: NodeId, b: &Tree, b_id: NodeId) -> bool {
    match (&a.nodes[a_id].kind, &b.nodes[b_id].kind) {
        (NodeKind::Terminal(i), NodeKind::Terminal(j)) => i == j,
        (
            NodeKind::Function { op: oa, children: ca },
            NodeKind::Function { op: ob, children: cb },
        ) => {
            oa == ob
                && ca.len() == cb.len()
                && ca
                    .iter()
                    .zip(cb.iter())
                    .all(|(&x, &y)| node_eq(a, x, b, y))
        }
        _ => false,
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(self.root, f)
    }
}

/// Split `total` into `parts` parts that each get at least 1 and sum to
/// `total`. Parts are shuffled so the first child is not systematically
/// favored by the sequential draws.
fn split_budget(total: usize, parts: usize, rng: &mut impl Rng) -> Vec<usize> {
    debug_assert!(total >= parts, "budget {total} too small for {parts} parts");
    let mut out = Vec::with_capacity(parts);
    let mut remaining = total;
    for reserved in (1..parts).rev() {
        let take = rng.gen_range(1..=remaining - reserved);
        out.push(take);
        remaining -= take;
    }
    out.push(remaining);
    out.shuffle(rng);
    out
}

// ---------------------------------------------------------------------------
// Individual
// ---------------------------------------------------------------------------

/// One member of the population: a program tree plus its per-generation
/// fitness score (count of fitness cases answered correctly).
#[derive(Debug, Clone)]
pub struct Individual {
    pub tree: Tree,
    pub fitness: usize,
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::{NodeId, NodeKind, Tree};

    /// Assert the size and parent/child invariants over the whole tree.
    pub fn check_invariants(tree: &Tree) {
        check_node(tree, tree.root(), None);
    }

    fn check_node(tree: &Tree, id: NodeId, expected_parent: Option<NodeId>) {
        assert_eq!(
            tree.parent(id),
            expected_parent,
            "parent link mismatch at node {id}"
        );
        match tree.kind(id) {
            NodeKind::Terminal(_) => {
                assert_eq!(tree.subtree_size(id), 1, "terminal {id} must have size 1");
            }
            NodeKind::Function { op, children } => {
                assert_eq!(children.len(), op.arity(), "arity mismatch at node {id}");
                let sum: usize = children.iter().map(|&c| tree.subtree_size(c)).sum();
                assert_eq!(
                    tree.subtree_size(id),
                    1 + sum,
                    "stale subtree size at node {id}"
                );
                for &child in children {
                    check_node(tree, child, Some(id));
                }
            }
        }
    }

    /// Collect node ids in pre-order by direct recursion, independent of
    /// `node_at`.
    pub fn preorder_ids(tree: &Tree) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(tree.size());
        walk(tree, tree.root(), &mut out);
        out
    }

    fn walk(tree: &Tree, id: NodeId, out: &mut Vec<NodeId>) {
        out.push(id);
        if let NodeKind::Function { children, .. } = tree.kind(id) {
            for &child in children {
                walk(tree, child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{check_invariants, preorder_ids};
    use super::*;
    use crate::fitness::Multiplexer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generate_exact_size() {
        let mut rng = StdRng::seed_from_u64(7);
        for seed_round in 0..20 {
            for k in 1..=40 {
                let tree = Tree::generate(k, 6, &mut rng);
                assert_eq!(
                    tree.size(),
                    k,
                    "round {seed_round}: requested {k} nodes, got {}",
                    tree.size()
                );
                check_invariants(&tree);
            }
        }
    }

    #[test]
    #[should_panic(expected = "positive node budget")]
    fn test_generate_zero_budget_panics() {
        let mut rng = StdRng::seed_from_u64(0);
        let _ = Tree::generate(0, 6, &mut rng);
    }

    #[test]
    fn test_copy_fidelity() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let tree = Tree::generate(rng.gen_range(1..30), 6, &mut rng);
            let copy = tree.subtree_copy(tree.root());
            assert_eq!(copy, tree);
            assert_eq!(copy.size(), tree.size());
            check_invariants(&copy);
        }
    }

    #[test]
    fn test_subtree_copy_is_detached() {
        let tree = Tree::branch(
            Op::And,
            vec![Tree::leaf(0), Tree::branch(Op::Not, vec![Tree::leaf(1)])],
        );
        let sub = tree.subtree_copy(tree.node_at(2));
        assert_eq!(sub, Tree::branch(Op::Not, vec![Tree::leaf(1)]));
        assert_eq!(sub.parent(sub.root()), None);
        check_invariants(&sub);
    }

    #[test]
    fn test_node_at_visits_preorder() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..20 {
            let tree = Tree::generate(rng.gen_range(1..40), 6, &mut rng);
            let expected = preorder_ids(&tree);
            let visited: Vec<NodeId> = (0..tree.size()).map(|i| tree.node_at(i)).collect();
            assert_eq!(visited, expected);
        }
    }

    #[test]
    fn test_node_at_root_is_zero_index() {
        let mut rng = StdRng::seed_from_u64(5);
        let tree = Tree::generate(17, 6, &mut rng);
        assert_eq!(tree.node_at(0), tree.root());
    }

    #[test]
    fn test_replace_at_interior() {
        let mut tree = Tree::branch(
            Op::If,
            vec![Tree::leaf(0), Tree::leaf(2), Tree::leaf(3)],
        );
        let donor = Tree::branch(Op::Or, vec![Tree::leaf(4), Tree::leaf(5)]);
        // Replace the second child (pre-order index 2).
        let target = tree.node_at(2);
        tree.replace_at(target, &donor);
        assert_eq!(tree.size(), 6);
        check_invariants(&tree);
        assert_eq!(tree.to_string(), "(if x0 (or x4 x5) x3)");
    }

    #[test]
    fn test_replace_at_root_is_whole_tree() {
        let mut tree = Tree::branch(Op::Not, vec![Tree::leaf(0)]);
        let donor = Tree::leaf(3);
        tree.replace_at(tree.root(), &donor);
        assert_eq!(tree, donor);
        check_invariants(&tree);
    }

    #[test]
    fn test_evaluate_not() {
        let mux = Multiplexer::new(2);
        let tree = Tree::branch(Op::Not, vec![Tree::leaf(0)]);
        for case in mux.fitness_table() {
            let address0 = case.line(0).unwrap();
            assert_eq!(tree.evaluate(&case).unwrap(), !address0);
        }
    }

    #[test]
    fn test_evaluate_if_branch_selection() {
        let mux = Multiplexer::new(2);
        // (if x0 x2 x3): false condition selects x2, true selects x3.
        let tree = Tree::branch(
            Op::If,
            vec![Tree::leaf(0), Tree::leaf(2), Tree::leaf(3)],
        );
        for case in mux.fitness_table() {
            let expected = if case.line(0).unwrap() {
                case.line(3).unwrap()
            } else {
                case.line(2).unwrap()
            };
            assert_eq!(tree.evaluate(&case).unwrap(), expected);
        }
    }

    #[test]
    fn test_evaluate_and_or() {
        let mux = Multiplexer::new(2);
        let and_tree = Tree::branch(Op::And, vec![Tree::leaf(0), Tree::leaf(1)]);
        let or_tree = Tree::branch(Op::Or, vec![Tree::leaf(0), Tree::leaf(1)]);
        for case in mux.fitness_table() {
            let (a, b) = (case.line(0).unwrap(), case.line(1).unwrap());
            assert_eq!(and_tree.evaluate(&case).unwrap(), a & b);
            assert_eq!(or_tree.evaluate(&case).unwrap(), a | b);
        }
    }

    #[test]
    fn test_evaluate_terminal_out_of_range() {
        let mux = Multiplexer::new(2); // 6 lines: x0..x5
        let tree = Tree::leaf(9);
        let case = &mux.fitness_table()[0];
        match tree.evaluate(case) {
            Err(GpError::TerminalOutOfRange { index: 9, lines: 6 }) => {}
            other => panic!("expected TerminalOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn test_branch_display() {
        let tree = Tree::branch(
            Op::If,
            vec![
                Tree::leaf(0),
                Tree::branch(Op::Not, vec![Tree::leaf(2)]),
                Tree::leaf(3),
            ],
        );
        assert_eq!(tree.to_string(), "(if x0 (not x2) x3)");
    }

    #[test]
    #[should_panic(expected = "requires 2 children")]
    fn test_branch_arity_asserted() {
        let _ = Tree::branch(Op::And, vec![Tree::leaf(0)]);
    }

    #[test]
    fn test_split_budget_parts() {
        let mut rng = StdRng::seed_from_u64(3);
        for total in 3..30 {
            for parts in 2..=3 {
                let split = split_budget(total, parts, &mut rng);
                assert_eq!(split.len(), parts);
                assert_eq!(split.iter().sum::<usize>(), total);
                assert!(split.iter().all(|&p| p >= 1));
            }
        }
    }
}
