//! Single tensor assignments.
//!
//! A [`Term`] is one statement `lhs = coeff * V1 * V2 * ...` together
//! with its derived contraction tree and per-step scaling histograms.
//! Operands are shared nodes of the expression DAG; a term never
//! mutates shared operand state, it rebuilds.

use crate::label::Label;
use crate::line::Line;
use crate::linkage::{Linkage, Node};
use crate::options::Options;
use crate::scaling::ScalingMap;
use crate::shape::Shape;
use crate::vertex::Vertex;
use itertools::Itertools;
use petgraph::unionfind::UnionFind;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One assignment or accumulation statement.
#[derive(Debug, Clone)]
pub struct Term {
    lhs: Node,
    coefficient: f64,
    rhs: Vec<Node>,
    /// Antisymmetrization operators `P(x,y)` applied to the result.
    perm_ops: Vec<(Label, Label)>,
    term_linkage: Option<Arc<Linkage>>,
    flop_map: ScalingMap,
    mem_map: ScalingMap,
    /// First statement for an output tensor assigns; the rest
    /// accumulate.
    pub is_assignment: bool,
    pub comments: Vec<String>,
}

impl Term {
    /// Build a term with the left-to-right contraction tree. Call
    /// [`Term::reorder`] to optimize the tree.
    pub fn new(lhs: Node, coefficient: f64, rhs: Vec<Node>) -> Self {
        let mut term = Self {
            lhs,
            coefficient,
            rhs,
            perm_ops: Vec::new(),
            term_linkage: None,
            flop_map: ScalingMap::new(),
            mem_map: ScalingMap::new(),
            is_assignment: false,
            comments: Vec::new(),
        };
        term.rebuild_default_tree();
        term
    }

    pub fn with_perm_ops(mut self, perm_ops: Vec<(Label, Label)>) -> Self {
        self.perm_ops = perm_ops;
        self
    }

    /// Declaration of a materialized intermediate: `tmp = <tree>`.
    pub fn declaration(linkage: Arc<Linkage>) -> Self {
        let rhs: Vec<Node> = linkage.to_vector(false).iter().cloned().collect();
        let mut term = Self {
            lhs: Node::Linkage(Arc::clone(&linkage)),
            coefficient: 1.0,
            rhs,
            perm_ops: Vec::new(),
            term_linkage: Some(linkage),
            flop_map: ScalingMap::new(),
            mem_map: ScalingMap::new(),
            is_assignment: true,
            comments: Vec::new(),
        };
        term.compute_scaling();
        term
    }

    pub fn lhs(&self) -> &Node {
        &self.lhs
    }

    pub fn set_lhs(&mut self, lhs: Node) {
        self.lhs = lhs;
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    pub fn set_coefficient(&mut self, coefficient: f64) {
        self.coefficient = coefficient;
    }

    pub fn rhs(&self) -> &[Node] {
        &self.rhs
    }

    pub fn perm_ops(&self) -> &[(Label, Label)] {
        &self.perm_ops
    }

    pub fn term_linkage(&self) -> Option<&Arc<Linkage>> {
        self.term_linkage.as_ref()
    }

    pub fn flop_map(&self) -> &ScalingMap {
        &self.flop_map
    }

    pub fn mem_map(&self) -> &ScalingMap {
        &self.mem_map
    }

    /// External lines of the contraction tree (the lines of the lhs).
    pub fn external_lines(&self) -> Vec<Line> {
        match &self.term_linkage {
            Some(l) => l.lines().to_vec(),
            None => self
                .rhs
                .first()
                .map(|n| n.lines().to_vec())
                .unwrap_or_default(),
        }
    }

    fn rebuild_default_tree(&mut self) {
        self.term_linkage = if self.rhs.len() >= 2 {
            Some(Linkage::link(&self.rhs))
        } else {
            None
        };
        self.compute_scaling();
    }

    /// Recompute the scaling histograms from the current tree.
    pub fn compute_scaling(&mut self) {
        self.flop_map.clear();
        self.mem_map.clear();
        match &self.term_linkage {
            Some(root) => {
                accumulate_tree(root, true, &mut self.flop_map, &mut self.mem_map);
            }
            None => {
                if let Some(op) = self.rhs.first() {
                    self.flop_map.add(op.shape(), 1);
                    self.mem_map.add(op.shape(), 1);
                }
            }
        }
    }

    /// Reorder the contraction into the pairwise tree minimizing the
    /// lexicographic cost (flop shape, then memory shape) per step.
    /// Trees whose intermediates exceed `max_shape` fall back to the
    /// original left-to-right association.
    pub fn reorder(&mut self, options: &Options) {
        if self.rhs.len() < 2 {
            self.compute_scaling();
            return;
        }

        let mut ops: Vec<Node> = self.rhs.clone();
        let mut intermediates: Vec<Shape> = Vec::new();

        while ops.len() > 1 {
            let mut best: Option<(Shape, Shape, Shape, usize, usize)> = None;
            for (i, j) in (0..ops.len()).tuple_combinations() {
                let trial = Linkage::new(ops[i].clone(), ops[j].clone(), false);
                let key = (
                    trial.flop_shape(),
                    trial.mem_shape(),
                    trial.flop_shape() + trial.mem_shape(),
                    i,
                    j,
                );
                if best.as_ref().map(|b| key < *b).unwrap_or(true) {
                    best = Some(key);
                }
            }
            let (_, _, _, i, j) = best.expect("at least one pair");
            let merged = Node::linkage(Linkage::new(ops[i].clone(), ops[j].clone(), false));
            if ops.len() > 2 {
                // only true intermediates are bounded; the root's shape
                // is fixed by the lhs
                intermediates.push(merged.shape());
            }
            ops.remove(j);
            ops[i] = merged;
        }

        let within_bounds = intermediates
            .iter()
            .all(|s| s.fits_within(&options.max_shape));

        self.term_linkage = if within_bounds {
            match ops.pop() {
                Some(Node::Linkage(l)) => Some(l),
                _ => unreachable!("two or more operands always produce a linkage"),
            }
        } else {
            Some(Linkage::link(&self.rhs))
        };
        self.compute_scaling();
    }

    /// Try to replace one occurrence of `candidate` in this term.
    /// Returns the substituted, reordered term, or `None` when the
    /// candidate does not occur.
    pub fn try_substitute(&self, candidate: &Arc<Linkage>, options: &Options) -> Option<Term> {
        let width = candidate.to_vector(false).len();
        if self.rhs.len() < width || width < 2 {
            return None;
        }

        for subset in (0..self.rhs.len()).combinations(width) {
            if !options.allow_nesting && subset.iter().any(|&i| self.rhs[i].is_temp()) {
                continue;
            }
            if !subset_connected(&self.rhs, &subset) {
                continue;
            }

            let mut ops: Vec<Node> = subset.iter().map(|&i| self.rhs[i].clone()).collect();
            ops.sort_by_cached_key(|n| n.sort_key());
            let built = Linkage::link(&ops);

            if let Some(odd) = candidate.matches_with_renaming(&built) {
                let replacement =
                    Node::linkage(built.with_id(candidate.id(), candidate.is_reused()));
                let mut new_rhs: Vec<Node> = Vec::with_capacity(self.rhs.len() - width + 1);
                for (i, op) in self.rhs.iter().enumerate() {
                    if i == subset[0] {
                        new_rhs.push(replacement.clone());
                    } else if !subset.contains(&i) {
                        new_rhs.push(op.clone());
                    }
                }
                let mut term = self.clone();
                term.rhs = new_rhs;
                if odd {
                    term.coefficient = -term.coefficient;
                }
                term.rebuild_default_tree();
                term.reorder(options);
                return Some(term);
            }
        }
        None
    }

    /// Replace every occurrence of `candidate`, returning the number of
    /// replacements made.
    pub fn substitute(&mut self, candidate: &Arc<Linkage>, options: &Options) -> usize {
        let mut count = 0;
        while let Some(next) = self.try_substitute(candidate, options) {
            *self = next;
            count += 1;
        }
        count
    }

    /// Expand the antisymmetrization operators into explicit signed
    /// terms: `P(x,y) X = X - X(x<->y)`.
    pub fn expand_permutations(&self) -> Vec<Term> {
        if self.perm_ops.is_empty() {
            return vec![self.clone()];
        }
        let mut base = self.clone();
        base.perm_ops.clear();
        let mut expanded = vec![base];
        for &(x, y) in &self.perm_ops {
            let mut next = Vec::with_capacity(expanded.len() * 2);
            for term in expanded {
                let mut swapped = term.clone();
                swapped.rhs = term
                    .rhs
                    .iter()
                    .map(|n| rename_node(n, &swap_map(x, y)))
                    .collect();
                swapped.coefficient = -swapped.coefficient;
                swapped.rebuild_default_tree();
                next.push(term);
                next.push(swapped);
            }
            expanded = next;
        }
        expanded
    }

    /// Inline every materialized intermediate back into a flat operand
    /// list (used to check that an optimized program still computes the
    /// input expression).
    pub fn expanded_operands(&self) -> Vec<Node> {
        let mut out = Vec::with_capacity(self.rhs.len());
        for op in &self.rhs {
            match op {
                Node::Vertex(_) => out.push(op.clone()),
                Node::Linkage(l) => out.extend(l.to_vector(true).iter().cloned()),
            }
        }
        out
    }
}

/// Add each tree node's shapes to the histograms. Materialized
/// intermediates below the root are opaque leaves: their cost is paid
/// by their declaration.
fn accumulate_tree(root: &Arc<Linkage>, is_root: bool, flop: &mut ScalingMap, mem: &mut ScalingMap) {
    if !is_root && root.is_temp() {
        return;
    }
    flop.add(root.flop_shape(), 1);
    mem.add(root.mem_shape(), 1);
    for child in [root.left(), root.right()] {
        if let Node::Linkage(l) = child {
            accumulate_tree(l, false, flop, mem);
        }
    }
}

/// Whether the chosen operands form one connected contraction via
/// shared lines.
pub(crate) fn subset_connected(ops: &[Node], subset: &[usize]) -> bool {
    if subset.len() <= 1 {
        return true;
    }
    let mut uf: UnionFind<usize> = UnionFind::new(subset.len());
    for (a, &i) in subset.iter().enumerate() {
        for (b, &j) in subset.iter().enumerate().skip(a + 1) {
            let shares = ops[i]
                .lines()
                .iter()
                .any(|line| ops[j].lines().contains(line));
            if shares {
                uf.union(a, b);
            }
        }
    }
    let root = uf.find(0);
    (1..subset.len()).all(|k| uf.find(k) == root)
}

fn swap_map(x: Label, y: Label) -> FxHashMap<Label, Label> {
    let mut map = FxHashMap::default();
    map.insert(x, y);
    map.insert(y, x);
    map
}

/// Clone a node with labels renamed through `map`. Linkages are rebuilt
/// so their derived data stays consistent.
pub(crate) fn rename_node(node: &Node, map: &FxHashMap<Label, Label>) -> Node {
    match node {
        Node::Vertex(v) => {
            let lines: Vec<Line> = v
                .lines()
                .iter()
                .map(|l| {
                    let mut line = *l;
                    if let Some(new) = map.get(&line.label) {
                        line.label = *new;
                    }
                    line
                })
                .collect();
            Node::vertex(Vertex::new(v.base_name(), lines))
        }
        Node::Linkage(l) => {
            let left = rename_node(l.left(), map);
            let right = rename_node(l.right(), map);
            let rebuilt = Linkage::new(left, right, l.is_addition());
            Node::linkage(rebuilt.with_id(l.id(), l.is_reused()))
        }
    }
}
