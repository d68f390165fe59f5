//! Ordered collections of terms sharing an output tensor.

use crate::linkage::{Linkage, Node};
use crate::options::Options;
use crate::scaling::ScalingMap;
use crate::term::{subset_connected, Term};
use itertools::Itertools;
use rayon::prelude::*;
use std::sync::Arc;

/// All statements accumulating into one output tensor.
///
/// Every term's lhs is equivalent (same external line shape); the first
/// term assigns and the rest accumulate.
#[derive(Debug, Clone)]
pub struct Equation {
    assignment: Node,
    terms: Vec<Term>,
    /// Holds intermediate declarations rather than user equations.
    pub is_temp_equation: bool,
    flop_map: ScalingMap,
    mem_map: ScalingMap,
}

impl Equation {
    pub fn new(assignment: Node, mut terms: Vec<Term>) -> Self {
        for (i, term) in terms.iter_mut().enumerate() {
            term.is_assignment = i == 0;
        }
        let mut eq = Self {
            assignment,
            terms,
            is_temp_equation: false,
            flop_map: ScalingMap::new(),
            mem_map: ScalingMap::new(),
        };
        eq.collect_scaling();
        eq
    }

    pub fn assignment(&self) -> &Node {
        &self.assignment
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn terms_mut(&mut self) -> &mut Vec<Term> {
        &mut self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn push_term(&mut self, mut term: Term) {
        term.is_assignment = self.terms.is_empty() || self.is_temp_equation;
        self.terms.push(term);
    }

    pub fn flop_map(&self) -> &ScalingMap {
        &self.flop_map
    }

    pub fn mem_map(&self) -> &ScalingMap {
        &self.mem_map
    }

    /// Reorder every term's contraction tree in parallel.
    pub fn reorder(&mut self, options: &Options) {
        self.terms
            .par_iter_mut()
            .for_each(|term| term.reorder(options));
        self.collect_scaling();
    }

    /// Recompute the aggregated scaling histograms.
    pub fn collect_scaling(&mut self) {
        self.flop_map.clear();
        self.mem_map.clear();
        for term in &self.terms {
            self.flop_map += term.flop_map();
            self.mem_map += term.mem_map();
        }
    }

    /// Fuse terms whose contractions are identical up to an index
    /// renaming that fixes the external lines; coefficients add with
    /// the permutation parity, and terms summing to zero drop out.
    /// Returns the number of terms removed.
    pub fn merge_terms(&mut self) -> usize {
        let before = self.terms.len();
        let mut merged: Vec<Term> = Vec::with_capacity(before);

        for term in std::mem::take(&mut self.terms) {
            let mut absorbed = false;
            for kept in merged.iter_mut() {
                if kept.perm_ops() != term.perm_ops() {
                    continue;
                }
                let (Some(a), Some(b)) = (kept.term_linkage(), term.term_linkage()) else {
                    continue;
                };
                if kept.external_lines() != term.external_lines() {
                    continue;
                }
                let pinned = kept.external_lines();
                if let Some(odd) = a.matches_with_renaming_pinned(b, &pinned) {
                    let sign = if odd { -1.0 } else { 1.0 };
                    kept.set_coefficient(kept.coefficient() + sign * term.coefficient());
                    absorbed = true;
                    break;
                }
            }
            if !absorbed {
                merged.push(term);
            }
        }

        merged.retain(|t| t.coefficient() != 0.0);
        for (i, term) in merged.iter_mut().enumerate() {
            term.is_assignment = i == 0 || self.is_temp_equation;
        }
        self.terms = merged;
        self.collect_scaling();
        before - self.terms.len()
    }

    /// Tentatively substitute `candidate` into every term without
    /// mutating this equation. Returns the number of replacements and
    /// the scaling the equation would have afterwards.
    pub fn test_substitute(
        &self,
        candidate: &Arc<Linkage>,
        options: &Options,
    ) -> (usize, ScalingMap) {
        let mut count = 0;
        let mut flop = ScalingMap::new();
        for term in &self.terms {
            let mut trial = term.clone();
            count += trial.substitute(candidate, options);
            flop += trial.flop_map();
        }
        (count, flop)
    }

    /// Substitute `candidate` into every term in place. Returns the
    /// number of replacements.
    pub fn substitute(&mut self, candidate: &Arc<Linkage>, options: &Options) -> usize {
        let count: usize = self
            .terms
            .par_iter_mut()
            .map(|term| term.substitute(candidate, options))
            .sum();
        if count > 0 {
            self.collect_scaling();
        }
        count
    }

    /// Enumerate every connected operand subset of every term up to
    /// `depth` leaves, one linkage per subset. Oversized intermediates
    /// are skipped.
    pub fn make_all_links(&self, options: &Options, depth: usize) -> Vec<Arc<Linkage>> {
        let mut links = Vec::new();
        for term in &self.terms {
            let ops = term.rhs();
            if ops.len() < 2 {
                continue;
            }
            let max_width = depth.min(ops.len());
            for width in 2..=max_width {
                for subset in (0..ops.len()).combinations(width) {
                    if !options.allow_nesting && subset.iter().any(|&i| ops[i].is_temp()) {
                        continue;
                    }
                    if !subset_connected(ops, &subset) {
                        continue;
                    }
                    let mut chosen: Vec<Node> =
                        subset.iter().map(|&i| ops[i].clone()).collect();
                    chosen.sort_by_cached_key(|n| n.sort_key());
                    let link = Linkage::link(&chosen);
                    if !link.mem_shape().fits_within(&options.max_shape) {
                        continue;
                    }
                    links.push(link);
                }
            }
        }
        links
    }

    /// Re-expand every materialized intermediate in every term.
    pub fn expanded_terms(&self) -> Vec<(f64, Vec<Node>)> {
        self.terms
            .iter()
            .map(|t| (t.coefficient(), t.expanded_operands()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Line;
    use crate::vertex::Vertex;

    fn opts() -> Options {
        Options::default()
    }

    fn line(label: &str) -> Line {
        Line::new(label, None, &opts()).unwrap()
    }

    fn vertex(name: &str, labels: &[&str]) -> Node {
        Node::vertex(Vertex::new(
            name,
            labels.iter().map(|l| line(l)).collect(),
        ))
    }

    fn scalar_term(coeff: f64, factors: &[(&str, &[&str])]) -> Term {
        let rhs: Vec<Node> = factors.iter().map(|(n, l)| vertex(n, l)).collect();
        Term::new(Node::vertex(Vertex::scalar("E")), coeff, rhs)
    }

    #[test]
    fn test_merge_identical_up_to_renaming() {
        // E += f(i,a) t(a,i) and E += f(j,b) t(b,j) collapse to one
        // term with coefficient 2
        let t1 = scalar_term(1.0, &[("f", &["i", "a"]), ("t", &["a", "i"])]);
        let t2 = scalar_term(1.0, &[("f", &["j", "b"]), ("t", &["b", "j"])]);
        let mut eq = Equation::new(Node::vertex(Vertex::scalar("E")), vec![t1, t2]);
        let removed = eq.merge_terms();
        assert_eq!(removed, 1);
        assert_eq!(eq.len(), 1);
        assert_eq!(eq.terms()[0].coefficient(), 2.0);
    }

    #[test]
    fn test_merge_drops_cancelling_terms() {
        let t1 = scalar_term(1.0, &[("f", &["i", "a"]), ("t", &["a", "i"])]);
        let t2 = scalar_term(-1.0, &[("f", &["j", "b"]), ("t", &["b", "j"])]);
        let mut eq = Equation::new(Node::vertex(Vertex::scalar("E")), vec![t1, t2]);
        eq.merge_terms();
        assert!(eq.is_empty());
    }

    #[test]
    fn test_merge_keeps_distinct_terms() {
        let t1 = scalar_term(1.0, &[("f", &["i", "a"]), ("t", &["a", "i"])]);
        let t2 = scalar_term(1.0, &[("h", &["i", "a"]), ("t", &["a", "i"])]);
        let mut eq = Equation::new(Node::vertex(Vertex::scalar("E")), vec![t1, t2]);
        assert_eq!(eq.merge_terms(), 0);
        assert_eq!(eq.len(), 2);
    }

    #[test]
    fn test_test_substitute_is_pure() {
        let g = vertex("g", &["i", "j", "a", "b"]);
        let t = vertex("t", &["b", "j"]);
        let lhs = {
            let root = Linkage::link(&[g.clone(), t.clone()]);
            Node::vertex(Vertex::new("R", root.lines().to_vec()))
        };
        let term = Term::new(lhs, 1.0, vec![g.clone(), t.clone()]);
        let mut eq = Equation::new(vertex("R", &["a", "i"]), vec![term]);
        eq.reorder(&opts());

        let candidate = Arc::new(Linkage::new(g, t, false).with_id(1, false));
        let before = eq.terms()[0].rhs().len();
        let (count, _) = eq.test_substitute(&candidate, &opts());
        assert_eq!(count, 1);
        assert_eq!(eq.terms()[0].rhs().len(), before, "state unchanged");

        // committing mutates
        assert_eq!(eq.substitute(&candidate, &opts()), 1);
        assert!(eq.terms()[0].rhs()[0].is_temp());
    }

    #[test]
    fn test_make_all_links_enumerates_connected_subsets() {
        let g = vertex("g", &["i", "j", "a", "b"]);
        let t1 = vertex("t", &["b", "j"]);
        let f = vertex("f", &["k", "c"]);
        let t2 = vertex("t", &["c", "k"]);
        let lhs = {
            let root = Linkage::link(&[g.clone(), t1.clone(), f.clone(), t2.clone()]);
            Node::vertex(Vertex::new("R", root.lines().to_vec()))
        };
        let term = Term::new(lhs, 1.0, vec![g, t1, f, t2]);
        let eq = Equation::new(vertex("R", &["a", "i"]), vec![term]);

        let pairs = eq.make_all_links(&opts(), 2);
        // connected pairs only: (g,t1) and (f,t2); (g,f) etc. share no line
        assert_eq!(pairs.len(), 2);

        // wider subsets all split into two components here, so raising
        // the depth finds nothing new
        let all = eq.make_all_links(&opts(), 4);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_reorder_collects_scaling() {
        let t = scalar_term(1.0, &[("f", &["i", "a"]), ("t", &["a", "i"])]);
        let mut eq = Equation::new(Node::vertex(Vertex::scalar("E")), vec![t]);
        eq.reorder(&opts());
        assert_eq!(eq.flop_map().total(), 1);
    }
}
