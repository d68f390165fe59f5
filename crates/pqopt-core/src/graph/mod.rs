//! The top-level equation graph.
//!
//! [`PqGraph`] owns the set of equations, drives reordering and
//! common-subexpression elimination, and emits the scheduled program.
//! Three reserved equations (`scalar`, `reused`, `temp`) collect the
//! declarations of materialized intermediates.

mod format;
mod substitute;

use crate::equation::Equation;
use crate::error::{PqError, Result};
use crate::label::Label;
use crate::linkage::{Linkage, LinkageSet, Node, TempKind};
use crate::options::Options;
use crate::parser::parse_vertex;
use crate::scaling::ScalingMap;
use crate::term::Term;
use crate::timer::{Timer, Timers};
use crate::vertex::Vertex;
use indexmap::IndexMap;
use log::{info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One pre-normal-ordered input term: a coefficient, ordered tensor
/// strings, and optional antisymmetrization operators.
#[derive(Debug, Clone)]
pub struct InputTerm {
    pub coefficient: f64,
    pub factors: Vec<String>,
    pub perm_ops: Vec<(String, String)>,
}

impl InputTerm {
    pub fn new(coefficient: f64, factors: &[&str]) -> Self {
        Self {
            coefficient,
            factors: factors.iter().map(|s| s.to_string()).collect(),
            perm_ops: Vec::new(),
        }
    }

    pub fn with_perm_ops(mut self, perm_ops: &[(&str, &str)]) -> Self {
        self.perm_ops = perm_ops
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        self
    }
}

/// The equation-optimization graph.
#[derive(Debug, Clone)]
pub struct PqGraph {
    equations: IndexMap<String, Equation>,
    /// Committed intermediates per kind.
    saved_linkages: FxHashMap<TempKind, LinkageSet>,
    /// Candidate pool from the last generation pass.
    all_links: LinkageSet,
    temp_counts: FxHashMap<TempKind, usize>,
    flop_map: ScalingMap,
    mem_map: ScalingMap,
    flop_map_init: ScalingMap,
    mem_map_init: ScalingMap,
    flop_map_pre: ScalingMap,
    mem_map_pre: ScalingMap,
    options: Options,
    timers: Timers,
    is_reordered: bool,
    has_sigma: bool,
    pool: Arc<rayon::ThreadPool>,
}

impl PqGraph {
    pub fn new(options: Options) -> Result<Self> {
        options.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.effective_threads())
            .build()
            .map_err(|e| PqError::Config(format!("failed to build thread pool: {e}")))?;
        Ok(Self {
            equations: IndexMap::new(),
            saved_linkages: FxHashMap::default(),
            all_links: LinkageSet::new(),
            temp_counts: FxHashMap::default(),
            flop_map: ScalingMap::new(),
            mem_map: ScalingMap::new(),
            flop_map_init: ScalingMap::new(),
            mem_map_init: ScalingMap::new(),
            flop_map_pre: ScalingMap::new(),
            mem_map_pre: ScalingMap::new(),
            options,
            timers: Timers::default(),
            is_reordered: false,
            has_sigma: false,
            pool: Arc::new(pool),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn equations(&self) -> &IndexMap<String, Equation> {
        &self.equations
    }

    pub fn equation(&self, name: &str) -> Option<&Equation> {
        self.equations.get(name)
    }

    pub fn flop_map(&self) -> &ScalingMap {
        &self.flop_map
    }

    pub fn mem_map(&self) -> &ScalingMap {
        &self.mem_map
    }

    /// Scaling after reordering but before substitution.
    pub fn flop_map_pre(&self) -> &ScalingMap {
        &self.flop_map_pre
    }

    /// Scaling of the input before any transformation.
    pub fn flop_map_init(&self) -> &ScalingMap {
        &self.flop_map_init
    }

    pub fn temp_count(&self, kind: TempKind) -> usize {
        self.temp_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Committed intermediates of one bucket.
    pub fn saved_linkages(&self, kind: TempKind) -> Option<&LinkageSet> {
        self.saved_linkages.get(&kind)
    }

    /// Add a named equation from pre-normal-ordered input terms.
    ///
    /// The name is either a bare identifier (the output's lines are
    /// derived from the external lines of the first term) or a
    /// formatted target like `R1(a,i)`.
    pub fn add(&mut self, name: &str, input_terms: &[InputTerm]) -> Result<()> {
        self.timers.build.start();
        let result = self.add_inner(name, input_terms);
        self.timers.build.stop();
        result
    }

    fn add_inner(&mut self, name: &str, input_terms: &[InputTerm]) -> Result<()> {
        if input_terms.is_empty() {
            return Err(PqError::MalformedInput {
                token: name.to_string(),
                message: "an equation needs at least one term".into(),
            });
        }

        let formatted_lhs = if name.contains('(') {
            let mut lhs = parse_vertex(name, &self.options)?;
            lhs.sort();
            Some(lhs)
        } else {
            None
        };
        let eq_key = formatted_lhs
            .as_ref()
            .map(|v| v.base_name().to_string())
            .unwrap_or_else(|| name.to_string());
        if self.equations.contains_key(&eq_key) {
            warn!("equation `{eq_key}` already exists; overwriting");
        }

        let mut terms: Vec<Term> = Vec::with_capacity(input_terms.len());
        for input in input_terms {
            let term = self.build_term(&eq_key, formatted_lhs.as_ref(), input)?;
            self.has_sigma |= term.rhs().iter().any(|n| n.is_sigma());
            terms.push(term);
        }

        // all terms must produce the same external shape
        let mut first_lines = terms[0].external_lines();
        first_lines.sort_unstable();
        for term in &terms[1..] {
            let mut lines = term.external_lines();
            lines.sort_unstable();
            let equivalent = lines.len() == first_lines.len()
                && lines
                    .iter()
                    .zip(first_lines.iter())
                    .all(|(a, b)| a.equivalent(b));
            if !equivalent {
                return Err(PqError::MalformedInput {
                    token: eq_key.clone(),
                    message: "terms of one equation must share the output shape".into(),
                });
            }
        }

        let assignment = terms[0].lhs().clone();
        let equation = Equation::new(assignment, terms);
        self.equations.insert(eq_key, equation);
        self.collect_scaling();
        if !self.is_reordered {
            self.flop_map_init = self.flop_map.clone();
            self.mem_map_init = self.mem_map.clone();
        }
        Ok(())
    }

    fn build_term(
        &self,
        eq_key: &str,
        formatted_lhs: Option<&Vertex>,
        input: &InputTerm,
    ) -> Result<Term> {
        let mut sign = 1.0;
        let mut rhs: Vec<Node> = Vec::with_capacity(input.factors.len());
        for factor in &input.factors {
            let mut vertex = parse_vertex(factor, &self.options)?;
            if self.options.permute_eri && vertex.base_name() == "eri" {
                if let Some((canonical, odd)) = vertex.permute_eri() {
                    if odd {
                        sign = -sign;
                    }
                    vertex = canonical;
                }
            }
            let deltas = vertex.expand_self_links();
            rhs.push(Node::vertex(vertex));
            rhs.extend(deltas.into_iter().map(Node::vertex));
        }
        if rhs.is_empty() {
            return Err(PqError::MalformedInput {
                token: eq_key.to_string(),
                message: "a term needs at least one tensor".into(),
            });
        }

        let mut perm_ops = Vec::with_capacity(input.perm_ops.len());
        for (a, b) in &input.perm_ops {
            let pa = Label::from_str(a).map_err(|e| PqError::MalformedInput {
                token: a.clone(),
                message: e.to_string(),
            })?;
            let pb = Label::from_str(b).map_err(|e| PqError::MalformedInput {
                token: b.clone(),
                message: e.to_string(),
            })?;
            perm_ops.push((pa, pb));
        }

        let lhs = match formatted_lhs {
            Some(v) => Node::vertex(v.clone()),
            None => {
                // derive the target from the external lines of the product
                let lines = if rhs.len() >= 2 {
                    Linkage::link(&rhs).lines().to_vec()
                } else {
                    rhs[0].lines().to_vec()
                };
                let mut assignment = Vertex::new(eq_key, lines);
                assignment.sort();
                Node::vertex(assignment)
            }
        };

        let coefficient = sign * input.coefficient;
        let mut term = Term::new(lhs, coefficient, rhs).with_perm_ops(perm_ops);
        term.comments = vec![format!(
            "{:+.2} {}",
            coefficient,
            input.factors.join(" ")
        )];

        if let Some(lhs_vertex) = formatted_lhs {
            let mut expected: Vec<_> = lhs_vertex.lines().to_vec();
            let mut actual = term.external_lines();
            expected.sort_unstable();
            actual.sort_unstable();
            if expected != actual {
                return Err(PqError::MalformedInput {
                    token: eq_key.to_string(),
                    message: "target indices do not match the external lines of the product"
                        .into(),
                });
            }
        }
        Ok(term)
    }

    /// Reorder every term of every equation into its optimal pairwise
    /// contraction tree.
    pub fn reorder(&mut self) {
        let first = !self.is_reordered;
        if first {
            self.timers.reorder.start();
            info!("reordering equations");
        }

        let options = self.options.clone();
        let equations: Vec<&mut Equation> = self.equations.values_mut().collect();
        self.pool.install(|| {
            equations
                .into_par_iter()
                .for_each(|eq| eq.reorder(&options));
        });

        self.collect_scaling();
        if self.flop_map_pre.is_empty() {
            self.flop_map_pre = self.flop_map.clone();
            self.mem_map_pre = self.mem_map.clone();
        }
        if first {
            self.timers.reorder.stop();
            info!(
                "reordering done in {}",
                Timer::format(self.timers.reorder.elapsed())
            );
        }
        self.is_reordered = true;
    }

    /// Recompute the graph-wide scaling histograms.
    pub fn collect_scaling(&mut self) {
        self.flop_map.clear();
        self.mem_map.clear();
        for equation in self.equations.values_mut() {
            equation.collect_scaling();
        }
        for equation in self.equations.values() {
            self.flop_map += equation.flop_map();
            self.mem_map += equation.mem_map();
        }
    }

    /// Fuse duplicate terms in every user equation. Returns the number
    /// of terms removed.
    pub fn merge_terms(&mut self) -> usize {
        if !self.options.allow_merge {
            return 0;
        }
        let mut merged = 0;
        for equation in self.equations.values_mut() {
            if !equation.is_temp_equation {
                merged += equation.merge_terms();
            }
        }
        if merged > 0 {
            info!("merged {merged} terms");
            self.collect_scaling();
        }
        merged
    }

    /// Expand antisymmetrization operators into explicit signed terms.
    pub fn expand_permutations(&mut self) {
        for equation in self.equations.values_mut() {
            if equation.is_temp_equation {
                continue;
            }
            let expanded: Vec<Term> = equation
                .terms()
                .iter()
                .flat_map(|t| t.expand_permutations())
                .collect();
            *equation.terms_mut() = expanded;
            equation.collect_scaling();
        }
        self.collect_scaling();
    }

    /// Full pipeline: reorder, optionally merge, substitute (with a
    /// separate pass extracting shared intermediates in sigma mode),
    /// and recollect the scaling.
    pub fn optimize(&mut self) -> Result<()> {
        self.reorder();
        self.merge_terms();
        if self.options.allow_nesting {
            self.expand_permutations();
        }

        let sigma_pass = self.has_sigma && self.options.format_sigma;
        self.substitute(sigma_pass, false)?;
        if sigma_pass {
            self.substitute(false, false)?;
        }
        self.collect_scaling();
        Ok(())
    }

    /// Deep, independent copy for speculative transforms. All mutation
    /// in the optimizer rebuilds nodes, so sharing the immutable DAG
    /// between clones is safe.
    pub fn clone_graph(&self) -> PqGraph {
        self.clone()
    }

    /// Analysis report: scaling before reordering, after reordering,
    /// and after optimization, with per-shape diffs.
    pub fn analysis(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "net time: {}\n",
            Timer::format(self.timers.total())
        ));
        let n_terms: usize = self.equations.values().map(|eq| eq.len()).sum();
        out.push_str(&format!("total terms: {n_terms}\n"));
        out.push_str(&format!(
            "total contractions: {} -> {}\n",
            self.flop_map_pre.total(),
            self.flop_map.total()
        ));

        out.push_str("\nflop scaling:\n");
        out.push_str(&scaling_table(
            &self.flop_map_init,
            &self.flop_map_pre,
            &self.flop_map,
        ));
        out.push_str("\nmemory scaling:\n");
        out.push_str(&scaling_table(
            &self.mem_map_init,
            &self.mem_map_pre,
            &self.mem_map,
        ));
        out
    }
}

fn scaling_table(initial: &ScalingMap, reordered: &ScalingMap, current: &ScalingMap) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>10} : {:>8} | {:>8} | {:>8} || {:>10}\n",
        "scaling", "initial", "reorder", "optimize", "diff"
    ));

    let mut shapes: Vec<_> = initial
        .iter_desc()
        .chain(reordered.iter_desc())
        .chain(current.iter_desc())
        .map(|(s, _)| *s)
        .collect();
    shapes.sort_unstable();
    shapes.dedup();
    shapes.reverse();

    for shape in shapes {
        out.push_str(&format!(
            "{:>10} : {:>8} | {:>8} | {:>8} || {:>10}\n",
            shape.to_string(),
            initial.get(&shape),
            reordered.get(&shape),
            current.get(&shape),
            current.get(&shape) - initial.get(&shape),
        ));
    }
    out.push_str(&format!(
        "{:>10} : {:>8} | {:>8} | {:>8} || {:>10}\n",
        "total",
        initial.total(),
        reordered.total(),
        current.total(),
        current.total() - initial.total(),
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> PqGraph {
        PqGraph::new(Options::default()).unwrap()
    }

    #[test]
    fn test_add_with_derived_lhs() {
        let mut g = graph();
        g.add(
            "r1",
            &[InputTerm::new(1.0, &["<i,j||a,b>", "t(b,j)"])],
        )
        .unwrap();
        let eq = g.equation("r1").unwrap();
        assert_eq!(eq.len(), 1);
        // externals of the product: a and i
        let lhs = eq.terms()[0].lhs();
        assert_eq!(lhs.rank(), 2);
    }

    #[test]
    fn test_add_with_formatted_lhs() {
        let mut g = graph();
        g.add(
            "r1(a,i)",
            &[InputTerm::new(1.0, &["f(i,a)"]), InputTerm::new(0.5, &["h(i,a)"])],
        )
        .unwrap();
        let eq = g.equation("r1").unwrap();
        assert_eq!(eq.len(), 2);
        assert!(eq.terms()[0].is_assignment);
        assert!(!eq.terms()[1].is_assignment);
    }

    #[test]
    fn test_add_rejects_mismatched_target() {
        let mut g = graph();
        let err = g
            .add("r1(a,i)", &[InputTerm::new(1.0, &["f(i,j)"])])
            .unwrap_err();
        assert!(matches!(err, PqError::MalformedInput { .. }));
    }

    #[test]
    fn test_add_rejects_mixed_shapes() {
        let mut g = graph();
        let err = g
            .add(
                "r1",
                &[
                    InputTerm::new(1.0, &["f(i,a)"]),
                    InputTerm::new(1.0, &["f(i,j)"]),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, PqError::MalformedInput { .. }));
    }

    #[test]
    fn test_reorder_idempotent_scaling() {
        let mut g = graph();
        g.add(
            "r1",
            &[InputTerm::new(1.0, &["<i,j||a,b>", "t(b,j)", "t(a,k)"])],
        )
        .unwrap();
        g.reorder();
        let once = g.flop_map().clone();
        g.reorder();
        assert_eq!(g.flop_map(), &once);
    }

    #[test]
    fn test_self_link_expansion_on_add() {
        let mut g = graph();
        g.add("e", &[InputTerm::new(1.0, &["f(i,i)"])]).unwrap();
        let eq = g.equation("e").unwrap();
        // f(i,i) becomes f(i0,i1) * Id(i0,i1)
        assert_eq!(eq.terms()[0].rhs().len(), 2);
    }

    #[test]
    fn test_eri_canonicalized_on_add() {
        let mut g = graph();
        g.add("r", &[InputTerm::new(1.0, &["<a,i||j,b>", "t(j,b)"])])
            .unwrap();
        let eq = g.equation("r").unwrap();
        let term = &eq.terms()[0];
        let eri = &term.rhs()[0];
        match eri {
            Node::Vertex(v) => {
                // voov reorders into the allow-listed vovo order
                assert_eq!(v.ovstring(), "vovo");
            }
            _ => panic!("expected a leaf"),
        }
        // the odd permutation flipped the sign
        assert_eq!(term.coefficient(), -1.0);
    }
}
