//! The substitution loop: candidate generation, scoring, and commit.

use super::PqGraph;
use crate::equation::Equation;
use crate::error::Result;
use crate::linkage::{Linkage, LinkageSet, Node, TempKind};
use crate::options::Options;
use crate::scaling::{MapCmp, ScalingMap};
use crate::term::Term;
use crate::vertex::Vertex;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::Arc;

/// Scoring outcome of one candidate against the whole graph.
enum Score {
    /// Useless here; drop it from the pool.
    Ignore(Arc<Linkage>),
    /// Substitutable; `map` is the graph's flop scaling afterwards.
    Keep {
        map: ScalingMap,
        link: Arc<Linkage>,
    },
}

impl PqGraph {
    /// Enumerate every connected operand subset (up to `depth` leaves)
    /// of every user equation into the candidate pool, deduplicated
    /// modulo index renaming.
    pub(crate) fn make_all_links(&mut self, depth: usize) {
        self.all_links.clear();
        for equation in self.equations.values() {
            if equation.is_temp_equation {
                continue;
            }
            for link in equation.make_all_links(&self.options, depth) {
                self.all_links.insert(link);
            }
        }
        for link in self.all_links.iter() {
            link.forget();
        }
    }

    /// Find common subexpressions and materialize them as named
    /// intermediates until no candidate improves the scaling or the
    /// `max_temps` cap is hit (reported as a warning; the partial
    /// result stands).
    ///
    /// With `format_sigma`, only candidates free of excited-state
    /// indices are extracted, into the `reused` bucket. With
    /// `only_scalars`, only rank-0 candidates are extracted.
    pub fn substitute(&mut self, format_sigma: bool, only_scalars: bool) -> Result<()> {
        if !self.is_reordered {
            self.reorder();
        }
        self.timers.update.start();

        self.ensure_reserved_equations();
        let options = self.options.clone();
        let target_kind = if only_scalars {
            TempKind::Scalar
        } else if format_sigma {
            TempKind::Reused
        } else {
            TempKind::Temp
        };

        // no candidate can be wider than the widest term
        let widest = self
            .equations
            .values()
            .filter(|eq| !eq.is_temp_equation)
            .flat_map(|eq| eq.terms().iter().map(|t| t.rhs().len()))
            .max()
            .unwrap_or(2)
            .max(2);
        let max_depth = options.max_depth.min(widest);
        let mut current_depth = if options.batched { 2 } else { max_depth };

        self.merge_terms();
        self.collect_scaling();
        self.make_all_links(current_depth);

        let mut ignore = LinkageSet::new();
        let mut candidates = self.remaining_candidates(&ignore);

        info!(
            "substituting: {} candidate intermediates over {} terms",
            candidates.len(),
            self.equations.values().map(Equation::len).sum::<usize>()
        );
        self.timers.update.stop();

        loop {
            if self.temp_count(target_kind) >= options.max_temps {
                warn!(
                    "maximum number of intermediates reached ({}); keeping partial result",
                    options.max_temps
                );
                break;
            }
            if candidates.is_empty() {
                if options.batched && current_depth < max_depth {
                    // nothing left at this width: merge, widen, regenerate
                    self.timers.update.start();
                    self.merge_terms();
                    self.merge_intermediates();
                    current_depth = current_depth.saturating_add(1).min(max_depth);
                    debug!("regenerating candidates with depth {current_depth}");
                    self.make_all_links(current_depth);
                    candidates = self.remaining_candidates(&ignore);
                    self.timers.update.stop();
                    continue;
                }
                break;
            }

            // score every candidate in parallel against the current graph
            self.timers.substitute.start();
            let pool = Arc::clone(&self.pool);
            let cand_list: Vec<Arc<Linkage>> = candidates.iter().cloned().collect();
            let graph: &PqGraph = self;
            let scored: Vec<Score> = pool.install(|| {
                cand_list
                    .par_iter()
                    .map(|cand| {
                        graph.score_candidate(
                            cand,
                            target_kind,
                            format_sigma,
                            only_scalars,
                            &options,
                        )
                    })
                    .collect()
            });
            self.timers.substitute.stop();

            let mut survivors: Vec<(ScalingMap, Arc<Linkage>)> = Vec::new();
            for score in scored {
                match score {
                    Score::Ignore(link) => {
                        ignore.insert(link);
                    }
                    Score::Keep { map, link } => {
                        if map.is_worse_than(&self.flop_map) {
                            ignore.insert(link);
                            continue;
                        }
                        let cmp = map.compare(&self.flop_map);
                        let keep = cmp == MapCmp::ThisBetter
                            || format_sigma
                            || (link.is_scalar() && !options.no_scalars)
                            || (cmp == MapCmp::Same && options.allow_equality);
                        if keep {
                            survivors.push((map, link));
                        } else {
                            ignore.insert(link);
                        }
                    }
                }
            }
            // best first; ties broken on the stringified form so the
            // emitted program is independent of thread count
            survivors.sort_by(|a, b| {
                a.0.cmp_order(&b.0)
                    .then_with(|| a.1.generic_key().cmp(&b.1.generic_key()))
            });

            // commit serially: one candidate per scoring pass, or up to
            // batch_size when batching
            let batch_cap = if options.batched {
                options.batch_size
            } else {
                1
            };
            self.timers.update.start();
            let mut committed = 0;
            for (_, cand) in survivors {
                if committed >= batch_cap || self.temp_count(target_kind) >= options.max_temps {
                    break;
                }
                ignore.insert(Arc::clone(&cand));
                if self.commit_candidate(&cand, target_kind, format_sigma, &options) {
                    committed += 1;
                }
            }
            self.timers.update.stop();

            candidates = self.remaining_candidates(&ignore);
        }

        // final cleanup
        self.timers.update.start();
        self.merge_terms();
        let fused = self.merge_intermediates();
        if fused > 0 {
            info!("fused {fused} duplicate intermediates");
        }
        self.collect_scaling();
        self.timers.update.stop();
        Ok(())
    }

    fn ensure_reserved_equations(&mut self) {
        for kind in TempKind::ALL {
            let name = kind.equation_name();
            if !self.equations.contains_key(name) {
                let mut eq = Equation::new(Node::vertex(Vertex::scalar(name)), Vec::new());
                eq.is_temp_equation = true;
                self.equations.insert(name.to_string(), eq);
            }
        }
    }

    /// Pool minus everything already materialized or discarded.
    fn remaining_candidates(&self, ignore: &LinkageSet) -> LinkageSet {
        let mut remaining = self.all_links.clone();
        remaining.subtract(ignore);
        for set in self.saved_linkages.values() {
            remaining.subtract(set);
        }
        remaining
    }

    /// Pure scoring: what would the graph's flop scaling be if this
    /// candidate were materialized and substituted everywhere?
    fn score_candidate(
        &self,
        cand: &Arc<Linkage>,
        target_kind: TempKind,
        format_sigma: bool,
        only_scalars: bool,
        options: &Options,
    ) -> Score {
        let is_scalar = cand.is_scalar();
        if (is_scalar && options.no_scalars)
            || (format_sigma && cand.is_sigma())
            || (only_scalars && !is_scalar)
        {
            return Score::Ignore(Arc::clone(cand));
        }

        let kind = if is_scalar { TempKind::Scalar } else { target_kind };
        let trial_id = (self.temp_count(kind) + 1) as i64;
        let trial = Arc::new(cand.with_id(trial_id, format_sigma && !is_scalar));

        let mut substitutions = 0;
        let mut flop = ScalingMap::new();
        for (name, equation) in &self.equations {
            let untouchable = name == TempKind::Scalar.equation_name()
                || (equation.is_temp_equation && !options.allow_nesting);
            if untouchable {
                flop += equation.flop_map();
                continue;
            }
            let (count, map) = equation.test_substitute(&trial, options);
            substitutions += count;
            flop += &map;
        }
        if substitutions == 0 {
            return Score::Ignore(Arc::clone(cand));
        }

        // the intermediate has to be built too, unless its cost lives
        // elsewhere (scalars are trivial, reused temps amortize across
        // sigma builds)
        if !is_scalar && !format_sigma {
            let mut declaration = Term::declaration(Arc::clone(&trial));
            declaration.reorder(options);
            flop += declaration.flop_map();
        }
        flop.all_positive();
        Score::Keep {
            map: flop,
            link: Arc::clone(cand),
        }
    }

    /// Commit one candidate: substitute it across every equation in
    /// parallel, declare it in its bucket, and record it. Returns false
    /// when another intermediate already subsumed every occurrence.
    fn commit_candidate(
        &mut self,
        cand: &Arc<Linkage>,
        target_kind: TempKind,
        format_sigma: bool,
        options: &Options,
    ) -> bool {
        let kind = if cand.is_scalar() {
            TempKind::Scalar
        } else {
            target_kind
        };
        let id = (self.temp_count(kind) + 1) as i64;
        let materialized = Arc::new(cand.with_id(id, format_sigma && !cand.is_scalar()));

        let pool = Arc::clone(&self.pool);
        let allow_nesting = options.allow_nesting;
        let equations: Vec<(&String, &mut Equation)> = self
            .equations
            .iter_mut()
            .filter(|(name, eq)| {
                name.as_str() != TempKind::Scalar.equation_name()
                    && (allow_nesting || !eq.is_temp_equation)
            })
            .collect();
        let substitutions: usize = pool.install(|| {
            equations
                .into_par_iter()
                .map(|(_, eq)| eq.substitute(&materialized, options))
                .sum()
        });

        if substitutions == 0 {
            // subsumed since scoring; the tentative id was never taken
            return false;
        }

        *self.temp_counts.entry(kind).or_insert(0) = id as usize;

        let previous_flop = self.flop_map.clone();
        let mut declaration = Term::declaration(Arc::clone(&materialized));
        declaration.reorder(options);
        declaration.comments = Vec::new();
        if let Some(eq) = self.equations.get_mut(kind.equation_name()) {
            eq.push_term(declaration);
        }
        self.saved_linkages
            .entry(kind)
            .or_default()
            .insert(Arc::clone(&materialized));
        self.collect_scaling();

        let diff = &self.flop_map - &previous_flop;
        if options.verbose {
            info!(
                "substitution {} ({}): {} occurrences, scaling diff {}",
                id,
                materialized.temp_name(true),
                substitutions,
                diff
            );
        } else {
            debug!(
                "substitution {} ({}): {} occurrences",
                id,
                materialized.temp_name(true),
                substitutions
            );
        }
        true
    }

    /// Fuse intermediates whose definitions are identical up to an
    /// index renaming: the later one is replaced by the earlier
    /// everywhere and its declaration dropped. Returns the number of
    /// fused intermediates.
    pub fn merge_intermediates(&mut self) -> usize {
        let mut fused = 0;
        for kind in TempKind::ALL {
            let Some(equation) = self.equations.get(kind.equation_name()) else {
                continue;
            };
            let declarations: Vec<Arc<Linkage>> = equation
                .terms()
                .iter()
                .filter_map(|t| t.lhs().as_linkage().map(Arc::clone))
                .collect();

            let mut replaced: Vec<(i64, i64, bool)> = Vec::new();
            let mut taken = vec![false; declarations.len()];
            for i in 0..declarations.len() {
                if taken[i] {
                    continue;
                }
                for j in (i + 1)..declarations.len() {
                    if taken[j] {
                        continue;
                    }
                    if let Some(odd) = declarations[i].matches_with_renaming(&declarations[j]) {
                        replaced.push((declarations[j].id(), declarations[i].id(), odd));
                        taken[j] = true;
                    }
                }
            }

            for (from, to, odd) in replaced {
                self.remap_temp(kind, from, to, odd);
                fused += 1;
            }
        }
        if fused > 0 {
            self.collect_scaling();
        }
        fused
    }

    /// Rewrite every use of intermediate `from` to `to` (same kind) and
    /// drop `from`'s declaration. `odd` carries the relative parity of
    /// the two definitions into the using terms' coefficients.
    fn remap_temp(&mut self, kind: TempKind, from: i64, to: i64, odd: bool) {
        let options = self.options.clone();
        for equation in self.equations.values_mut() {
            // drop the stale declaration
            equation.terms_mut().retain(|term| {
                term.lhs()
                    .as_linkage()
                    .map(|l| !(l.temp_kind() == kind && l.id() == from))
                    .unwrap_or(true)
            });

            for term in equation.terms_mut().iter_mut() {
                let mut occurrences = 0;
                let new_rhs: Vec<Node> = term
                    .rhs()
                    .iter()
                    .map(|node| remap_node(node, kind, from, to, &mut occurrences))
                    .collect();
                if occurrences > 0 {
                    let mut updated = Term::new(term.lhs().clone(), term.coefficient(), new_rhs)
                        .with_perm_ops(term.perm_ops().to_vec());
                    updated.comments = term.comments.clone();
                    updated.is_assignment = term.is_assignment;
                    if odd && occurrences % 2 == 1 {
                        updated.set_coefficient(-updated.coefficient());
                    }
                    updated.reorder(&options);
                    *term = updated;
                }
            }
            equation.collect_scaling();
        }
    }
}

/// Recursively swap the id of matching materialized intermediates.
fn remap_node(node: &Node, kind: TempKind, from: i64, to: i64, occurrences: &mut usize) -> Node {
    match node {
        Node::Vertex(_) => node.clone(),
        Node::Linkage(l) => {
            let left = remap_node(l.left(), kind, from, to, occurrences);
            let right = remap_node(l.right(), kind, from, to, occurrences);
            let rebuilt = Linkage::new(left, right, l.is_addition());
            let id = if l.temp_kind() == kind && l.id() == from {
                *occurrences += 1;
                to
            } else {
                l.id()
            };
            Node::linkage(rebuilt.with_id(id, l.is_reused()))
        }
    }
}
