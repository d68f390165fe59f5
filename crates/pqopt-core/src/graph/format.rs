//! Program assembly: declaration ordering, destructor placement, and
//! final text emission.

use super::PqGraph;
use crate::codegen::{comment_prefix, render_destructor, render_term};
use crate::linkage::{Node, TempKind};
use crate::term::Term;
use std::collections::{BTreeMap, BTreeSet};

/// One statement of the assembled program.
enum Stmt {
    /// Declaration of the `temp` intermediate with this id.
    Declare(i64),
    /// A user-equation term.
    Main(Term),
}

impl PqGraph {
    /// Emit the scheduled program in the configured dialect.
    ///
    /// Sections: declarations, scalar definitions, reused-intermediate
    /// definitions, then the main equations with `temp` declarations
    /// placed before first use and a reset line after each
    /// intermediate's last use.
    pub fn str(&self) -> String {
        let mut copy = self.clone();
        copy.inline_single_use_temps();
        copy.render()
    }

    /// An intermediate used exactly once is not worth materializing:
    /// expand it back into its only use and drop the declaration.
    fn inline_single_use_temps(&mut self) {
        let mut skipped: BTreeSet<i64> = BTreeSet::new();
        loop {
            let mut uses: BTreeMap<i64, usize> = BTreeMap::new();
            for equation in self.equations.values() {
                for term in equation.terms() {
                    for id in temp_id_occurrences(term) {
                        *uses.entry(id).or_insert(0) += 1;
                    }
                }
            }
            let next = uses
                .iter()
                .find(|entry| *entry.1 == 1 && !skipped.contains(entry.0))
                .map(|(id, _)| *id);
            let Some(id) = next else {
                break;
            };

            let options = self.options.clone();
            let mut inlined_any = false;
            for equation in self.equations.values_mut() {
                let mut changed = false;
                for term in equation.terms_mut().iter_mut() {
                    let Some(pos) = term.rhs().iter().position(|n| is_temp_of(n, id)) else {
                        continue;
                    };
                    let mut rhs: Vec<Node> = Vec::new();
                    for (i, op) in term.rhs().iter().enumerate() {
                        if i == pos {
                            // the use site carries its own subtree, so its
                            // operands already use this term's labels
                            let expansion = op
                                .as_linkage()
                                .expect("temp nodes are linkages")
                                .to_vector(false);
                            rhs.extend(expansion.iter().cloned());
                        } else {
                            rhs.push(op.clone());
                        }
                    }
                    let mut inlined =
                        Term::new(term.lhs().clone(), term.coefficient(), rhs)
                            .with_perm_ops(term.perm_ops().to_vec());
                    inlined.comments = term.comments.clone();
                    inlined.is_assignment = term.is_assignment;
                    inlined.reorder(&options);
                    *term = inlined;
                    changed = true;
                    inlined_any = true;
                }
                if changed {
                    equation.collect_scaling();
                }
            }

            if !inlined_any {
                skipped.insert(id);
                continue;
            }

            // drop the declaration
            if let Some(eq) = self.equations.get_mut(TempKind::Temp.equation_name()) {
                eq.terms_mut().retain(|t| {
                    t.lhs()
                        .as_linkage()
                        .map(|l| !(l.temp_kind() == TempKind::Temp && l.id() == id))
                        .unwrap_or(true)
                });
            }
        }
        self.collect_scaling();
    }

    fn render(&self) -> String {
        let options = &self.options;
        let prefix = comment_prefix(options.dialect);
        let mut out = String::new();

        // main terms in insertion order, permutation operators expanded
        let mut main_terms: Vec<Term> = Vec::new();
        for (name, equation) in &self.equations {
            if equation.is_temp_equation || is_reserved(name) {
                continue;
            }
            let mut first = true;
            for term in equation.terms() {
                for mut expanded in term.expand_permutations() {
                    expanded.is_assignment = first;
                    first = false;
                    main_terms.push(expanded);
                }
            }
        }

        // declarations of the tensors appearing anywhere in the program
        let temp_declarations = self.declarations_of(TempKind::Temp);
        let mut names: BTreeSet<String> = BTreeSet::new();
        for term in &main_terms {
            collect_base_names(term, &mut names);
        }
        for kind in TempKind::ALL {
            for (_, term) in self.declarations_of(kind) {
                collect_base_names(&term, &mut names);
            }
        }
        out.push_str(&format!("{prefix} ----- declarations -----\n"));
        for name in &names {
            out.push_str(&format!("{prefix} initialize -> {name}\n"));
        }
        if !temp_declarations.is_empty() {
            out.push_str(&format!("{prefix} initialize -> tmps\n"));
        }
        out.push('\n');

        // scalar and reused sections come first: everything below may
        // read them
        for kind in [TempKind::Scalar, TempKind::Reused] {
            let declarations = self.declarations_of(kind);
            if declarations.is_empty() {
                continue;
            }
            out.push_str(&format!("{prefix} ----- {} -----\n", kind.container()));
            for (_, term) in declarations {
                for line in render_term(&term, options) {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
            out.push('\n');
        }

        // interleave temp declarations with the main terms by first use
        let declarations: BTreeMap<i64, Term> = temp_declarations.into_iter().collect();
        let mut declared: BTreeSet<i64> = BTreeSet::new();
        let mut stmts: Vec<Stmt> = Vec::new();
        for term in &main_terms {
            for id in temp_ids_in_rhs(term) {
                declare_with_dependencies(id, &declarations, &mut declared, &mut stmts);
            }
            stmts.push(Stmt::Main(term.clone()));
        }
        // declarations nothing uses (kept for fidelity of the input)
        for (&id, _) in &declarations {
            declare_with_dependencies(id, &declarations, &mut declared, &mut stmts);
        }

        // each intermediate dies right after its last use
        let mut last_use: BTreeMap<i64, usize> = BTreeMap::new();
        for (index, stmt) in stmts.iter().enumerate() {
            for id in stmt_uses(stmt, &declarations) {
                last_use.insert(id, index);
            }
        }

        out.push_str(&format!("{prefix} ----- evaluate equations -----\n"));
        for (index, stmt) in stmts.iter().enumerate() {
            let term = match stmt {
                Stmt::Declare(id) => &declarations[id],
                Stmt::Main(term) => term,
            };
            for line in render_term(term, options) {
                out.push_str(&line);
                out.push('\n');
            }
            for (&id, &last) in &last_use {
                if last == index {
                    if let Some(declaration) = declarations.get(&id) {
                        let name = declaration
                            .lhs()
                            .as_linkage()
                            .expect("declaration lhs is a linkage")
                            .temp_name(options.print_trial_index);
                        out.push_str(&render_destructor(&name, options.dialect));
                        out.push('\n');
                    }
                }
            }
        }
        out
    }

    /// Declarations of one bucket, keyed by id.
    fn declarations_of(&self, kind: TempKind) -> Vec<(i64, Term)> {
        let Some(equation) = self.equations.get(kind.equation_name()) else {
            return Vec::new();
        };
        let mut declarations: Vec<(i64, Term)> = equation
            .terms()
            .iter()
            .filter_map(|t| {
                t.lhs()
                    .as_linkage()
                    .filter(|l| l.temp_kind() == kind)
                    .map(|l| (l.id(), t.clone()))
            })
            .collect();
        declarations.sort_by_key(|(id, _)| *id);
        declarations
    }
}

fn is_reserved(name: &str) -> bool {
    TempKind::ALL.iter().any(|k| k.equation_name() == name)
}

fn is_temp_of(node: &Node, id: i64) -> bool {
    node.as_linkage()
        .map(|l| l.temp_kind() == TempKind::Temp && l.id() == id)
        .unwrap_or(false)
}

/// Ids of `temp` intermediates read by a term. Nested intermediates
/// inside an opaque use are not runtime reads of this term.
fn temp_ids_in_rhs(term: &Term) -> BTreeSet<i64> {
    temp_id_occurrences(term).into_iter().collect()
}

/// Like [`temp_ids_in_rhs`], but with one entry per occurrence.
fn temp_id_occurrences(term: &Term) -> Vec<i64> {
    let mut ids = Vec::new();
    for node in term.rhs() {
        collect_temp_ids(node, &mut ids);
    }
    ids
}

fn collect_temp_ids(node: &Node, ids: &mut Vec<i64>) {
    if let Node::Linkage(l) = node {
        if l.is_temp() {
            if l.temp_kind() == TempKind::Temp {
                ids.push(l.id());
            }
            return;
        }
        collect_temp_ids(l.left(), ids);
        collect_temp_ids(l.right(), ids);
    }
}

/// Emit a declaration after the declarations it reads (post-order).
fn declare_with_dependencies(
    id: i64,
    declarations: &BTreeMap<i64, Term>,
    declared: &mut BTreeSet<i64>,
    stmts: &mut Vec<Stmt>,
) {
    if declared.contains(&id) {
        return;
    }
    declared.insert(id);
    if let Some(declaration) = declarations.get(&id) {
        for dep in temp_ids_in_rhs(declaration) {
            declare_with_dependencies(dep, declarations, declared, stmts);
        }
        stmts.push(Stmt::Declare(id));
    }
}

fn stmt_uses(stmt: &Stmt, declarations: &BTreeMap<i64, Term>) -> BTreeSet<i64> {
    match stmt {
        Stmt::Declare(id) => declarations
            .get(id)
            .map(temp_ids_in_rhs)
            .unwrap_or_default(),
        Stmt::Main(term) => temp_ids_in_rhs(term),
    }
}

fn collect_base_names(term: &Term, names: &mut BTreeSet<String>) {
    let mut visit = |node: &Node| {
        if let Node::Vertex(v) = node {
            if !v.is_scalar() {
                names.insert(v.base_name().to_string());
            }
        }
    };
    visit(term.lhs());
    for node in term.rhs() {
        visit(node);
    }
}
