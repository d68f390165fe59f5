//! Emission of scheduled programs.
//!
//! Two text dialects are supported: a tensor-library form with
//! per-tensor dimension maps (`R("a,i") = 0.50 * g["oovv"]("i,j,a,b") *
//! t1["vo"]("b,j");`) and an array-library form built on `einsum`
//! strings (`R = 0.50 * einsum('ijab,bj->ai', g["oovv"], t1["vo"])`).

use crate::label::Label;
use crate::linkage::Node;
use crate::options::{Dialect, Options};
use crate::term::Term;
use rustc_hash::FxHashMap;

const SUBSCRIPT_POOL: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Comment prefix of the dialect.
pub fn comment_prefix(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::TensorLib => "//",
        Dialect::Einsum => "#",
    }
}

/// Render one term as comment lines plus its statement.
pub fn render_term(term: &Term, options: &Options) -> Vec<String> {
    let mut out = Vec::with_capacity(term.comments.len() + 1);
    let prefix = comment_prefix(options.dialect);
    for comment in &term.comments {
        out.push(format!("{prefix} {comment}"));
    }
    out.push(match options.dialect {
        Dialect::TensorLib => tensor_statement(term, options),
        Dialect::Einsum => einsum_statement(term, options),
    });
    out
}

/// Reset line releasing a spent intermediate.
pub fn render_destructor(name: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::TensorLib => format!("{name}.free();"),
        Dialect::Einsum => format!("del {name}"),
    }
}

/// Labels of a node that are materialized in the output.
fn visible_labels(node: &Node, options: &Options) -> Vec<Label> {
    node.lines()
        .iter()
        .filter(|l| options.print_trial_index || !l.sigma)
        .map(|l| l.label)
        .collect()
}

/// Emitted tensor name with its dimension map.
fn factor_name(node: &Node, options: &Options) -> String {
    match node {
        Node::Vertex(v) => {
            if v.is_scalar() {
                v.base_name().to_string()
            } else {
                format!(
                    "{}[\"{}\"]",
                    v.base_name(),
                    v.dimstring(options.print_trial_index)
                )
            }
        }
        Node::Linkage(l) => l.temp_name(options.print_trial_index),
    }
}

fn index_list(labels: &[Label]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let joined: Vec<&str> = labels.iter().map(|l| l.as_str()).collect();
    format!("(\"{}\")", joined.join(","))
}

/// Assignment targets print without the dimension map; intermediates
/// keep their container name.
fn target_name(node: &Node, options: &Options) -> String {
    match node {
        Node::Vertex(v) => v.base_name().to_string(),
        Node::Linkage(l) => l.temp_name(options.print_trial_index),
    }
}

fn target_text(term: &Term, options: &Options) -> String {
    let labels = visible_labels(term.lhs(), options);
    format!("{}{}", target_name(term.lhs(), options), index_list(&labels))
}

fn assign_op(term: &Term) -> &'static str {
    if term.is_assignment {
        "="
    } else {
        "+="
    }
}

fn coefficient_text(coefficient: f64) -> String {
    format!("{coefficient:.2}")
}

fn tensor_statement(term: &Term, options: &Options) -> String {
    let target = target_text(term, options);
    let op = assign_op(term);
    let coeff = coefficient_text(term.coefficient());

    if term.rhs().is_empty() {
        return format!("{target} {op} {coeff};");
    }

    let factors: Vec<String> = term
        .rhs()
        .iter()
        .map(|node| {
            let labels = visible_labels(node, options);
            format!("{}{}", factor_name(node, options), index_list(&labels))
        })
        .collect();
    let mut product = factors.join(" * ");

    // a fully contracted product needs an explicit reduction
    if term.lhs().rank() == 0 && term.rhs().len() >= 2 {
        if let Some(pos) = product.rfind(" * ") {
            product.replace_range(pos..pos + 3, ", ");
        }
        product = format!("dot({product})");
    }

    format!("{target} {op} {coeff} * {product};")
}

fn einsum_statement(term: &Term, options: &Options) -> String {
    let target = target_name(term.lhs(), options);
    let op = assign_op(term);
    let coeff = coefficient_text(term.coefficient());

    if term.rhs().is_empty() {
        return format!("{target} {op} {coeff}");
    }

    // deterministic per-term subscripts: single-letter labels keep
    // their own letter; everything else takes the first free letter of
    // the pool, in first-appearance order across the factors then the
    // target
    let mut letters: FxHashMap<Label, char> = FxHashMap::default();
    let mut used = [false; 128];
    let mut assign = |label: Label, letters: &mut FxHashMap<Label, char>| -> char {
        if let Some(&c) = letters.get(&label) {
            return c;
        }
        let own = label.first().filter(|c| label.len() == 1 && !used[*c as usize]);
        let c = own.unwrap_or_else(|| {
            SUBSCRIPT_POOL
                .iter()
                .map(|&b| b as char)
                .find(|&c| !used[c as usize])
                .unwrap_or('?')
        });
        used[c as usize] = true;
        letters.insert(label, c);
        c
    };

    let mut factor_subs: Vec<String> = Vec::with_capacity(term.rhs().len());
    let mut factor_names: Vec<String> = Vec::with_capacity(term.rhs().len());
    let mut any_indexed = false;
    for node in term.rhs() {
        let labels = visible_labels(node, options);
        any_indexed |= !labels.is_empty();
        factor_subs.push(
            labels
                .iter()
                .map(|&l| assign(l, &mut letters))
                .collect::<String>(),
        );
        factor_names.push(factor_name(node, options));
    }

    if !any_indexed {
        // pure product of scalars
        return format!("{target} {op} {coeff} * {}", factor_names.join(" * "));
    }

    let out_subs: String = visible_labels(term.lhs(), options)
        .iter()
        .map(|&l| assign(l, &mut letters))
        .collect();

    format!(
        "{target} {op} {coeff} * einsum('{}->{}',  {})",
        factor_subs.join(","),
        out_subs,
        factor_names.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Line;
    use crate::linkage::Linkage;
    use crate::vertex::Vertex;
    use std::sync::Arc;

    fn opts(dialect: Dialect) -> Options {
        Options {
            dialect,
            ..Options::default()
        }
    }

    fn line(label: &str) -> Line {
        Line::new(label, None, &Options::default()).unwrap()
    }

    fn vertex(name: &str, labels: &[&str]) -> Node {
        Node::vertex(Vertex::new(
            name,
            labels.iter().map(|l| line(l)).collect(),
        ))
    }

    fn sample_term() -> Term {
        let g = vertex("g", &["i", "j", "a", "b"]);
        let t = vertex("t1", &["b", "j"]);
        let root = Linkage::link(&[g.clone(), t.clone()]);
        let lhs = Node::vertex(Vertex::new("R", root.lines().to_vec()));
        let mut term = Term::new(lhs, 0.5, vec![g, t]);
        term.is_assignment = true;
        term
    }

    #[test]
    fn test_tensor_dialect() {
        let lines = render_term(&sample_term(), &opts(Dialect::TensorLib));
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0],
            "R(\"a,i\") = 0.50 * g[\"oovv\"](\"i,j,a,b\") * t1[\"vo\"](\"b,j\");"
        );
    }

    #[test]
    fn test_einsum_dialect() {
        let lines = render_term(&sample_term(), &opts(Dialect::Einsum));
        assert_eq!(
            lines[0],
            "R = 0.50 * einsum('ijab,bj->ai',  g[\"oovv\"], t1[\"vo\"])"
        );
    }

    #[test]
    fn test_accumulation_operator() {
        let mut term = sample_term();
        term.is_assignment = false;
        let lines = render_term(&term, &opts(Dialect::Einsum));
        assert!(lines[0].contains("+="));
    }

    #[test]
    fn test_scalar_target_uses_dot() {
        let f = vertex("f", &["i", "a"]);
        let t = vertex("t1", &["a", "i"]);
        let mut term = Term::new(Node::vertex(Vertex::scalar("E")), 1.0, vec![f, t]);
        term.is_assignment = true;
        let lines = render_term(&term, &opts(Dialect::TensorLib));
        assert_eq!(
            lines[0],
            "E = 1.00 * dot(f[\"ov\"](\"i,a\"), t1[\"vo\"](\"a,i\"));"
        );
    }

    #[test]
    fn test_comments_carry_prefix() {
        let mut term = sample_term();
        term.comments.push("from input line 3".to_string());
        let lines = render_term(&term, &opts(Dialect::Einsum));
        assert_eq!(lines[0], "# from input line 3");
    }

    #[test]
    fn test_destructors() {
        assert_eq!(
            render_destructor("tmps[\"vo_1\"]", Dialect::TensorLib),
            "tmps[\"vo_1\"].free();"
        );
        assert_eq!(
            render_destructor("tmps[\"vo_1\"]", Dialect::Einsum),
            "del tmps[\"vo_1\"]"
        );
    }

    #[test]
    fn test_temp_factor_rendering() {
        let g = vertex("g", &["i", "j", "a", "b"]);
        let t = vertex("t1", &["b", "j"]);
        let tmp = Arc::new(Linkage::new(g, t, false).with_id(2, false));
        let u = vertex("u", &["a", "k"]);
        let lhs = vertex("R", &["i", "k"]);
        let mut term = Term::new(lhs, 1.0, vec![Node::Linkage(tmp), u]);
        term.is_assignment = true;
        let lines = render_term(&term, &opts(Dialect::TensorLib));
        assert!(lines[0].contains("tmps[\"vo_2\"](\"a,i\")"));
    }
}
