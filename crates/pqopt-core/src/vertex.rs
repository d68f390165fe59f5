//! Named tensors.
//!
//! A [`Vertex`] is a named tensor with an ordered sequence of [`Line`]s.
//! Its index sequence is split into an upper and a lower half; index
//! permutations act independently within each half, and every operation
//! that permutes indices reports the parity of the composite permutation
//! so callers can propagate the sign of antisymmetrized tensors.

use crate::label::Label;
use crate::line::Line;
use crate::shape::Shape;
use std::collections::BTreeMap;

/// Occ/vir orders a two-electron integral may be stored in.
const ERI_ALLOWED: [&str; 9] = [
    "oooo", "vvvv", "oovv", "vvoo", "vovo", "vooo", "oovo", "vovv", "vvvo",
];

/// A named tensor with labeled indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Vertex {
    base_name: String,
    lines: Vec<Line>,
    shape: Shape,
    is_sigma: bool,
    is_density: bool,
    has_block: bool,
}

impl Vertex {
    pub fn new(base_name: impl Into<String>, lines: Vec<Line>) -> Self {
        let shape = Shape::of_lines(&lines);
        let is_sigma = lines.iter().any(|l| l.sigma);
        let is_density = lines.iter().any(|l| l.density);
        let has_block = lines.iter().any(|l| l.has_block());
        Self {
            base_name: base_name.into(),
            lines,
            shape,
            is_sigma,
            is_density,
            has_block,
        }
    }

    /// A rank-0 tensor (a named scalar).
    pub fn scalar(base_name: impl Into<String>) -> Self {
        Self::new(base_name, Vec::new())
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn rank(&self) -> usize {
        self.lines.len()
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn is_scalar(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_sigma(&self) -> bool {
        self.is_sigma
    }

    pub fn is_density(&self) -> bool {
        self.is_density
    }

    pub fn has_block(&self) -> bool {
        self.has_block
    }

    /// Replace the line sequence, recomputing all derived fields.
    pub fn set_lines(&mut self, lines: Vec<Line>) {
        *self = Vertex::new(std::mem::take(&mut self.base_name), lines);
    }

    /// Rename the tensor, keeping its lines.
    pub fn rename(&mut self, base_name: impl Into<String>) {
        self.base_name = base_name.into();
    }

    /// One kind character per line: `o`, `v`, `L`, `Q`.
    pub fn ovstring(&self) -> String {
        self.lines.iter().map(|l| l.kind_char()).collect()
    }

    /// Block characters per blocked line (`ab`, `10`, ...).
    pub fn block_string(&self) -> String {
        self.lines.iter().filter_map(|l| l.block_char()).collect()
    }

    /// Dimension tag used in emitted tensor names, e.g. `ab_ov`.
    /// Excited-state indices only appear when `include_trial` is set.
    pub fn dimstring(&self, include_trial: bool) -> String {
        dimstring_of(&self.lines, include_trial, self.has_block)
    }

    /// Display name with the dimension map, e.g. `f["oo"]`.
    pub fn name(&self) -> String {
        if self.is_scalar() {
            self.base_name.clone()
        } else {
            format!("{}[\"{}\"]", self.base_name, self.dimstring(true))
        }
    }

    /// Index list for emission, e.g. `("a,i")`.
    pub fn line_str(&self) -> String {
        if self.is_scalar() {
            return String::new();
        }
        let labels: Vec<&str> = self.lines.iter().map(|l| l.label.as_str()).collect();
        format!("(\"{}\")", labels.join(","))
    }

    pub fn str(&self) -> String {
        format!("{}{}", self.name(), self.line_str())
    }

    /// Same base name and positionally equivalent lines; labels may differ.
    pub fn equivalent(&self, other: &Vertex) -> bool {
        self.base_name == other.base_name
            && self.rank() == other.rank()
            && self.shape == other.shape
            && self
                .lines
                .iter()
                .zip(other.lines.iter())
                .all(|(a, b)| a.equivalent(b))
    }

    /// Size of the upper (left) index half.
    fn left_size(&self) -> usize {
        self.rank() - self.rank() / 2
    }

    /// Number of distinct index permutations (independent within each
    /// half of the index sequence).
    pub fn n_permutations(&self) -> usize {
        let right = self.rank() / 2;
        let left = self.rank() - right;
        factorial(left) * factorial(right)
    }

    /// Apply the `perm_id`-th index permutation; permutations act
    /// independently within the upper and lower halves. Returns the
    /// permuted vertex and whether the composite permutation is odd.
    /// `perm_id == 0` is the identity. Out-of-range ids return `None`.
    pub fn permute(&self, perm_id: usize) -> Option<(Vertex, bool)> {
        if perm_id == 0 {
            return Some((self.clone(), false));
        }
        let right_size = self.rank() / 2;
        let left_size = self.rank() - right_size;
        let left_total = factorial(left_size);
        let right_total = factorial(right_size);
        if perm_id >= left_total * right_total {
            return None;
        }

        let left_perm = nth_permutation(left_size, perm_id % left_total);
        let right_perm = nth_permutation(right_size, perm_id / left_total);
        let odd = (permutation_inversions(&left_perm) + permutation_inversions(&right_perm)) % 2
            == 1;

        let mut lines = Vec::with_capacity(self.rank());
        for &i in &left_perm {
            lines.push(self.lines[i]);
        }
        for &i in &right_perm {
            lines.push(self.lines[left_size + i]);
        }

        let mut permuted = self.clone();
        permuted.set_lines(lines);
        Some((permuted, odd))
    }

    /// Find the permutation of `self` whose lines equal `other`'s, if
    /// one exists, together with its parity.
    pub fn permute_like(&self, other: &Vertex) -> Option<(Vertex, bool)> {
        if self.rank() != other.rank() {
            return None;
        }
        // fast reject: the two multisets of lines must agree
        let mut mine = self.lines.clone();
        let mut theirs = other.lines.to_vec();
        mine.sort_unstable();
        theirs.sort_unstable();
        if mine != theirs {
            return None;
        }

        let mut perm_id = 0;
        while let Some((permuted, odd)) = self.permute(perm_id) {
            if permuted.lines == other.lines {
                return Some((permuted, odd));
            }
            perm_id += 1;
        }
        None
    }

    /// Canonicalize a two-electron integral into one of the allow-listed
    /// occ/vir orders. Tries half-permutations combined with the bra-ket
    /// exchange (which is symmetric and carries no sign) and returns the
    /// first allow-listed form with the parity of the applied
    /// permutation. Returns `None` if no reachable form is allow-listed.
    pub fn permute_eri(&self) -> Option<(Vertex, bool)> {
        if self.rank() != 4 {
            return None;
        }
        for exchange_braket in [false, true] {
            let base = if exchange_braket {
                let mut lines = self.lines[2..].to_vec();
                lines.extend_from_slice(&self.lines[..2]);
                let mut v = self.clone();
                v.set_lines(lines);
                v
            } else {
                self.clone()
            };
            let mut perm_id = 0;
            while let Some((permuted, odd)) = base.permute(perm_id) {
                if ERI_ALLOWED.contains(&permuted.ovstring().as_str()) {
                    return Some((permuted, odd));
                }
                perm_id += 1;
            }
        }
        None
    }

    /// Sort the upper half of the index sequence by kind then label.
    /// The lower half is left untouched to preserve antisymmetry.
    pub fn sort(&mut self) {
        let left = self.left_size();
        let mut lines = self.lines.clone();
        lines[..left].sort_by(|a, b| a.cmp(b));
        self.set_lines(lines);
    }

    /// Labels appearing more than once (self-contractions), with their
    /// multiplicities.
    pub fn self_links(&self) -> BTreeMap<Label, usize> {
        let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
        for line in &self.lines {
            *counts.entry(line.label).or_insert(0) += 1;
        }
        counts.retain(|_, c| *c > 1);
        counts
    }

    /// Replace repeated labels with numbered copies and return the
    /// identity-delta vertices tying consecutive copies together.
    pub fn expand_self_links(&mut self) -> Vec<Vertex> {
        let repeated = self.self_links();
        if repeated.is_empty() {
            return Vec::new();
        }

        let mut seen: BTreeMap<Label, usize> = BTreeMap::new();
        let mut lines = self.lines.clone();
        for line in &mut lines {
            if let Some(&count) = repeated.get(&line.label) {
                debug_assert!(count > 1);
                let n = seen.entry(line.label).or_insert(0);
                let renamed = line.label.with_suffix(*n);
                *n += 1;
                line.label = renamed;
            }
        }
        self.set_lines(lines);

        let mut deltas = Vec::new();
        for (label, count) in repeated {
            let template = *self
                .lines
                .iter()
                .find(|l| l.label == label.with_suffix(0))
                .expect("renamed line present");
            let mut pair = Vec::with_capacity(2);
            for j in 0..count {
                let mut line = template;
                line.label = label.with_suffix(j);
                pair.push(line);
                if pair.len() == 2 {
                    deltas.push(Vertex::new("Id", std::mem::take(&mut pair)));
                }
            }
        }
        deltas
    }

    /// Rewrite labels to canonical per-kind counters (`o0`, `v1`, ...)
    /// for hashing up to renaming. Kind bits are preserved.
    pub fn genericize(&mut self) {
        let mut counts: BTreeMap<char, usize> = BTreeMap::new();
        let mut lines = self.lines.clone();
        for line in &mut lines {
            let kind = line.kind_char();
            let n = counts.entry(kind).or_insert(0);
            line.label = Label::indexed(kind, *n);
            *n += 1;
        }
        self.set_lines(lines);
    }

    pub fn generic(&self) -> Vertex {
        let mut v = self.clone();
        v.genericize();
        v
    }
}

/// Test whether two vertices are equal after some half-respecting index
/// permutation. Returns the parity of that permutation, or `None` when
/// the vertices are not isomorphic.
pub fn is_isomorphic(left: &Vertex, right: &Vertex) -> Option<bool> {
    if left == right {
        return Some(false);
    }
    if left.base_name() != right.base_name() {
        return None;
    }
    left.permute_like(right).map(|(_, odd)| odd)
}

/// Dimension tag for a line sequence, e.g. `ab_ov`. Excited-state
/// indices only appear when `include_trial` is set.
pub(crate) fn dimstring_of(lines: &[Line], include_trial: bool, has_block: bool) -> String {
    let ov: String = lines
        .iter()
        .filter(|l| include_trial || !l.sigma)
        .map(|l| l.kind_char())
        .collect();
    if has_block {
        let blocks: String = lines.iter().filter_map(|l| l.block_char()).collect();
        format!("{blocks}_{ov}")
    } else {
        ov
    }
}

fn factorial(n: usize) -> usize {
    (2..=n).product::<usize>().max(1)
}

/// Decode permutation `id` (factorial number system) over `n` items.
fn nth_permutation(n: usize, mut id: usize) -> Vec<usize> {
    let mut items: Vec<usize> = (0..n).collect();
    let mut perm = Vec::with_capacity(n);
    for k in (0..n).rev() {
        let f = factorial(k);
        let pick = id / f;
        id %= f;
        perm.push(items.remove(pick));
    }
    perm
}

fn permutation_inversions(perm: &[usize]) -> usize {
    let mut inversions = 0;
    for i in 0..perm.len() {
        for j in (i + 1)..perm.len() {
            if perm[i] > perm[j] {
                inversions += 1;
            }
        }
    }
    inversions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn line(label: &str) -> Line {
        Line::new(label, None, &Options::default()).unwrap()
    }

    fn vertex(name: &str, labels: &[&str]) -> Vertex {
        Vertex::new(name, labels.iter().map(|l| line(l)).collect())
    }

    #[test]
    fn test_shape_is_sum_of_line_shapes() {
        let v = vertex("g", &["i", "j", "a", "b"]);
        assert_eq!(v.rank(), 4);
        assert_eq!(v.shape().occ(), 2);
        assert_eq!(v.shape().vir(), 2);
        assert_eq!(v.ovstring(), "oovv");
    }

    #[test]
    fn test_equality_vs_equivalence() {
        let a = vertex("t", &["a", "i"]);
        let b = vertex("t", &["b", "j"]);
        let c = vertex("f", &["a", "i"]);
        assert_ne!(a, b);
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&c));
    }

    #[test]
    fn test_permute_identity() {
        let v = vertex("g", &["i", "j", "a", "b"]);
        let (p, odd) = v.permute(0).unwrap();
        assert_eq!(p, v);
        assert!(!odd);
    }

    #[test]
    fn test_permute_enumerates_half_permutations() {
        let v = vertex("g", &["i", "j", "a", "b"]);
        assert_eq!(v.n_permutations(), 4);
        assert!(v.permute(3).is_some());
        assert!(v.permute(4).is_none());
    }

    #[test]
    fn test_permute_parity_of_single_swap() {
        let v = vertex("g", &["i", "j", "a", "b"]);
        let mut found_swap = false;
        for id in 1..v.n_permutations() {
            let (p, odd) = v.permute(id).unwrap();
            let labels: Vec<&str> = p.lines().iter().map(|l| l.label.as_str()).collect();
            if labels == ["j", "i", "a", "b"] {
                assert!(odd, "a single transposition is odd");
                found_swap = true;
            }
        }
        assert!(found_swap);
    }

    #[test]
    fn test_permute_like_roundtrip() {
        let v = vertex("g", &["i", "j", "a", "b"]);
        for id in 0..v.n_permutations() {
            let (p, odd) = v.permute(id).unwrap();
            let (back, odd_back) = p.permute_like(&v).unwrap();
            assert_eq!(back, v);
            // the inverse permutation has the same parity
            assert_eq!(odd, odd_back);
        }
    }

    #[test]
    fn test_is_isomorphic() {
        let v = vertex("g", &["i", "j", "a", "b"]);
        let (p, odd) = v.permute(1).unwrap();
        assert_eq!(is_isomorphic(&v, &p), Some(odd));
        assert_eq!(is_isomorphic(&v, &v), Some(false));
        let other = vertex("h", &["i", "j", "a", "b"]);
        assert_eq!(is_isomorphic(&v, &other), None);
    }

    #[test]
    fn test_eri_already_canonical() {
        let v = vertex("eri", &["i", "j", "a", "b"]); // oovv
        let (p, odd) = v.permute_eri().unwrap();
        assert_eq!(p.ovstring(), "oovv");
        assert!(!odd);
    }

    #[test]
    fn test_eri_voov_gets_allowed_form_with_sign() {
        let v = vertex("eri", &["a", "i", "j", "b"]); // voov
        let (p, odd) = v.permute_eri().unwrap();
        assert!(ERI_ALLOWED.contains(&p.ovstring().as_str()));
        assert!(odd, "reaching an allowed order from voov flips the sign");
    }

    #[test]
    fn test_sort_orders_upper_half() {
        let mut v = vertex("r", &["i", "a", "j", "b"]);
        v.sort();
        // upper half (first two) sorted: virtual before occupied
        assert_eq!(v.lines()[0].label.as_str(), "a");
        assert_eq!(v.lines()[1].label.as_str(), "i");
        // lower half untouched
        assert_eq!(v.lines()[2].label.as_str(), "j");
        assert_eq!(v.lines()[3].label.as_str(), "b");
    }

    #[test]
    fn test_self_links_detected_and_expanded() {
        let mut v = vertex("g", &["i", "i", "a", "b"]);
        let links = v.self_links();
        assert_eq!(links.len(), 1);

        let deltas = v.expand_self_links();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].base_name(), "Id");
        let labels: Vec<&str> = v.lines().iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, ["i0", "i1", "a", "b"]);
    }

    #[test]
    fn test_genericize() {
        let mut v = vertex("g", &["k", "j", "c", "b"]);
        v.genericize();
        let labels: Vec<&str> = v.lines().iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, ["o0", "o1", "v0", "v1"]);
        // kinds unchanged
        assert_eq!(v.ovstring(), "oovv");
    }

    #[test]
    fn test_display_name() {
        let v = vertex("f", &["i", "a"]);
        assert_eq!(v.name(), "f[\"ov\"]");
        assert_eq!(v.str(), "f[\"ov\"](\"i,a\")");
        assert_eq!(Vertex::scalar("e").name(), "e");
    }
}
