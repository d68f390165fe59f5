//! Pairwise contractions.
//!
//! A [`Linkage`] is a binary node in the expression DAG: the contraction
//! (or addition) of two sub-expressions. Children are shared through
//! [`Arc`] and may appear under many parents; a linkage therefore never
//! mutates its children. The flattened operand list is computed lazily
//! under a per-node mutex and must be invalidated with
//! [`Linkage::forget`] after structural changes.

use crate::label::Label;
use crate::line::Line;
use crate::shape::Shape;
use crate::vertex::{dimstring_of, is_isomorphic, Vertex};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Which intermediate bucket a materialized linkage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempKind {
    /// Rank-0 intermediates.
    Scalar,
    /// Intermediates free of excited-state indices, shared across
    /// sigma-vector builds.
    Reused,
    /// Ordinary intermediates.
    Temp,
}

impl TempKind {
    /// Name of the reserved equation holding declarations of this kind.
    pub fn equation_name(&self) -> &'static str {
        match self {
            TempKind::Scalar => "scalar",
            TempKind::Reused => "reused",
            TempKind::Temp => "temp",
        }
    }

    /// Container name used in emitted code.
    pub fn container(&self) -> &'static str {
        match self {
            TempKind::Scalar => "scalars",
            TempKind::Reused => "reused",
            TempKind::Temp => "tmps",
        }
    }

    pub const ALL: [TempKind; 3] = [TempKind::Scalar, TempKind::Reused, TempKind::Temp];
}

/// A node of the expression DAG: either a bare tensor or a contraction.
#[derive(Debug, Clone)]
pub enum Node {
    Vertex(Arc<Vertex>),
    Linkage(Arc<Linkage>),
}

impl Node {
    pub fn vertex(v: Vertex) -> Self {
        Node::Vertex(Arc::new(v))
    }

    pub fn linkage(l: Linkage) -> Self {
        Node::Linkage(Arc::new(l))
    }

    pub fn lines(&self) -> &[Line] {
        match self {
            Node::Vertex(v) => v.lines(),
            Node::Linkage(l) => &l.lines,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Node::Vertex(v) => v.shape(),
            Node::Linkage(l) => l.mem_shape,
        }
    }

    pub fn rank(&self) -> usize {
        self.lines().len()
    }

    pub fn is_scalar(&self) -> bool {
        self.lines().is_empty()
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Node::Linkage(_))
    }

    pub fn as_linkage(&self) -> Option<&Arc<Linkage>> {
        match self {
            Node::Linkage(l) => Some(l),
            Node::Vertex(_) => None,
        }
    }

    /// A materialized intermediate: a linkage carrying an assigned id.
    pub fn is_temp(&self) -> bool {
        self.as_linkage().map(|l| l.is_temp()).unwrap_or(false)
    }

    pub fn is_sigma(&self) -> bool {
        match self {
            Node::Vertex(v) => v.is_sigma(),
            Node::Linkage(l) => l.is_sigma,
        }
    }

    pub fn is_density(&self) -> bool {
        match self {
            Node::Vertex(v) => v.is_density(),
            Node::Linkage(l) => l.is_density,
        }
    }

    pub fn has_block(&self) -> bool {
        match self {
            Node::Vertex(v) => v.has_block(),
            Node::Linkage(l) => l.has_block,
        }
    }

    /// Display name for deterministic ordering and emission. Temps use
    /// their container name; unmaterialized linkages expand.
    pub fn name(&self) -> String {
        match self {
            Node::Vertex(v) => v.name(),
            Node::Linkage(l) => {
                if l.is_temp() {
                    l.temp_name(true)
                } else {
                    l.generic_key()
                }
            }
        }
    }

    /// Stable ordering key: display name, then the label sequence.
    pub fn sort_key(&self) -> (String, Vec<Label>) {
        let labels = self.lines().iter().map(|l| l.label).collect();
        (self.name(), labels)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Vertex(a), Node::Vertex(b)) => a == b,
            (Node::Linkage(a), Node::Linkage(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Node {}

/// A pairwise contraction (or addition) of two sub-expressions.
pub struct Linkage {
    left: Node,
    right: Node,
    is_addition: bool,
    /// >= 1 once materialized as a named intermediate, else -1.
    id: i64,
    /// Extracted into the shared (non-sigma) bucket.
    reused: bool,
    /// Total number of leaves under this node.
    nvert: usize,
    /// External lines, in merged sorted order. These are this node's
    /// lines when it is viewed as a tensor.
    lines: Vec<Line>,
    /// Contracted lines, sorted.
    int_lines: Vec<Line>,
    /// Pairs of (left position, right position) connected by a
    /// contracted line.
    int_connec: Vec<(u8, u8)>,
    /// Positions of external lines on the left child.
    l_ext_idx: Vec<u8>,
    /// Positions of external lines on the right child.
    r_ext_idx: Vec<u8>,
    /// Shape of all lines touching this contraction.
    flop_shape: Shape,
    /// Shape of the external lines (this node's output shape).
    mem_shape: Shape,
    is_sigma: bool,
    is_density: bool,
    has_block: bool,
    /// Lazily computed operand lists, one slot per `full_expand` flag.
    all_vert: Mutex<[Option<Arc<Vec<Node>>>; 2]>,
}

impl std::fmt::Debug for Linkage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linkage")
            .field("key", &self.generic_key())
            .field("id", &self.id)
            .field("nvert", &self.nvert)
            .field("flop", &self.flop_shape)
            .field("mem", &self.mem_shape)
            .finish()
    }
}

impl Clone for Linkage {
    fn clone(&self) -> Self {
        Self {
            left: self.left.clone(),
            right: self.right.clone(),
            is_addition: self.is_addition,
            id: self.id,
            reused: self.reused,
            nvert: self.nvert,
            lines: self.lines.clone(),
            int_lines: self.int_lines.clone(),
            int_connec: self.int_connec.clone(),
            l_ext_idx: self.l_ext_idx.clone(),
            r_ext_idx: self.r_ext_idx.clone(),
            flop_shape: self.flop_shape,
            mem_shape: self.mem_shape,
            is_sigma: self.is_sigma,
            is_density: self.is_density,
            has_block: self.has_block,
            all_vert: Mutex::new([None, None]),
        }
    }
}

impl Linkage {
    /// Contract (or add) two nodes.
    ///
    /// When both children are leaves the product is associative, so the
    /// pair is ordered by display name; `A*B` and `B*A` then hash
    /// identically. Deeper linkages preserve the supplied order.
    pub fn new(left: Node, right: Node, is_addition: bool) -> Self {
        let (left, right) = if !left.is_linked() && !right.is_linked() && left.name() > right.name()
        {
            (right, left)
        } else {
            (left, right)
        };

        let nvert = Self::child_leaves(&left) + Self::child_leaves(&right);
        let has_block = left.has_block() || right.has_block();

        let mut linkage = Self {
            left,
            right,
            is_addition,
            id: -1,
            reused: false,
            nvert,
            lines: Vec::new(),
            int_lines: Vec::new(),
            int_connec: Vec::new(),
            l_ext_idx: Vec::new(),
            r_ext_idx: Vec::new(),
            flop_shape: Shape::new(),
            mem_shape: Shape::new(),
            is_sigma: false,
            is_density: false,
            has_block,
            all_vert: Mutex::new([None, None]),
        };
        linkage.set_links();
        linkage.connect_lines();
        linkage
    }

    fn child_leaves(node: &Node) -> usize {
        match node {
            Node::Vertex(_) => 1,
            Node::Linkage(l) => l.nvert,
        }
    }

    /// Split the merged line multiset into external and internal lines
    /// and derive the flop and memory shapes.
    fn set_links(&mut self) {
        let left_lines = self.left.lines();
        let right_lines = self.right.lines();

        if self.is_addition {
            // an addition contracts nothing; its lines are the left
            // child's (both children cover the same external lines)
            self.lines = left_lines.to_vec();
            self.mem_shape = Shape::of_lines(&self.lines);
            self.flop_shape = self.mem_shape;
            self.finish_line_flags();
            return;
        }

        // a scalar child contributes no lines
        if left_lines.is_empty() && right_lines.is_empty() {
            return;
        }
        if left_lines.is_empty() || right_lines.is_empty() {
            let other = if left_lines.is_empty() {
                right_lines
            } else {
                left_lines
            };
            self.lines = other.to_vec();
            self.mem_shape = Shape::of_lines(&self.lines);
            self.flop_shape = self.mem_shape;
            self.finish_line_flags();
            return;
        }

        let mut populations: BTreeMap<Line, u8> = BTreeMap::new();
        for line in left_lines.iter().chain(right_lines.iter()) {
            *populations.entry(*line).or_insert(0) += 1;
        }

        for (line, freq) in populations {
            debug_assert!(freq <= 2, "self-contractions are expanded before linking");
            if freq == 1 {
                self.lines.push(line);
                self.mem_shape += Shape::of_line(&line);
            } else {
                self.int_lines.push(line);
            }
            self.flop_shape += Shape::of_line(&line);
        }
        self.finish_line_flags();
    }

    fn finish_line_flags(&mut self) {
        self.is_sigma = self.lines.iter().any(|l| l.sigma);
        self.is_density = self.lines.iter().any(|l| l.density);
    }

    /// Record which child positions connect left to right and which
    /// stay external.
    fn connect_lines(&mut self) {
        let left_lines = self.left.lines();
        let right_lines = self.right.lines();

        for (i, line) in left_lines.iter().enumerate() {
            if self.int_lines.binary_search(line).is_ok() {
                if let Some(j) = right_lines.iter().position(|r| r == line) {
                    self.int_connec.push((i as u8, j as u8));
                    continue;
                }
            }
            self.l_ext_idx.push(i as u8);
        }
        for (j, line) in right_lines.iter().enumerate() {
            if self.int_lines.binary_search(line).is_err() {
                self.r_ext_idx.push(j as u8);
            }
        }
    }

    /// Left-associated chain over two or more operands.
    pub fn link(ops: &[Node]) -> Arc<Linkage> {
        debug_assert!(ops.len() >= 2, "a linkage needs at least two operands");
        let mut acc = Node::linkage(Linkage::new(ops[0].clone(), ops[1].clone(), false));
        for op in &ops[2..] {
            acc = Node::linkage(Linkage::new(acc, op.clone(), false));
        }
        match acc {
            Node::Linkage(l) => l,
            Node::Vertex(_) => unreachable!(),
        }
    }

    pub fn left(&self) -> &Node {
        &self.left
    }

    pub fn right(&self) -> &Node {
        &self.right
    }

    pub fn is_addition(&self) -> bool {
        self.is_addition
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_temp(&self) -> bool {
        self.id >= 0
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn nvert(&self) -> usize {
        self.nvert
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn rank(&self) -> usize {
        self.lines.len()
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

    pub fn int_lines(&self) -> &[Line] {
        &self.int_lines
    }

    pub fn int_connections(&self) -> &[(u8, u8)] {
        &self.int_connec
    }

    pub fn left_external(&self) -> &[u8] {
        &self.l_ext_idx
    }

    pub fn right_external(&self) -> &[u8] {
        &self.r_ext_idx
    }

    pub fn flop_shape(&self) -> Shape {
        self.flop_shape
    }

    pub fn mem_shape(&self) -> Shape {
        self.mem_shape
    }

    /// A copy of this linkage materialized under the given id.
    pub fn with_id(&self, id: i64, reused: bool) -> Linkage {
        let mut copy = self.clone();
        copy.id = id;
        copy.reused = reused;
        copy
    }

    /// Which bucket this linkage belongs to once materialized.
    pub fn temp_kind(&self) -> TempKind {
        if self.is_scalar() {
            TempKind::Scalar
        } else if self.reused {
            TempKind::Reused
        } else {
            TempKind::Temp
        }
    }

    /// Display name once materialized, e.g. `tmps["vvoo_3"]`.
    pub fn temp_name(&self, include_trial: bool) -> String {
        let kind = self.temp_kind();
        let id = self.id.max(0);
        match kind {
            TempKind::Scalar => format!("{}[\"{}\"]", kind.container(), id),
            _ => {
                let dims = dimstring_of(&self.lines, include_trial, self.has_block);
                format!("{}[\"{}_{}\"]", kind.container(), dims, id)
            }
        }
    }

    /// Index list of the external lines, e.g. `("a,b,i,j")`.
    pub fn line_str(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let labels: Vec<&str> = self.lines.iter().map(|l| l.label.as_str()).collect();
        format!("(\"{}\")", labels.join(","))
    }

    /// Flattened leaf sequence. Materialized intermediates are treated
    /// as opaque leaves unless `full_expand` is set. The result is
    /// cached per flag; call [`Linkage::forget`] after any structural
    /// mutation.
    pub fn to_vector(&self, full_expand: bool) -> Arc<Vec<Node>> {
        let slot = usize::from(full_expand);
        let mut cache = self.all_vert.lock().expect("operand cache poisoned");
        if let Some(cached) = &cache[slot] {
            return Arc::clone(cached);
        }
        let mut out = Vec::with_capacity(self.nvert);
        self.flatten_into(&mut out, full_expand);
        let arc = Arc::new(out);
        cache[slot] = Some(Arc::clone(&arc));
        arc
    }

    fn flatten_into(&self, out: &mut Vec<Node>, full_expand: bool) {
        for child in [&self.left, &self.right] {
            match child {
                Node::Vertex(_) => out.push(child.clone()),
                Node::Linkage(l) => {
                    if !full_expand && l.is_temp() {
                        out.push(child.clone());
                    } else {
                        l.flatten_into(out, full_expand);
                    }
                }
            }
        }
    }

    /// Drop the cached operand lists of this node.
    pub fn forget(&self) {
        *self.all_vert.lock().expect("operand cache poisoned") = [None, None];
    }

    /// Drop cached operand lists recursively.
    pub fn forget_deep(&self) {
        self.forget();
        for child in [&self.left, &self.right] {
            if let Node::Linkage(l) = child {
                l.forget_deep();
            }
        }
    }

    /// Structural hash key modulo index renaming: labels are replaced
    /// with per-kind counters in first-appearance order, so two
    /// linkages that differ only by a renaming share a key.
    pub fn generic_key(&self) -> String {
        let mut renames: FxHashMap<Line, String> = FxHashMap::default();
        let mut counts: BTreeMap<char, usize> = BTreeMap::new();
        let mut out = String::new();
        self.write_generic(&mut out, &mut renames, &mut counts);
        out
    }

    fn write_generic(
        &self,
        out: &mut String,
        renames: &mut FxHashMap<Line, String>,
        counts: &mut BTreeMap<char, usize>,
    ) {
        out.push('(');
        Self::write_generic_node(&self.left, out, renames, counts);
        out.push(if self.is_addition { '+' } else { '*' });
        Self::write_generic_node(&self.right, out, renames, counts);
        out.push(')');
    }

    fn write_generic_node(
        node: &Node,
        out: &mut String,
        renames: &mut FxHashMap<Line, String>,
        counts: &mut BTreeMap<char, usize>,
    ) {
        match node {
            Node::Vertex(v) => {
                out.push_str(v.base_name());
                out.push('[');
                for line in v.lines() {
                    out.push(line.kind_char());
                    if let Some(b) = line.block_char() {
                        out.push(b);
                    }
                }
                out.push(']');
                out.push('(');
                for (i, line) in v.lines().iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let generic = renames.entry(*line).or_insert_with(|| {
                        let kind = line.kind_char();
                        let n = counts.entry(kind).or_insert(0);
                        let name = format!("{kind}{n}");
                        *n += 1;
                        name
                    });
                    out.push_str(generic);
                }
                out.push(')');
            }
            Node::Linkage(l) => l.write_generic(out, renames, counts),
        }
    }
}

impl PartialEq for Linkage {
    /// Structural equality up to index renaming: type, leaf count,
    /// shapes, index maps, positionally equivalent lines, and
    /// recursively equal children. The id and caches do not
    /// participate.
    fn eq(&self, other: &Self) -> bool {
        if self.is_addition != other.is_addition
            || self.nvert != other.nvert
            || self.flop_shape != other.flop_shape
            || self.mem_shape != other.mem_shape
            || self.int_connec != other.int_connec
            || self.l_ext_idx != other.l_ext_idx
            || self.r_ext_idx != other.r_ext_idx
        {
            return false;
        }
        if self.lines.len() != other.lines.len()
            || !self
                .lines
                .iter()
                .zip(other.lines.iter())
                .all(|(a, b)| a.equivalent(b))
        {
            return false;
        }
        children_equal(&self.left, &other.left) && children_equal(&self.right, &other.right)
    }
}

impl Eq for Linkage {}

fn children_equal(a: &Node, b: &Node) -> bool {
    match (a, b) {
        (Node::Vertex(x), Node::Vertex(y)) => x.equivalent(y),
        (Node::Linkage(x), Node::Linkage(y)) => x == y,
        _ => false,
    }
}

impl std::hash::Hash for Linkage {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.is_addition.hash(state);
        self.nvert.hash(state);
        self.flop_shape.hash(state);
        self.mem_shape.hash(state);
        self.int_connec.hash(state);
    }
}

impl Linkage {
    /// Equality up to a per-leaf index permutation: returns the parity
    /// of the composite permutation, or `None` when the linkages are
    /// not permutations of each other.
    pub fn permuted_equals(&self, other: &Linkage) -> Option<bool> {
        if self == other {
            return Some(false);
        }
        if self.nvert != other.nvert {
            return None;
        }
        let mine = self.to_vector(true);
        let theirs = other.to_vector(true);
        if mine.len() != theirs.len() {
            return None;
        }
        let mut odd = false;
        for (a, b) in mine.iter().zip(theirs.iter()) {
            let (Node::Vertex(va), Node::Vertex(vb)) = (a, b) else {
                return None;
            };
            match is_isomorphic(va, vb) {
                Some(swap) => odd ^= swap,
                None => return None,
            }
        }
        Some(odd)
    }

    /// Match `other` against this candidate modulo index renaming and
    /// per-leaf index permutation. Walks both leaf sequences in order,
    /// building an injective label renaming with backtracking across
    /// leaves. Returns the parity of the composite permutation, or
    /// `None` when no consistent renaming exists.
    pub fn matches_with_renaming(&self, other: &Linkage) -> Option<bool> {
        self.matches_with_renaming_pinned(other, &[])
    }

    /// Like [`Linkage::matches_with_renaming`], but the `pinned` lines
    /// must map to themselves. Used when fusing terms of one equation,
    /// whose external lines are fixed by the shared lhs.
    pub fn matches_with_renaming_pinned(
        &self,
        other: &Linkage,
        pinned: &[Line],
    ) -> Option<bool> {
        if self.is_addition != other.is_addition || self.nvert != other.nvert {
            return None;
        }
        if self.flop_shape != other.flop_shape || self.mem_shape != other.mem_shape {
            return None;
        }
        let mine = self.to_vector(true);
        let theirs = other.to_vector(true);
        if mine.len() != theirs.len() {
            return None;
        }
        for (a, b) in mine.iter().zip(theirs.iter()) {
            let (Node::Vertex(va), Node::Vertex(vb)) = (a, b) else {
                return None;
            };
            if va.base_name() != vb.base_name() || va.rank() != vb.rank() {
                return None;
            }
        }

        // forward: other's labels -> candidate's labels (and reverse,
        // to keep the renaming injective)
        let mut fwd: FxHashMap<Line, Line> = FxHashMap::default();
        let mut rev: FxHashMap<Line, Line> = FxHashMap::default();
        for line in pinned {
            fwd.insert(*line, *line);
            rev.insert(*line, *line);
        }
        match_leaves(&mine, &theirs, 0, &mut fwd, &mut rev)
    }
}

/// Depth-first search over per-leaf permutations; the renaming built so
/// far is threaded through and rolled back on failure.
fn match_leaves(
    cand: &[Node],
    theirs: &[Node],
    depth: usize,
    fwd: &mut FxHashMap<Line, Line>,
    rev: &mut FxHashMap<Line, Line>,
) -> Option<bool> {
    if depth == cand.len() {
        return Some(false);
    }
    let (Node::Vertex(cv), Node::Vertex(tv)) = (&cand[depth], &theirs[depth]) else {
        return None;
    };

    let mut perm_id = 0;
    while let Some((permuted, swap)) = tv.permute(perm_id) {
        perm_id += 1;
        let mut added: Vec<Line> = Vec::new();
        if extend_renaming(cv.lines(), permuted.lines(), fwd, rev, &mut added) {
            if let Some(rest_odd) = match_leaves(cand, theirs, depth + 1, fwd, rev) {
                return Some(rest_odd ^ swap);
            }
        }
        rollback(fwd, rev, &added);
    }
    None
}

/// Extend the renaming with one leaf's line pairing. On conflict the
/// caller rolls back using `added`. Lines must agree on kind bits for
/// the pairing to hold.
fn extend_renaming(
    cand_lines: &[Line],
    their_lines: &[Line],
    fwd: &mut FxHashMap<Line, Line>,
    rev: &mut FxHashMap<Line, Line>,
    added: &mut Vec<Line>,
) -> bool {
    for (c, t) in cand_lines.iter().zip(their_lines.iter()) {
        if !c.equivalent(t) {
            return false;
        }
        match fwd.get(t) {
            Some(mapped) if mapped == c => continue,
            Some(_) => return false,
            None => {
                if rev.contains_key(c) {
                    return false;
                }
                fwd.insert(*t, *c);
                rev.insert(*c, *t);
                added.push(*t);
            }
        }
    }
    true
}

fn rollback(fwd: &mut FxHashMap<Line, Line>, rev: &mut FxHashMap<Line, Line>, added: &[Line]) {
    for t in added {
        if let Some(c) = fwd.remove(t) {
            rev.remove(&c);
        }
    }
}

/// Hash-consed set of linkages, deduplicated modulo index renaming via
/// [`Linkage::generic_key`].
#[derive(Debug, Clone, Default)]
pub struct LinkageSet {
    map: FxHashMap<String, Arc<Linkage>>,
}

impl LinkageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, keeping the first representative of each key. Returns
    /// whether the linkage was new.
    pub fn insert(&mut self, linkage: Arc<Linkage>) -> bool {
        let key = linkage.generic_key();
        if self.map.contains_key(&key) {
            false
        } else {
            self.map.insert(key, linkage);
            true
        }
    }

    pub fn contains(&self, linkage: &Linkage) -> bool {
        self.map.contains_key(&linkage.generic_key())
    }

    pub fn remove(&mut self, linkage: &Linkage) -> bool {
        self.map.remove(&linkage.generic_key()).is_some()
    }

    pub fn extend_from(&mut self, other: &LinkageSet) {
        for (key, link) in &other.map {
            self.map.entry(key.clone()).or_insert_with(|| Arc::clone(link));
        }
    }

    /// Remove every linkage present in `other`.
    pub fn subtract(&mut self, other: &LinkageSet) {
        for key in other.map.keys() {
            self.map.remove(key);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Linkage>> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn line(label: &str) -> Line {
        Line::new(label, None, &Options::default()).unwrap()
    }

    fn vertex(name: &str, labels: &[&str]) -> Node {
        Node::vertex(Vertex::new(
            name,
            labels.iter().map(|l| line(l)).collect(),
        ))
    }

    #[test]
    fn test_pair_canonicalization() {
        let a = vertex("t", &["a", "i"]);
        let b = vertex("f", &["i", "a"]);
        let ab = Linkage::new(a.clone(), b.clone(), false);
        let ba = Linkage::new(b, a, false);
        assert_eq!(ab, ba);
        assert_eq!(ab.generic_key(), ba.generic_key());
    }

    #[test]
    fn test_external_is_symmetric_difference() {
        // f(i,j) * t(a,j): j contracted, externals {i, a}
        let f = vertex("f", &["i", "j"]);
        let t = vertex("t", &["a", "j"]);
        let l = Linkage::new(f, t, false);
        assert_eq!(l.rank(), 2);
        assert_eq!(l.int_lines().len(), 1);
        assert_eq!(l.int_lines()[0].label.as_str(), "j");
        let ext: Vec<&str> = l.lines().iter().map(|x| x.label.as_str()).collect();
        // merged sorted order: virtuals before occupieds
        assert_eq!(ext, ["a", "i"]);
    }

    #[test]
    fn test_flop_dominates_mem() {
        let f = vertex("g", &["i", "j", "a", "b"]);
        let t = vertex("t", &["b", "j"]);
        let l = Linkage::new(f, t, false);
        assert!(l.flop_shape().dominates(&l.mem_shape()));
        assert_eq!(l.mem_shape(), Shape::of_lines(l.lines()));
        assert_eq!(l.flop_shape().total(), 4);
        assert_eq!(l.mem_shape().total(), 2);
    }

    #[test]
    fn test_scalar_child_short_circuit() {
        let s = Node::vertex(Vertex::scalar("e"));
        let t = vertex("t", &["a", "i"]);
        let l = Linkage::new(s, t.clone(), false);
        assert_eq!(l.rank(), 2);
        assert!(l.int_lines().is_empty());
        assert_eq!(l.mem_shape(), t.shape());
        assert_eq!(l.flop_shape(), t.shape());
    }

    #[test]
    fn test_connections() {
        let f = vertex("f", &["i", "j"]);
        let t = vertex("t", &["a", "j"]);
        let l = Linkage::new(f, t, false);
        // canonical order puts f left; j is position 1 on both children
        assert_eq!(l.int_connections(), [(1, 1)]);
        assert_eq!(l.left_external(), [0]);
        assert_eq!(l.right_external(), [0]);
    }

    #[test]
    fn test_addition_keeps_all_lines() {
        let a = vertex("r", &["a", "i"]);
        let b = vertex("s", &["a", "i"]);
        let l = Linkage::new(a, b, true);
        assert!(l.is_addition());
        assert_eq!(l.rank(), 2);
        assert!(l.int_lines().is_empty());
        assert_eq!(l.flop_shape(), l.mem_shape());
    }

    #[test]
    fn test_nvert_counts_leaves() {
        let f = vertex("f", &["i", "j"]);
        let t = vertex("t", &["a", "j"]);
        let u = vertex("u", &["b", "i"]);
        let inner = Node::linkage(Linkage::new(f, t, false));
        let outer = Linkage::new(inner, u, false);
        assert_eq!(outer.nvert(), 3);
    }

    #[test]
    fn test_to_vector_roundtrip() {
        let f = vertex("f", &["i", "j"]);
        let t = vertex("t", &["a", "j"]);
        let u = vertex("u", &["b", "i"]);
        let root = Linkage::link(&[f, t, u]);
        let ops = root.to_vector(true);
        assert_eq!(ops.len(), 3);
        let rebuilt = Linkage::link(&ops[..]);
        assert_eq!(*root, *rebuilt);
    }

    #[test]
    fn test_to_vector_opaque_temps() {
        let f = vertex("f", &["i", "j"]);
        let t = vertex("t", &["a", "j"]);
        let inner = Linkage::new(f, t, false).with_id(1, false);
        let u = vertex("u", &["b", "i"]);
        let root = Linkage::new(Node::linkage(inner), u, false);
        assert_eq!(root.to_vector(false).len(), 2);
        assert_eq!(root.to_vector(true).len(), 3);
    }

    #[test]
    fn test_forget_invalidates_cache() {
        let f = vertex("f", &["i", "j"]);
        let t = vertex("t", &["a", "j"]);
        let l = Linkage::new(f, t, false);
        let first = l.to_vector(true);
        l.forget();
        let second = l.to_vector(true);
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_generic_key_ignores_labels() {
        let a = Linkage::new(vertex("f", &["i", "a"]), vertex("t", &["a", "i"]), false);
        let b = Linkage::new(vertex("f", &["j", "b"]), vertex("t", &["b", "j"]), false);
        assert_eq!(a.generic_key(), b.generic_key());
        let c = Linkage::new(vertex("f", &["i", "a"]), vertex("t", &["a", "j"]), false);
        assert_ne!(a.generic_key(), c.generic_key());
    }

    #[test]
    fn test_matches_with_renaming() {
        let a = Linkage::new(vertex("f", &["i", "a"]), vertex("t", &["a", "i"]), false);
        let b = Linkage::new(vertex("f", &["j", "b"]), vertex("t", &["b", "j"]), false);
        assert_eq!(a.matches_with_renaming(&b), Some(false));

        // connectivity differs: t's external is not f's partner
        let c = Linkage::new(vertex("f", &["i", "a"]), vertex("t", &["a", "j"]), false);
        assert_eq!(a.matches_with_renaming(&c), None);
    }

    #[test]
    fn test_matches_with_renaming_parity() {
        let g1 = Linkage::new(
            vertex("g", &["i", "j", "a", "b"]),
            vertex("t", &["a", "i"]),
            false,
        );
        // same contraction with g's occupied pair swapped: one
        // transposition, so the match carries a sign
        let g2 = Linkage::new(
            vertex("g", &["j", "i", "a", "b"]),
            vertex("t", &["a", "i"]),
            false,
        );
        assert_eq!(g1.matches_with_renaming(&g2), Some(true));
    }

    #[test]
    fn test_linkage_set_dedupes_modulo_renaming() {
        let a = Arc::new(Linkage::new(
            vertex("f", &["i", "a"]),
            vertex("t", &["a", "i"]),
            false,
        ));
        let b = Arc::new(Linkage::new(
            vertex("f", &["j", "b"]),
            vertex("t", &["b", "j"]),
            false,
        ));
        let mut set = LinkageSet::new();
        assert!(set.insert(a));
        assert!(!set.insert(b));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_temp_name() {
        let l = Linkage::new(
            vertex("g", &["i", "j", "a", "b"]),
            vertex("t", &["b", "j"]),
            false,
        )
        .with_id(3, false);
        assert_eq!(l.temp_name(true), "tmps[\"vo_3\"]");
        let scalar = Linkage::new(vertex("f", &["i", "a"]), vertex("t", &["a", "i"]), false)
            .with_id(1, false);
        assert_eq!(scalar.temp_name(true), "scalars[\"1\"]");
    }
}
