//! Tensor index lines.
//!
//! A [`Line`] is one labeled slot on a tensor. The first character of the
//! label classifies it against the configured alphabets (occupied,
//! virtual, excited-state, density-fitting); an optional block character
//! refines it into a spin (`a`/`b`) or range (`1`/`0`) block.

use crate::error::{PqError, Result};
use crate::label::Label;
use crate::options::Options;
use std::cmp::Ordering;

/// Kind of blocking carried by a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockKind {
    #[default]
    None,
    /// Alpha/beta spin block.
    Spin,
    /// Active/inactive range block.
    Range,
}

/// A single tensor index.
///
/// `sigma` and `density` are mutually exclusive and both imply
/// `occupied == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Line {
    pub label: Label,
    /// Occupied (true) or virtual (false) orbital subspace.
    pub occupied: bool,
    /// Alpha/active (true) or beta/inactive (false) block.
    pub active: bool,
    /// Excited-state (trial vector) index.
    pub sigma: bool,
    /// Auxiliary density-fitting index.
    pub density: bool,
    pub block: BlockKind,
}

impl Line {
    /// Classify a raw label against the configured alphabets and apply
    /// an optional block character.
    ///
    /// An unrecognized first character defaults to virtual, matching the
    /// convention for intermediate labels.
    pub fn new(label: &str, block: Option<char>, options: &Options) -> Result<Self> {
        let label = Label::from_str(label).map_err(|e| PqError::MalformedInput {
            token: label.to_string(),
            message: e.to_string(),
        })?;
        let first = label.first().expect("labels are nonempty");

        let mut occupied = false;
        let mut sigma = false;
        let mut density = false;
        if options.occ_labels.contains(&first) {
            occupied = true;
        } else if !options.virt_labels.contains(&first) {
            sigma = options.sig_labels.contains(&first);
            if !sigma {
                density = options.den_labels.contains(&first);
            }
            // otherwise: defaults to virtual
        }

        let (block_kind, active) = match block {
            None => (BlockKind::None, true),
            Some('a') => (BlockKind::Spin, true),
            Some('b') => (BlockKind::Spin, false),
            Some('1') => (BlockKind::Range, true),
            Some('0') => (BlockKind::Range, false),
            Some(c) => {
                return Err(PqError::MalformedInput {
                    token: c.to_string(),
                    message: format!("invalid block character on index `{label}`"),
                })
            }
        };

        Ok(Self {
            label,
            occupied,
            active,
            sigma,
            density,
            block: block_kind,
        })
    }

    /// Construct a line directly from kind bits (canonical renamings).
    pub fn from_parts(label: Label, occupied: bool, sigma: bool, density: bool) -> Self {
        Self {
            label,
            occupied: occupied && !sigma && !density,
            active: true,
            sigma,
            density,
            block: BlockKind::None,
        }
    }

    /// Same kind bits regardless of label.
    pub fn equivalent(&self, other: &Line) -> bool {
        self.occupied == other.occupied
            && self.active == other.active
            && self.sigma == other.sigma
            && self.density == other.density
            && self.block == other.block
    }

    pub fn has_block(&self) -> bool {
        self.block != BlockKind::None
    }

    /// Block character for display (`a`/`b` for spin, `1`/`0` for range).
    pub fn block_char(&self) -> Option<char> {
        match self.block {
            BlockKind::None => None,
            BlockKind::Spin => Some(if self.active { 'a' } else { 'b' }),
            BlockKind::Range => Some(if self.active { '1' } else { '0' }),
        }
    }

    /// One-character kind: `L` (sigma), `Q` (density), `o`, or `v`.
    pub fn kind_char(&self) -> char {
        if self.sigma {
            'L'
        } else if self.density {
            'Q'
        } else if self.occupied {
            'o'
        } else {
            'v'
        }
    }

    /// Kind-only ordering: sigma first, then density, then virtual
    /// before occupied, then active before inactive.
    pub fn cmp_kind(&self, other: &Line) -> Ordering {
        other
            .sigma
            .cmp(&self.sigma)
            .then(other.density.cmp(&self.density))
            .then(self.occupied.cmp(&other.occupied)) // virtual (false) first
            .then(other.active.cmp(&self.active))
    }
}

impl PartialOrd for Line {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Line {
    /// Total order: kind bits first, then label.
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_kind(other).then(self.label.cmp(&other.label))
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> Options {
        Options::default()
    }

    #[test]
    fn test_classification() {
        let o = opts();
        assert!(Line::new("i", None, &o).unwrap().occupied);
        assert!(!Line::new("a", None, &o).unwrap().occupied);
        assert!(Line::new("L", None, &o).unwrap().sigma);
        assert!(Line::new("Q", None, &o).unwrap().density);
        // unknown letters default to virtual
        let z = Line::new("z", None, &o).unwrap();
        assert!(!z.occupied && !z.sigma && !z.density);
    }

    #[test]
    fn test_sigma_density_exclusive_of_occupied() {
        let o = opts();
        let l = Line::new("L", None, &o).unwrap();
        assert!(l.sigma && !l.density && !l.occupied);
        let q = Line::new("Q", None, &o).unwrap();
        assert!(q.density && !q.sigma && !q.occupied);
    }

    #[test]
    fn test_block_kinds() {
        let o = opts();
        let spin = Line::new("i", Some('b'), &o).unwrap();
        assert_eq!(spin.block, BlockKind::Spin);
        assert!(!spin.active);
        assert_eq!(spin.block_char(), Some('b'));

        let range = Line::new("a", Some('1'), &o).unwrap();
        assert_eq!(range.block, BlockKind::Range);
        assert!(range.active);
        assert_eq!(range.block_char(), Some('1'));

        assert!(Line::new("i", Some('x'), &o).is_err());
    }

    #[test]
    fn test_equality_vs_equivalence() {
        let o = opts();
        let i = Line::new("i", None, &o).unwrap();
        let j = Line::new("j", None, &o).unwrap();
        let a = Line::new("a", None, &o).unwrap();
        assert_ne!(i, j);
        assert!(i.equivalent(&j));
        assert!(!i.equivalent(&a));
    }

    #[test]
    fn test_total_order() {
        let o = opts();
        let sig = Line::new("L", None, &o).unwrap();
        let den = Line::new("Q", None, &o).unwrap();
        let vir = Line::new("a", None, &o).unwrap();
        let occ = Line::new("i", None, &o).unwrap();
        // sigma < density < virtual < occupied under the sort order
        assert!(sig < den);
        assert!(den < vir);
        assert!(vir < occ);
    }

    #[test]
    fn test_kind_chars() {
        let o = opts();
        assert_eq!(Line::new("i", None, &o).unwrap().kind_char(), 'o');
        assert_eq!(Line::new("a", None, &o).unwrap().kind_char(), 'v');
        assert_eq!(Line::new("L", None, &o).unwrap().kind_char(), 'L');
        assert_eq!(Line::new("Q", None, &o).unwrap().kind_char(), 'Q');
    }
}
