//! Engine configuration.
//!
//! All tunables live in one immutable [`Options`] value threaded through
//! constructors. Nothing here is a process-wide global; the optimizer is
//! safe to run concurrently with different configurations.

use crate::error::{PqError, Result};
use crate::shape::Shape;

/// Sentinel meaning "no limit" for the count-valued options.
pub const UNLIMITED: usize = usize::MAX;

/// How emitted code is rendered. See the codegen module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `LHS("a,i") = coef * A("i,j") * B("a,j");` statements with
    /// per-tensor dimension maps.
    TensorLib,
    /// `LHS = coef * einsum('ij,aj->ai', A, B)` statements with
    /// `del LHS` reset lines.
    Einsum,
}

/// Configuration for the optimizer.
#[derive(Debug, Clone)]
pub struct Options {
    /// Cap on introduced intermediates per kind.
    pub max_temps: usize,
    /// Cap on leaves per candidate intermediate.
    pub max_depth: usize,
    /// Per-kind upper bound on any intermediate's shape (occupied and
    /// virtual totals only).
    pub max_shape: Shape,
    /// Canonicalize two-electron integrals into the allow-listed
    /// occ/vir orders on input.
    pub permute_eri: bool,
    /// Substitute intermediates in growing-depth batches.
    pub batched: bool,
    /// Number of substitutions committed per scoring pass when batched.
    pub batch_size: usize,
    /// Merge terms whose contractions are identical up to renaming.
    pub allow_merge: bool,
    /// Keep candidates whose scaling ties the current one.
    pub allow_equality: bool,
    /// Allow intermediates to reference other intermediates.
    pub allow_nesting: bool,
    /// Extract intermediates free of excited-state indices into the
    /// reusable bucket (sigma-vector builds).
    pub format_sigma: bool,
    /// Suppress scalar intermediates entirely.
    pub no_scalars: bool,
    /// Materialize the excited-state index in emitted shapes.
    pub print_trial_index: bool,
    /// Alphabet classifying a raw index name as occupied.
    pub occ_labels: Vec<char>,
    /// Alphabet classifying a raw index name as virtual.
    pub virt_labels: Vec<char>,
    /// Alphabet classifying a raw index name as excited-state.
    pub sig_labels: Vec<char>,
    /// Alphabet classifying a raw index name as density-fitting.
    pub den_labels: Vec<char>,
    /// Emit separate spin/range condition blocks.
    pub separate_conditions: bool,
    /// Log per-substitution progress.
    pub verbose: bool,
    /// Worker threads for candidate scoring and commits.
    pub nthreads: usize,
    /// Output dialect used by `PqGraph::str`.
    pub dialect: Dialect,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_temps: UNLIMITED,
            max_depth: UNLIMITED,
            max_shape: Shape {
                o_act: 255,
                v_act: 255,
                ..Shape::default()
            },
            permute_eri: true,
            batched: false,
            batch_size: UNLIMITED,
            allow_merge: false,
            allow_equality: true,
            allow_nesting: true,
            format_sigma: false,
            no_scalars: false,
            print_trial_index: false,
            occ_labels: "ijklmnoIJKMNO".chars().collect(),
            virt_labels: "abcdefghvABCDEFGHV".chars().collect(),
            sig_labels: "LRXY".chars().collect(),
            den_labels: "QU".chars().collect(),
            separate_conditions: false,
            verbose: false,
            nthreads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            dialect: Dialect::TensorLib,
        }
    }
}

impl Options {
    /// Validate the configuration, rejecting inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_shape.occ() == 0 && self.max_shape.vir() == 0 {
            return Err(PqError::Config(
                "max_shape cannot bound both occupied and virtual to zero".into(),
            ));
        }
        if self.nthreads == 0 {
            return Err(PqError::Config("nthreads must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(PqError::Config("batch_size must be at least 1".into()));
        }
        if self.max_depth < 2 && self.max_depth != UNLIMITED {
            return Err(PqError::Config(
                "max_depth must be at least 2 (a candidate needs two operands)".into(),
            ));
        }
        for (name, alphabet) in [
            ("occ_labels", &self.occ_labels),
            ("virt_labels", &self.virt_labels),
            ("sig_labels", &self.sig_labels),
            ("den_labels", &self.den_labels),
        ] {
            if alphabet.len() > 32 {
                return Err(PqError::Config(format!(
                    "{name} holds {} characters; at most 32 are allowed",
                    alphabet.len()
                )));
            }
        }
        if self.occ_labels.is_empty() && self.virt_labels.is_empty() {
            return Err(PqError::Config(
                "occ_labels and virt_labels cannot both be empty".into(),
            ));
        }
        Ok(())
    }

    /// Effective number of worker threads, clamped to the hardware.
    pub fn effective_threads(&self) -> usize {
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.nthreads.min(hw).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Options::default().validate().unwrap();
    }

    #[test]
    fn test_zero_shape_rejected() {
        let opts = Options {
            max_shape: Shape::default(),
            ..Options::default()
        };
        assert!(matches!(opts.validate(), Err(PqError::Config(_))));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let opts = Options {
            nthreads: 0,
            ..Options::default()
        };
        assert!(matches!(opts.validate(), Err(PqError::Config(_))));
    }

    #[test]
    fn test_oversized_alphabet_rejected() {
        let opts = Options {
            occ_labels: ('a'..='z').chain('A'..='Z').collect(),
            ..Options::default()
        };
        assert!(matches!(opts.validate(), Err(PqError::Config(_))));
    }
}
