//! Core engine for optimizing symbolic tensor contraction equations.
//!
//! Given a set of tensor equations (sums of products of named tensors
//! with labeled indices), the engine reorders each product into the
//! cheapest pairwise contraction tree, discovers common subexpressions
//! across all equations, materializes them as named intermediates, and
//! emits the resulting scheduled program.
//!
//! The building blocks, bottom-up:
//!
//! - [`Line`]: a single labeled tensor index with kind bits
//! - [`Shape`]: a multiset of index kinds used as an abstract cost
//! - [`Vertex`]: a named tensor with an ordered index sequence
//! - [`Linkage`]: a pairwise contraction node in a shared DAG
//! - [`Term`]: one assignment with its contraction tree
//! - [`Equation`]: an ordered list of terms sharing an output
//! - [`PqGraph`]: the optimizer driving reorder, substitution, and
//!   emission

// Indices and cost model
pub mod label;
pub mod line;
pub mod scaling;
pub mod shape;

pub use label::{Label, LabelError};
pub use line::{BlockKind, Line};
pub use scaling::{MapCmp, ScalingMap};
pub use shape::Shape;

// Expressions
pub mod linkage;
pub mod term;
pub mod vertex;

pub use linkage::{Linkage, LinkageSet, Node, TempKind};
pub use term::Term;
pub use vertex::{is_isomorphic, Vertex};

// Equations and the optimizer
pub mod equation;
pub mod graph;

pub use equation::Equation;
pub use graph::{InputTerm, PqGraph};

// Input, output, configuration, diagnostics
pub mod codegen;
pub mod error;
pub mod options;
pub mod parser;
pub mod timer;

pub use error::{PqError, Result};
pub use options::{Dialect, Options, UNLIMITED};
pub use parser::parse_vertex;
pub use timer::{Timer, Timers};
