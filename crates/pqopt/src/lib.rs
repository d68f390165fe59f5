//! Facade crate re-exporting the public API of the equation optimizer.
//!
//! ```
//! use pqopt::{InputTerm, Options, PqGraph};
//!
//! let mut graph = PqGraph::new(Options::default()).unwrap();
//! graph
//!     .add("r1(a,i)", &[InputTerm::new(1.0, &["f(i,a)"])])
//!     .unwrap();
//! graph.optimize().unwrap();
//! let program = graph.str();
//! assert!(program.contains("r1"));
//! ```

// Indices and cost model
pub use pqopt_core::{BlockKind, Label, LabelError, Line, MapCmp, ScalingMap, Shape};

// Expressions
pub use pqopt_core::{is_isomorphic, Linkage, LinkageSet, Node, TempKind, Term, Vertex};

// Equations and the optimizer
pub use pqopt_core::{Equation, InputTerm, PqGraph};

// Input, output, configuration, diagnostics
pub use pqopt_core::{
    parse_vertex, Dialect, Options, PqError, Result, Timer, Timers, UNLIMITED,
};
