//! Candidate selection and fold dispatch for peasoup acceleration-search output.
//!
//! A run loads the candidate XML, drops candidates that match known sources,
//! applies the optional block selection, writes the selected table for audit and
//! hands it to PulsarX (one invocation) or PRESTO prepfold (one process per candidate).

pub mod args;
pub mod avoid;
pub mod candidate;
pub mod error;
pub mod exec;
pub mod pipeline;
pub mod presto;
pub mod pulsarx;
pub mod select;
pub mod timing;
pub mod utils;
pub mod xml;

pub use error::{FoldError, Result};
pub use pipeline::{run, RunConfig, RunSummary};
