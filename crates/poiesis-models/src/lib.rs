//! GA4GH TES v1.1.0 model types and the engine's naming vocabulary.
//!
//! The `tes` module holds the wire types exchanged with the TES API; the
//! `names` module holds the derived Kubernetes resource names and labels;
//! `views` implements the MINIMAL / BASIC / FULL task projections.

pub mod names;
pub mod tes;
pub mod views;

pub use tes::{
    TesExecutor, TesExecutorLog, TesFileType, TesInput, TesOutput, TesOutputFileLog, TesResources,
    TesState, TesTask, TesTaskLog,
};
