//! The TES task lifecycle engine.
//!
//! A submitted task runs as a four-stage pipeline on Kubernetes: Torc
//! provisions a per-task PVC and sequences the stages, Tif stages inputs
//! onto the volume, Texam runs the executor chain and monitors it to
//! terminal state, and Tof uploads the outputs. The stages coordinate over
//! a per-task pub/sub channel and persist their progress through the
//! [`poiesis_db::TaskRepository`] port.

pub mod broker;
pub mod cancel;
pub mod config;
pub mod error;
pub mod filer;
pub mod kubernetes;
pub mod manifest;
pub mod security;
pub mod staging;
pub mod texam;
pub mod torc;

pub use error::CoreError;
