// SPDX-License-Identifier: GPL-3.0-only

//! Incremental GPU mesh reduction for live surface scans.
//!
//! A scanning pipeline hands the engine its full submesh set every frame;
//! the engine periodically compacts the referenced vertices of all
//! submeshes into one flat, double-buffered mesh generation on the GPU,
//! rewrites triangle indices against the compacted order, and can
//! serialize the published generation into a compact binary blob.
//!
//! The typical entry point is [`engine::ScanMeshEngine`]; the underlying
//! GPU processor is available directly as
//! [`shaders::reduce::MeshReducer`] for callers that drive jobs
//! themselves.

pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod export;
pub mod gpu;
pub mod scheduler;
pub mod shaders;
pub mod submesh;

pub use config::ReducerConfig;
pub use constants::ThermalState;
pub use engine::ScanMeshEngine;
pub use errors::{EngineError, EngineResult};
pub use shaders::reduce::{CurrentGeneration, MeshReducer};
pub use submesh::{FrameInput, Submesh};
