// SPDX-License-Identifier: GPL-3.0-only

//! Submesh inputs
//!
//! A submesh is one independently-tracked triangulated surface patch from
//! the scanning source: vertex positions, vertex normals, triangle indices
//! (local to the submesh) and a rigid transform placing it in world space.
//! Patches are replaced wholesale between frames, never mutated in place,
//! so "has this changed" is answered by the identity of the backing vertex
//! storage rather than by content comparison.

use crate::constants::ThermalState;
use glam::{Mat4, Vec3, Vec4};
use std::sync::Arc;

/// One triangulated surface patch with its placement transform.
///
/// The arrays are `Arc`-backed: clones share storage, and the engine
/// compares that storage by pointer to detect replacement.
#[derive(Clone)]
pub struct Submesh {
    positions: Arc<[[f32; 3]]>,
    normals: Arc<[[f32; 3]]>,
    indices: Arc<[[u32; 3]]>,
    transform: Mat4,
}

impl Submesh {
    /// Create a submesh from its geometry arrays and rigid world transform.
    ///
    /// `normals` must be parallel to `positions`. Index validity against
    /// the vertex range is the producer's responsibility.
    pub fn new(
        positions: Arc<[[f32; 3]]>,
        normals: Arc<[[f32; 3]]>,
        indices: Arc<[[u32; 3]]>,
        transform: Mat4,
    ) -> Self {
        debug_assert_eq!(positions.len(), normals.len());
        Self {
            positions,
            normals,
            indices,
            transform,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn indices(&self) -> &[[u32; 3]] {
        &self.indices
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Whether two submeshes share the same backing vertex storage.
    ///
    /// The scanning source replaces a patch's arrays wholesale whenever it
    /// updates the patch, so pointer identity is the change signal.
    pub fn same_backing(&self, other: &Submesh) -> bool {
        Arc::ptr_eq(&self.positions, &other.positions)
    }

    /// The job-wide reference frame: this submesh's rotation with the
    /// translation zeroed. All output positions of a job are expressed
    /// relative to the frame of submesh #0.
    pub fn shared_frame(&self) -> Mat4 {
        let mut frame = self.transform;
        frame.w_axis = Vec4::W;
        frame
    }

    /// Translation of this submesh relative to the shared frame.
    ///
    /// Precomputed once per submesh per job; every worker lane touching
    /// the submesh reuses it. Rotation relative to the shared frame is
    /// identity for this capture source, so translation is sufficient.
    pub fn translation_in(&self, world_to_shared: &Mat4) -> Vec3 {
        (*world_to_shared * self.transform.w_axis).truncate()
    }
}

impl std::fmt::Debug for Submesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submesh")
            .field("vertices", &self.positions.len())
            .field("triangles", &self.indices.len())
            .finish()
    }
}

/// Per-tick input from the frame source: the current submesh set plus the
/// device thermal state that gates the update cadence.
#[derive(Clone, Debug, Default)]
pub struct FrameInput {
    pub submeshes: Vec<Submesh>,
    pub thermal: ThermalState,
}
