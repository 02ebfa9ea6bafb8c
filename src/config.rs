// SPDX-License-Identifier: GPL-3.0-only

//! Engine configuration

use crate::constants::{
    INITIAL_MESH_CAPACITY, INITIAL_TRIANGLE_CAPACITY, INITIAL_VERTEX_CAPACITY, round_up_pow_2,
};
use serde::{Deserialize, Serialize};

/// Initial buffer capacities for the reduction engine.
///
/// All values are rounded up to powers of two at construction time;
/// capacities only ever grow after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Submesh slots in the per-submesh uniform table
    pub mesh_capacity: u32,
    /// Vertices across all submeshes of one job
    pub vertex_capacity: u32,
    /// Triangles across all submeshes of one job
    pub triangle_capacity: u32,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            mesh_capacity: INITIAL_MESH_CAPACITY,
            vertex_capacity: INITIAL_VERTEX_CAPACITY,
            triangle_capacity: INITIAL_TRIANGLE_CAPACITY,
        }
    }
}

impl ReducerConfig {
    /// Normalize all capacities to powers of two
    pub fn normalized(self) -> Self {
        Self {
            mesh_capacity: round_up_pow_2(self.mesh_capacity),
            vertex_capacity: round_up_pow_2(self.vertex_capacity.max(4096)),
            triangle_capacity: round_up_pow_2(self.triangle_capacity),
        }
    }
}
