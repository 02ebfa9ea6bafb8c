// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use serde::{Deserialize, Serialize};

/// Thermal state reported by the frame source.
///
/// Maps to the cadence of mesh reduction passes: the cooler the device,
/// the more often the engine is willing to rebuild the mesh. `Critical`
/// suspends updates entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThermalState {
    /// Device is cool, full update rate
    #[default]
    Nominal,
    /// Mild thermal pressure
    Fair,
    /// Heavy thermal pressure, updates throttled hard
    Serious,
    /// Updates suspended until the device cools down
    Critical,
}

impl ThermalState {
    /// All thermal levels, hottest last
    pub const ALL: [ThermalState; 4] = [
        ThermalState::Nominal,
        ThermalState::Fair,
        ThermalState::Serious,
        ThermalState::Critical,
    ];

    /// Minimum number of elapsed ticks between reduction passes at this level
    pub fn update_interval(self) -> u32 {
        match self {
            ThermalState::Nominal => 16,
            ThermalState::Fair => 34,
            ThermalState::Serious => 70,
            ThermalState::Critical => u32::MAX,
        }
    }
}

/// Strides of the count hierarchy, finest first.
///
/// Levels 4 -> 16 -> 64 sum 4 children each; 64 -> 512 and 512 -> 4096 sum 8.
pub const GROUP_STRIDES: [u32; 5] = [4, 16, 64, 512, 4096];

/// Coarsest group stride. Vertex totals are expanded to a multiple of this
/// before the counting passes so every level divides evenly.
pub const COARSE_STRIDE: u32 = 4096;

/// Initial capacity of the per-submesh uniform table
pub const INITIAL_MESH_CAPACITY: u32 = 16;

/// Initial vertex capacity of the bridge and output buffers
pub const INITIAL_VERTEX_CAPACITY: u32 = 32768;

/// Initial triangle capacity of the index buffers
pub const INITIAL_TRIANGLE_CAPACITY: u32 = 65536;

/// 1D workgroup size shared by all reduction kernels
pub const WORKGROUP_SIZE: u32 = 64;

/// Byte stride of one record in the output and export buffers.
///
/// Positions, normals and triangle index triples are all padded to 16 bytes
/// so every section of the export blob has a uniform stride.
pub const RECORD_STRIDE: usize = 16;

/// Byte stride between per-submesh uniform slots. Matches the largest
/// `min_uniform_buffer_offset_alignment` wgpu allows for dynamic offsets.
pub const UNIFORM_SLOT_STRIDE: u32 = 256;

/// Round a requested element count up to the next power of two.
///
/// Capacities only ever grow, and always to powers of two, so repeated
/// small increases cannot trigger per-frame reallocation.
pub fn round_up_pow_2(count: u32) -> u32 {
    count.max(1).next_power_of_two()
}

/// Expand a vertex total to a whole number of coarse groups
pub fn expand_to_coarse(count: u32) -> u32 {
    count.div_ceil(COARSE_STRIDE) * COARSE_STRIDE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_intervals_increase_with_heat() {
        let intervals: Vec<u32> = ThermalState::ALL
            .iter()
            .map(|t| t.update_interval())
            .collect();
        assert_eq!(intervals, vec![16, 34, 70, u32::MAX]);
        assert!(intervals.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_round_up_pow_2() {
        assert_eq!(round_up_pow_2(0), 1);
        assert_eq!(round_up_pow_2(1), 1);
        assert_eq!(round_up_pow_2(4096), 4096);
        assert_eq!(round_up_pow_2(4097), 8192);
        assert_eq!(round_up_pow_2(5000), 8192);
    }

    #[test]
    fn test_expand_to_coarse() {
        assert_eq!(expand_to_coarse(0), 0);
        assert_eq!(expand_to_coarse(1), 4096);
        assert_eq!(expand_to_coarse(4096), 4096);
        assert_eq!(expand_to_coarse(4097), 8192);
    }

    #[test]
    fn test_group_strides_nest() {
        for w in GROUP_STRIDES.windows(2) {
            assert_eq!(w[1] % w[0], 0);
        }
        assert_eq!(GROUP_STRIDES[4], COARSE_STRIDE);
    }
}
