// SPDX-License-Identifier: GPL-3.0-only

//! Mesh reduction compute stages and output generations

mod generation;
mod processor;

pub use generation::{CurrentGeneration, GenerationStore};
pub use processor::{BufferKind, MeshReducer};

/// Vertex marking kernel, one lane per triangle
pub(crate) const MARK_WGSL: &str = include_str!("mark.wgsl");

/// Hierarchical counting and offset scan kernels
pub(crate) const COUNT_SCAN_WGSL: &str = include_str!("count_scan.wgsl");

/// Compaction and index rewrite kernel
pub(crate) const REDUCE_WGSL: &str = include_str!("reduce.wgsl");

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_shader(source: &str) {
        let module = naga::front::wgsl::parse_str(source).expect("shader parses");
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        )
        .validate(&module)
        .expect("shader validates");
    }

    #[test]
    fn mark_shader_is_valid() {
        validate_shader(MARK_WGSL);
    }

    #[test]
    fn count_scan_shader_is_valid() {
        validate_shader(COUNT_SCAN_WGSL);
    }

    #[test]
    fn reduce_shader_is_valid() {
        validate_shader(REDUCE_WGSL);
    }

    #[test]
    fn shaders_declare_expected_entry_points() {
        let module = naga::front::wgsl::parse_str(COUNT_SCAN_WGSL).expect("shader parses");
        let entry_points: Vec<&str> = module
            .entry_points
            .iter()
            .map(|ep| ep.name.as_str())
            .collect();
        for expected in ["count_groups", "scan_coarse", "scan_level", "scan_marks"] {
            assert!(entry_points.contains(&expected), "missing {expected}");
        }
    }
}
