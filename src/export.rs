// SPDX-License-Identifier: GPL-3.0-only

//! Binary mesh export format
//!
//! A blob is a 16-byte header of four little-endian `u32` words (vertex
//! count, triangle count, normal count, reserved zero) followed by three
//! back-to-back sections in that order. Every record in every section is
//! 16 bytes: positions and normals are padded `vec4<f32>`, triangles are
//! three `u32` indices plus a zero word.

use crate::constants::RECORD_STRIDE;
use crate::errors::ExportError;

const HEADER_LEN: usize = 16;

/// Encode a mesh blob from already-serialized sections.
///
/// Each section must be exactly `count * 16` bytes long.
pub fn encode(
    vertex_count: u32,
    triangle_count: u32,
    normal_count: u32,
    vertices: &[u8],
    indices: &[u8],
    normals: &[u8],
) -> Result<Vec<u8>, ExportError> {
    for (count, section) in [
        (vertex_count, vertices),
        (triangle_count, indices),
        (normal_count, normals),
    ] {
        let expected = count as usize * RECORD_STRIDE as usize;
        if section.len() != expected {
            return Err(ExportError::Truncated {
                expected,
                actual: section.len(),
            });
        }
    }

    let mut blob =
        Vec::with_capacity(HEADER_LEN + vertices.len() + indices.len() + normals.len());
    blob.extend_from_slice(&vertex_count.to_le_bytes());
    blob.extend_from_slice(&triangle_count.to_le_bytes());
    blob.extend_from_slice(&normal_count.to_le_bytes());
    blob.extend_from_slice(&0u32.to_le_bytes());
    blob.extend_from_slice(vertices);
    blob.extend_from_slice(indices);
    blob.extend_from_slice(normals);
    Ok(blob)
}

/// Parsed view over an encoded mesh blob
#[derive(Debug, Clone, Copy)]
pub struct ExportBlob<'a> {
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub normal_count: u32,
    pub vertices: &'a [u8],
    pub indices: &'a [u8],
    pub normals: &'a [u8],
}

impl<'a> ExportBlob<'a> {
    /// Split an encoded blob back into its header counts and sections
    pub fn parse(data: &'a [u8]) -> Result<Self, ExportError> {
        if data.len() < HEADER_LEN {
            return Err(ExportError::MalformedHeader(format!(
                "blob is {} bytes, header needs {HEADER_LEN}",
                data.len()
            )));
        }
        let word = |i: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[i * 4..i * 4 + 4]);
            u32::from_le_bytes(bytes)
        };
        let vertex_count = word(0);
        let triangle_count = word(1);
        let normal_count = word(2);
        if word(3) != 0 {
            return Err(ExportError::MalformedHeader(format!(
                "reserved header word is {}, expected 0",
                word(3)
            )));
        }

        let stride = RECORD_STRIDE as usize;
        let vertex_bytes = vertex_count as usize * stride;
        let index_bytes = triangle_count as usize * stride;
        let normal_bytes = normal_count as usize * stride;
        let expected = HEADER_LEN + vertex_bytes + index_bytes + normal_bytes;
        if data.len() != expected {
            return Err(ExportError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let body = &data[HEADER_LEN..];
        Ok(Self {
            vertex_count,
            triangle_count,
            normal_count,
            vertices: &body[..vertex_bytes],
            indices: &body[vertex_bytes..vertex_bytes + index_bytes],
            normals: &body[vertex_bytes + index_bytes..],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(records: u32, fill: u8) -> Vec<u8> {
        vec![fill; records as usize * RECORD_STRIDE as usize]
    }

    #[test]
    fn encodes_header_and_sections_in_order() {
        let blob = encode(
            100,
            150,
            100,
            &section(100, 0xAA),
            &section(150, 0xBB),
            &section(100, 0xCC),
        )
        .unwrap();

        assert_eq!(blob.len(), HEADER_LEN + (100 + 150 + 100) * 16);
        assert_eq!(&blob[..4], &100u32.to_le_bytes());
        assert_eq!(&blob[4..8], &150u32.to_le_bytes());
        assert_eq!(&blob[8..12], &100u32.to_le_bytes());
        assert_eq!(&blob[12..16], &[0u8; 4]);
        assert_eq!(blob[HEADER_LEN], 0xAA);
        assert_eq!(blob[HEADER_LEN + 100 * 16], 0xBB);
        assert_eq!(blob[HEADER_LEN + 250 * 16], 0xCC);
    }

    #[test]
    fn rejects_mismatched_section_length() {
        let err = encode(2, 0, 2, &section(1, 0), &[], &section(2, 0)).unwrap_err();
        assert!(matches!(
            err,
            ExportError::Truncated {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn empty_mesh_is_just_the_header() {
        let blob = encode(0, 0, 0, &[], &[], &[]).unwrap();
        assert_eq!(blob.len(), HEADER_LEN);
        let parsed = ExportBlob::parse(&blob).unwrap();
        assert_eq!(parsed.vertex_count, 0);
        assert!(parsed.vertices.is_empty());
    }

    #[test]
    fn parse_round_trips_counts_and_sections() {
        let blob = encode(
            3,
            2,
            3,
            &section(3, 1),
            &section(2, 2),
            &section(3, 3),
        )
        .unwrap();
        let parsed = ExportBlob::parse(&blob).unwrap();
        assert_eq!(parsed.vertex_count, 3);
        assert_eq!(parsed.triangle_count, 2);
        assert_eq!(parsed.normal_count, 3);
        assert!(parsed.vertices.iter().all(|&b| b == 1));
        assert!(parsed.indices.iter().all(|&b| b == 2));
        assert!(parsed.normals.iter().all(|&b| b == 3));
    }

    #[test]
    fn parse_rejects_short_blob() {
        let err = ExportBlob::parse(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, ExportError::MalformedHeader(_)));
    }

    #[test]
    fn parse_rejects_truncated_body() {
        let mut blob = encode(1, 0, 1, &section(1, 0), &[], &section(1, 0)).unwrap();
        blob.truncate(blob.len() - 4);
        let err = ExportBlob::parse(&blob).unwrap_err();
        assert!(matches!(err, ExportError::Truncated { .. }));
    }

    #[test]
    fn parse_rejects_nonzero_reserved_word() {
        let mut blob = encode(0, 0, 0, &[], &[], &[]).unwrap();
        blob[12] = 7;
        let err = ExportBlob::parse(&blob).unwrap_err();
        assert!(matches!(err, ExportError::MalformedHeader(_)));
    }
}
