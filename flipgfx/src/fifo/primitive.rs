// Primitive topology expansion.
//
// The hardware rasterizes quads, fans and strips natively; the modern
// pipeline only gets lists. Every draw is expanded to an indexed
// triangle, line, or point list at decode time so that consecutive
// draws can later be merged into one render pass regardless of their
// source topology.

use log::warn;

/// Draw primitive selected by bits 3..5 of the draw opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrimitiveKind {
    Quads = 0x80,
    Triangles = 0x90,
    TriangleStrip = 0x98,
    TriangleFan = 0xA0,
    Lines = 0xA8,
    LineStrip = 0xB0,
    Points = 0xB8,
}

impl PrimitiveKind {
    /// Decode from a draw opcode (0x80..=0xBF); the low three bits carry
    /// the vertex format and are ignored here.
    pub fn from_opcode(op: u8) -> Option<Self> {
        match op & 0xF8 {
            0x80 => Some(Self::Quads),
            0x90 => Some(Self::Triangles),
            0x98 => Some(Self::TriangleStrip),
            0xA0 => Some(Self::TriangleFan),
            0xA8 => Some(Self::Lines),
            0xB0 => Some(Self::LineStrip),
            0xB8 => Some(Self::Points),
            _ => None,
        }
    }

    pub fn topology(self) -> Topology {
        match self {
            Self::Quads | Self::Triangles | Self::TriangleStrip | Self::TriangleFan => {
                Topology::TriangleList
            }
            Self::Lines | Self::LineStrip => Topology::LineList,
            Self::Points => Topology::PointList,
        }
    }
}

/// List topology after expansion. Maps one-to-one onto the GPU
/// primitive topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Topology {
    TriangleList = 0,
    LineList = 1,
    PointList = 2,
}

/// Number of indices `expand_indices` will produce for a draw.
pub fn expanded_index_count(kind: PrimitiveKind, vertices: u32) -> u32 {
    match kind {
        PrimitiveKind::Quads => (vertices / 4) * 6,
        PrimitiveKind::Triangles => vertices - vertices % 3,
        PrimitiveKind::TriangleStrip | PrimitiveKind::TriangleFan => {
            3 * vertices.saturating_sub(2)
        }
        PrimitiveKind::Lines => vertices & !1,
        PrimitiveKind::LineStrip => 2 * vertices.saturating_sub(1),
        PrimitiveKind::Points => vertices,
    }
}

/// Expand one draw into list indices, offset by `base` (the draw's first
/// vertex within the shared frame vertex buffer).
///
/// A trailing partial primitive is dropped with a warning; the vertices
/// were still consumed from the stream.
pub fn expand_indices(kind: PrimitiveKind, vertices: u32, base: u32, out: &mut Vec<u32>) {
    let leftover = match kind {
        PrimitiveKind::Quads => vertices % 4,
        PrimitiveKind::Triangles => vertices % 3,
        PrimitiveKind::TriangleStrip | PrimitiveKind::TriangleFan => {
            if vertices < 3 && vertices > 0 {
                vertices
            } else {
                0
            }
        }
        PrimitiveKind::Lines => vertices % 2,
        PrimitiveKind::LineStrip => {
            if vertices == 1 {
                1
            } else {
                0
            }
        }
        PrimitiveKind::Points => 0,
    };
    if leftover != 0 {
        warn!("{kind:?} draw with {vertices} vertices drops a partial primitive");
    }

    out.reserve(expanded_index_count(kind, vertices) as usize);
    match kind {
        PrimitiveKind::Quads => {
            for q in 0..vertices / 4 {
                let v = base + q * 4;
                out.extend_from_slice(&[v, v + 1, v + 2, v + 2, v + 3, v]);
            }
        }
        PrimitiveKind::Triangles => {
            for i in 0..vertices - vertices % 3 {
                out.push(base + i);
            }
        }
        PrimitiveKind::TriangleStrip => {
            for i in 2..vertices {
                // Swap every other triangle to keep a consistent winding.
                if i % 2 == 0 {
                    out.extend_from_slice(&[base + i - 2, base + i - 1, base + i]);
                } else {
                    out.extend_from_slice(&[base + i - 1, base + i - 2, base + i]);
                }
            }
        }
        PrimitiveKind::TriangleFan => {
            for i in 2..vertices {
                out.extend_from_slice(&[base, base + i - 1, base + i]);
            }
        }
        PrimitiveKind::Lines => {
            for i in 0..vertices & !1 {
                out.push(base + i);
            }
        }
        PrimitiveKind::LineStrip => {
            for i in 1..vertices {
                out.extend_from_slice(&[base + i - 1, base + i]);
            }
        }
        PrimitiveKind::Points => {
            for i in 0..vertices {
                out.push(base + i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(kind: PrimitiveKind, vertices: u32, base: u32) -> Vec<u32> {
        let mut out = Vec::new();
        expand_indices(kind, vertices, base, &mut out);
        assert_eq!(out.len() as u32, expanded_index_count(kind, vertices));
        out
    }

    #[test]
    fn quads_become_two_triangles_each() {
        assert_eq!(expand(PrimitiveKind::Quads, 4, 0), vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(
            expand(PrimitiveKind::Quads, 8, 10),
            vec![10, 11, 12, 12, 13, 10, 14, 15, 16, 16, 17, 14]
        );
    }

    #[test]
    fn quads_drop_partial() {
        assert_eq!(expand(PrimitiveKind::Quads, 6, 0), vec![0, 1, 2, 2, 3, 0]);
    }

    #[test]
    fn triangles_pass_through() {
        assert_eq!(expand(PrimitiveKind::Triangles, 6, 2), vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(expand(PrimitiveKind::Triangles, 5, 0), vec![0, 1, 2]);
    }

    #[test]
    fn strip_alternates_winding() {
        assert_eq!(
            expand(PrimitiveKind::TriangleStrip, 5, 0),
            vec![0, 1, 2, 2, 1, 3, 2, 3, 4]
        );
    }

    #[test]
    fn fan_pivots_on_first_vertex() {
        assert_eq!(
            expand(PrimitiveKind::TriangleFan, 5, 0),
            vec![0, 1, 2, 0, 2, 3, 0, 3, 4]
        );
    }

    #[test]
    fn degenerate_strip_and_fan_are_empty() {
        assert!(expand(PrimitiveKind::TriangleStrip, 2, 0).is_empty());
        assert!(expand(PrimitiveKind::TriangleFan, 1, 0).is_empty());
        assert!(expand(PrimitiveKind::TriangleFan, 0, 0).is_empty());
    }

    #[test]
    fn line_strip_expands_to_pairs() {
        assert_eq!(expand(PrimitiveKind::LineStrip, 4, 1), vec![1, 2, 2, 3, 3, 4]);
        assert_eq!(expand(PrimitiveKind::Lines, 5, 0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn points_are_identity() {
        assert_eq!(expand(PrimitiveKind::Points, 3, 7), vec![7, 8, 9]);
    }

    #[test]
    fn opcode_decoding_covers_draw_range() {
        assert_eq!(PrimitiveKind::from_opcode(0x80), Some(PrimitiveKind::Quads));
        assert_eq!(PrimitiveKind::from_opcode(0x83), Some(PrimitiveKind::Quads));
        assert_eq!(PrimitiveKind::from_opcode(0x97), Some(PrimitiveKind::Triangles));
        assert_eq!(
            PrimitiveKind::from_opcode(0xB8),
            Some(PrimitiveKind::Points)
        );
        assert_eq!(PrimitiveKind::from_opcode(0x88), None); // unused encoding
        assert_eq!(PrimitiveKind::from_opcode(0x61), None);
    }
}
