// Vertex stream decoding.
//
// Draw payloads interleave per-vertex attribute data laid out by the
// active vertex descriptor and format table. Everything is flattened to
// f32 here: positions to xyz, normals to xyz, colors to rgba, texcoords
// to st. Indexed attributes are resolved through the installed memory
// source at decode time, so the GPU side only ever sees flat vertices.

use log::warn;
use smallvec::SmallVec;

use crate::error::{GxError, Result};
use crate::fifo::reader::FifoReader;
use crate::gx::state::{
    AttrInput, ColorCompType, CompType, ShadowState, VtxAttr, VtxAttrFmt,
};

/// Resolver for indexed vertex attributes: reads guest memory by
/// physical address. Installed on the context by the embedder.
pub trait MemorySource {
    /// Return `len` bytes starting at `addr`, or fail the draw.
    fn read(&self, addr: u32, len: usize) -> Result<&[u8]>;
}

/// A contiguous byte image mapped at a base address. The standard
/// memory source for tests and for embedders with flat guest RAM.
pub struct RamImage<'a> {
    pub base: u32,
    pub bytes: &'a [u8],
}

impl MemorySource for RamImage<'_> {
    fn read(&self, addr: u32, len: usize) -> Result<&[u8]> {
        let start = addr
            .checked_sub(self.base)
            .map(|o| o as usize)
            .ok_or(GxError::MemoryRead { addr, len })?;
        self.bytes
            .get(start..start + len)
            .ok_or(GxError::MemoryRead { addr, len })
    }
}

/// One attribute's slice of the flattened vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrField {
    pub attr: VtxAttr,
    /// Offset within the vertex, in floats.
    pub offset: u8,
    /// Width in floats: 3 (position, normal), 4 (color), 2 (texcoord).
    pub width: u8,
}

/// Flattened layout of the decoded vertex stream for one draw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub fields: SmallVec<[AttrField; 8]>,
    /// Total floats per vertex.
    pub floats: usize,
}

impl VertexLayout {
    pub fn field(&self, attr: VtxAttr) -> Option<AttrField> {
        self.fields.iter().copied().find(|f| f.attr == attr)
    }

    pub fn stride_bytes(&self) -> usize {
        self.floats * 4
    }

    /// Build the layout from a presence bitmask over `VtxAttr` indices.
    /// The shader generator and the decoder both use this, so the GPU
    /// vertex buffer layout and the shader inputs cannot drift apart.
    pub fn from_mask(mask: u32) -> Self {
        let mut layout = Self::default();
        for i in 0..VtxAttr::COUNT as u8 {
            let attr = match VtxAttr::from_index(i) {
                Some(a) => a,
                None => break,
            };
            if attr.is_matrix_index() || mask & (1 << i) == 0 {
                continue;
            }
            let width = flat_width(attr);
            layout.fields.push(AttrField {
                attr,
                offset: layout.floats as u8,
                width,
            });
            layout.floats += width as usize;
        }
        layout
    }
}

/// Presence bitmask over `VtxAttr` for the active descriptor, excluding
/// the matrix-index slots.
pub fn attrs_present_mask(state: &ShadowState) -> u32 {
    let mut mask = 0u32;
    for (i, input) in state.vtx_desc.iter().enumerate() {
        if let Some(attr) = VtxAttr::from_index(i as u8) {
            if !attr.is_matrix_index() && *input != AttrInput::None {
                mask |= 1 << i;
            }
        }
    }
    mask
}

/// Output float width of one attribute.
fn flat_width(attr: VtxAttr) -> u8 {
    match attr {
        VtxAttr::Position | VtxAttr::Normal => 3,
        VtxAttr::Color0 | VtxAttr::Color1 => 4,
        _ => 2,
    }
}

/// Number of raw components carried in the stream for one attribute.
fn raw_components(attr: VtxAttr, fmt: VtxAttrFmt) -> usize {
    match attr {
        VtxAttr::Position => {
            if fmt.count == 0 {
                2 // xy
            } else {
                3
            }
        }
        // count 1 selects normal/binormal/tangent triples.
        VtxAttr::Normal => {
            if fmt.count == 0 {
                3
            } else {
                9
            }
        }
        _ => {
            if fmt.count == 0 {
                1 // s
            } else {
                2
            }
        }
    }
}

/// Build the flattened layout for the active descriptor.
pub fn vertex_layout(state: &ShadowState) -> VertexLayout {
    VertexLayout::from_mask(attrs_present_mask(state))
}

/// Bytes one attribute occupies in the draw payload.
fn stream_size(attr: VtxAttr, input: AttrInput, fmt: VtxAttrFmt) -> usize {
    match input {
        AttrInput::None => 0,
        AttrInput::Index8 => 1,
        AttrInput::Index16 => 2,
        AttrInput::Direct => {
            if attr.is_matrix_index() {
                1
            } else if matches!(attr, VtxAttr::Color0 | VtxAttr::Color1) {
                ColorCompType::from_bits(fmt.comp_type as u32).size()
            } else {
                raw_components(attr, fmt) * CompType::from_bits(fmt.comp_type as u32).size()
            }
        }
    }
}

/// Bytes one whole vertex occupies in the draw payload.
pub fn vertex_size(state: &ShadowState, fmt: u8) -> usize {
    (0..VtxAttr::COUNT as u8)
        .filter_map(VtxAttr::from_index)
        .map(|attr| {
            stream_size(
                attr,
                state.vtx_desc[attr as usize],
                state.attr_fmt(fmt, attr),
            )
        })
        .sum()
}

/// Bytes one indexed attribute occupies in its external array.
fn array_elem_size(attr: VtxAttr, fmt: VtxAttrFmt) -> usize {
    if matches!(attr, VtxAttr::Color0 | VtxAttr::Color1) {
        ColorCompType::from_bits(fmt.comp_type as u32).size()
    } else {
        raw_components(attr, fmt) * CompType::from_bits(fmt.comp_type as u32).size()
    }
}

/// Read one big-endian numeric component and scale it to f32.
fn read_comp(bytes: &[u8], ty: CompType, frac: u8) -> f32 {
    let scale = 1.0 / (1u64 << frac) as f32;
    match ty {
        CompType::U8 => bytes[0] as f32 * scale,
        CompType::S8 => bytes[0] as i8 as f32 * scale,
        CompType::U16 => u16::from_be_bytes([bytes[0], bytes[1]]) as f32 * scale,
        CompType::S16 => i16::from_be_bytes([bytes[0], bytes[1]]) as f32 * scale,
        CompType::F32 => f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Unpack one packed color value to normalized rgba.
fn read_color(bytes: &[u8], fmt: ColorCompType) -> [f32; 4] {
    match fmt {
        ColorCompType::Rgb565 => {
            let v = u16::from_be_bytes([bytes[0], bytes[1]]) as u32;
            [
                ((v >> 11) & 0x1F) as f32 / 31.0,
                ((v >> 5) & 0x3F) as f32 / 63.0,
                (v & 0x1F) as f32 / 31.0,
                1.0,
            ]
        }
        ColorCompType::Rgb8 => [
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            1.0,
        ],
        ColorCompType::Rgbx8 => [
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            1.0,
        ],
        ColorCompType::Rgba4 => {
            let v = u16::from_be_bytes([bytes[0], bytes[1]]) as u32;
            [
                ((v >> 12) & 0xF) as f32 / 15.0,
                ((v >> 8) & 0xF) as f32 / 15.0,
                ((v >> 4) & 0xF) as f32 / 15.0,
                (v & 0xF) as f32 / 15.0,
            ]
        }
        ColorCompType::Rgba6 => {
            let v = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
            [
                ((v >> 18) & 0x3F) as f32 / 63.0,
                ((v >> 12) & 0x3F) as f32 / 63.0,
                ((v >> 6) & 0x3F) as f32 / 63.0,
                (v & 0x3F) as f32 / 63.0,
            ]
        }
        ColorCompType::Rgba8 => [
            bytes[0] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[2] as f32 / 255.0,
            bytes[3] as f32 / 255.0,
        ],
    }
}

/// Decode one attribute's raw bytes into the flattened output slot.
fn decode_attr(attr: VtxAttr, fmt: VtxAttrFmt, raw: &[u8], out: &mut Vec<f32>) {
    if matches!(attr, VtxAttr::Color0 | VtxAttr::Color1) {
        out.extend_from_slice(&read_color(raw, ColorCompType::from_bits(fmt.comp_type as u32)));
        return;
    }
    let ty = CompType::from_bits(fmt.comp_type as u32);
    let frac = if ty == CompType::F32 { 0 } else { fmt.frac };
    let comps = raw_components(attr, fmt);
    let width = flat_width(attr) as usize;
    for c in 0..width {
        // Missing components read back as zero; NBT normals keep only
        // the normal triple.
        if c < comps {
            out.push(read_comp(&raw[c * ty.size()..], ty, frac));
        } else {
            out.push(0.0);
        }
    }
}

/// Decode `count` vertices from the draw payload into a flat f32 stream.
///
/// The reader is positioned at the first vertex byte; on success it ends
/// exactly `count * vertex_size` bytes later.
pub fn decode_vertices(
    state: &ShadowState,
    fmt: u8,
    reader: &mut FifoReader<'_>,
    count: usize,
    mem: Option<&dyn MemorySource>,
) -> Result<Vec<f32>> {
    let layout = vertex_layout(state);
    let mut out = Vec::with_capacity(count * layout.floats);
    let mut warned_mtxidx = false;

    for _ in 0..count {
        for i in 0..VtxAttr::COUNT as u8 {
            let attr = VtxAttr::from_index(i).ok_or_else(|| {
                GxError::Integrity(format!("attribute index {i} out of range"))
            })?;
            let input = state.vtx_desc[attr as usize];
            if input == AttrInput::None {
                continue;
            }
            let afmt = state.attr_fmt(fmt, attr);

            if attr.is_matrix_index() {
                // Per-vertex matrix selection is carried in the stream
                // but not forwarded; the current matrix set applies.
                let _ = reader.read_u8()?;
                if !warned_mtxidx {
                    warn!("per-vertex matrix indices present, using current matrices");
                    warned_mtxidx = true;
                }
                continue;
            }

            match input {
                AttrInput::Direct => {
                    let n = stream_size(attr, input, afmt);
                    let raw = reader.read_bytes(n)?;
                    decode_attr(attr, afmt, raw, &mut out);
                }
                AttrInput::Index8 | AttrInput::Index16 => {
                    let index = if input == AttrInput::Index8 {
                        reader.read_u8()? as u32
                    } else {
                        reader.read_u16()? as u32
                    };
                    let mem = mem.ok_or(GxError::NoMemorySource)?;
                    let array = ShadowState::array_index(attr)
                        .map(|k| &state.arrays[k])
                        .ok_or(GxError::InvalidSlot {
                            kind: "attribute array",
                            index: attr as usize,
                        })?;
                    let elem = array_elem_size(attr, afmt);
                    let addr = array.base.wrapping_add(index * array.stride as u32);
                    let raw = mem.read(addr, elem)?;
                    decode_attr(attr, afmt, raw, &mut out);
                }
                AttrInput::None => unreachable!(),
            }
        }
    }

    if out.len() != count * layout.floats {
        return Err(GxError::Integrity(format!(
            "decoded {} floats for {} vertices, expected {}",
            out.len(),
            count,
            count * layout.floats
        )));
    }
    Ok(out)
}
