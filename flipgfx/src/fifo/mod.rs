// Command FIFO decoding.
//
// The FIFO multiplexes three register banks (CP, XF, BP) with inline
// draw payloads. `process` walks one contiguous chunk of the stream,
// applies register writes to the shadow state, and hands every decoded
// draw to a sink. Framing errors are fatal: once an opcode is not
// recognized the stream position cannot be trusted.

pub mod bp;
pub mod cp;
pub mod display_list;
pub mod primitive;
pub mod reader;
pub mod vertex;
pub mod xf;

use log::warn;

use crate::error::Result;
use crate::gx::state::ShadowState;

pub use bp::BpAction;
pub use primitive::{PrimitiveKind, Topology};
pub use reader::{ByteOrder, FifoReader};
pub use vertex::{MemorySource, RamImage, VertexLayout};

/// FIFO opcodes. Draw opcodes occupy 0x80..=0xBF with the primitive in
/// bits 3..5 and the vertex format in the low three bits.
pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const LOAD_CP: u8 = 0x08;
    pub const LOAD_XF: u8 = 0x10;
    pub const LOAD_INDEXED_A: u8 = 0x20;
    pub const LOAD_INDEXED_B: u8 = 0x28;
    pub const LOAD_INDEXED_C: u8 = 0x30;
    pub const LOAD_INDEXED_D: u8 = 0x38;
    pub const CALL_DISPLAY_LIST: u8 = 0x40;
    pub const INVALIDATE_VTX_CACHE: u8 = 0x48;
    pub const LOAD_BP: u8 = 0x61;
    pub const DRAW_FIRST: u8 = 0x80;
    pub const DRAW_LAST: u8 = 0xBF;
}

/// One fully decoded draw: flattened vertices plus the layout and
/// primitive needed to turn them into GPU work.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDraw {
    pub kind: PrimitiveKind,
    /// Vertex format table index (low bits of the draw opcode).
    pub fmt: u8,
    pub layout: VertexLayout,
    pub vertex_count: u32,
    /// Interleaved f32 attribute data, `layout.floats` per vertex.
    pub vertices: Vec<f32>,
}

/// Receiver for the decoder's output.
pub trait DrawSink {
    /// A draw was decoded; the shadow state reflects all register writes
    /// that preceded it in the stream.
    fn draw(&mut self, state: &mut ShadowState, draw: DecodedDraw) -> Result<()>;

    /// An EFB copy with the clear bit executed: apply the staged clear
    /// color and depth.
    fn copy_clear(&mut self, state: &mut ShadowState) -> Result<()>;
}

/// Decode one contiguous FIFO chunk.
///
/// `mem` resolves indexed vertex attributes; passing `None` is fine for
/// streams that only use direct attributes.
pub fn process(
    state: &mut ShadowState,
    bytes: &[u8],
    order: ByteOrder,
    mem: Option<&dyn MemorySource>,
    sink: &mut dyn DrawSink,
) -> Result<()> {
    let mut r = FifoReader::new(bytes, order);
    while !r.is_empty() {
        let at = r.position();
        let op = r.read_u8()?;
        match op {
            opcode::NOP => {}
            opcode::LOAD_CP => {
                let addr = r.read_u8()?;
                let value = r.read_u32()?;
                cp::load_cp_reg(state, addr, value);
            }
            opcode::LOAD_XF => {
                let header = r.read_u32()?;
                let count = (header >> 16) as usize + 1;
                let base = (header & 0xFFFF) as u16;
                let mut words = Vec::with_capacity(count);
                for _ in 0..count {
                    words.push(r.read_u32()?);
                }
                xf::load_xf_regs(state, base, &words);
            }
            opcode::LOAD_INDEXED_A
            | opcode::LOAD_INDEXED_B
            | opcode::LOAD_INDEXED_C
            | opcode::LOAD_INDEXED_D => {
                // Indexed XF loads pull matrix data from an external
                // array; not implemented, the current matrices stand.
                warn!("indexed XF load {op:#04x} at offset {at} skipped");
                r.skip(4)?;
            }
            opcode::CALL_DISPLAY_LIST => {
                // Display lists are executed through the dedicated entry
                // point; an inline call cannot be resolved here.
                warn!("inline display-list call at offset {at} skipped");
                r.skip(8)?;
            }
            opcode::INVALIDATE_VTX_CACHE => {}
            opcode::LOAD_BP => {
                let word = r.read_u32()?;
                if bp::load_bp_reg(state, word) == BpAction::CopyClear {
                    sink.copy_clear(state)?;
                }
            }
            opcode::DRAW_FIRST..=opcode::DRAW_LAST => {
                let kind = match PrimitiveKind::from_opcode(op) {
                    Some(k) => k,
                    None => return Err(r.unknown_opcode(op, at)),
                };
                let fmt = op & 7;
                let count = r.read_u16()? as u32;
                let layout = vertex::vertex_layout(state);
                let vertices = vertex::decode_vertices(state, fmt, &mut r, count as usize, mem)?;
                sink.draw(
                    state,
                    DecodedDraw {
                        kind,
                        fmt,
                        layout,
                        vertex_count: count,
                        vertices,
                    },
                )?;
            }
            _ => return Err(r.unknown_opcode(op, at)),
        }
    }
    Ok(())
}

/// Sink that collects draws and clears; used by the display-list cache
/// and throughout the tests.
#[derive(Debug, Default)]
pub struct DrawCollector {
    pub draws: Vec<DecodedDraw>,
    pub clears: u32,
}

impl DrawSink for DrawCollector {
    fn draw(&mut self, _state: &mut ShadowState, draw: DecodedDraw) -> Result<()> {
        self.draws.push(draw);
        Ok(())
    }

    fn copy_clear(&mut self, _state: &mut ShadowState) -> Result<()> {
        self.clears += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GxError;
    use crate::gx::state::{AttrInput, CompType, VtxAttr, VtxAttrFmt};

    fn stream() -> StreamBuilder {
        StreamBuilder(Vec::new())
    }

    struct StreamBuilder(Vec<u8>);

    impl StreamBuilder {
        fn cp(mut self, addr: u8, value: u32) -> Self {
            self.0.push(opcode::LOAD_CP);
            self.0.push(addr);
            self.0.extend_from_slice(&value.to_be_bytes());
            self
        }

        fn bp(mut self, word: u32) -> Self {
            self.0.push(opcode::LOAD_BP);
            self.0.extend_from_slice(&word.to_be_bytes());
            self
        }

        fn xf(mut self, base: u16, words: &[u32]) -> Self {
            self.0.push(opcode::LOAD_XF);
            let header = (((words.len() - 1) as u32) << 16) | base as u32;
            self.0.extend_from_slice(&header.to_be_bytes());
            for w in words {
                self.0.extend_from_slice(&w.to_be_bytes());
            }
            self
        }

        fn draw(mut self, op: u8, count: u16, payload: &[u8]) -> Self {
            self.0.push(op);
            self.0.extend_from_slice(&count.to_be_bytes());
            self.0.extend_from_slice(payload);
            self
        }

        fn raw(mut self, bytes: &[u8]) -> Self {
            self.0.extend_from_slice(bytes);
            self
        }
    }

    fn pos_only_state() -> ShadowState {
        let mut state = ShadowState::new();
        state.vtx_desc[VtxAttr::Position as usize] = AttrInput::Direct;
        state.vtx_fmt[0][VtxAttr::Position as usize] = VtxAttrFmt {
            count: 1,
            comp_type: CompType::F32 as u8,
            frac: 0,
        };
        state
    }

    fn be_floats(fs: &[f32]) -> Vec<u8> {
        fs.iter().flat_map(|f| f.to_be_bytes()).collect()
    }

    #[test]
    fn nops_and_cache_invalidate_are_skipped() {
        let mut state = ShadowState::new();
        let mut sink = DrawCollector::default();
        let bytes = stream()
            .raw(&[opcode::NOP, opcode::NOP, opcode::INVALIDATE_VTX_CACHE])
            .0;
        process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap();
        assert!(sink.draws.is_empty());
    }

    #[test]
    fn register_loads_update_state() {
        let mut state = ShadowState::new();
        let mut sink = DrawCollector::default();
        let bytes = stream()
            .cp(cp::VCD_LO, 1 << 9) // position direct
            .xf(xf::REG_NUM_CHANS, &[2])
            .bp((bp::REG_ZMODE as u32) << 24) // depth test off
            .0;
        process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap();
        assert_eq!(state.vtx_desc[VtxAttr::Position as usize], AttrInput::Direct);
        assert_eq!(state.num_channels, 2);
        assert!(!state.z_mode.enable);
    }

    #[test]
    fn draw_produces_decoded_vertices() {
        let mut state = pos_only_state();
        let mut sink = DrawCollector::default();
        let payload = be_floats(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let bytes = stream().draw(0x90, 3, &payload).0; // triangles, format 0
        process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap();
        assert_eq!(sink.draws.len(), 1);
        let draw = &sink.draws[0];
        assert_eq!(draw.kind, PrimitiveKind::Triangles);
        assert_eq!(draw.fmt, 0);
        assert_eq!(draw.vertex_count, 3);
        assert_eq!(draw.vertices.len(), 9);
        assert_eq!(&draw.vertices[3..6], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn draw_opcode_selects_format() {
        let mut state = pos_only_state();
        state.vtx_fmt[5] = state.vtx_fmt[0];
        let mut sink = DrawCollector::default();
        let payload = be_floats(&[1.0, 2.0, 3.0]);
        let bytes = stream().draw(0xB8 | 5, 1, &payload).0; // points, format 5
        process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap();
        assert_eq!(sink.draws[0].fmt, 5);
        assert_eq!(sink.draws[0].kind, PrimitiveKind::Points);
    }

    #[test]
    fn copy_clear_reaches_sink() {
        let mut state = ShadowState::new();
        let mut sink = DrawCollector::default();
        let word = ((bp::REG_COPY_EXECUTE as u32) << 24) | (1 << 11);
        let bytes = stream().bp(word).0;
        process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap();
        assert_eq!(sink.clears, 1);
    }

    #[test]
    fn unimplemented_opcodes_skip_payload() {
        let mut state = pos_only_state();
        let mut sink = DrawCollector::default();
        let payload = be_floats(&[1.0, 2.0, 3.0]);
        let bytes = stream()
            .raw(&[opcode::LOAD_INDEXED_A, 0, 0, 0, 0])
            .raw(&[opcode::CALL_DISPLAY_LIST, 0, 0, 0, 0, 0, 0, 0, 0])
            .draw(0xB8, 1, &payload)
            .0;
        process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap();
        // Framing survived the skips and the trailing draw decoded.
        assert_eq!(sink.draws.len(), 1);
    }

    #[test]
    fn unknown_opcode_is_fatal_with_offset() {
        let mut state = ShadowState::new();
        let mut sink = DrawCollector::default();
        let bytes = stream().raw(&[opcode::NOP, 0x77]).0;
        let err = process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap_err();
        match err {
            GxError::UnknownOpcode { opcode, offset, .. } => {
                assert_eq!(opcode, 0x77);
                assert_eq!(offset, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unused_draw_encoding_is_unknown() {
        let mut state = ShadowState::new();
        let mut sink = DrawCollector::default();
        let bytes = stream().raw(&[0x88, 0, 0]).0;
        let err = process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap_err();
        assert!(matches!(err, GxError::UnknownOpcode { opcode: 0x88, .. }));
    }

    #[test]
    fn truncated_draw_is_fatal() {
        let mut state = pos_only_state();
        let mut sink = DrawCollector::default();
        let payload = be_floats(&[1.0, 2.0]); // 8 of 12 bytes
        let bytes = stream().draw(0x90, 1, &payload).0;
        let err = process(&mut state, &bytes, ByteOrder::Big, None, &mut sink).unwrap_err();
        assert!(matches!(err, GxError::Truncated { .. }));
    }

    #[test]
    fn little_endian_streams_decode() {
        let mut state = ShadowState::new();
        let mut sink = DrawCollector::default();
        // CP load with a little-endian value word.
        let mut bytes = vec![opcode::LOAD_CP, cp::VCD_LO];
        bytes.extend_from_slice(&(1u32 << 9).to_le_bytes());
        process(&mut state, &bytes, ByteOrder::Little, None, &mut sink).unwrap();
        assert_eq!(state.vtx_desc[VtxAttr::Position as usize], AttrInput::Direct);
    }
}
