// Command-processor register bank: vertex descriptors, vertex attribute
// formats, and external attribute array pointers.
//
// Addresses are 8-bit. Each register packs several fields; extraction
// uses the shared bit-field helpers so the layout stays auditable.

use log::{debug, warn};

use crate::gx::bits::{bit, field};
use crate::gx::state::{AttrInput, ShadowState, VtxAttr, NUM_ATTR_ARRAYS};

pub const VCD_LO: u8 = 0x50;
pub const VCD_HI: u8 = 0x60;
pub const VAT_A: u8 = 0x70; // ..=0x77, one per vertex format
pub const VAT_B: u8 = 0x80; // ..=0x87
pub const VAT_C: u8 = 0x90; // ..=0x97
pub const ARRAY_BASE: u8 = 0xA0; // ..=0xAB
pub const ARRAY_STRIDE: u8 = 0xB0; // ..=0xBB

/// Apply one CP register write to the shadow state.
pub fn load_cp_reg(state: &mut ShadowState, addr: u8, value: u32) {
    match addr {
        VCD_LO => decode_vcd_lo(state, value),
        VCD_HI => decode_vcd_hi(state, value),
        a if (VAT_A..VAT_A + 8).contains(&a) => decode_vat_a(state, (a - VAT_A) as usize, value),
        a if (VAT_B..VAT_B + 8).contains(&a) => decode_vat_b(state, (a - VAT_B) as usize, value),
        a if (VAT_C..VAT_C + 8).contains(&a) => decode_vat_c(state, (a - VAT_C) as usize, value),
        a if (ARRAY_BASE..ARRAY_BASE + NUM_ATTR_ARRAYS as u8).contains(&a) => {
            let k = (a - ARRAY_BASE) as usize;
            state.arrays[k].set_base(value);
            debug!("CP array {k} base={value:#010x}");
        }
        a if (ARRAY_STRIDE..ARRAY_STRIDE + NUM_ATTR_ARRAYS as u8).contains(&a) => {
            let k = (a - ARRAY_STRIDE) as usize;
            state.arrays[k].set_stride((value & 0xFF) as u16);
            debug!("CP array {k} stride={}", value & 0xFF);
        }
        _ => {
            // Unknown ids are tolerated: unimplemented hardware feature.
            warn!("unhandled CP register {addr:#04x} = {value:#010x}");
            return;
        }
    }
    state.mark_dirty();
}

/// Vertex descriptor, low word: matrix-index presence bits plus
/// position/normal/color input types.
fn decode_vcd_lo(state: &mut ShadowState, v: u32) {
    state.vtx_desc[VtxAttr::PosMatrixIdx as usize] = if bit(v, 0) {
        AttrInput::Direct
    } else {
        AttrInput::None
    };
    for t in 0..8usize {
        state.vtx_desc[VtxAttr::Tex0MatrixIdx as usize + t] = if bit(v, 1 + t as u32) {
            AttrInput::Direct
        } else {
            AttrInput::None
        };
    }
    state.vtx_desc[VtxAttr::Position as usize] = AttrInput::from_bits(field(v, 9, 2));
    state.vtx_desc[VtxAttr::Normal as usize] = AttrInput::from_bits(field(v, 11, 2));
    state.vtx_desc[VtxAttr::Color0 as usize] = AttrInput::from_bits(field(v, 13, 2));
    state.vtx_desc[VtxAttr::Color1 as usize] = AttrInput::from_bits(field(v, 15, 2));
}

/// Vertex descriptor, high word: texcoord input types, two bits each.
fn decode_vcd_hi(state: &mut ShadowState, v: u32) {
    for t in 0..8usize {
        state.vtx_desc[VtxAttr::Tex0 as usize + t] =
            AttrInput::from_bits(field(v, 2 * t as u32, 2));
    }
}

fn set_fmt(state: &mut ShadowState, fmt: usize, attr: VtxAttr, count: u32, ty: u32, frac: u32) {
    let f = &mut state.vtx_fmt[fmt][attr as usize];
    f.count = count as u8;
    f.comp_type = ty as u8;
    f.frac = frac as u8;
}

/// VAT group A: position, normal, both colors, tex0.
fn decode_vat_a(state: &mut ShadowState, fmt: usize, v: u32) {
    set_fmt(
        state,
        fmt,
        VtxAttr::Position,
        field(v, 0, 1),
        field(v, 1, 3),
        field(v, 4, 5),
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Normal,
        field(v, 9, 1),
        field(v, 10, 3),
        0,
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Color0,
        field(v, 13, 1),
        field(v, 14, 3),
        0,
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Color1,
        field(v, 17, 1),
        field(v, 18, 3),
        0,
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Tex0,
        field(v, 21, 1),
        field(v, 22, 3),
        field(v, 25, 5),
    );
}

/// VAT group B: tex1..tex3 fully, tex4 count and type.
fn decode_vat_b(state: &mut ShadowState, fmt: usize, v: u32) {
    set_fmt(
        state,
        fmt,
        VtxAttr::Tex1,
        field(v, 0, 1),
        field(v, 1, 3),
        field(v, 4, 5),
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Tex2,
        field(v, 9, 1),
        field(v, 10, 3),
        field(v, 13, 5),
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Tex3,
        field(v, 18, 1),
        field(v, 19, 3),
        field(v, 22, 5),
    );
    // tex4 shift lives in group C.
    let tex4 = &mut state.vtx_fmt[fmt][VtxAttr::Tex4 as usize];
    tex4.count = field(v, 27, 1) as u8;
    tex4.comp_type = field(v, 28, 3) as u8;
}

/// VAT group C: tex4 shift, tex5..tex7.
fn decode_vat_c(state: &mut ShadowState, fmt: usize, v: u32) {
    state.vtx_fmt[fmt][VtxAttr::Tex4 as usize].frac = field(v, 0, 5) as u8;
    set_fmt(
        state,
        fmt,
        VtxAttr::Tex5,
        field(v, 5, 1),
        field(v, 6, 3),
        field(v, 9, 5),
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Tex6,
        field(v, 14, 1),
        field(v, 15, 3),
        field(v, 18, 5),
    );
    set_fmt(
        state,
        fmt,
        VtxAttr::Tex7,
        field(v, 23, 1),
        field(v, 24, 3),
        field(v, 27, 5),
    );
}

/// Encode the VCD low word from an attribute input table (test/replay
/// support: the round-trip property in the test suite drives this).
pub fn encode_vcd_lo(desc: &[AttrInput; VtxAttr::COUNT]) -> u32 {
    let mut v = 0u32;
    if desc[VtxAttr::PosMatrixIdx as usize] != AttrInput::None {
        v |= 1;
    }
    for t in 0..8usize {
        if desc[VtxAttr::Tex0MatrixIdx as usize + t] != AttrInput::None {
            v |= 1 << (1 + t);
        }
    }
    v |= (desc[VtxAttr::Position as usize] as u32) << 9;
    v |= (desc[VtxAttr::Normal as usize] as u32) << 11;
    v |= (desc[VtxAttr::Color0 as usize] as u32) << 13;
    v |= (desc[VtxAttr::Color1 as usize] as u32) << 15;
    v
}

/// Encode the VCD high word.
pub fn encode_vcd_hi(desc: &[AttrInput; VtxAttr::COUNT]) -> u32 {
    let mut v = 0u32;
    for t in 0..8usize {
        v |= (desc[VtxAttr::Tex0 as usize + t] as u32) << (2 * t);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vcd_lo_round_trip() {
        let mut state = ShadowState::new();
        let mut desc = [AttrInput::None; VtxAttr::COUNT];
        desc[VtxAttr::Position as usize] = AttrInput::Direct;
        desc[VtxAttr::Normal as usize] = AttrInput::Index16;
        desc[VtxAttr::Color0 as usize] = AttrInput::Index8;
        desc[VtxAttr::PosMatrixIdx as usize] = AttrInput::Direct;

        load_cp_reg(&mut state, VCD_LO, encode_vcd_lo(&desc));
        assert_eq!(state.vtx_desc[VtxAttr::Position as usize], AttrInput::Direct);
        assert_eq!(state.vtx_desc[VtxAttr::Normal as usize], AttrInput::Index16);
        assert_eq!(state.vtx_desc[VtxAttr::Color0 as usize], AttrInput::Index8);
        assert_eq!(
            state.vtx_desc[VtxAttr::PosMatrixIdx as usize],
            AttrInput::Direct
        );
        assert_eq!(state.vtx_desc[VtxAttr::Color1 as usize], AttrInput::None);
    }

    #[test]
    fn vcd_hi_round_trip() {
        let mut state = ShadowState::new();
        let mut desc = [AttrInput::None; VtxAttr::COUNT];
        desc[VtxAttr::Tex0 as usize] = AttrInput::Direct;
        desc[VtxAttr::Tex3 as usize] = AttrInput::Index16;
        desc[VtxAttr::Tex7 as usize] = AttrInput::Index8;

        load_cp_reg(&mut state, VCD_HI, encode_vcd_hi(&desc));
        assert_eq!(state.vtx_desc[VtxAttr::Tex0 as usize], AttrInput::Direct);
        assert_eq!(state.vtx_desc[VtxAttr::Tex3 as usize], AttrInput::Index16);
        assert_eq!(state.vtx_desc[VtxAttr::Tex7 as usize], AttrInput::Index8);
        assert_eq!(state.vtx_desc[VtxAttr::Tex1 as usize], AttrInput::None);
    }

    #[test]
    fn vat_a_position_fields() {
        let mut state = ShadowState::new();
        // Position: 3 components (count=1), s16 (type=3), 8 frac bits.
        let v = 1 | (3 << 1) | (8 << 4);
        load_cp_reg(&mut state, VAT_A + 2, v);
        let fmt = state.attr_fmt(2, VtxAttr::Position);
        assert_eq!(fmt.count, 1);
        assert_eq!(fmt.comp_type, 3);
        assert_eq!(fmt.frac, 8);
        // Other formats untouched.
        assert_eq!(state.attr_fmt(0, VtxAttr::Position).frac, 0);
    }

    #[test]
    fn vat_bc_tex4_is_split_across_groups() {
        let mut state = ShadowState::new();
        // tex4: count=1, type=f32(4) in group B; shift=5 in group C.
        load_cp_reg(&mut state, VAT_B, (1 << 27) | (4 << 28));
        load_cp_reg(&mut state, VAT_C, 5);
        let fmt = state.attr_fmt(0, VtxAttr::Tex4);
        assert_eq!(fmt.count, 1);
        assert_eq!(fmt.comp_type, 4);
        assert_eq!(fmt.frac, 5);
    }

    #[test]
    fn array_regs_set_and_invalidate() {
        let mut state = ShadowState::new();
        load_cp_reg(&mut state, ARRAY_BASE, 0x8030_0000);
        load_cp_reg(&mut state, ARRAY_STRIDE, 12);
        assert_eq!(state.arrays[0].base, 0x8030_0000);
        assert_eq!(state.arrays[0].stride, 12);

        state.arrays[0].cached_range = Some(crate::gfx::frame::GpuRange {
            offset: 0,
            size: 64,
        });
        load_cp_reg(&mut state, ARRAY_BASE, 0x8040_0000);
        assert!(state.arrays[0].cached_range.is_none());
    }

    #[test]
    fn unknown_cp_register_is_tolerated() {
        let mut state = ShadowState::new();
        state.dirty = false;
        load_cp_reg(&mut state, 0x30, 0xDEAD_BEEF);
        // Unknown register does not dirty the uniform snapshot.
        assert!(!state.dirty);
    }

    #[test]
    fn cp_write_sets_dirty_flag() {
        let mut state = ShadowState::new();
        state.dirty = false;
        load_cp_reg(&mut state, VCD_LO, 1 << 9);
        assert!(state.dirty);
    }
}
