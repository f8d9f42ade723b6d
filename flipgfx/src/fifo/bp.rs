// Blitting-processor register bank: TEV combiner configuration, raster
// order, output-merger state, fog, and framebuffer copy control.
//
// A BP load is a single 32-bit word: the register id in the top byte and
// a 24-bit value below it.

use log::warn;

use crate::gx::bits::{bit, field, rgba8, sign11};
use crate::gx::state::{
    AlphaLogic, BlendFactor, CompareFn, CullMode, FogKind, LogicOp, ShadowState, NUM_TEV_STAGES,
};

pub const REG_GENMODE: u8 = 0x00;
pub const REG_IND_CMD0: u8 = 0x10; // ..=0x1F, indirect stage commands
pub const REG_TEV_ORDER0: u8 = 0x28; // ..=0x2F, one register per stage pair
pub const REG_ZMODE: u8 = 0x40;
pub const REG_BLEND: u8 = 0x41;
pub const REG_DST_ALPHA: u8 = 0x42;
pub const REG_CLEAR_AR: u8 = 0x4F;
pub const REG_CLEAR_GB: u8 = 0x50;
pub const REG_CLEAR_Z: u8 = 0x51;
pub const REG_COPY_EXECUTE: u8 = 0x52;
pub const REG_TEV_COLOR0: u8 = 0xC0; // even: color combiner, odd: alpha
pub const REG_TEV_REG0_LO: u8 = 0xE0; // even: RA word, odd: BG word
pub const REG_FOG_A: u8 = 0xEE;
pub const REG_FOG_B_MAG: u8 = 0xEF;
pub const REG_FOG_B_SHIFT: u8 = 0xF0;
pub const REG_FOG_CTRL: u8 = 0xF1;
pub const REG_FOG_COLOR: u8 = 0xF2;
pub const REG_ALPHA_COMPARE: u8 = 0xF3;
pub const REG_TEV_KSEL0: u8 = 0xF6; // ..=0xFD, one register per stage pair

/// Side effect of a BP write that the owning context must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpAction {
    None,
    /// An EFB copy with the clear bit set: apply the staged clear
    /// color/depth to the render target.
    CopyClear,
}

/// Apply one BP register write. The register id is the top byte of
/// `word` and the payload the low 24 bits.
pub fn load_bp_reg(state: &mut ShadowState, word: u32) -> BpAction {
    let addr = (word >> 24) as u8;
    let v = word & 0x00FF_FFFF;
    match addr {
        REG_GENMODE => decode_genmode(state, v),
        a if (REG_IND_CMD0..REG_IND_CMD0 + 16).contains(&a) => {
            decode_indirect(state, (a - REG_IND_CMD0) as usize, v);
        }
        a if (REG_TEV_ORDER0..REG_TEV_ORDER0 + 8).contains(&a) => {
            decode_tev_order(state, (a - REG_TEV_ORDER0) as usize, v);
        }
        REG_ZMODE => {
            state.z_mode.enable = bit(v, 0);
            state.z_mode.func = CompareFn::from_bits(field(v, 1, 3));
            state.z_mode.update = bit(v, 4);
        }
        REG_BLEND => decode_blend(state, v),
        REG_DST_ALPHA => {
            state.dst_alpha.alpha = (v & 0xFF) as u8;
            state.dst_alpha.enabled = bit(v, 8);
        }
        REG_CLEAR_AR => {
            state.clear_color[3] = field(v, 8, 8) as u8;
            state.clear_color[0] = field(v, 0, 8) as u8;
        }
        REG_CLEAR_GB => {
            state.clear_color[1] = field(v, 8, 8) as u8;
            state.clear_color[2] = field(v, 0, 8) as u8;
        }
        REG_CLEAR_Z => state.clear_depth = v,
        REG_COPY_EXECUTE => {
            // Only the clear side effect is modeled; the copy itself
            // (EFB to texture) is resolved by the texture layer.
            if bit(v, 11) {
                state.mark_dirty();
                return BpAction::CopyClear;
            }
        }
        a if (REG_TEV_COLOR0..REG_TEV_COLOR0 + 32).contains(&a) => {
            let stage = ((a - REG_TEV_COLOR0) / 2) as usize;
            if a & 1 == 0 {
                decode_color_combiner(state, stage, v);
            } else {
                decode_alpha_combiner(state, stage, v);
            }
        }
        a if (REG_TEV_REG0_LO..REG_TEV_REG0_LO + 8).contains(&a) => {
            decode_tev_reg(state, a - REG_TEV_REG0_LO, v);
        }
        REG_FOG_A => state.fog.a = unpack_fog_float(v),
        REG_FOG_B_MAG => state.fog.b_mag = v as f32,
        REG_FOG_B_SHIFT => state.fog.b_shift = v & 0x1F,
        REG_FOG_CTRL => {
            state.fog.c = unpack_fog_float(v & 0xF_FFFF);
            state.fog.kind = FogKind::from_bits(field(v, 21, 3));
            if bit(v, 20) {
                warn!("orthographic fog projection requested, using perspective curve");
            }
        }
        REG_FOG_COLOR => {
            let c = rgba8(v << 8);
            state.fog.color = [c[0], c[1], c[2], 1.0];
        }
        REG_ALPHA_COMPARE => {
            state.alpha_compare.ref0 = field(v, 0, 8) as u8;
            state.alpha_compare.ref1 = field(v, 8, 8) as u8;
            state.alpha_compare.comp0 = CompareFn::from_bits(field(v, 16, 3));
            state.alpha_compare.comp1 = CompareFn::from_bits(field(v, 19, 3));
            state.alpha_compare.logic = match field(v, 22, 2) {
                1 => AlphaLogic::Or,
                2 => AlphaLogic::Xor,
                3 => AlphaLogic::Xnor,
                _ => AlphaLogic::And,
            };
        }
        a if (REG_TEV_KSEL0..REG_TEV_KSEL0 + 8).contains(&a) => {
            decode_ksel(state, (a - REG_TEV_KSEL0) as usize, v);
        }
        _ => {
            warn!("unhandled BP register {addr:#04x} = {v:#08x}");
            return BpAction::None;
        }
    }
    state.mark_dirty();
    BpAction::None
}

fn decode_genmode(state: &mut ShadowState, v: u32) {
    // Mirrors of the XF counts live here too; both paths are honored.
    state.num_tex_gens = field(v, 0, 4).min(8) as u8;
    state.num_channels = field(v, 4, 3).min(2) as u8;
    state.num_tev_stages = (field(v, 10, 4) + 1).min(NUM_TEV_STAGES as u32) as u8;
    state.cull_mode = CullMode::from_bits(field(v, 14, 2));
}

fn decode_tev_order(state: &mut ShadowState, pair: usize, v: u32) {
    for half in 0..2usize {
        let stage = pair * 2 + half;
        if stage >= NUM_TEV_STAGES {
            break;
        }
        let bits = (v >> (12 * half)) & 0xFFF;
        let s = &mut state.tev_stages[stage];
        s.tex_map = field(bits, 0, 3) as u8;
        s.tex_coord = field(bits, 3, 3) as u8;
        s.tex_enable = bit(bits, 6);
        s.channel = match field(bits, 7, 3) {
            0 => 0,
            1 => 1,
            // Alpha-bump and zero channels carry no rasterized color.
            _ => 0xFF,
        };
        if !s.tex_enable {
            s.tex_map = 0xFF;
            s.tex_coord = 0xFF;
        }
    }
}

fn decode_color_combiner(state: &mut ShadowState, stage: usize, v: u32) {
    let s = &mut state.tev_stages[stage];
    s.color_in = [
        field(v, 12, 4) as u8,
        field(v, 8, 4) as u8,
        field(v, 4, 4) as u8,
        field(v, 0, 4) as u8,
    ];
    s.color_bias = field(v, 16, 2) as u8;
    s.color_op = bit(v, 18) as u8;
    s.color_clamp = bit(v, 19);
    s.color_scale = field(v, 20, 2) as u8;
    s.color_dest = field(v, 22, 2) as u8;
}

fn decode_alpha_combiner(state: &mut ShadowState, stage: usize, v: u32) {
    let s = &mut state.tev_stages[stage];
    s.ras_swap = field(v, 0, 2) as u8;
    s.tex_swap = field(v, 2, 2) as u8;
    s.alpha_in = [
        field(v, 13, 3) as u8,
        field(v, 10, 3) as u8,
        field(v, 7, 3) as u8,
        field(v, 4, 3) as u8,
    ];
    s.alpha_bias = field(v, 16, 2) as u8;
    s.alpha_op = bit(v, 18) as u8;
    s.alpha_clamp = bit(v, 19);
    s.alpha_scale = field(v, 20, 2) as u8;
    s.alpha_dest = field(v, 22, 2) as u8;
}

/// TEV color registers are written as two words per register: an RA word
/// (even address) and a BG word (odd). Bit 23 steers the write to the
/// constant-color bank instead of the combiner registers. Components are
/// 11-bit signed, in units of 1/255.
fn decode_tev_reg(state: &mut ShadowState, rel: u8, v: u32) {
    let reg = (rel / 2) as usize;
    let konst = bit(v, 23);
    let lo = sign11(field(v, 0, 11)) as f32 / 255.0;
    let hi = sign11(field(v, 12, 11)) as f32 / 255.0;
    let target = if konst {
        &mut state.konst[reg]
    } else {
        &mut state.tev_regs[reg]
    };
    if rel & 1 == 0 {
        target[0] = lo; // red
        target[3] = hi; // alpha
    } else {
        target[2] = lo; // blue
        target[1] = hi; // green
    }
}

fn decode_blend(state: &mut ShadowState, v: u32) {
    let b = &mut state.blend;
    b.enabled = bit(v, 0);
    b.logic_enabled = bit(v, 1);
    // bit 2: dither, not modeled
    b.color_update = bit(v, 3);
    b.alpha_update = bit(v, 4);
    b.dst_factor = BlendFactor::from_bits(field(v, 5, 3));
    b.src_factor = BlendFactor::from_bits(field(v, 8, 3));
    b.subtract = bit(v, 11);
    b.logic_op = match field(v, 12, 4) {
        0 => LogicOp::Clear,
        1 => LogicOp::And,
        2 => LogicOp::RevAnd,
        4 => LogicOp::InvAnd,
        5 => LogicOp::Noop,
        6 => LogicOp::Xor,
        7 => LogicOp::Or,
        8 => LogicOp::Nor,
        9 => LogicOp::Equiv,
        10 => LogicOp::Inv,
        11 => LogicOp::RevOr,
        12 => LogicOp::InvCopy,
        13 => LogicOp::InvOr,
        14 => LogicOp::Nand,
        15 => LogicOp::Set,
        _ => LogicOp::Copy,
    };
    if b.logic_enabled && b.logic_op != LogicOp::Copy {
        warn!("logic-op blending {:?} is approximated", b.logic_op);
    }
}

/// Each KSEL register carries the constant-color selectors for a stage
/// pair plus two entries of one of the four swap tables.
fn decode_ksel(state: &mut ShadowState, i: usize, v: u32) {
    let table = i / 2;
    let (a, b) = (field(v, 0, 2) as u8, field(v, 2, 2) as u8);
    if i & 1 == 0 {
        state.swap_tables[table][0] = a;
        state.swap_tables[table][1] = b;
    } else {
        state.swap_tables[table][2] = a;
        state.swap_tables[table][3] = b;
    }
    let s0 = &mut state.tev_stages[i * 2];
    s0.kcsel = field(v, 4, 5) as u8;
    s0.kasel = field(v, 9, 5) as u8;
    let s1 = &mut state.tev_stages[i * 2 + 1];
    s1.kcsel = field(v, 14, 5) as u8;
    s1.kasel = field(v, 19, 5) as u8;
}

fn decode_indirect(state: &mut ShadowState, stage: usize, v: u32) {
    let ind = &mut state.tev_stages[stage].indirect;
    ind.ind_stage = field(v, 0, 2) as u8;
    ind.format = field(v, 2, 2) as u8;
    ind.bias = field(v, 4, 3) as u8;
    ind.matrix = field(v, 9, 4) as u8;
    ind.wrap_s = field(v, 13, 3) as u8;
    ind.wrap_t = field(v, 16, 3) as u8;
    ind.enabled = v != 0;
    if ind.enabled {
        warn!("indirect texturing configured on stage {stage}, rendering without it");
    }
}

/// Decode the packed 20-bit float used by the fog A and C parameters:
/// 11-bit mantissa, 8-bit exponent, sign bit, assembled into an IEEE
/// single by left-aligning the mantissa.
fn unpack_fog_float(v: u32) -> f32 {
    let mantissa = field(v, 0, 11);
    let exponent = field(v, 11, 8);
    let sign = field(v, 19, 1);
    f32::from_bits((sign << 31) | (exponent << 23) | (mantissa << 12))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gx::state::{tev_alpha_arg, tev_color_arg};

    fn bp(addr: u8, v: u32) -> u32 {
        ((addr as u32) << 24) | (v & 0x00FF_FFFF)
    }

    #[test]
    fn genmode_sets_counts_and_cull() {
        let mut state = ShadowState::new();
        // 2 texgens, 1 channel, 4 TEV stages (field 3), cull front.
        load_bp_reg(&mut state, bp(REG_GENMODE, 2 | (1 << 4) | (3 << 10) | (1 << 14)));
        assert_eq!(state.num_tex_gens, 2);
        assert_eq!(state.num_channels, 1);
        assert_eq!(state.num_tev_stages, 4);
        assert_eq!(state.cull_mode, CullMode::Front);
    }

    #[test]
    fn zmode_decodes() {
        let mut state = ShadowState::new();
        load_bp_reg(&mut state, bp(REG_ZMODE, 1 | (1 << 1) | (1 << 4)));
        assert!(state.z_mode.enable);
        assert_eq!(state.z_mode.func, CompareFn::Less);
        assert!(state.z_mode.update);

        load_bp_reg(&mut state, bp(REG_ZMODE, 0));
        assert!(!state.z_mode.enable);
        assert!(!state.z_mode.update);
    }

    #[test]
    fn blend_decodes_standard_alpha() {
        let mut state = ShadowState::new();
        // enable, color+alpha update, dst=InvSrcAlpha, src=SrcAlpha.
        let v = 1 | (1 << 3) | (1 << 4) | (5 << 5) | (4 << 8);
        load_bp_reg(&mut state, bp(REG_BLEND, v));
        let b = &state.blend;
        assert!(b.enabled && !b.subtract && !b.logic_enabled);
        assert_eq!(b.src_factor, BlendFactor::SrcAlpha);
        assert_eq!(b.dst_factor, BlendFactor::InvSrcAlpha);
        assert!(b.color_update && b.alpha_update);
    }

    #[test]
    fn clear_registers_stage_color_and_depth() {
        let mut state = ShadowState::new();
        // Gray 25% with full alpha, depth 0xFFFFFF: AR then GB then Z.
        load_bp_reg(&mut state, bp(REG_CLEAR_AR, (255 << 8) | 64));
        load_bp_reg(&mut state, bp(REG_CLEAR_GB, (64 << 8) | 64));
        load_bp_reg(&mut state, bp(REG_CLEAR_Z, 0x00FF_FFFF));
        assert_eq!(state.clear_color, [64, 64, 64, 255]);
        assert_eq!(state.clear_depth, 0x00FF_FFFF);
    }

    #[test]
    fn copy_execute_reports_clear() {
        let mut state = ShadowState::new();
        assert_eq!(
            load_bp_reg(&mut state, bp(REG_COPY_EXECUTE, 1 << 11)),
            BpAction::CopyClear
        );
        assert_eq!(
            load_bp_reg(&mut state, bp(REG_COPY_EXECUTE, 0)),
            BpAction::None
        );
    }

    #[test]
    fn tev_order_unpacks_both_halves() {
        let mut state = ShadowState::new();
        // Stage 0: texmap 1, texcoord 1, enabled, channel color0.
        // Stage 1: no texture, channel color1.
        let half0 = 1 | (1 << 3) | (1 << 6);
        let half1 = 1 << 7;
        load_bp_reg(&mut state, bp(REG_TEV_ORDER0, half0 | (half1 << 12)));
        let s0 = &state.tev_stages[0];
        assert_eq!(s0.tex_map, 1);
        assert_eq!(s0.tex_coord, 1);
        assert!(s0.tex_enable);
        assert_eq!(s0.channel, 0);
        let s1 = &state.tev_stages[1];
        assert!(!s1.tex_enable);
        assert_eq!(s1.tex_map, 0xFF);
        assert_eq!(s1.channel, 1);
    }

    #[test]
    fn color_combiner_argument_order() {
        let mut state = ShadowState::new();
        // a=TEXC, b=RASC, c=KONST, d=ZERO at stage 2.
        let v = ((tev_color_arg::TEXC as u32) << 12)
            | ((tev_color_arg::RASC as u32) << 8)
            | ((tev_color_arg::KONST as u32) << 4)
            | tev_color_arg::ZERO as u32
            | (1 << 19) // clamp
            | (1 << 20); // 2x scale
        load_bp_reg(&mut state, bp(REG_TEV_COLOR0 + 4, v));
        let s = &state.tev_stages[2];
        assert_eq!(
            s.color_in,
            [
                tev_color_arg::TEXC,
                tev_color_arg::RASC,
                tev_color_arg::KONST,
                tev_color_arg::ZERO
            ]
        );
        assert!(s.color_clamp);
        assert_eq!(s.color_scale, 1);
        assert_eq!(s.color_dest, 0);
    }

    #[test]
    fn alpha_combiner_carries_swap_selectors() {
        let mut state = ShadowState::new();
        let v = 1 // ras swap table 1
            | (2 << 2) // tex swap table 2
            | ((tev_alpha_arg::TEXA as u32) << 13)
            | ((tev_alpha_arg::RASA as u32) << 4); // d
        load_bp_reg(&mut state, bp(REG_TEV_COLOR0 + 1, v));
        let s = &state.tev_stages[0];
        assert_eq!(s.ras_swap, 1);
        assert_eq!(s.tex_swap, 2);
        assert_eq!(s.alpha_in[0], tev_alpha_arg::TEXA);
        assert_eq!(s.alpha_in[3], tev_alpha_arg::RASA);
    }

    #[test]
    fn tev_register_write_splits_ra_bg() {
        let mut state = ShadowState::new();
        // reg1: R=255, A=128 then B=0, G=64.
        load_bp_reg(&mut state, bp(REG_TEV_REG0_LO + 2, 255 | (128 << 12)));
        load_bp_reg(&mut state, bp(REG_TEV_REG0_LO + 3, 64 << 12));
        let c = state.tev_regs[1];
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert!((c[1] - 64.0 / 255.0).abs() < 1e-6);
        assert_eq!(c[2], 0.0);
        assert!((c[3] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn tev_register_negative_components() {
        let mut state = ShadowState::new();
        // 11-bit -255 in the red component.
        let neg = (-255i32 as u32) & 0x7FF;
        load_bp_reg(&mut state, bp(REG_TEV_REG0_LO, neg));
        assert!((state.tev_regs[0][0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn tev_register_konst_bit_targets_constant_bank() {
        let mut state = ShadowState::new();
        load_bp_reg(&mut state, bp(REG_TEV_REG0_LO + 4, 255 | (1 << 23)));
        assert!((state.konst[2][0] - 1.0).abs() < 1e-6);
        assert_eq!(state.tev_regs[2][0], 0.0);
    }

    #[test]
    fn alpha_compare_decodes() {
        let mut state = ShadowState::new();
        let v = 128 | (200 << 8) | (4 << 16) | (7 << 19) | (1 << 22);
        load_bp_reg(&mut state, bp(REG_ALPHA_COMPARE, v));
        let ac = &state.alpha_compare;
        assert_eq!(ac.ref0, 128);
        assert_eq!(ac.ref1, 200);
        assert_eq!(ac.comp0, CompareFn::Greater);
        assert_eq!(ac.comp1, CompareFn::Always);
        assert_eq!(ac.logic, AlphaLogic::Or);
    }

    #[test]
    fn ksel_sets_konst_selectors_and_swap_table() {
        let mut state = ShadowState::new();
        // Register 0: swap table 0 entries r=3 (alpha), g=2 (blue);
        // stage 0 kcsel=0x0F, kasel=0x1F; stage 1 kcsel=4, kasel=5.
        let v = 3 | (2 << 2) | (0x0F << 4) | (0x1F << 9) | (4 << 14) | (5 << 19);
        load_bp_reg(&mut state, bp(REG_TEV_KSEL0, v));
        assert_eq!(state.swap_tables[0][0], 3);
        assert_eq!(state.swap_tables[0][1], 2);
        assert_eq!(state.tev_stages[0].kcsel, 0x0F);
        assert_eq!(state.tev_stages[0].kasel, 0x1F);
        assert_eq!(state.tev_stages[1].kcsel, 4);
        assert_eq!(state.tev_stages[1].kasel, 5);
        // Odd register fills b/a of the same table.
        load_bp_reg(&mut state, bp(REG_TEV_KSEL0 + 1, 1 | (0 << 2)));
        assert_eq!(state.swap_tables[0][2], 1);
        assert_eq!(state.swap_tables[0][3], 0);
    }

    #[test]
    fn fog_control_decodes_kind_and_color() {
        let mut state = ShadowState::new();
        load_bp_reg(&mut state, bp(REG_FOG_CTRL, 2 << 21));
        assert_eq!(state.fog.kind, FogKind::Linear);
        // Color word is RGB in the low 24 bits, R high.
        load_bp_reg(&mut state, bp(REG_FOG_COLOR, (255 << 16) | (128 << 8)));
        assert!((state.fog.color[0] - 1.0).abs() < 1e-6);
        assert!((state.fog.color[1] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(state.fog.color[2], 0.0);
        assert_eq!(state.fog.color[3], 1.0);
    }

    #[test]
    fn fog_packed_float_unpacks() {
        // 2.0: sign 0, exponent 128, mantissa 0.
        assert_eq!(unpack_fog_float(128 << 11), 2.0);
        // -2.0 with the sign bit.
        assert_eq!(unpack_fog_float((1 << 19) | (128 << 11)), -2.0);
        assert_eq!(unpack_fog_float(0), 0.0);
    }

    #[test]
    fn unknown_bp_register_is_tolerated() {
        let mut state = ShadowState::new();
        state.dirty = false;
        assert_eq!(load_bp_reg(&mut state, bp(0x66, 0x1234)), BpAction::None);
        assert!(!state.dirty);
    }
}
