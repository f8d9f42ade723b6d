// Bit-field extraction helpers for hardware register words.
//
// Every register bank packs several logical fields into one 32-bit word.
// Rather than overlaying unions on raw words, each named field is pulled
// out with an explicit (shift, width) pair so the layout is auditable in
// one place per register.

/// Extract `width` bits starting at `shift` from `word`.
#[inline]
pub const fn field(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1 << width) - 1)
}

/// Extract a single bit as a bool.
#[inline]
pub const fn bit(word: u32, shift: u32) -> bool {
    (word >> shift) & 1 != 0
}

/// Sign-extend an 11-bit TEV register component to i32.
#[inline]
pub const fn sign11(v: u32) -> i32 {
    ((v << 21) as i32) >> 21
}

/// Expand an 8-bit color component to normalized f32.
#[inline]
pub fn u8_norm(v: u32) -> f32 {
    (v & 0xFF) as f32 / 255.0
}

/// Unpack a 32-bit RGBA8 word (R in the high byte) to normalized floats.
pub fn rgba8(word: u32) -> [f32; 4] {
    [
        u8_norm(word >> 24),
        u8_norm(word >> 16),
        u8_norm(word >> 8),
        u8_norm(word),
    ]
}
