// Error taxonomy for the GX translation core.
//
// Fatal conditions (stream corruption, integrity violations) surface as
// `GxError` values and the caller is expected to tear the process down;
// the stream position cannot be trusted after any of them. Everything
// recoverable is logged at warning level and never reaches this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GxError {
    /// The FIFO byte stream ended mid-record. Carries a hex dump of the
    /// bytes surrounding the failure offset for diagnostics.
    #[error(
        "FIFO stream truncated at offset {offset}: needed {needed} bytes, \
         {remaining} remaining\n{context}"
    )]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
        context: String,
    },

    /// An opcode outside every known range. Unlike unimplemented opcodes
    /// (which have a known payload size and are skipped), an unknown
    /// opcode means the decoder has lost framing.
    #[error("unknown FIFO opcode {opcode:#04x} at offset {offset}\n{context}")]
    UnknownOpcode {
        opcode: u8,
        offset: usize,
        context: String,
    },

    /// A draw referenced a TEV stage, texcoord generator, light, or
    /// texture slot that is out of range or was never populated.
    #[error("draw references unpopulated {kind} slot {index}")]
    InvalidSlot { kind: &'static str, index: usize },

    /// An algorithmic invariant was violated (hash collision between
    /// distinct configs, merge of non-adjacent ranges, vertex byte-count
    /// mismatch). Indicates a defect in the encoder or decoder, not bad
    /// input.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// An indexed vertex attribute was decoded but no memory source has
    /// been installed to resolve the index.
    #[error("indexed attribute decode requires a memory source")]
    NoMemorySource,

    /// External memory read failed (reported by the memory source).
    #[error("memory source read failed at {addr:#010x} ({len} bytes)")]
    MemoryRead { addr: u32, len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = GxError> = std::result::Result<T, E>;

/// Render a hex dump of up to 16 bytes around `offset` for error context.
///
/// Format: one line, offset-tagged, with the failing byte bracketed.
pub fn dump_around(bytes: &[u8], offset: usize) -> String {
    use std::fmt::Write;

    let start = offset.saturating_sub(8);
    let end = (offset + 8).min(bytes.len());
    let mut out = String::with_capacity(96);
    let _ = write!(out, "  bytes[{start:#06x}..{end:#06x}]:");
    for (i, b) in bytes[start..end].iter().enumerate() {
        if start + i == offset {
            let _ = write!(out, " [{b:02X}]");
        } else {
            let _ = write!(out, " {b:02X}");
        }
    }
    if end == offset {
        out.push_str(" [end of stream]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_brackets_failing_byte() {
        let bytes = [0u8, 1, 2, 3, 4, 5];
        let dump = dump_around(&bytes, 3);
        assert!(dump.contains("[03]"));
        assert!(dump.contains("02"));
    }

    #[test]
    fn dump_at_end_of_stream() {
        let bytes = [0xAAu8, 0xBB];
        let dump = dump_around(&bytes, 2);
        assert!(dump.contains("end of stream"));
    }

    #[test]
    fn dump_clamps_to_buffer() {
        let bytes = [0x10u8];
        let dump = dump_around(&bytes, 0);
        assert!(dump.contains("[10]"));
    }
}
