// Display-list execution with a decoded-draw cache.
//
// Display lists are immutable command buffers replayed many times per
// frame, so decoding one repeatedly is wasted work. Lists that contain
// only draw commands are decoded once and the flattened draws replayed
// from the cache. Lists that load registers mutate the shadow state and
// lists with indexed attributes depend on external memory, so both run
// through the normal decoder every time.

use std::collections::HashMap;

use log::{debug, trace};
use xxhash_rust::xxh3::Xxh3;

use crate::error::{GxError, Result};
use crate::fifo::reader::{ByteOrder, FifoReader};
use crate::fifo::vertex::MemorySource;
use crate::fifo::{opcode, process, DecodedDraw, DrawCollector, DrawSink};
use crate::gx::state::{AttrInput, ShadowState};

/// Outcome of the cacheability scan over a display list.
struct Scan {
    /// The list writes CP/XF/BP registers.
    has_register_loads: bool,
    /// Vertex format of the draws, if any. Mixing formats in one
    /// cacheable list is a decoder-integrity violation.
    fmt: Option<u8>,
}

struct CachedList {
    byte_len: usize,
    draws: Vec<DecodedDraw>,
}

/// Content-addressed cache of decoded display lists.
#[derive(Default)]
pub struct DisplayListCache {
    entries: HashMap<u64, CachedList>,
    pub hits: u64,
    pub misses: u64,
}

impl DisplayListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Execute one display list, replaying from the cache when the list
    /// is draw-only and its decode cannot depend on mutable inputs.
    pub fn execute(
        &mut self,
        state: &mut ShadowState,
        bytes: &[u8],
        order: ByteOrder,
        mem: Option<&dyn MemorySource>,
        sink: &mut dyn DrawSink,
    ) -> Result<()> {
        let scan = scan_list(state, bytes, order)?;
        if scan.has_register_loads || uses_indexed_attributes(state) {
            trace!("display list not cacheable, decoding inline");
            return process(state, bytes, order, mem, sink);
        }

        let key = cache_key(state, bytes);
        if let Some(entry) = self.entries.get(&key) {
            if entry.byte_len != bytes.len() {
                return Err(GxError::Integrity(format!(
                    "display-list hash collision: key {key:#018x}, \
                     lengths {} vs {}",
                    entry.byte_len,
                    bytes.len()
                )));
            }
            self.hits += 1;
            for draw in &entry.draws {
                sink.draw(state, draw.clone())?;
            }
            return Ok(());
        }

        self.misses += 1;
        let mut collector = DrawCollector::default();
        process(state, bytes, order, mem, &mut collector)?;

        debug!(
            "cached display list: {} bytes, {} draws",
            bytes.len(),
            collector.draws.len()
        );
        for draw in &collector.draws {
            sink.draw(state, draw.clone())?;
        }
        self.entries.insert(
            key,
            CachedList {
                byte_len: bytes.len(),
                draws: collector.draws,
            },
        );
        Ok(())
    }
}

fn uses_indexed_attributes(state: &ShadowState) -> bool {
    state
        .vtx_desc
        .iter()
        .any(|&input| matches!(input, AttrInput::Index8 | AttrInput::Index16))
}

/// Hash the list bytes together with every decode input: the vertex
/// descriptor and all format tables. Two lists with identical bytes but
/// different layouts decode differently and must not share an entry.
fn cache_key(state: &ShadowState, bytes: &[u8]) -> u64 {
    let mut h = Xxh3::new();
    h.update(bytes);
    for input in &state.vtx_desc {
        h.update(&[*input as u8]);
    }
    for table in &state.vtx_fmt {
        for fmt in table {
            h.update(&[fmt.count, fmt.comp_type, fmt.frac]);
        }
    }
    h.digest()
}

/// Walk the list's opcodes without decoding vertex payloads, to decide
/// cacheability. Framing errors surface here before any state changes.
fn scan_list(state: &ShadowState, bytes: &[u8], order: ByteOrder) -> Result<Scan> {
    let mut r = FifoReader::new(bytes, order);
    let mut scan = Scan {
        has_register_loads: false,
        fmt: None,
    };
    while !r.is_empty() {
        let at = r.position();
        let op = r.read_u8()?;
        match op {
            opcode::NOP | opcode::INVALIDATE_VTX_CACHE => {}
            opcode::LOAD_CP => {
                scan.has_register_loads = true;
                r.skip(5)?;
            }
            opcode::LOAD_XF => {
                scan.has_register_loads = true;
                let header = r.read_u32()?;
                r.skip(4 * ((header >> 16) as usize + 1))?;
            }
            opcode::LOAD_BP => {
                scan.has_register_loads = true;
                r.skip(4)?;
            }
            opcode::LOAD_INDEXED_A
            | opcode::LOAD_INDEXED_B
            | opcode::LOAD_INDEXED_C
            | opcode::LOAD_INDEXED_D => r.skip(4)?,
            opcode::CALL_DISPLAY_LIST => r.skip(8)?,
            opcode::DRAW_FIRST..=opcode::DRAW_LAST => {
                let fmt = op & 7;
                match scan.fmt {
                    None => scan.fmt = Some(fmt),
                    Some(f) if f != fmt => {
                        return Err(GxError::Integrity(
                            "display list mixes vertex formats across draws".into(),
                        ))
                    }
                    Some(_) => {}
                }
                let count = r.read_u16()? as usize;
                r.skip(count * crate::fifo::vertex::vertex_size(state, fmt))?;
            }
            _ => return Err(r.unknown_opcode(op, at)),
        }
    }
    Ok(scan)
}
