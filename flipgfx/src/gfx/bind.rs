// Sampler, texture and bind-group caches.
//
// Samplers and bind groups are cached by a content hash of the state
// that produced them, the same scheme the pipeline cache uses. Texture
// and palette objects are registered up front and addressed through the
// index handles stored in the shadow state.

use std::collections::HashMap;
use std::sync::Arc;

use xxhash_rust::xxh3::Xxh3;

use crate::error::{GxError, Result};
use crate::gx::state::ShadowState;
use crate::gx::texture::{FilterMode, TexBinding, TextureHandle, TlutHandle, WrapMode, NUM_TLUTS};
use crate::shader::info::ShaderInfo;

/// Key covering everything that selects a wgpu sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    wrap_s: WrapMode,
    wrap_t: WrapMode,
    min_filter: FilterMode,
    mag_filter: FilterMode,
    min_lod: u32,
    max_lod: u32,
}

impl SamplerKey {
    pub fn from_binding(binding: &TexBinding) -> Self {
        Self {
            wrap_s: binding.wrap_s,
            wrap_t: binding.wrap_t,
            min_filter: binding.min_filter,
            mag_filter: binding.mag_filter,
            min_lod: binding.min_lod.to_bits(),
            max_lod: binding.max_lod.to_bits(),
        }
    }
}

fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Clamp => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::Mirror => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_modes(filter: FilterMode) -> (wgpu::FilterMode, wgpu::FilterMode) {
    // (texel filter, mip filter)
    match filter {
        FilterMode::Near => (wgpu::FilterMode::Nearest, wgpu::FilterMode::Nearest),
        FilterMode::Linear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest),
        FilterMode::NearMipNear => (wgpu::FilterMode::Nearest, wgpu::FilterMode::Nearest),
        FilterMode::LinMipNear => (wgpu::FilterMode::Linear, wgpu::FilterMode::Nearest),
        FilterMode::NearMipLin => (wgpu::FilterMode::Nearest, wgpu::FilterMode::Linear),
        FilterMode::LinMipLin => (wgpu::FilterMode::Linear, wgpu::FilterMode::Linear),
    }
}

#[derive(Default)]
pub struct SamplerCache {
    samplers: HashMap<SamplerKey, Arc<wgpu::Sampler>>,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }

    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        binding: &TexBinding,
    ) -> Arc<wgpu::Sampler> {
        let key = SamplerKey::from_binding(binding);
        Arc::clone(self.samplers.entry(key).or_insert_with(|| {
            let (min, mipmap) = filter_modes(binding.min_filter);
            let (mag, _) = filter_modes(binding.mag_filter);
            Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("gx sampler"),
                address_mode_u: address_mode(binding.wrap_s),
                address_mode_v: address_mode(binding.wrap_t),
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: mag,
                min_filter: min,
                mipmap_filter: mipmap,
                lod_min_clamp: binding.min_lod,
                lod_max_clamp: binding.max_lod,
                ..Default::default()
            }))
        }))
    }
}

/// A registered texture: the view draws sample, plus its extent for
/// upload bookkeeping.
pub struct RegisteredTexture {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

/// Side tables resolving the shadow state's index handles to GPU objects.
#[derive(Default)]
pub struct TextureRegistry {
    textures: Vec<Option<RegisteredTexture>>,
    palettes: Vec<Option<wgpu::TextureView>>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self {
            textures: Vec::new(),
            palettes: (0..NUM_TLUTS).map(|_| None).collect(),
        }
    }

    pub fn register_texture(&mut self, texture: RegisteredTexture) -> TextureHandle {
        if let Some(free) = self.textures.iter().position(Option::is_none) {
            self.textures[free] = Some(texture);
            return TextureHandle(free as u32);
        }
        self.textures.push(Some(texture));
        TextureHandle(self.textures.len() as u32 - 1)
    }

    pub fn unregister_texture(&mut self, handle: TextureHandle) {
        if let Some(slot) = self.textures.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&RegisteredTexture> {
        self.textures
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GxError::InvalidSlot {
                kind: "texture",
                index: handle.0 as usize,
            })
    }

    /// Install a palette view in a fixed TLUT slot.
    pub fn set_palette(&mut self, handle: TlutHandle, view: wgpu::TextureView) -> Result<()> {
        let slot = self
            .palettes
            .get_mut(handle.0 as usize)
            .ok_or(GxError::InvalidSlot {
                kind: "palette",
                index: handle.0 as usize,
            })?;
        *slot = Some(view);
        Ok(())
    }

    pub fn palette(&self, handle: TlutHandle) -> Result<&wgpu::TextureView> {
        self.palettes
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GxError::InvalidSlot {
                kind: "palette",
                index: handle.0 as usize,
            })
    }
}

/// Content hash of the texture bindings a draw samples. Identifies the
/// bind group without creating it.
pub fn texture_bind_hash(state: &ShadowState, info: &ShaderInfo) -> u64 {
    let mut h = Xxh3::new();
    for t in 0..8usize {
        if info.sampled_textures & (1 << t) == 0 {
            continue;
        }
        let b = &state.textures[t];
        h.update(&[t as u8]);
        h.update(&b.handle.map_or(u32::MAX, |h| h.0).to_le_bytes());
        h.update(&(SamplerKey::from_binding(b).min_lod).to_le_bytes());
        h.update(&(SamplerKey::from_binding(b).max_lod).to_le_bytes());
        h.update(&[
            b.wrap_s as u8,
            b.wrap_t as u8,
            b.min_filter as u8,
            b.mag_filter as u8,
        ]);
        h.update(&b.tlut.map_or(u32::MAX, |h| h.0).to_le_bytes());
    }
    h.digest()
}

/// The bind groups one draw needs beyond its uniforms: the sampled
/// texture/sampler pairs, and the palette group when any unit is indexed.
pub struct DrawBinds {
    pub textures: wgpu::BindGroup,
    pub palettes: Option<wgpu::BindGroup>,
}

/// Draw bind groups cached by content hash.
#[derive(Default)]
pub struct BindGroupCache {
    groups: HashMap<u64, Arc<DrawBinds>>,
}

impl BindGroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn get(&self, hash: u64) -> Option<Arc<DrawBinds>> {
        self.groups.get(&hash).cloned()
    }

    pub fn insert(&mut self, hash: u64, binds: DrawBinds) -> Arc<DrawBinds> {
        let binds = Arc::new(binds);
        self.groups.insert(hash, Arc::clone(&binds));
        binds
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_key_covers_wrap_and_filter() {
        let a = TexBinding::default();
        let mut b = TexBinding::default();
        assert_eq!(SamplerKey::from_binding(&a), SamplerKey::from_binding(&b));
        b.wrap_s = WrapMode::Mirror;
        assert_ne!(SamplerKey::from_binding(&a), SamplerKey::from_binding(&b));
        b = TexBinding::default();
        b.min_filter = FilterMode::NearMipLin;
        assert_ne!(SamplerKey::from_binding(&a), SamplerKey::from_binding(&b));
    }

    #[test]
    fn bind_hash_tracks_sampled_units_only() {
        use crate::gx::state::ShadowState;
        use crate::shader::info::ShaderInfo;

        let mut state = ShadowState::new();
        let mut info = ShaderInfo::default();
        info.sampled_textures = 0b0001;

        let a = texture_bind_hash(&state, &info);
        // Unit 3 is not sampled, so changing it is invisible.
        state.textures[3].handle = Some(TextureHandle(9));
        assert_eq!(texture_bind_hash(&state, &info), a);
        // Unit 0 is sampled.
        state.textures[0].handle = Some(TextureHandle(9));
        assert_ne!(texture_bind_hash(&state, &info), a);
    }
}
