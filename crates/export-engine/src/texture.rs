//! Render-target bridging between pooled frame buffers and the renderer.
//!
//! The session never draws into a [`FrameBuffer`] directly. It asks a
//! [`TextureBridge`] to wrap the buffer as a render target, renders through
//! it, and the bridge guarantees the final pixels are in the buffer when
//! [`TextureBridge::render_into`] returns.
//!
//! Bridges keep one cache entry per wrapped buffer until [`TextureBridge::flush`]
//! is called. The cache does not bound itself: the session flushes it every
//! `cache_flush_interval` frames, and a bridge whose cache outgrows
//! `max_cached_bytes` refuses to create further textures.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shadercast_render::{RenderError, RenderSurface};

use crate::pool::{FrameBuffer, FrameFormat};

/// Which bridge implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeKind {
    /// Render straight into the buffer memory.
    #[default]
    ZeroCopy,
    /// Render into a staging surface and copy into the buffer.
    Copy,
}

impl FromStr for BridgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zero-copy" | "zerocopy" | "zero_copy" => Ok(Self::ZeroCopy),
            "copy" => Ok(Self::Copy),
            other => Err(format!("unknown bridge '{other}' (expected zero-copy or copy)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOptions {
    /// Refuse new textures once the unflushed cache holds this many bytes.
    /// `None` leaves the cache unbounded.
    pub max_cached_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextureError {
    #[error("texture cache holds {cached_bytes} bytes (limit {limit}); flush required")]
    CacheExhausted { cached_bytes: u64, limit: u64 },

    #[error("buffer format {actual:?} does not match bridge format {expected:?}")]
    FormatMismatch {
        expected: FrameFormat,
        actual: FrameFormat,
    },
}

/// A render target created for one buffer; valid until the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    id: u64,
    buffer_id: u64,
}

impl TextureHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Textures created over the bridge's lifetime.
    pub created: u64,
    /// Entries currently retained.
    pub cached: usize,
    /// Bytes currently retained.
    pub cached_bytes: u64,
    /// Flushes performed.
    pub flushes: u64,
}

/// Draw callback handed to [`TextureBridge::render_into`].
pub type DrawFn<'a> = dyn FnMut(&mut RenderSurface<'_>) -> Result<(), RenderError> + 'a;

/// "Render target" capability over pooled buffers.
pub trait TextureBridge: Send {
    fn kind(&self) -> BridgeKind;

    /// Wrap `buffer` as a render target.
    fn create_texture(&mut self, buffer: &FrameBuffer) -> Result<TextureHandle, TextureError>;

    /// Run `draw` against the target behind `handle`. On success the
    /// rendered pixels are in `buffer`.
    fn render_into(
        &mut self,
        handle: &TextureHandle,
        buffer: &mut FrameBuffer,
        draw: &mut DrawFn<'_>,
    ) -> Result<(), RenderError>;

    /// Release every cached entry.
    fn flush(&mut self);

    fn stats(&self) -> BridgeStats;
}

/// Build a bridge for `format`.
pub fn create_bridge(
    kind: BridgeKind,
    format: FrameFormat,
    options: BridgeOptions,
) -> Box<dyn TextureBridge> {
    match kind {
        BridgeKind::ZeroCopy => Box::new(ZeroCopyBridge::new(format, options)),
        BridgeKind::Copy => Box::new(CopyBridge::new(format, options)),
    }
}

/// Bookkeeping shared by both bridges.
#[derive(Debug)]
struct TextureCache<T> {
    format: FrameFormat,
    entry_bytes: u64,
    limit: Option<u64>,
    entries: HashMap<u64, (u64, T)>,
    next_id: u64,
    stats: BridgeStats,
}

impl<T> TextureCache<T> {
    fn new(format: FrameFormat, options: BridgeOptions) -> Self {
        Self {
            format,
            entry_bytes: format.byte_len().unwrap_or(usize::MAX) as u64,
            limit: options.max_cached_bytes,
            entries: HashMap::new(),
            next_id: 0,
            stats: BridgeStats::default(),
        }
    }

    fn insert(
        &mut self,
        buffer: &FrameBuffer,
        make: impl FnOnce() -> T,
    ) -> Result<TextureHandle, TextureError> {
        if buffer.format() != self.format {
            return Err(TextureError::FormatMismatch {
                expected: self.format,
                actual: buffer.format(),
            });
        }
        if let Some(limit) = self.limit {
            if self.stats.cached_bytes + self.entry_bytes > limit {
                return Err(TextureError::CacheExhausted {
                    cached_bytes: self.stats.cached_bytes,
                    limit,
                });
            }
        }

        let handle = TextureHandle {
            id: self.next_id,
            buffer_id: buffer.id(),
        };
        self.next_id += 1;
        self.entries.insert(handle.id, (buffer.id(), make()));
        self.stats.created += 1;
        self.stats.cached = self.entries.len();
        self.stats.cached_bytes += self.entry_bytes;
        Ok(handle)
    }

    fn get_mut(
        &mut self,
        handle: &TextureHandle,
        buffer: &FrameBuffer,
    ) -> Result<&mut T, RenderError> {
        match self.entries.get_mut(&handle.id) {
            Some((buffer_id, entry)) if *buffer_id == buffer.id() => Ok(entry),
            Some(_) => Err(RenderError::Backend(format!(
                "texture {} does not wrap buffer {}",
                handle.id,
                buffer.id()
            ))),
            None => Err(RenderError::Backend(format!(
                "texture {} was flushed",
                handle.id
            ))),
        }
    }

    fn flush(&mut self) {
        self.entries.clear();
        self.stats.cached = 0;
        self.stats.cached_bytes = 0;
        self.stats.flushes += 1;
    }
}

/// Renders directly into the pooled buffer.
#[derive(Debug)]
pub struct ZeroCopyBridge {
    cache: TextureCache<()>,
}

impl ZeroCopyBridge {
    pub fn new(format: FrameFormat, options: BridgeOptions) -> Self {
        Self {
            cache: TextureCache::new(format, options),
        }
    }
}

impl TextureBridge for ZeroCopyBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::ZeroCopy
    }

    fn create_texture(&mut self, buffer: &FrameBuffer) -> Result<TextureHandle, TextureError> {
        self.cache.insert(buffer, || ())
    }

    fn render_into(
        &mut self,
        handle: &TextureHandle,
        buffer: &mut FrameBuffer,
        draw: &mut DrawFn<'_>,
    ) -> Result<(), RenderError> {
        self.cache.get_mut(handle, buffer)?;
        let (width, height, stride) = (buffer.width(), buffer.height(), buffer.stride());
        let mut surface = RenderSurface::new(width, height, stride, buffer.data_mut())
            .ok_or_else(|| RenderError::Backend("frame buffer smaller than its format".into()))?;
        draw(&mut surface)
    }

    fn flush(&mut self) {
        self.cache.flush();
    }

    fn stats(&self) -> BridgeStats {
        self.cache.stats
    }
}

/// Renders into a staging surface, then copies into the pooled buffer.
#[derive(Debug)]
pub struct CopyBridge {
    cache: TextureCache<Vec<u8>>,
}

impl CopyBridge {
    pub fn new(format: FrameFormat, options: BridgeOptions) -> Self {
        Self {
            cache: TextureCache::new(format, options),
        }
    }
}

impl TextureBridge for CopyBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Copy
    }

    fn create_texture(&mut self, buffer: &FrameBuffer) -> Result<TextureHandle, TextureError> {
        let len = buffer.data().len();
        self.cache.insert(buffer, || vec![0u8; len])
    }

    fn render_into(
        &mut self,
        handle: &TextureHandle,
        buffer: &mut FrameBuffer,
        draw: &mut DrawFn<'_>,
    ) -> Result<(), RenderError> {
        let (width, height, stride) = (buffer.width(), buffer.height(), buffer.stride());
        let staging = self.cache.get_mut(handle, buffer)?;
        {
            let mut surface = RenderSurface::new(width, height, stride, staging)
                .ok_or_else(|| RenderError::Backend("staging surface too small".into()))?;
            draw(&mut surface)?;
        }
        buffer.data_mut().copy_from_slice(staging);
        Ok(())
    }

    fn flush(&mut self) {
        self.cache.flush();
    }

    fn stats(&self) -> BridgeStats {
        self.cache.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{FrameBufferPool, PoolOptions};

    fn pool() -> FrameBufferPool {
        FrameBufferPool::new(FrameFormat::bgra(2, 2), PoolOptions { max_buffers: 2 }).unwrap()
    }

    fn fill_red(surface: &mut RenderSurface<'_>) -> Result<(), RenderError> {
        surface.clear([255, 0, 0, 255]);
        Ok(())
    }

    #[test]
    fn test_both_bridges_leave_pixels_in_buffer() {
        for kind in [BridgeKind::ZeroCopy, BridgeKind::Copy] {
            let pool = pool();
            let mut bridge = create_bridge(kind, pool.format(), BridgeOptions::default());
            let mut buffer = pool.acquire().unwrap();
            let handle = bridge.create_texture(&buffer).unwrap();
            bridge.render_into(&handle, &mut buffer, &mut fill_red).unwrap();
            assert_eq!(&buffer.data()[0..4], &[0, 0, 255, 255], "{kind:?}");
            assert_eq!(bridge.kind(), kind);
        }
    }

    #[test]
    fn test_cache_grows_until_flushed() {
        let pool = pool();
        let limit = 3 * 16;
        let mut bridge = CopyBridge::new(
            pool.format(),
            BridgeOptions {
                max_cached_bytes: Some(limit),
            },
        );
        let buffer = pool.acquire().unwrap();
        for _ in 0..3 {
            bridge.create_texture(&buffer).unwrap();
        }
        assert_eq!(bridge.stats().cached, 3);
        assert!(matches!(
            bridge.create_texture(&buffer),
            Err(TextureError::CacheExhausted { .. })
        ));

        bridge.flush();
        assert_eq!(bridge.stats().cached_bytes, 0);
        assert!(bridge.create_texture(&buffer).is_ok());
        assert_eq!(bridge.stats().flushes, 1);
        assert_eq!(bridge.stats().created, 4);
    }

    #[test]
    fn test_flushed_handle_is_rejected() {
        let pool = pool();
        let mut bridge = ZeroCopyBridge::new(pool.format(), BridgeOptions::default());
        let mut buffer = pool.acquire().unwrap();
        let handle = bridge.create_texture(&buffer).unwrap();
        bridge.flush();
        assert!(bridge.render_into(&handle, &mut buffer, &mut fill_red).is_err());
    }

    #[test]
    fn test_format_mismatch() {
        let pool = pool();
        let mut bridge = ZeroCopyBridge::new(FrameFormat::bgra(4, 4), BridgeOptions::default());
        let buffer = pool.acquire().unwrap();
        assert!(matches!(
            bridge.create_texture(&buffer),
            Err(TextureError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_bridge_kind_parse() {
        assert_eq!("zero-copy".parse::<BridgeKind>().unwrap(), BridgeKind::ZeroCopy);
        assert_eq!("COPY".parse::<BridgeKind>().unwrap(), BridgeKind::Copy);
        assert!("dma".parse::<BridgeKind>().is_err());
    }
}
