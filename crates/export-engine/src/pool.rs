//! Recycling pool of fixed-format frame buffers.
//!
//! A [`FrameBuffer`] is owned pixel memory. Whoever holds it last (normally
//! the encoder, once it has consumed the frame) drops it, and the drop hands
//! the memory back to its pool. The pool never allocates more than
//! `max_buffers` buffers; when all of them are out, `acquire` reports
//! [`PoolError::Exhausted`], which callers treat as "try again later".

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use shadercast_render::PixelFormat;

/// Width, height and pixel layout shared by every buffer of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl FrameFormat {
    pub fn bgra(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Bgra8,
        }
    }

    /// Bytes per row (buffers are tightly packed).
    pub fn stride(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Bytes per buffer, or `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.stride().checked_mul(self.height as usize)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Most buffers alive at once.
    pub max_buffers: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self { max_buffers: 6 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every buffer is in use; one will come back when the encoder drops it.
    #[error("all frame buffers are in use")]
    Exhausted,

    #[error("{0}")]
    Unavailable(String),
}

/// Counters describing pool behaviour over an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Buffers ever allocated.
    pub allocated: usize,
    /// Buffers currently handed out.
    pub outstanding: usize,
    /// Acquisitions served from recycled memory.
    pub recycled: u64,
    /// Times `acquire` found the pool empty.
    pub exhausted_events: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<(u64, Vec<u8>)>,
    stats: PoolStats,
}

#[derive(Debug)]
struct PoolShared {
    state: Mutex<PoolState>,
    released: Condvar,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Pool state stays consistent across a panicking holder.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed-capacity pool of [`FrameBuffer`]s.
#[derive(Debug)]
pub struct FrameBufferPool {
    format: FrameFormat,
    byte_len: usize,
    max_buffers: usize,
    shared: Arc<PoolShared>,
}

impl FrameBufferPool {
    pub fn new(format: FrameFormat, options: PoolOptions) -> Result<Self, PoolError> {
        if format.width == 0 || format.height == 0 {
            return Err(PoolError::Unavailable(format!(
                "frame size {}x{} is empty",
                format.width, format.height
            )));
        }
        if options.max_buffers == 0 {
            return Err(PoolError::Unavailable("pool capacity is zero".into()));
        }
        let byte_len = format.byte_len().ok_or_else(|| {
            PoolError::Unavailable(format!(
                "frame size {}x{} overflows memory",
                format.width, format.height
            ))
        })?;

        tracing::debug!(
            width = format.width,
            height = format.height,
            max_buffers = options.max_buffers,
            byte_len,
            "Frame buffer pool created"
        );

        Ok(Self {
            format,
            byte_len,
            max_buffers: options.max_buffers,
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::default()),
                released: Condvar::new(),
            }),
        })
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    /// Take a buffer, recycling released memory first.
    ///
    /// Recycled buffers keep the previous frame's pixels.
    pub fn acquire(&self) -> Result<FrameBuffer, PoolError> {
        let mut state = self.shared.lock();

        let (id, data) = if let Some(recycled) = state.free.pop() {
            state.stats.recycled += 1;
            recycled
        } else if state.stats.allocated < self.max_buffers {
            let id = state.stats.allocated as u64;
            state.stats.allocated += 1;
            (id, vec![0u8; self.byte_len])
        } else {
            state.stats.exhausted_events += 1;
            return Err(PoolError::Exhausted);
        };
        state.stats.outstanding += 1;

        Ok(FrameBuffer {
            id,
            format: self.format,
            data,
            home: Arc::downgrade(&self.shared),
        })
    }

    /// Block until a buffer could be acquired or `timeout` elapses.
    ///
    /// Returns `true` if a buffer is available.
    pub fn wait_for_release(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let max = self.max_buffers;
        let (state, _) = self
            .shared
            .released
            .wait_timeout_while(state, timeout, |s| {
                s.free.is_empty() && s.stats.allocated >= max
            })
            .unwrap_or_else(|e| e.into_inner());
        !state.free.is_empty() || state.stats.allocated < max
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats
    }
}

/// Pooled pixel memory for one frame.
///
/// Dropping the buffer returns its memory to the pool it came from.
#[derive(Debug)]
pub struct FrameBuffer {
    id: u64,
    format: FrameFormat,
    data: Vec<u8>,
    home: Weak<PoolShared>,
}

impl FrameBuffer {
    /// Stable identity of the underlying memory within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn stride(&self) -> usize {
        self.format.stride()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let Some(shared) = self.home.upgrade() else {
            return;
        };
        let data = std::mem::take(&mut self.data);
        let mut state = shared.lock();
        state.stats.outstanding = state.stats.outstanding.saturating_sub(1);
        state.free.push((self.id, data));
        drop(state);
        shared.released.notify_all();
    }
}
