//! Shadercast Export Engine
//!
//! Turns a compiled shader program into a video file, one exactly-timed
//! frame at a time, paced by the encoder.
//!
//! # Architecture
//!
//! ```text
//!  caller ──export()──▶ Exporter ──spawn──▶ worker thread (sink scheduler)
//!                                             │
//!                           wait_for_demand ◀─┤
//!                                             ▼
//!                                   ┌──────────────────┐
//!                                   │  ExportSession   │
//!                                   │  acquire buffer  │◀── FrameBufferPool
//!                                   │  wrap texture    │◀── TextureBridge
//!                                   │  render frame    │◀── RenderEngine + audio
//!                                   │  append          │──▶ EncoderSink
//!                                   └────────┬─────────┘
//!                                            │ SessionEvent
//!                                            ▼
//!                      dispatcher thread ──▶ on_progress / on_complete
//!                                            │
//!                                            ▼
//!                                       ExportHandle
//! ```
//!
//! The worker thread owns the session; no other thread mutates it.
//! Frames are only produced while the sink reports demand, so at most
//! `max_buffers` frames are ever in flight.

pub mod error;
pub mod exporter;
pub mod handle;
pub mod pool;
pub mod progress;
pub mod request;
pub mod session;
pub mod sink;
pub mod texture;
pub mod worker;

pub use error::*;
pub use exporter::*;
pub use handle::*;
pub use pool::*;
pub use progress::*;
pub use request::*;
pub use session::*;
pub use sink::*;
pub use texture::*;
pub use worker::*;
