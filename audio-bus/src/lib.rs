//! Audio session engine: runs resolve + transcode pipelines per session and
//! multiplexes their audio chunks and lifecycle events onto one downstream
//! connection.
//!
//! ```text
//!  Play(id, url, format)
//!          │
//!          ▼
//!     Registry ──► Session ──► Pipeline (resolve ─► transcode ─► chunks)
//!                     │
//!                     ▼
//!              ConnectionSlot ──► [json event \n] / [u32 len][audio] ──► Demuxer
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod demux;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod transcoder;
pub mod transport;

pub use error::{FrameError, PipelineError, RegistryError};
