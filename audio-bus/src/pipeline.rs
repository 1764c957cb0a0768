//! Playback pipeline contract: resolve a source URL, start a transcoder for
//! the requested format, then yield audio chunks until the source runs dry
//! or the pipeline is stopped.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// s16le, 48 kHz, stereo
    #[default]
    Pcm,
    /// MP3 elementary stream, no container
    EncodedRaw,
    /// Ogg/Opus
    Container,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Pcm => "pcm",
            OutputFormat::EncodedRaw => "encoded-raw",
            OutputFormat::Container => "container",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pcm" => Ok(OutputFormat::Pcm),
            "encoded-raw" => Ok(OutputFormat::EncodedRaw),
            "container" => Ok(OutputFormat::Container),
            other => Err(anyhow::anyhow!(
                "unsupported output format {:?} (expected pcm, encoded-raw or container)",
                other
            )),
        }
    }
}

/// One playback attempt's external work.
///
/// `start` reports resolution and launch failures once. After that, any
/// failure just closes the output channel.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn start(&self, url: &str, format: OutputFormat) -> Result<(), PipelineError>;

    /// Take the chunk receiver. Only the first call after a successful
    /// `start` returns `Some`.
    fn output(&self) -> Option<mpsc::Receiver<Bytes>>;

    /// Terminate external processes. Safe to call more than once.
    fn stop(&self);
}

pub trait PipelineFactory: Send + Sync {
    /// `cancel` is a child of the owning session's token.
    fn create(&self, cancel: CancellationToken) -> Arc<dyn Pipeline>;
}
