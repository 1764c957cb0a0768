//! Subprocess-backed pipeline: resolver, then a transcoder whose stdout is
//! cut into chunks.

use std::{
    process::Stdio,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::PipelineError,
    pipeline::{OutputFormat, Pipeline, PipelineFactory},
    resolver::Resolver,
};

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
const OUTPUT_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug)]
enum TranscodeArgs {
    Ffmpeg,
    Template(Vec<String>),
}

/// Program plus argument layout for the transcode step
#[derive(Clone, Debug)]
pub struct TranscodeCommand {
    program: String,
    args: TranscodeArgs,
}

impl TranscodeCommand {
    /// Standard ffmpeg invocation writing the requested format to stdout.
    pub fn ffmpeg(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: TranscodeArgs::Ffmpeg,
        }
    }

    /// Fixed arguments; every `{input}` is replaced by the resolved URL and
    /// the output format is ignored.
    pub fn template(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args: TranscodeArgs::Template(args),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self, input: &str, format: OutputFormat) -> Vec<String> {
        match &self.args {
            TranscodeArgs::Ffmpeg => ffmpeg_args(input, format),
            TranscodeArgs::Template(args) => args
                .iter()
                .map(|a| a.replace(INPUT_PLACEHOLDER, input))
                .collect(),
        }
    }
}

fn ffmpeg_args(input: &str, format: OutputFormat) -> Vec<String> {
    let mut args: Vec<&str> = vec!["-hide_banner", "-loglevel", "error", "-nostdin"];
    if input.starts_with("http://") || input.starts_with("https://") {
        args.extend([
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
        ]);
    }
    args.extend(["-i", input, "-vn"]);
    match format {
        OutputFormat::Pcm => args.extend(["-acodec", "pcm_s16le", "-f", "s16le"]),
        OutputFormat::EncodedRaw => {
            args.extend(["-acodec", "libmp3lame", "-b:a", "192k", "-f", "mp3"])
        }
        OutputFormat::Container => {
            args.extend(["-acodec", "libopus", "-b:a", "128k", "-f", "ogg"])
        }
    }
    args.extend(["-ar", "48000", "-ac", "2", "pipe:1"]);
    args.into_iter().map(str::to_string).collect()
}

pub struct ProcessPipeline {
    resolver: Arc<dyn Resolver>,
    command: TranscodeCommand,
    chunk_size: usize,
    cancel: CancellationToken,
    started: AtomicBool,
    output: Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl ProcessPipeline {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        command: TranscodeCommand,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            command,
            chunk_size: chunk_size.max(1),
            cancel,
            started: AtomicBool::new(false),
            output: Mutex::new(None),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl Pipeline for ProcessPipeline {
    async fn start(&self, url: &str, format: OutputFormat) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::Relaxed) {
            log::warn!("Pipeline already started");
            return Err(PipelineError::AlreadyStarted);
        }

        let stream_url = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(PipelineError::Cancelled);
            },
            resolved = self.resolver.resolve(url) => resolved?,
        };
        log::info!("Pipeline: resolved {} -> {}", url, stream_url);

        let args = self.command.args(&stream_url, format);
        log::debug!("Pipeline: spawning {} {:?}", self.command.program(), args);
        let mut child = Command::new(self.command.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PipelineError::Spawn)?;

        let stdout = child.stdout.take().ok_or(PipelineError::NoOutput)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(self.command.program().to_string(), stderr));
        }

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);

        tokio::spawn(pump_stdout(
            child,
            stdout,
            tx,
            self.chunk_size,
            self.cancel.clone(),
        ));
        Ok(())
    }

    fn output(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Forward stdout in chunks until EOF, a closed receiver, or cancellation.
/// The sender is dropped before the child is reaped so the consumer sees
/// end-of-stream immediately.
async fn pump_stdout(
    mut child: Child,
    mut stdout: ChildStdout,
    tx: mpsc::Sender<Bytes>,
    chunk_size: usize,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; chunk_size];
    let mut eof = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            read = stdout.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            sent = tx.send(chunk) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("Pipeline: read transcoder output: {}", e);
                        break;
                    }
                }
            },
        }
    }
    drop(tx);

    if !eof {
        if let Err(e) = child.kill().await {
            log::debug!("Pipeline: kill transcoder: {}", e);
        }
    }
    match child.wait().await {
        Ok(status) if status.success() || !eof => {
            log::debug!("Pipeline: transcoder exited: {}", status)
        }
        Ok(status) => log::warn!("Pipeline: transcoder exited abnormally: {}", status),
        Err(e) => log::warn!("Pipeline: wait transcoder: {}", e),
    }
}

async fn log_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("{}: {}", program, line);
    }
}

pub struct ProcessPipelineFactory {
    resolver: Arc<dyn Resolver>,
    command: TranscodeCommand,
    chunk_size: usize,
}

impl ProcessPipelineFactory {
    pub fn new(resolver: Arc<dyn Resolver>, command: TranscodeCommand, chunk_size: usize) -> Self {
        Self {
            resolver,
            command,
            chunk_size,
        }
    }
}

impl PipelineFactory for ProcessPipelineFactory {
    fn create(&self, cancel: CancellationToken) -> Arc<dyn Pipeline> {
        Arc::new(ProcessPipeline::new(
            Arc::clone(&self.resolver),
            self.command.clone(),
            self.chunk_size,
            cancel,
        ))
    }
}

#[cfg(test)]
#[path = "transcoder_test.rs"]
mod transcoder_test;
