// ============================================================================
// Process Pipeline Tests
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ProcessPipeline, ProcessPipelineFactory, TranscodeCommand};
use crate::error::PipelineError;
use crate::pipeline::{OutputFormat, Pipeline, PipelineFactory};
use crate::resolver::{PassthroughResolver, Resolver};

static FILE_SEQ: AtomicUsize = AtomicUsize::new(0);

fn temp_file(contents: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "audio-bus-transcoder-{}-{}.bin",
        std::process::id(),
        FILE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

fn cat_pipeline(chunk_size: usize) -> ProcessPipeline {
    ProcessPipeline::new(
        Arc::new(PassthroughResolver),
        TranscodeCommand::template("cat", vec!["{input}".to_string()]),
        chunk_size,
        CancellationToken::new(),
    )
}

struct PendingResolver;

#[async_trait]
impl Resolver for PendingResolver {
    async fn resolve(&self, _url: &str) -> Result<String, PipelineError> {
        std::future::pending().await
    }
}

// ------------------------------------------------------------------------
// TranscodeCommand Tests
// ------------------------------------------------------------------------

#[test]
fn test_template_substitutes_input() {
    let cmd = TranscodeCommand::template(
        "sox",
        vec!["{input}".to_string(), "-t".to_string(), "raw".to_string()],
    );
    assert_eq!(
        cmd.args("/music/a.flac", OutputFormat::Pcm),
        vec!["/music/a.flac", "-t", "raw"]
    );
}

#[test]
fn test_ffmpeg_args_per_format() {
    let cmd = TranscodeCommand::ffmpeg("ffmpeg");

    let pcm = cmd.args("/a.mp3", OutputFormat::Pcm);
    assert!(pcm.windows(2).any(|w| w == ["-f", "s16le"]));
    assert_eq!(pcm.last().map(String::as_str), Some("pipe:1"));

    let raw = cmd.args("/a.mp3", OutputFormat::EncodedRaw);
    assert!(raw.windows(2).any(|w| w == ["-f", "mp3"]));

    let container = cmd.args("/a.mp3", OutputFormat::Container);
    assert!(container.windows(2).any(|w| w == ["-f", "ogg"]));
}

#[test]
fn test_ffmpeg_reconnect_only_for_http() {
    let cmd = TranscodeCommand::ffmpeg("ffmpeg");

    let http = cmd.args("https://cdn.example.com/a.webm", OutputFormat::Pcm);
    assert!(http.iter().any(|a| a == "-reconnect"));

    let file = cmd.args("/tmp/a.webm", OutputFormat::Pcm);
    assert!(!file.iter().any(|a| a == "-reconnect"));
}

// ------------------------------------------------------------------------
// ProcessPipeline Tests
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_streams_whole_output_then_closes() {
    let contents: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
    let path = temp_file(&contents);

    let pipeline = cat_pipeline(1024);
    pipeline
        .start(path.to_str().unwrap(), OutputFormat::Pcm)
        .await
        .unwrap();
    assert!(pipeline.is_started());

    let mut output = pipeline.output().unwrap();
    assert!(pipeline.output().is_none());

    let mut received = Vec::new();
    while let Some(chunk) = output.recv().await {
        assert!(chunk.len() <= 1024);
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, contents);

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let pipeline = ProcessPipeline::new(
        Arc::new(PassthroughResolver),
        TranscodeCommand::ffmpeg("/nonexistent/ffmpeg"),
        1024,
        CancellationToken::new(),
    );

    let err = pipeline.start("/tmp/a.mp3", OutputFormat::Pcm).await.unwrap_err();
    assert!(matches!(err, PipelineError::Spawn(_)));
    assert!(pipeline.output().is_none());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let path = temp_file(b"abc");
    let pipeline = cat_pipeline(16);

    pipeline.start(path.to_str().unwrap(), OutputFormat::Pcm).await.unwrap();
    let err = pipeline.start(path.to_str().unwrap(), OutputFormat::Pcm).await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyStarted));

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_stop_terminates_running_process() {
    let pipeline = ProcessPipeline::new(
        Arc::new(PassthroughResolver),
        TranscodeCommand::template("sleep", vec!["30".to_string()]),
        1024,
        CancellationToken::new(),
    );
    pipeline.start("unused", OutputFormat::Pcm).await.unwrap();
    let mut output = pipeline.output().unwrap();

    pipeline.stop();
    let closed = tokio::time::timeout(Duration::from_secs(5), output.recv()).await;
    assert_eq!(closed.unwrap(), None);
    assert!(pipeline.is_cancelled());
}

#[tokio::test]
async fn test_parent_cancel_aborts_resolve() {
    let parent = CancellationToken::new();
    let pipeline = Arc::new(ProcessPipeline::new(
        Arc::new(PendingResolver),
        TranscodeCommand::ffmpeg("ffmpeg"),
        1024,
        parent.child_token(),
    ));

    let task = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.start("https://example.com", OutputFormat::Pcm).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    parent.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));
}

#[tokio::test]
async fn test_factory_builds_independent_pipelines() {
    let factory = ProcessPipelineFactory::new(
        Arc::new(PassthroughResolver),
        TranscodeCommand::ffmpeg("ffmpeg"),
        2048,
    );
    let parent = CancellationToken::new();
    let a = factory.create(parent.child_token());
    let b = factory.create(parent.child_token());

    a.stop();
    assert!(a.output().is_none());
    assert!(b.output().is_none());
}
