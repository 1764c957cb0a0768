use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::PipelineError;

/// Turns a user-facing source URL into a URL the transcoder can open.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String, PipelineError>;
}

/// Returns the URL unchanged (direct stream URLs, local files).
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl Resolver for PassthroughResolver {
    async fn resolve(&self, url: &str) -> Result<String, PipelineError> {
        Ok(url.to_string())
    }
}

/// Runs an extractor program (yt-dlp compatible) and takes the first line
/// it prints as the stream URL. The child is killed if the future is
/// dropped.
#[derive(Clone, Debug)]
pub struct CommandResolver {
    program: String,
    args: Vec<String>,
}

impl CommandResolver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn yt_dlp(program: impl Into<String>) -> Self {
        Self::new(
            program,
            ["-f", "bestaudio", "-g", "--no-playlist"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Resolver for CommandResolver {
    async fn resolve(&self, url: &str) -> Result<String, PipelineError> {
        log::debug!("Resolver: {} {:?} {}", self.program, self.args, url);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Resolve(format!("run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Resolve(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Resolve(format!("{} printed no stream url", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough() {
        let url = PassthroughResolver.resolve("/tmp/a.mp3").await.unwrap();
        assert_eq!(url, "/tmp/a.mp3");
    }

    #[tokio::test]
    async fn test_command_resolver_takes_first_line() {
        // echo prints its arguments, so the "resolved" url is the input
        let resolver = CommandResolver::new("echo", vec![]);
        let url = resolver.resolve("https://example.com/stream").await.unwrap();
        assert_eq!(url, "https://example.com/stream");
    }

    #[tokio::test]
    async fn test_command_resolver_failure() {
        let resolver = CommandResolver::new("false", vec![]);
        let err = resolver.resolve("https://example.com").await.unwrap_err();
        assert!(matches!(err, PipelineError::Resolve(_)));
    }

    #[tokio::test]
    async fn test_command_resolver_missing_program() {
        let resolver = CommandResolver::yt_dlp("/nonexistent/yt-dlp");
        let err = resolver.resolve("https://example.com").await.unwrap_err();
        assert!(matches!(err, PipelineError::Resolve(_)));
    }
}
