use std::{path::PathBuf, sync::LazyLock};

use audio_bus::transcoder::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_SOCKET: &str = "/tmp/media-relay.sock";
pub const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_RESOLVER: &str = "yt-dlp";
pub const DEFAULT_TRANSCODER: &str = "ffmpeg";

pub struct RelayConfig {
    socket_path: PathBuf,
    api_addr: String,
    resolver: Option<String>,
    transcoder: String,
    chunk_size: usize,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. An empty `RELAY_RESOLVER`
    /// disables URL resolution.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let chunk_size = match lookup("RELAY_CHUNK_SIZE") {
            None => DEFAULT_CHUNK_SIZE,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    log::warn!(
                        "Config: invalid RELAY_CHUNK_SIZE {:?}, using {}",
                        raw,
                        DEFAULT_CHUNK_SIZE
                    );
                    DEFAULT_CHUNK_SIZE
                }
            },
        };

        let resolver = lookup("RELAY_RESOLVER")
            .unwrap_or_else(|| DEFAULT_RESOLVER.to_string())
            .trim()
            .to_string();

        Self {
            socket_path: lookup("RELAY_SOCKET")
                .unwrap_or_else(|| DEFAULT_SOCKET.to_string())
                .into(),
            api_addr: lookup("RELAY_API_ADDR").unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            resolver: (!resolver.is_empty()).then_some(resolver),
            transcoder: lookup("RELAY_TRANSCODER")
                .unwrap_or_else(|| DEFAULT_TRANSCODER.to_string()),
            chunk_size,
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    pub fn api_addr(&self) -> &str {
        &self.api_addr
    }

    pub fn resolver(&self) -> Option<&str> {
        self.resolver.as_deref()
    }

    pub fn transcoder(&self) -> &str {
        &self.transcoder
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

pub fn config() -> &'static RelayConfig {
    static CONFIG: LazyLock<RelayConfig> = LazyLock::new(RelayConfig::from_env);
    &CONFIG
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[]));
        assert_eq!(config.socket_path(), &PathBuf::from(DEFAULT_SOCKET));
        assert_eq!(config.api_addr(), DEFAULT_API_ADDR);
        assert_eq!(config.resolver(), Some("yt-dlp"));
        assert_eq!(config.transcoder(), "ffmpeg");
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("RELAY_SOCKET", "/run/relay.sock"),
            ("RELAY_API_ADDR", "127.0.0.1:9000"),
            ("RELAY_RESOLVER", "/opt/yt-dlp"),
            ("RELAY_TRANSCODER", "/usr/local/bin/ffmpeg"),
            ("RELAY_CHUNK_SIZE", "8192"),
        ]));
        assert_eq!(config.socket_path(), &PathBuf::from("/run/relay.sock"));
        assert_eq!(config.api_addr(), "127.0.0.1:9000");
        assert_eq!(config.resolver(), Some("/opt/yt-dlp"));
        assert_eq!(config.transcoder(), "/usr/local/bin/ffmpeg");
        assert_eq!(config.chunk_size(), 8192);
    }

    #[test]
    fn test_empty_resolver_disables_resolution() {
        let config = RelayConfig::from_lookup(lookup(&[("RELAY_RESOLVER", "  ")]));
        assert_eq!(config.resolver(), None);
    }

    #[test]
    fn test_invalid_chunk_size_falls_back() {
        for raw in ["abc", "0", "-1", ""] {
            let config = RelayConfig::from_lookup(lookup(&[("RELAY_CHUNK_SIZE", raw)]));
            assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE, "{:?}", raw);
        }
    }
}
