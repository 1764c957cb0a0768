use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::Event,
    connection::ConnectionSlot,
    pipeline::{OutputFormat, Pipeline, PipelineFactory},
};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle = 0,
    Extracting = 1,
    Streaming = 2,
    Paused = 3,
    Stopped = 4,
    Error = 5,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Idle,
            1 => SessionState::Extracting,
            2 => SessionState::Streaming,
            3 => SessionState::Paused,
            4 => SessionState::Stopped,
            _ => SessionState::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Extracting => "extracting",
            SessionState::Streaming => "streaming",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Error)
    }

    /// Legal moves: Idle → Extracting → Streaming ⇄ Paused, any live state
    /// → Stopped or Error. Terminal states never move.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Stopped | Error, _) => false,
            (_, Stopped | Error) => true,
            (Idle, Extracting) => true,
            (Extracting, Streaming) => true,
            (Streaming, Paused) | (Paused, Streaming) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub id: String,
    pub state: SessionState,
    pub bytes_sent: u64,
    pub url: String,
    pub format: OutputFormat,
}

/// Receiving end of a session's requested pause state, owned by its
/// execution unit. Only the latest request matters.
pub struct SessionSignals {
    paused: watch::Receiver<bool>,
}

/// One playback attempt. Created `Idle`; driven by [`Session::run`].
pub struct Session {
    id: String,
    url: String,
    format: OutputFormat,
    state: AtomicU8,
    bytes_sent: AtomicU64,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    pipeline: Arc<dyn Pipeline>,
}

impl Session {
    pub fn new(
        id: &str,
        url: &str,
        format: OutputFormat,
        factory: &dyn PipelineFactory,
    ) -> (Arc<Self>, SessionSignals) {
        let cancel = CancellationToken::new();
        let pipeline = factory.create(cancel.child_token());
        let (paused_tx, paused) = watch::channel(false);

        let session = Arc::new(Self {
            id: id.to_string(),
            url: url.to_string(),
            format,
            state: AtomicU8::new(SessionState::Idle as u8),
            bytes_sent: AtomicU64::new(0),
            paused: paused_tx,
            cancel,
            pipeline,
        });
        (session, SessionSignals { paused })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id.clone(),
            state: self.state(),
            bytes_sent: self.bytes_sent(),
            url: self.url.clone(),
            format: self.format,
        }
    }

    /// Move to `next` if the state machine allows it from the current state.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = SessionState::from_u8(current);
            if !from.can_transition_to(next) {
                if from != next {
                    log::trace!("Session {}: ignoring {} -> {}", self.id, from, next);
                }
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    log::debug!("Session {}: {} -> {}", self.id, from, next);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Request a pause. Returns `false` when it was a no-op: already paused,
    /// or not streaming yet / any more.
    pub fn pause(&self) -> bool {
        if !matches!(self.state(), SessionState::Streaming | SessionState::Paused) {
            return false;
        }
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Request a resume. Returns `false` when it was a no-op.
    pub fn resume(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.pipeline.stop();
        self.transition(SessionState::Stopped);
    }

    /// Drive the session from extraction to its terminal state. Emits exactly
    /// one terminal event: `finished` or `error`.
    pub async fn run(self: Arc<Self>, mut signals: SessionSignals, sink: ConnectionSlot) {
        if !self.transition(SessionState::Extracting) {
            self.finish(&sink).await;
            return;
        }
        log::info!("Session {}: extracting {} as {}", self.id, self.url, self.format);

        let started = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = self.pipeline.start(&self.url, self.format) => Some(result),
        };
        match started {
            None => {
                self.pipeline.stop();
                self.finish(&sink).await;
                return;
            }
            Some(Err(e)) => {
                self.pipeline.stop();
                self.fail(&sink, &e.to_string()).await;
                return;
            }
            Some(Ok(())) => {}
        }

        let Some(mut output) = self.pipeline.output() else {
            self.pipeline.stop();
            self.fail(&sink, "pipeline produced no output").await;
            return;
        };

        if !self.transition(SessionState::Streaming) {
            self.pipeline.stop();
            self.finish(&sink).await;
            return;
        }
        let ready = Event::ready(self.id.as_str())
            .with_field("url", self.url.as_str())
            .with_field("format", self.format.as_str());
        sink.send_event(&ready).await;

        self.stream(&mut output, &mut signals, &sink).await;

        self.pipeline.stop();
        self.finish(&sink).await;
    }

    async fn stream(
        &self,
        output: &mut mpsc::Receiver<Bytes>,
        signals: &mut SessionSignals,
        sink: &ConnectionSlot,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return;
                },
                Ok(()) = signals.paused.changed() => {
                    let requested = *signals.paused.borrow_and_update();
                    if !requested || !self.transition(SessionState::Paused) {
                        continue;
                    }
                    log::info!("Session {}: paused", self.id);
                    if !self.wait_resumed(signals).await {
                        return;
                    }
                    self.transition(SessionState::Streaming);
                    log::info!("Session {}: resumed", self.id);
                },
                chunk = output.recv() => {
                    let Some(chunk) = chunk else {
                        log::info!("Session {}: end of stream", self.id);
                        return;
                    };
                    let len = chunk.len() as u64;
                    if sink.send_audio(chunk).await {
                        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
                    }
                },
            }
        }
    }

    /// Block while a pause is requested. Returns `false` on cancellation.
    async fn wait_resumed(&self, signals: &mut SessionSignals) -> bool {
        loop {
            let paused = *signals.paused.borrow_and_update();
            if !paused {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = signals.paused.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                },
            }
        }
    }

    async fn finish(&self, sink: &ConnectionSlot) {
        self.transition(SessionState::Stopped);
        log::info!(
            "Session {}: finished after {} bytes",
            self.id,
            self.bytes_sent()
        );
        sink.send_event(&Event::finished(self.id.as_str(), self.bytes_sent())).await;
    }

    async fn fail(&self, sink: &ConnectionSlot, message: &str) {
        if !self.transition(SessionState::Error) {
            // stopped concurrently; report it as a normal finish
            self.finish(sink).await;
            return;
        }
        log::warn!("Session {}: {}", self.id, message);
        sink.send_event(&Event::error(self.id.as_str(), message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::{self, *};

    const ALL: [SessionState; 6] = [Idle, Extracting, Streaming, Paused, Stopped, Error];

    #[test]
    fn test_terminal_states_never_move() {
        for next in ALL {
            assert!(!Stopped.can_transition_to(next));
            assert!(!Error.can_transition_to(next));
        }
    }

    #[test]
    fn test_forward_path() {
        assert!(Idle.can_transition_to(Extracting));
        assert!(Extracting.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Stopped));
        assert!(Paused.can_transition_to(Stopped));
    }

    #[test]
    fn test_any_live_state_can_fail() {
        for from in [Idle, Extracting, Streaming, Paused] {
            assert!(from.can_transition_to(Error), "{} -> error", from);
        }
    }

    #[test]
    fn test_illegal_shortcuts() {
        assert!(!Idle.can_transition_to(Streaming));
        assert!(!Idle.can_transition_to(Paused));
        assert!(!Extracting.can_transition_to(Paused));
        assert!(!Streaming.can_transition_to(Extracting));
        assert!(!Paused.can_transition_to(Extracting));
        assert!(!Streaming.can_transition_to(Streaming));
    }

    #[test]
    fn test_u8_round_trip() {
        for state in ALL {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_state_strings() {
        let names: Vec<_> = ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            ["idle", "extracting", "streaming", "paused", "stopped", "error"]
        );
        assert_eq!(serde_json::to_string(&Paused).unwrap(), "\"paused\"");
    }
}
