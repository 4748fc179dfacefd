//! Pull-based translation of backend event streams into text deltas.
//!
//! A producer task pushes [`BackendEvent`]s into a bounded channel; one
//! consumer pulls [`Delta`]s out of the [`StreamTranslator`]. Backpressure is
//! applied by the channel, nothing is ever dropped.
//!
//! Guarantees:
//! - deltas are emitted in order and never overlap,
//! - the concatenation of all emitted deltas equals the accumulated text at
//!   closure,
//! - once closed the translator stays closed.

use crate::{sentinel, BackendEvent, CompletionError, Delta, DeltaStream};
use std::time::Duration;
use tokio::{sync::mpsc, time::Instant};

/// Channel capacity between a backend producer task and its translator
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Invoked once when the backend disengages, e.g. to evict the owning session
pub type DisengageHook = Box<dyn FnOnce() + Send>;

pub struct StreamTranslator {
    source: mpsc::Receiver<BackendEvent>,
    accumulated: String,
    /// Number of chars of `accumulated` already handed out
    read_position: usize,
    closed: bool,
    errored: bool,
    disengaged: bool,
    deadline: Option<(Instant, Duration)>,
    on_disengaged: Option<DisengageHook>,
}

impl StreamTranslator {
    pub fn new(source: mpsc::Receiver<BackendEvent>) -> Self {
        Self {
            source,
            accumulated: String::new(),
            read_position: 0,
            closed: false,
            errored: false,
            disengaged: false,
            deadline: None,
            on_disengaged: None,
        }
    }

    /// Create a translator together with the sender its producer should use
    pub fn channel() -> (mpsc::Sender<BackendEvent>, Self) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (tx, Self::new(rx))
    }

    /// Close the stream with [`CompletionError::Timeout`] once `timeout` elapses
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout));
        self
    }

    pub fn on_disengaged(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_disengaged = Some(Box::new(hook));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.accumulated
    }

    /// Wait for the next backend event and translate it.
    ///
    /// An empty open delta means the backend produced an event without new
    /// text. Errors are terminal: the translator is closed afterwards.
    pub async fn poll(&mut self) -> Result<Delta, CompletionError> {
        if self.closed {
            return Ok(Delta::closed());
        }

        let event = match self.deadline {
            Some((deadline, timeout)) => {
                match tokio::time::timeout_at(deadline, self.source.recv()).await {
                    Ok(event) => event,
                    Err(_) => return Err(self.fail(CompletionError::Timeout(timeout))),
                }
            }
            None => self.source.recv().await,
        };

        match event {
            None => {
                self.closed = true;
                if let Some(error) = sentinel::classify_final_text(&self.accumulated) {
                    self.errored = true;
                    return Err(error);
                }
                Ok(Delta::closed())
            }
            // A producer that breaks after disengaging is reported as the disengage
            Some(BackendEvent::Failed(_)) if self.disengaged => {
                Err(self.fail(CompletionError::SessionDisengaged))
            }
            Some(BackendEvent::Failed(error)) => Err(self.fail(error)),
            Some(BackendEvent::Snapshot(text)) => Ok(self.advance_to(text)),
            Some(BackendEvent::Append(text)) => Ok(self.append(text)),
            Some(BackendEvent::Disengaged(text)) => {
                tracing::debug!("Backend disengaged, evicting session");
                self.disengaged = true;
                if let Some(hook) = self.on_disengaged.take() {
                    hook();
                }
                if text.is_empty() {
                    Ok(self.append(sentinel::DISENGAGED_APOLOGY.to_string()))
                } else {
                    Ok(self.advance_to(text))
                }
            }
        }
    }

    /// Drain the stream and return the final text
    pub async fn collect_text(mut self) -> Result<String, CompletionError> {
        loop {
            if self.poll().await?.is_closed() {
                return Ok(self.accumulated);
            }
        }
    }

    /// Adapt into a stream of non-empty deltas, ending after the terminal item
    pub fn into_stream(self) -> DeltaStream {
        Box::pin(futures_util::stream::unfold(self, |mut translator| async move {
            loop {
                if translator.closed {
                    return None;
                }
                match translator.poll().await {
                    Ok(delta) if delta.is_closed() => return None,
                    Ok(delta) if delta.text.is_empty() => continue,
                    Ok(delta) => return Some((Ok(delta.text), translator)),
                    Err(e) => return Some((Err(e), translator)),
                }
            }
        }))
    }

    fn fail(&mut self, error: CompletionError) -> CompletionError {
        self.closed = true;
        self.errored = true;
        error
    }

    fn advance_to(&mut self, text: String) -> Delta {
        let length = text.chars().count();
        if length <= self.read_position {
            return Delta::open(String::new());
        }

        let delta: String = text.chars().skip(self.read_position).collect();
        self.read_position = length;
        self.accumulated = text;
        Delta::open(delta)
    }

    fn append(&mut self, text: String) -> Delta {
        if text.is_empty() {
            return Delta::open(String::new());
        }
        self.read_position += text.chars().count();
        self.accumulated.push_str(&text);
        Delta::open(text)
    }
}
