//! Backend readiness detection
//!
//! The backend has no handshake; it is considered up once its log output
//! contains a known banner. The string matching lives behind
//! [`OutputClassifier`] so a structured health check can replace it without
//! touching the supervisor's state machine.
//!
//! [`ReadinessTracker`] turns a stream of [`ProcessEvent`]s into at most one
//! [`Resolution`]; everything after the first resolution is ignored.

use crate::config::{ReadinessSettings, OUTPUT_BUFFER_LIMIT, PORT_CONFLICT_MARKERS, READY_MARKERS};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    PortConflict,
}

/// Verdict on the output seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputClass {
    Ready,
    FatalError(FatalKind),
    Unknown,
}

pub trait OutputClassifier: Send + Sync {
    /// Classify the accumulated text of one output stream.
    fn classify(&self, stream: OutputStream, text: &str) -> OutputClass;
}

/// Substring matching against the Flask/werkzeug startup banner.
///
/// Fatal markers only count on stderr. Ready markers count on both streams:
/// Flask prints "Serving Flask app" on stdout while werkzeug logs
/// "Running on" to stderr.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    ready: Vec<String>,
    fatal: Vec<String>,
}

impl MarkerClassifier {
    pub fn new<R, F>(ready: R, fatal: F) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            ready: non_empty(ready),
            fatal: non_empty(fatal),
        }
    }

    pub fn from_settings(settings: &ReadinessSettings) -> Self {
        Self::new(
            settings.ready_markers.iter().cloned(),
            settings.fatal_markers.iter().cloned(),
        )
    }
}

fn non_empty<I>(markers: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    markers
        .into_iter()
        .map(Into::<String>::into)
        .filter(|m| !m.is_empty())
        .collect()
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new(READY_MARKERS.iter().copied(), PORT_CONFLICT_MARKERS.iter().copied())
    }
}

impl OutputClassifier for MarkerClassifier {
    fn classify(&self, stream: OutputStream, text: &str) -> OutputClass {
        if stream == OutputStream::Stderr && self.fatal.iter().any(|m| text.contains(m.as_str())) {
            return OutputClass::FatalError(FatalKind::PortConflict);
        }
        if self.ready.iter().any(|m| text.contains(m.as_str())) {
            return OutputClass::Ready;
        }
        OutputClass::Unknown
    }
}

/// Bounded accumulation of one stream's text.
///
/// Markers split across read chunks are still found; when the limit is
/// exceeded the oldest text is dropped.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    text: String,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, chunk: &str) -> &str {
        self.text.push_str(chunk);
        if self.text.len() > self.limit {
            let mut cut = self.text.len() - self.limit;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
        &self.text
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Discrete notifications from a supervised child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output { stream: OutputStream, text: String },
    Exited { code: Option<i32> },
    TimedOut,
}

/// How the wait for readiness ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready,
    Fatal { kind: FatalKind, detail: String },
    Exited { code: Option<i32> },
    TimedOut,
}

/// Single-resolution readiness state.
pub struct ReadinessTracker {
    classifier: Arc<dyn OutputClassifier>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    resolved: bool,
}

impl ReadinessTracker {
    pub fn new(classifier: Arc<dyn OutputClassifier>, buffer_limit: usize) -> Self {
        Self {
            classifier,
            stdout: OutputBuffer::new(buffer_limit),
            stderr: OutputBuffer::new(buffer_limit),
            resolved: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Feed one event; returns the resolution the first time there is one.
    pub fn observe(&mut self, event: &ProcessEvent) -> Option<Resolution> {
        if self.resolved {
            return None;
        }

        let resolution = match event {
            ProcessEvent::Output { stream, text } => {
                let buffer = match stream {
                    OutputStream::Stdout => &mut self.stdout,
                    OutputStream::Stderr => &mut self.stderr,
                };
                let accumulated = buffer.push(text);
                match self.classifier.classify(*stream, accumulated) {
                    OutputClass::Ready => Some(Resolution::Ready),
                    OutputClass::FatalError(kind) => Some(Resolution::Fatal {
                        kind,
                        detail: text.trim().to_string(),
                    }),
                    OutputClass::Unknown => None,
                }
            }
            ProcessEvent::Exited { code } => Some(Resolution::Exited { code: *code }),
            ProcessEvent::TimedOut => Some(Resolution::TimedOut),
        };

        if resolution.is_some() {
            self.resolved = true;
        }
        resolution
    }
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new(Arc::new(MarkerClassifier::default()), OUTPUT_BUFFER_LIMIT)
    }
}
