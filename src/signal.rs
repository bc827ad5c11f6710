//! Shutdown triggers
//!
//! Everything that ends the shell funnels into one [`ShutdownListener`]: OS
//! signals plus in-process requests (window closed, quit) sent through a
//! [`ShutdownHandle`]. The shell host passes a handle to the UI launcher,
//! which sends those requests when it owns the window.

use std::io;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM, Ctrl-Break or console close
    Terminate,
    /// SIGHUP, the controlling terminal went away
    Hangup,
    /// The last UI window was closed
    WindowClosed,
    /// Explicit quit request from the UI host
    QuitRequested,
}

impl ShutdownTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownTrigger::Interrupt => "interrupt",
            ShutdownTrigger::Terminate => "terminate",
            ShutdownTrigger::Hangup => "hangup",
            ShutdownTrigger::WindowClosed => "window_closed",
            ShutdownTrigger::QuitRequested => "quit_requested",
        }
    }
}

/// Cloneable sender for in-process shutdown requests.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<ShutdownTrigger>,
}

impl ShutdownHandle {
    /// Returns false once the listener is gone.
    pub fn trigger(&self, trigger: ShutdownTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }

    pub fn window_closed(&self) -> bool {
        self.trigger(ShutdownTrigger::WindowClosed)
    }

    pub fn quit(&self) -> bool {
        self.trigger(ShutdownTrigger::QuitRequested)
    }
}

pub struct ShutdownListener {
    tx: mpsc::UnboundedSender<ShutdownTrigger>,
    rx: mpsc::UnboundedReceiver<ShutdownTrigger>,
    os: Option<OsSignals>,
}

impl ShutdownListener {
    /// Listener fed only through [`ShutdownHandle`]s.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx, os: None }
    }

    /// Listener that also reacts to process signals.
    pub fn with_os_signals() -> io::Result<Self> {
        let mut listener = Self::new();
        listener.os = Some(OsSignals::install()?);
        Ok(listener)
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the next trigger.
    pub async fn recv(&mut self) -> ShutdownTrigger {
        match &mut self.os {
            Some(os) => tokio::select! {
                trigger = os.recv() => trigger,
                Some(trigger) = self.rx.recv() => trigger,
            },
            // the listener owns a sender, so the channel never closes
            None => self
                .rx
                .recv()
                .await
                .unwrap_or(ShutdownTrigger::QuitRequested),
        }
    }
}

impl Default for ShutdownListener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
struct OsSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> ShutdownTrigger {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownTrigger::Interrupt,
            _ = self.terminate.recv() => ShutdownTrigger::Terminate,
            _ = self.hangup.recv() => ShutdownTrigger::Hangup,
        }
    }
}

#[cfg(windows)]
struct OsSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_break: tokio::signal::windows::CtrlBreak,
    ctrl_close: tokio::signal::windows::CtrlClose,
}

#[cfg(windows)]
impl OsSignals {
    fn install() -> io::Result<Self> {
        use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close};

        Ok(Self {
            ctrl_c: ctrl_c()?,
            ctrl_break: ctrl_break()?,
            ctrl_close: ctrl_close()?,
        })
    }

    async fn recv(&mut self) -> ShutdownTrigger {
        tokio::select! {
            _ = self.ctrl_c.recv() => ShutdownTrigger::Interrupt,
            _ = self.ctrl_break.recv() => ShutdownTrigger::Terminate,
            _ = self.ctrl_close.recv() => ShutdownTrigger::Terminate,
        }
    }
}
