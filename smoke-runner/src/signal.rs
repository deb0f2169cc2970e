// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals in smoke.
//!
//! An [`InterruptController`] is created once per run and shared by everything that needs to
//! notice an interrupt: jobs stop starting tests, running tests have their processes stopped, and
//! the driver writes a report. The controller can be triggered by a signal (through
//! [`InterruptController::install`]) or directly, which is what tests do.

use crate::errors::SignalHandlerSetupError;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{runtime::Handle, sync::watch, task::JoinHandle};
use tracing::{info, warn};

/// The kind of signal handling to set up for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// The standard signal handler. Capture interrupt and termination signals depending on the
    /// platform.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => SignalHandler::new(),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// The signal handler implementation.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    signals: Option<imp::Signals>,
}

impl SignalHandler {
    /// Creates a new `SignalHandler` that handles Ctrl-C and other signals.
    #[cfg(any(unix, windows))]
    pub(crate) fn new() -> Result<Self, SignalHandlerSetupError> {
        let signals = imp::Signals::new()?;
        Ok(Self {
            signals: Some(signals),
        })
    }

    /// Creates a new `SignalHandler` that does nothing.
    pub(crate) fn noop() -> Self {
        Self { signals: None }
    }

    pub(crate) async fn recv(&mut self) -> Option<ShutdownEvent> {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => None,
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    /// Signals for SIGINT, SIGTERM, SIGHUP and SIGUSR1 on Unix.
    #[derive(Debug)]
    pub(super) struct Signals {
        sigint: SignalWithDone,
        sighup: SignalWithDone,
        sigterm: SignalWithDone,
        sigusr1: SignalWithDone,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let sigint = SignalWithDone::new(SignalKind::interrupt())?;
            let sighup = SignalWithDone::new(SignalKind::hangup())?;
            let sigterm = SignalWithDone::new(SignalKind::terminate())?;
            let sigusr1 = SignalWithDone::new(SignalKind::user_defined1())?;

            Ok(Self {
                sigint,
                sighup,
                sigterm,
                sigusr1,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            loop {
                tokio::select! {
                    recv = self.sigint.signal.recv(), if !self.sigint.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Interrupt),
                            None => self.sigint.done = true,
                        }
                    }
                    recv = self.sighup.signal.recv(), if !self.sighup.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Hangup),
                            None => self.sighup.done = true,
                        }
                    }
                    recv = self.sigterm.signal.recv(), if !self.sigterm.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Term),
                            None => self.sigterm.done = true,
                        }
                    }
                    recv = self.sigusr1.signal.recv(), if !self.sigusr1.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Timeout),
                            None => self.sigusr1.done = true,
                        }
                    }
                    else => {
                        break None
                    }
                }
            }
        }
    }

    #[derive(Debug)]
    struct SignalWithDone {
        signal: Signal,
        done: bool,
    }

    impl SignalWithDone {
        fn new(kind: SignalKind) -> std::io::Result<Self> {
            let signal = signal(kind)?;
            Ok(Self {
                signal,
                done: false,
            })
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
        ctrl_c_done: bool,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let ctrl_c = ctrl_c()?;
            Ok(Self {
                ctrl_c,
                ctrl_c_done: false,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            if self.ctrl_c_done {
                return None;
            }

            match self.ctrl_c.recv().await {
                Some(()) => Some(ShutdownEvent::Interrupt),
                None => {
                    self.ctrl_c_done = true;
                    None
                }
            }
        }
    }
}

/// An event that causes the run to shut down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownEvent {
    /// SIGHUP.
    #[cfg(unix)]
    Hangup,

    /// SIGTERM.
    #[cfg(unix)]
    Term,

    /// SIGUSR1, sent by CI systems shortly before they time out a task.
    #[cfg(unix)]
    Timeout,

    /// SIGINT or Ctrl-C.
    Interrupt,
}

impl fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Hangup => write!(f, "SIGHUP"),
            #[cfg(unix)]
            Self::Term => write!(f, "SIGTERM"),
            #[cfg(unix)]
            Self::Timeout => write!(f, "timeout signal"),
            Self::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Process-wide interrupt state, shared by everything in a run.
///
/// Cloning an `InterruptController` is cheap and every clone refers to the same state. The first
/// event wins: later calls to [`interrupt`](Self::interrupt) don't change the recorded event.
#[derive(Clone, Debug)]
pub struct InterruptController {
    inner: Arc<InterruptInner>,
}

#[derive(Debug)]
struct InterruptInner {
    interrupted: AtomicBool,
    sender: watch::Sender<Option<ShutdownEvent>>,
}

impl InterruptController {
    /// Creates a new controller in the non-interrupted state.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            inner: Arc::new(InterruptInner {
                interrupted: AtomicBool::new(false),
                sender,
            }),
        }
    }

    /// Marks the run as interrupted. Returns true if this was the first interrupt.
    pub fn interrupt(&self, event: ShutdownEvent) -> bool {
        let first = !self.inner.interrupted.swap(true, Ordering::SeqCst);
        if first {
            self.inner.sender.send_replace(Some(event));
        }
        first
    }

    /// Returns true if the run has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Returns the event that interrupted the run, if any.
    pub fn event(&self) -> Option<ShutdownEvent> {
        *self.inner.sender.borrow()
    }

    /// Returns a receiver that can be awaited until the run is interrupted.
    pub fn subscribe(&self) -> InterruptReceiver {
        InterruptReceiver {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Starts listening for signals on `handle`.
    ///
    /// On every signal, the controller is marked interrupted and `on_interrupt` is called with
    /// the event. Listening stops when the returned [`SignalListener`] is dropped.
    pub fn install<F>(
        &self,
        kind: SignalHandlerKind,
        handle: &Handle,
        on_interrupt: F,
    ) -> Result<SignalListener, SignalHandlerSetupError>
    where
        F: Fn(ShutdownEvent) + Send + Sync + 'static,
    {
        // Signal streams register with the reactor of the current runtime.
        let _guard = handle.enter();
        let mut handler = kind.build()?;
        let controller = self.clone();
        let task = handle.spawn(async move {
            while let Some(event) = handler.recv().await {
                match event {
                    #[cfg(unix)]
                    ShutdownEvent::Timeout => {
                        warn!(target: "smoke::signal", "dumping report due to timeout signal");
                    }
                    other => {
                        info!(target: "smoke::signal", "received {other}, stopping tests");
                    }
                }
                controller.interrupt(event);
                on_interrupt(event);
            }
        });
        Ok(SignalListener { task })
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for an [`InterruptController`] to be interrupted.
#[derive(Clone, Debug)]
pub struct InterruptReceiver {
    receiver: watch::Receiver<Option<ShutdownEvent>>,
}

impl InterruptReceiver {
    /// Returns true if the run has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Resolves once the run is interrupted, returning the event. Resolves immediately if it
    /// already has been.
    pub async fn interrupted(&mut self) -> ShutdownEvent {
        let event = self
            .receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|event| *event);
        match event {
            Some(event) => event,
            // The controller was dropped without ever being interrupted.
            None => std::future::pending().await,
        }
    }
}

/// Listens for signals until dropped.
#[derive(Debug)]
pub struct SignalListener {
    task: JoinHandle<()>,
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
