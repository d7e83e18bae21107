// src/engine/control.rs

//! Cooperative control channel.
//!
//! OS signals and the wakeup timer never touch scheduler state directly;
//! background tasks turn them into [`ControlMessage`]s, and the scheduler
//! looks at the channel between input ids and between passes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Finish the current input id, then shut down gracefully.
    Terminate,
    /// Re-read the rules before the next pass.
    ReloadRules,
    /// The slow cadence interval elapsed.
    WakeUp,
}

/// Create a control channel. The sender side is cloned into signal
/// forwarders, timers, and tests.
pub fn control_channel() -> (mpsc::Sender<ControlMessage>, ControlChannel) {
    let (tx, rx) = mpsc::channel(64);
    (tx, ControlChannel::new(rx))
}

/// Receiving side of the control channel plus the flags it has latched.
#[derive(Debug)]
pub struct ControlChannel {
    rx: mpsc::Receiver<ControlMessage>,
    terminations: u32,
    reload: bool,
    wakeup: bool,
    closed: bool,
}

impl ControlChannel {
    pub fn new(rx: mpsc::Receiver<ControlMessage>) -> Self {
        Self {
            rx,
            terminations: 0,
            reload: false,
            wakeup: false,
            closed: false,
        }
    }

    fn record(&mut self, msg: ControlMessage) {
        debug!(?msg, "control message received");
        match msg {
            ControlMessage::Terminate => {
                self.terminations += 1;
                if self.terminations == 1 {
                    info!("termination requested; finishing current work");
                } else {
                    warn!(count = self.terminations, "termination requested again");
                }
            }
            ControlMessage::ReloadRules => self.reload = true,
            ControlMessage::WakeUp => self.wakeup = true,
        }
    }

    /// Latch every message already queued, without waiting.
    pub fn poll(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => self.record(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminations > 0
    }

    /// How many Terminate messages have arrived so far.
    pub fn terminations(&self) -> u32 {
        self.terminations
    }

    /// Consume a pending reload request.
    pub fn take_reload(&mut self) -> bool {
        std::mem::take(&mut self.reload)
    }

    /// Consume a pending wakeup tick.
    pub fn take_wakeup(&mut self) -> bool {
        std::mem::take(&mut self.wakeup)
    }

    /// Sleep for `duration`, waking early if Terminate or ReloadRules
    /// arrives. Returns `true` if the sleep was cut short.
    ///
    /// WakeUp messages are latched but do not end the sleep.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            if self.closed {
                (&mut deadline).await;
                return false;
            }

            tokio::select! {
                _ = &mut deadline => return false,
                msg = self.rx.recv() => match msg {
                    Some(msg) => {
                        self.record(msg);
                        if matches!(msg, ControlMessage::Terminate | ControlMessage::ReloadRules) {
                            return true;
                        }
                    }
                    None => {
                        debug!("control channel closed");
                        self.closed = true;
                    }
                },
            }
        }
    }
}

/// Forward Ctrl-C (and on unix SIGTERM / SIGHUP) into the control channel.
pub fn spawn_signal_forwarders(tx: mpsc::Sender<ControlMessage>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
                info!("received Ctrl+C");
                if tx.send(ControlMessage::Terminate).await.is_err() {
                    return;
                }
            }
        }));
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;

        handles.push(spawn_unix_forwarder(
            SignalKind::terminate(),
            "SIGTERM",
            ControlMessage::Terminate,
            tx.clone(),
        ));
        handles.push(spawn_unix_forwarder(
            SignalKind::hangup(),
            "SIGHUP",
            ControlMessage::ReloadRules,
            tx,
        ));
    }

    handles
}

#[cfg(unix)]
fn spawn_unix_forwarder(
    kind: tokio::signal::unix::SignalKind,
    name: &'static str,
    msg: ControlMessage,
    tx: mpsc::Sender<ControlMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match tokio::signal::unix::signal(kind) {
            Ok(s) => s,
            Err(e) => {
                warn!(signal = name, error = %e, "failed to install signal handler");
                return;
            }
        };
        while stream.recv().await.is_some() {
            info!(signal = name, "received signal");
            if tx.send(msg).await.is_err() {
                return;
            }
        }
    })
}

/// Send `WakeUp` every `period`. A full channel just drops the tick; the
/// scheduler only needs to know that at least one is due.
pub fn spawn_wakeup_timer(tx: mpsc::Sender<ControlMessage>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            match tx.try_send(ControlMessage::WakeUp) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => return,
            }
        }
    })
}
