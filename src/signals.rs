//! Signal-driven lifecycle.
//!
//! A single process-wide task listens for the five lifecycle signals and
//! fans each one out to every live connection's flags and latch, the async
//! analogue of every walsender process receiving the same OS signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

/// One reason a connection's streaming loop should act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// HUP: reload configuration.
    Reload,
    /// TERM: graceful shutdown, stop after the current flush.
    Shutdown,
    /// USR1: generic wake, e.g. new WAL available.
    Wake,
    /// USR2: final-flush mode, drain to caught-up then exit.
    ReadyToStop,
    /// QUIT: emergency shutdown, exit immediately without cleanup.
    QuickDie,
}

/// Per-connection flag cells a `SignalEvent` is translated into, read by the
/// streaming loop. Kept separate from the broadcast channel so a connection
/// that is blocked on I/O rather than `select!` still observes the flags the
/// next time it checks.
#[derive(Default)]
pub struct SignalFlags {
    pub got_reload: AtomicBool,
    pub shutdown_requested: AtomicBool,
    pub ready_to_stop: AtomicBool,
}

impl SignalFlags {
    pub fn apply(&self, event: SignalEvent) {
        match event {
            SignalEvent::Reload => self.got_reload.store(true, Ordering::SeqCst),
            SignalEvent::Shutdown => self.shutdown_requested.store(true, Ordering::SeqCst),
            SignalEvent::ReadyToStop => self.ready_to_stop.store(true, Ordering::SeqCst),
            SignalEvent::Wake | SignalEvent::QuickDie => {}
        }
    }
}

/// Spawns the signal-forwarding task. Returns a `broadcast::Sender` that new
/// connections subscribe to; dropping all receivers is harmless, the task
/// keeps running for the process lifetime.
pub fn spawn_signal_forwarder() -> broadcast::Sender<SignalEvent> {
    let (tx, _rx) = broadcast::channel(32);
    let tx2 = tx.clone();

    tokio::spawn(async move {
        let mut hup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut term =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut usr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
        let mut usr2 = signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

        loop {
            let event = tokio::select! {
                biased;
                _ = quit.recv() => SignalEvent::QuickDie,
                _ = term.recv() => SignalEvent::Shutdown,
                _ = usr2.recv() => SignalEvent::ReadyToStop,
                _ = hup.recv() => SignalEvent::Reload,
                _ = usr1.recv() => SignalEvent::Wake,
            };

            tracing::debug!(?event, "forwarding signal to all senders");

            if event == SignalEvent::QuickDie {
                tracing::error!("emergency shutdown signal received, exiting without cleanup");
                std::process::exit(2);
            }

            // No receivers just means no connections are currently live.
            let _ = tx2.send(event);
        }
    });

    tx
}

/// Drains pending broadcast events for one connection into its flags, and
/// pokes its latch on `Wake` or `ReadyToStop`/`Shutdown` so a sleeping
/// streaming loop re-checks promptly.
pub async fn drain_into(
    rx: &mut broadcast::Receiver<SignalEvent>,
    flags: &SignalFlags,
    latch: &tokio::sync::Notify,
) {
    loop {
        match rx.try_recv() {
            Ok(event) => {
                flags.apply(event);
                latch.notify_one();
            }
            Err(broadcast::error::TryRecvError::Empty) => break,
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Closed) => break,
        }
    }
}

pub fn new_flags() -> Arc<SignalFlags> {
    Arc::new(SignalFlags::default())
}
