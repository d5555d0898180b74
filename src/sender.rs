//! The per-connection state machine: entry sequence, streaming loop,
//! and the three shutdown modes. Modeled on `checkpointer.rs`'s
//! `tokio::select! { biased; ... }` worker loop.

use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Poll;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::broadcast;

use crate::collaborators::{BaseBackupSender, Supervisor, WalSource};
use crate::config::{Config, ConfigSource};
use crate::error::{Error, Result};
use crate::framer::{Framer, FrameOutcome};
use crate::handshake::{self, HandshakeOutcome};
use crate::pos::LogPosition;
use crate::proto::{self, TAG_TERMINATE};
use crate::signals::{self, SignalEvent, SignalFlags};
use crate::slots::{SenderState, Slot, SlotTable};

/// Drives one client connection end to end: handshake, then streaming until
/// shutdown or disconnect. `owner_id` identifies this connection in the slot
/// table and stats snapshot.
#[tracing::instrument(skip_all, fields(owner_id))]
pub async fn run_connection<T, W, S, B>(
    transport: &mut T,
    owner_id: u64,
    slot_table: &SlotTable,
    wal: Arc<W>,
    supervisor: &S,
    backup: &B,
    config_source: &dyn ConfigSource,
    mut signal_rx: broadcast::Receiver<SignalEvent>,
    now_micros: impl Fn() -> i64,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    W: WalSource,
    S: Supervisor,
    B: BaseBackupSender,
{
    if supervisor.is_recovery_in_progress() {
        return Err(Error::CannotConnectNow);
    }

    let slot = slot_table.acquire(owner_id)?;
    let flags = signals::new_flags();
    let result = run_connection_inner(
        transport,
        slot,
        &flags,
        wal,
        supervisor,
        backup,
        config_source,
        &mut signal_rx,
        now_micros,
    )
    .await;
    slot_table.release(slot);
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_inner<T, W, S, B>(
    transport: &mut T,
    slot: &Slot,
    flags: &SignalFlags,
    wal: Arc<W>,
    supervisor: &S,
    backup: &B,
    config_source: &dyn ConfigSource,
    signal_rx: &mut broadcast::Receiver<SignalEvent>,
    now_micros: impl Fn() -> i64,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    W: WalSource,
    S: Supervisor,
    B: BaseBackupSender,
{
    proto::write_ready_for_query(transport).await?;

    let outcome = handshake::run(transport, wal.as_ref(), supervisor, backup, config_source, &flags.got_reload)
        .await?;

    let start_point = match outcome {
        HandshakeOutcome::Closed => return Ok(()),
        HandshakeOutcome::StartReplication(pos) => pos,
    };

    if !wal.retains_wal_for_replication() {
        return Err(Error::CannotConnectNow);
    }

    supervisor.mark_as_sender();

    proto::write_copy_both_response(transport).await?;
    let mut sent_pos = start_point;
    slot.set_sent_pos(sent_pos);
    tracing::info!(%start_point, "streaming started");

    let mut framer = Framer::new(wal, &config_source.current());

    loop {
        if !supervisor.is_alive() {
            return Err(Error::SupervisorGone);
        }

        signals::drain_into(signal_rx, flags, &slot.latch).await;

        if flags.got_reload.swap(false, Ordering::SeqCst) {
            config_source.reload();
        }

        let config = config_source.current();

        if flags.ready_to_stop.load(Ordering::SeqCst) {
            match send_one_frame(&mut framer, transport, &mut sent_pos, &config, &now_micros).await? {
                Some(true) => flags.shutdown_requested.store(true, Ordering::SeqCst),
                Some(false) => {}
                None => break,
            }
        }

        if flags.shutdown_requested.load(Ordering::SeqCst) {
            proto::write_message(transport, crate::proto::TAG_COMMAND_COMPLETE, b"COPY 0\0").await?;
            transport.flush().await?;
            tracing::info!("graceful shutdown complete");
            return Ok(());
        }

        let caught_up_now = match send_one_frame(&mut framer, transport, &mut sent_pos, &config, &now_micros).await? {
            Some(caught_up) => caught_up,
            None => break,
        };

        slot.set_sent_pos(sent_pos);
        slot.set_state(if caught_up_now {
            SenderState::Streaming
        } else {
            SenderState::Catchup
        });

        if caught_up_now
            && !flags.shutdown_requested.load(Ordering::SeqCst)
            && !flags.ready_to_stop.load(Ordering::SeqCst)
        {
            if !probe_client_close(transport).await? {
                return Ok(());
            }

            wait_for_wake(signal_rx, flags, &slot.latch, config.nap_delay_ms).await;
        }
    }

    tracing::info!("transport closed, ending sender silently");
    Ok(())
}

/// Blocks until new WAL may be available (latch), a lifecycle signal
/// arrives, or `nap_delay_ms` elapses, whichever comes first. Signal events
/// observed here are applied to `flags` immediately so a `TERM`/`USR2` that
/// arrives mid-wait is not missed until the next unrelated wakeup.
#[tracing::instrument(skip_all, fields(nap_delay_ms))]
async fn wait_for_wake(
    signal_rx: &mut broadcast::Receiver<SignalEvent>,
    flags: &SignalFlags,
    latch: &tokio::sync::Notify,
    nap_delay_ms: u64,
) {
    tokio::select! {
        _ = latch.notified() => {}
        event = signal_rx.recv() => {
            if let Ok(event) = event {
                flags.apply(event);
                latch.notify_one();
            }
        }
        _ = tokio::time::sleep(std::time::Duration::from_millis(nap_delay_ms)) => {}
    }
}

/// Sends one frame if there is anything to send. `Some(caught_up)` on
/// success, `None` if the transport closed.
async fn send_one_frame<T, W>(
    framer: &mut Framer<W>,
    transport: &mut T,
    sent_pos: &mut LogPosition,
    config: &Config,
    now_micros: &impl Fn() -> i64,
) -> Result<Option<bool>>
where
    T: AsyncWrite + Unpin,
    W: WalSource,
{
    match framer
        .build_and_send(transport, sent_pos, config, || now_micros())
        .await
    {
        Ok(FrameOutcome::NoFrame) => Ok(Some(true)),
        Ok(FrameOutcome::Sent { caught_up, .. }) => Ok(Some(caught_up)),
        Err(Error::TransportClosed) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Non-blocking probe for a client-initiated close while idling: polls the
/// transport exactly once and never waits. Returns `true` if the connection
/// should keep going (nothing pending), `false` if it should end (terminate
/// message or EOF).
async fn probe_client_close<T: AsyncRead + Unpin>(transport: &mut T) -> Result<bool> {
    let mut byte = [0u8; 1];
    let poll_result = std::future::poll_fn(|cx| {
        let mut buf = ReadBuf::new(&mut byte);
        Poll::Ready(Pin::new(&mut *transport).poll_read(cx, &mut buf).map(|r| r.map(|_| buf.filled().len())))
    })
    .await;

    match poll_result {
        Poll::Pending => Ok(true),
        Poll::Ready(Ok(0)) => Ok(false),
        Poll::Ready(Ok(_)) if byte[0] == TAG_TERMINATE => Ok(false),
        Poll::Ready(Ok(_)) => Err(Error::ProtocolViolation(
            "unexpected byte from client while idling".into(),
        )),
        Poll::Ready(Err(e)) => Err(Error::Io(e)),
    }
}
