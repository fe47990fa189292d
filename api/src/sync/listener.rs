//! Background reading for when no exchange is running.
//!
//! While the device is idle the link is handed to a [`DisconnectListener`].
//! It owns the transport, so nothing else can read from it until
//! [`DisconnectListener::stop`] gives it back.

use super::READY_TO_REBOOT;
use crate::{parsing::frame, transport::Transport};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Why the listener task ended.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, IsVariant)]
pub enum ListenerExit {
    /// It was asked to stop. The transport is still open.
    #[display("stopped")]
    Stopped,
    /// The device announced a reboot. The transport was closed.
    #[display("device announced a reboot")]
    RebootAnnounced,
    /// The stream ended or failed. The transport was closed.
    #[display("device disconnected")]
    LinkDropped,
}

/// Error when the listener task could not be joined.
#[derive(Debug, Display, From, Error)]
#[display("disconnect listener task failed: {_0}")]
pub struct StopListenerError(JoinError);

/// Handle to a task that owns a transport and watches it for the device
/// going away.
#[derive(Debug)]
pub struct DisconnectListener<T> {
    token: CancellationToken,
    task: JoinHandle<(T, ListenerExit)>,
}

impl<T> DisconnectListener<T>
where
    T: Transport + 'static,
{
    /// Moves `transport` into a new listener task.
    pub fn spawn(transport: T) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(listen(transport, token.clone()));

        debug!("disconnect listener started");

        Self { token, task }
    }

    /// Returns `true` once the task has ended on its own or been stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the task and hands back the transport with the reason it ended.
    ///
    /// If the task already ended on its own, its reason is returned and the
    /// transport is closed.
    pub async fn stop(self) -> Result<(T, ListenerExit), StopListenerError> {
        self.token.cancel();

        let (transport, exit) = self.task.await?;

        debug!(%exit, "disconnect listener finished");

        Ok((transport, exit))
    }
}

async fn listen<T: Transport>(mut transport: T, token: CancellationToken) -> (T, ListenerExit) {
    let mut buffer = String::new();

    let exit = loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => break ListenerExit::Stopped,
            chunk = transport.read_chunk() => chunk,
        };

        match chunk {
            Ok(chunk) if chunk.is_empty() => break ListenerExit::LinkDropped,
            Ok(chunk) => {
                debug!(%chunk, "chunk while idle");

                buffer.push_str(&chunk);

                if frame::contains_sentinel(&buffer, READY_TO_REBOOT) {
                    break ListenerExit::RebootAnnounced;
                }
            }
            Err(err) => {
                debug!("listener read failed: {err}");

                break ListenerExit::LinkDropped;
            }
        }
    };

    if !exit.is_stopped() {
        info!(%exit, "closing serial link");
        transport.close().await;
    }

    (transport, exit)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::testing::{ScriptedTransport, Step};

    #[tokio::test]
    async fn stopping_returns_the_open_transport() {
        let transport = ScriptedTransport::new([Step::Chunk("noise"), Step::Hang]);
        let probe = transport.recorder();

        let listener = DisconnectListener::spawn(transport);
        let (_, exit) = listener.stop().await.unwrap();

        assert_eq!(exit, ListenerExit::Stopped);
        assert_eq!(probe.close_count(), 0);
    }

    #[tokio::test]
    async fn end_of_stream_closes_the_link() {
        let transport = ScriptedTransport::new([Step::Chunk("noise"), Step::End]);
        let probe = transport.recorder();

        let listener = DisconnectListener::spawn(transport);

        while !listener.is_finished() {
            tokio::task::yield_now().await;
        }

        let (_, exit) = listener.stop().await.unwrap();

        assert_eq!(exit, ListenerExit::LinkDropped);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn read_failure_closes_the_link() {
        let transport = ScriptedTransport::new([Step::Fail]);
        let probe = transport.recorder();

        let listener = DisconnectListener::spawn(transport);

        while !listener.is_finished() {
            tokio::task::yield_now().await;
        }

        let (_, exit) = listener.stop().await.unwrap();

        assert_eq!(exit, ListenerExit::LinkDropped);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn reboot_announcement_split_across_chunks_is_seen() {
        let transport =
            ScriptedTransport::new([Step::Chunk("ready-to"), Step::Chunk("-reboot"), Step::Hang]);
        let probe = transport.recorder();

        let listener = DisconnectListener::spawn(transport);

        while !listener.is_finished() {
            tokio::task::yield_now().await;
        }

        let (_, exit) = listener.stop().await.unwrap();

        assert_eq!(exit, ListenerExit::RebootAnnounced);
        assert_eq!(probe.close_count(), 1);
    }
}
