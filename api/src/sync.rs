//! The two exchanges the firmware supports over the serial link.
//!
//! Loading writes `get\n` and collects text until `end-json` shows up; what
//! came before the marker is the configuration. Uploading writes the compact
//! configuration on one line and collects text until `ready-to-reboot` shows
//! up, at which point the device restarts and the port is closed.

pub mod listener;

use crate::{
    parsing::frame::{self, ParseFrameError},
    schema::device_config::{Configuration, SerializeConfigurationError},
    transport::{Transport, TransportError},
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;

/// Command asking the firmware for its configuration.
pub const GET_COMMAND: &str = "get\n";
/// Marker ending the configuration sent in answer to [`GET_COMMAND`].
pub const END_JSON: &str = "end-json";
/// Marker the firmware sends before restarting with an uploaded
/// configuration.
pub const READY_TO_REBOOT: &str = "ready-to-reboot";

/// Tunables for [`SyncProtocol`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    /// How long a load may take, measured from the moment `get` was sent.
    pub load_timeout: Duration,
    /// How long to wait for the device to acknowledge an upload. `None`
    /// waits until the device answers or goes away.
    pub upload_timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(10),
            upload_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Where a load exchange currently is.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing sent yet.
    #[display("idle")]
    Idle,
    /// Sending the `get` command.
    #[display("requesting")]
    Requesting,
    /// Collecting chunks until the end marker.
    #[display("accumulating")]
    Accumulating,
    /// The document arrived and was parsed.
    #[display("parsed")]
    Parsed,
    /// The deadline passed first.
    #[display("timed out")]
    TimedOut,
    /// The document arrived but did not parse.
    #[display("parse failed")]
    ParseFailed,
}

/// Where an upload exchange currently is.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing sent yet.
    #[display("idle")]
    Idle,
    /// Writing the configuration.
    #[display("sending")]
    Sending,
    /// Waiting for the reboot marker.
    #[display("awaiting acknowledgement")]
    AwaitingAck,
    /// The device announced its reboot.
    #[display("rebooted")]
    Rebooted,
    /// The link went away before the announcement.
    #[display("interrupted")]
    Interrupted,
}

/// Error returned by [`SyncProtocol::load`].
#[derive(Debug, Display, Error)]
pub enum LoadError {
    /// The link failed while sending the request or waiting for the answer.
    #[display("{_0}")]
    Transport(TransportError),
    /// The end marker did not arrive in time.
    #[display(
        "timed out after {}ms waiting for response from device",
        elapsed.as_millis()
    )]
    Timeout {
        /// Time since the request was sent.
        #[error(not(source))]
        elapsed: Duration,
    },
    /// The data before the end marker is not a valid document.
    #[display("failed to parse JSON from device: {source}")]
    Parse {
        /// The text that failed to parse, kept for diagnostics.
        raw: String,
        /// What was wrong with it.
        source: serde_json::Error,
    },
    /// The frame parser gave up on the buffer.
    #[display("{_0}")]
    Frame(ParseFrameError),
}

/// Error returned by [`SyncProtocol::upload`].
#[derive(Debug, Display, Error)]
pub enum UploadError {
    /// The editable text is not a valid configuration. Nothing was sent.
    #[display("invalid configuration JSON: {_0}")]
    InvalidConfigJson(serde_json::Error),
    /// The configuration could not be re-serialized. Nothing was sent.
    #[display("{_0}")]
    Serializing(SerializeConfigurationError),
    /// Sending the configuration failed.
    #[display("{_0}")]
    Transport(TransportError),
    /// The device neither acknowledged nor dropped the link in time.
    #[display("timed out waiting for the device to acknowledge the upload")]
    Timeout {
        /// Whatever the device sent before the deadline.
        response: String,
    },
    /// The wait for the acknowledgement was aborted on this side, e.g. with
    /// Ctrl-C. The device never confirmed the upload.
    #[display("upload cancelled before the device acknowledged it")]
    Cancelled {
        /// Whatever the device sent before the wait was aborted.
        response: String,
    },
}

/// How a successful upload ended.
#[derive(Debug, IsVariant)]
pub enum UploadOutcome {
    /// The device sent [`READY_TO_REBOOT`].
    Rebooted {
        /// Everything the device sent after the upload.
        response: String,
    },
    /// The device dropped the link before sending [`READY_TO_REBOOT`].
    ///
    /// The firmware restarts while applying a configuration, so this still
    /// counts as success.
    Interrupted {
        /// Everything the device sent after the upload.
        response: String,
        /// The read error that ended the exchange, if it did not simply
        /// end.
        cause: Option<TransportError>,
    },
}

/// Result of a successful upload.
#[derive(Debug)]
pub struct UploadReport {
    /// The configuration that was sent.
    pub configuration: Configuration,
    /// How the exchange ended.
    pub outcome: UploadOutcome,
}

/// Drives the load and upload exchanges over a borrowed [`Transport`].
///
/// The protocol never keeps the transport or a configuration around between
/// calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncProtocol {
    options: SyncOptions,
}

impl SyncProtocol {
    /// Creates a protocol driver.
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    /// The options this driver runs with.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Requests the device configuration.
    pub async fn load<T: Transport>(&self, transport: &mut T) -> Result<Configuration, LoadError> {
        self.load_document(transport).await
    }

    /// Requests the device configuration and parses it as `D`.
    pub async fn load_document<D, T>(&self, transport: &mut T) -> Result<D, LoadError>
    where
        D: DeserializeOwned,
        T: Transport,
    {
        let mut state = LoadState::Idle;

        advance(&mut state, LoadState::Requesting);

        transport
            .write_text(GET_COMMAND)
            .await
            .map_err(LoadError::Transport)?;

        let started = Instant::now();
        let deadline = started + self.options.load_timeout;
        let mut buffer = String::new();

        advance(&mut state, LoadState::Accumulating);

        loop {
            if Instant::now() >= deadline {
                advance(&mut state, LoadState::TimedOut);

                return Err(LoadError::Timeout {
                    elapsed: started.elapsed(),
                });
            }

            let chunk = match tokio::time::timeout_at(deadline, transport.read_chunk()).await {
                Ok(chunk) => chunk.map_err(LoadError::Transport)?,
                // the deadline check above reports it
                Err(_) => continue,
            };

            if chunk.is_empty() {
                continue;
            }

            debug!(%chunk, "serial chunk");

            buffer.push_str(&chunk);

            let payload = match frame::find_frame(&buffer, END_JSON) {
                Ok(frame) => frame.payload(),
                Err(ParseFrameError::Incomplete) => continue,
                Err(err) => return Err(LoadError::Frame(err)),
            };

            return match serde_json::from_str::<D>(&payload) {
                Ok(document) => {
                    advance(&mut state, LoadState::Parsed);

                    Ok(document)
                }
                Err(source) => {
                    advance(&mut state, LoadState::ParseFailed);
                    error!(raw = %payload, "raw data received before parsing failed");

                    Err(LoadError::Parse {
                        raw: payload,
                        source,
                    })
                }
            };
        }
    }

    /// Validates `editable_text` and renders its compact wire form.
    pub fn prepare_upload(editable_text: &str) -> Result<(Configuration, String), UploadError> {
        let configuration = serde_json::from_str::<Configuration>(editable_text)
            .map_err(UploadError::InvalidConfigJson)?;

        let compact = configuration
            .to_compact_json()
            .map_err(UploadError::Serializing)?;

        Ok((configuration, compact))
    }

    /// Sends `editable_text` to the device and waits for it to restart.
    ///
    /// Both successful outcomes close the transport exactly once. On error the
    /// transport is left as it was.
    pub async fn upload<T: Transport>(
        &self,
        transport: &mut T,
        editable_text: &str,
    ) -> Result<UploadReport, UploadError> {
        let mut state = UploadState::Idle;

        let (configuration, compact) = Self::prepare_upload(editable_text)?;

        advance(&mut state, UploadState::Sending);

        transport
            .write_text(&format!("{compact}\n"))
            .await
            .map_err(UploadError::Transport)?;

        advance(&mut state, UploadState::AwaitingAck);

        let deadline = self
            .options
            .upload_timeout
            .map(|timeout| Instant::now() + timeout);
        let mut response = String::new();

        let outcome = loop {
            let chunk = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, transport.read_chunk()).await {
                        Ok(chunk) => chunk,
                        Err(_) => {
                            warn!(%response, "device did not acknowledge the upload in time");

                            return Err(UploadError::Timeout { response });
                        }
                    }
                }
                None => transport.read_chunk().await,
            };

            match chunk {
                Ok(chunk) if chunk.is_empty() => {
                    break UploadOutcome::Interrupted {
                        response,
                        cause: None,
                    };
                }
                Ok(chunk) => {
                    debug!(%chunk, "upload response chunk");

                    response.push_str(&chunk);

                    if frame::contains_sentinel(&response, READY_TO_REBOOT) {
                        break UploadOutcome::Rebooted { response };
                    }
                }
                Err(TransportError::Cancelled) => {
                    warn!(%response, "upload cancelled while waiting for the device");

                    return Err(UploadError::Cancelled { response });
                }
                Err(err) => {
                    break UploadOutcome::Interrupted {
                        response,
                        cause: Some(err),
                    };
                }
            }
        };

        transport.close().await;

        match &outcome {
            UploadOutcome::Rebooted { .. } => {
                advance(&mut state, UploadState::Rebooted);
                info!("device is ready to reboot, serial port closed");
            }
            UploadOutcome::Interrupted { cause, .. } => {
                advance(&mut state, UploadState::Interrupted);
                match cause {
                    Some(err) => warn!("device rebooted during upload: {err}"),
                    None => warn!("device closed the link during upload"),
                }
            }
        }

        Ok(UploadReport {
            configuration,
            outcome,
        })
    }
}

fn advance<S: Copy + std::fmt::Display>(state: &mut S, next: S) {
    debug!(from = %state, to = %next, "sync state");

    *state = next;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        schema::device_config::{SAMPLE_JSON, sample_configuration},
        transport::testing::{ScriptedTransport, Step},
    };

    #[tokio::test]
    async fn load_requests_and_parses_the_configuration() {
        let mut transport = ScriptedTransport::new([
            Step::Chunk(&SAMPLE_JSON[..40]),
            Step::Chunk(&SAMPLE_JSON[40..]),
            Step::Chunk("\r\nend-json\r\n"),
        ]);
        let recorder = transport.recorder();

        let config = SyncProtocol::default().load(&mut transport).await.unwrap();

        assert_eq!(config, sample_configuration());
        assert_eq!(recorder.written(), vec!["get\n"]);
        assert_eq!(recorder.close_count(), 0);
    }

    #[tokio::test]
    async fn load_finds_a_marker_split_across_chunks() {
        let mut transport =
            ScriptedTransport::new([Step::Chunk("{\"a\":1}end-js"), Step::Chunk("on")]);

        let value: serde_json::Value = SyncProtocol::default()
            .load_document(&mut transport)
            .await
            .unwrap();

        assert_eq!(value, serde_json::json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn load_skips_empty_chunks() {
        let mut transport = ScriptedTransport::new([
            Step::End,
            Step::Chunk("[1,2]"),
            Step::End,
            Step::Chunk("end-json"),
        ]);

        let value: Vec<u8> = SyncProtocol::default()
            .load_document(&mut transport)
            .await
            .unwrap();

        assert_eq!(value, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn load_times_out_when_nothing_arrives() {
        let mut transport = ScriptedTransport::new([Step::Hang]);
        let started = Instant::now();

        let err = SyncProtocol::default()
            .load(&mut transport)
            .await
            .unwrap_err();

        let waited = started.elapsed();

        assert!(matches!(err, LoadError::Timeout { .. }));
        assert!(waited >= Duration::from_millis(10_000));
        assert!(waited < Duration::from_millis(11_000));
    }

    #[tokio::test(start_paused = true)]
    async fn load_times_out_when_the_marker_never_comes() {
        let mut transport =
            ScriptedTransport::new([Step::Chunk("{\"config\":"), Step::Chunk("{"), Step::Hang]);

        let err = SyncProtocol::default()
            .load(&mut transport)
            .await
            .unwrap_err();

        match err {
            LoadError::Timeout { elapsed } => assert!(elapsed >= Duration::from_secs(10)),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn load_keeps_the_raw_text_when_parsing_fails() {
        let mut transport = ScriptedTransport::new([Step::Chunk("  {\"keys\": [] \nend-json")]);

        let err = SyncProtocol::default()
            .load(&mut transport)
            .await
            .unwrap_err();

        match err {
            LoadError::Parse { raw, .. } => assert_eq!(raw, "{\"keys\": []"),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[tokio::test]
    async fn load_reports_read_failures() {
        let mut transport = ScriptedTransport::new([Step::Chunk("{"), Step::Fail]);

        let err = SyncProtocol::default()
            .load(&mut transport)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LoadError::Transport(TransportError::Reading(_))
        ));
    }

    #[tokio::test]
    async fn upload_ends_in_reboot_and_closes_once() {
        let mut transport =
            ScriptedTransport::new([Step::Chunk("ok\nready-to-reb"), Step::Chunk("oot\n")]);
        let recorder = transport.recorder();
        let pretty = sample_configuration().to_pretty_json().unwrap();

        let report = SyncProtocol::default()
            .upload(&mut transport, &pretty)
            .await
            .unwrap();

        assert!(report.outcome.is_rebooted());
        assert_eq!(report.configuration, sample_configuration());
        assert_eq!(recorder.written(), vec![format!("{SAMPLE_JSON}\n")]);
        assert_eq!(recorder.close_count(), 1);
    }

    #[tokio::test]
    async fn upload_sends_sections_it_does_not_edit() {
        let mut transport = ScriptedTransport::new([Step::Chunk("ready-to-reboot\n")]);
        let recorder = transport.recorder();
        let text = SAMPLE_JSON.replace(r#"{"config":"#, r#"{"bluetooth":{"name":"ekb"},"config":"#);

        SyncProtocol::default()
            .upload(&mut transport, &text)
            .await
            .unwrap();

        assert!(recorder.written()[0].contains(r#""bluetooth":{"name":"ekb"}"#));
    }

    #[tokio::test]
    async fn upload_counts_a_dropped_link_as_interrupted() {
        let mut transport = ScriptedTransport::new([Step::End]);
        let recorder = transport.recorder();

        let report = SyncProtocol::default()
            .upload(&mut transport, SAMPLE_JSON)
            .await
            .unwrap();

        match report.outcome {
            UploadOutcome::Interrupted { response, cause } => {
                assert_eq!(response, "");
                assert!(cause.is_none());
            }
            outcome => panic!("unexpected outcome: {outcome:?}"),
        }
        assert_eq!(recorder.close_count(), 1);
    }

    #[tokio::test]
    async fn upload_counts_a_read_error_as_interrupted() {
        let mut transport = ScriptedTransport::new([Step::Chunk("saving"), Step::Fail]);
        let recorder = transport.recorder();

        let report = SyncProtocol::default()
            .upload(&mut transport, SAMPLE_JSON)
            .await
            .unwrap();

        match report.outcome {
            UploadOutcome::Interrupted { response, cause } => {
                assert_eq!(response, "saving");
                assert!(matches!(cause, Some(TransportError::Reading(_))));
            }
            outcome => panic!("unexpected outcome: {outcome:?}"),
        }
        assert_eq!(recorder.close_count(), 1);
    }

    #[tokio::test]
    async fn upload_rejects_invalid_json_before_sending() {
        let mut transport = ScriptedTransport::new([]);
        let recorder = transport.recorder();

        let err = SyncProtocol::default()
            .upload(&mut transport, "{\"config\": ")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::InvalidConfigJson(_)));
        assert!(recorder.written().is_empty());
        assert_eq!(recorder.close_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_upload_is_not_a_reboot() {
        let mut transport = ScriptedTransport::new([Step::Chunk("saving"), Step::Cancel]);
        let recorder = transport.recorder();

        let err = SyncProtocol::default()
            .upload(&mut transport, SAMPLE_JSON)
            .await
            .unwrap_err();

        match err {
            UploadError::Cancelled { response } => assert_eq!(response, "saving"),
            err => panic!("unexpected error: {err}"),
        }
        assert_eq!(recorder.close_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_times_out_without_closing() {
        let mut transport = ScriptedTransport::new([Step::Chunk("saving"), Step::Hang]);
        let recorder = transport.recorder();

        let err = SyncProtocol::default()
            .upload(&mut transport, SAMPLE_JSON)
            .await
            .unwrap_err();

        match err {
            UploadError::Timeout { response } => assert_eq!(response, "saving"),
            err => panic!("unexpected error: {err}"),
        }
        assert_eq!(recorder.close_count(), 0);
    }
}
