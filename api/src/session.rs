//! Provides [`Session`], the state behind an editing session with one
//! keyboard.
//!
//! A session owns the link to the device, the last configuration that was
//! parsed, the text the user is editing and a single status line describing
//! the outcome of the last action. Failures never leave it half updated: an
//! action either replaces the state it is documented to replace or keeps the
//! previous state and reports why in the status line.

use crate::{
    devices::macropad::{self, KeyId},
    edit::{self, BindingEdit, DisplayDraft, EditError},
    schema::device_config::{Configuration, SerializeConfigurationError, SystemSettings},
    sync::{
        LoadError, SyncOptions, SyncProtocol, UploadError, UploadOutcome,
        listener::{DisconnectListener, ListenerExit},
    },
    transport::{Transport, TransportError},
};
use std::{collections::BTreeMap, future::Future};

/// Asked before loading over unsaved edits.
pub const LOAD_CONFIRMATION: &str =
    "This will overwrite your current edits. Are you sure you want to load data from the device?";
/// Asked before disconnecting with unsaved edits.
pub const DISCONNECT_CONFIRMATION: &str =
    "All not uploaded edits will be lost. Are you sure you want to disconnect?";

/// Error returned by the [`Session`] actions.
///
/// The status line has already been updated when one of these is returned.
#[derive(Debug, Display, Error)]
pub enum SessionError {
    /// Opening the link failed.
    #[display("{_0}")]
    Connecting(TransportError),
    /// The load exchange failed.
    #[display("{_0}")]
    Loading(LoadError),
    /// The upload exchange failed.
    #[display("{_0}")]
    Uploading(UploadError),
    /// The device went away while the link was idle.
    #[display("the link was lost while idle: {_0}")]
    LinkLost(#[error(not(source))] ListenerExit),
    /// The edit was rejected.
    #[display("{_0}")]
    Editing(EditError),
    /// The configuration could not be rendered for editing.
    #[display("{_0}")]
    Rendering(SerializeConfigurationError),
}

/// Whether an action that needs confirmation went ahead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IsVariant)]
pub enum Outcome {
    /// The action ran.
    Completed,
    /// The user said no, nothing changed.
    Declined,
}

/// Who currently owns the transport.
#[derive(Debug)]
enum Link<T> {
    Detached,
    Attached(T),
    Listening(DisconnectListener<T>),
}

/// State of an editing session with one keyboard.
#[derive(Debug)]
pub struct Session<T> {
    link: Link<T>,
    protocol: SyncProtocol,
    configuration: Option<Configuration>,
    editable_text: String,
    status: String,
}

impl<T> Default for Session<T>
where
    T: Transport + 'static,
{
    fn default() -> Self {
        Self::new(SyncOptions::default())
    }
}

impl<T> Session<T>
where
    T: Transport + 'static,
{
    /// Creates a session with nothing connected or loaded.
    pub fn new(options: SyncOptions) -> Self {
        Self {
            link: Link::Detached,
            protocol: SyncProtocol::new(options),
            configuration: None,
            editable_text: String::new(),
            status: "Ready".to_owned(),
        }
    }

    /// Outcome of the last action.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// The last configuration that was loaded, edited or parsed.
    pub fn configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    /// The text being edited, empty when there is nothing loaded.
    pub fn editable_text(&self) -> &str {
        &self.editable_text
    }

    /// Whether a link is open. A background listener that already saw the
    /// device go away counts as disconnected.
    pub fn is_connected(&self) -> bool {
        match &self.link {
            Link::Detached => false,
            Link::Attached(_) => true,
            Link::Listening(listener) => !listener.is_finished(),
        }
    }

    /// Text for each element of the keyboard diagram.
    pub fn labels(&self) -> BTreeMap<KeyId, String> {
        macropad::labels(self.configuration.as_ref())
    }

    /// Opens a link with `open`, replacing the current one.
    pub async fn connect<F>(&mut self, open: F) -> Result<(), SessionError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        self.close_link().await;

        match open.await {
            Ok(transport) => {
                self.link = Link::Attached(transport);
                self.status = "Connected to serial port".to_owned();

                Ok(())
            }
            Err(err) => {
                self.status = format!("Connection failed: {err}");

                Err(SessionError::Connecting(err))
            }
        }
    }

    /// Loads the configuration from the device.
    ///
    /// When there are edits, `confirm` is asked with [`LOAD_CONFIRMATION`]
    /// first. Success replaces the configuration and the editable text,
    /// failure keeps both.
    pub async fn load(
        &mut self,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<Outcome, SessionError> {
        if !self.editable_text.is_empty() && !confirm(LOAD_CONFIRMATION) {
            return Ok(Outcome::Declined);
        }

        self.reclaim().await?;

        let Link::Attached(transport) = &mut self.link else {
            let err = LoadError::Transport(TransportError::WriterUnavailable);
            self.status = format!("Load data failed: {err}");

            return Err(SessionError::Loading(err));
        };

        self.status = "Receiving data...".to_owned();

        let loaded = self.protocol.load(transport).await;

        let configuration = match loaded {
            Ok(configuration) => configuration,
            Err(err) => {
                self.status = match &err {
                    LoadError::Parse { source, .. } => {
                        format!("Failed to parse JSON from device. Error: {source}")
                    }
                    LoadError::Timeout { .. } => {
                        "Failed to load data: Timed out waiting for response from device."
                            .to_owned()
                    }
                    err => format!("Load data failed: {err}"),
                };

                return Err(SessionError::Loading(err));
            }
        };

        if let Err(err) = self.replace_configuration(configuration) {
            self.status = format!("Load data failed: {err}");

            return Err(err);
        }

        self.status = "Data loaded successfully".to_owned();

        Ok(Outcome::Completed)
    }

    /// Sends the editable text to the device.
    ///
    /// The device restarts to apply it, so success closes the link and clears
    /// the configuration and the editable text. Failure keeps everything.
    pub async fn upload(&mut self) -> Result<UploadOutcome, SessionError> {
        self.reclaim().await?;

        let Link::Attached(transport) = &mut self.link else {
            let err = UploadError::Transport(TransportError::WriterUnavailable);
            self.status = format!("Upload failed: {err}");

            return Err(SessionError::Uploading(err));
        };

        let uploaded = self.protocol.upload(transport, &self.editable_text).await;

        match uploaded {
            Ok(report) => {
                self.link = Link::Detached;
                self.configuration = None;
                self.editable_text.clear();
                self.status = "Upload successful. Device rebooted".to_owned();

                Ok(report.outcome)
            }
            Err(err) => {
                self.status = format!("Upload failed: {err}");

                Err(SessionError::Uploading(err))
            }
        }
    }

    /// Closes the link and forgets everything loaded.
    ///
    /// When there are edits, `confirm` is asked with
    /// [`DISCONNECT_CONFIRMATION`] first.
    pub async fn disconnect(&mut self, confirm: impl FnOnce(&str) -> bool) -> Outcome {
        if !self.editable_text.is_empty() && !confirm(DISCONNECT_CONFIRMATION) {
            return Outcome::Declined;
        }

        self.close_link().await;

        self.configuration = None;
        self.editable_text.clear();
        self.status = "Disconnected".to_owned();

        Outcome::Completed
    }

    /// Replaces the editable text.
    ///
    /// The configuration follows whenever the text parses. While it does not,
    /// the last good configuration is kept.
    pub fn edit_text(&mut self, text: impl Into<String>) {
        self.editable_text = text.into();

        match self.editable_text.parse::<Configuration>() {
            Ok(configuration) => self.configuration = Some(configuration),
            Err(err) => trace!("editable text does not parse yet: {err}"),
        }
    }

    /// Rebinds the switch at `index`.
    pub fn edit_key(&mut self, index: usize, binding: &BindingEdit) -> Result<(), SessionError> {
        let updated = edit::apply_key_edit(self.configuration.as_ref(), index, binding)
            .map_err(SessionError::Editing)?;

        self.apply(updated)
    }

    /// Rebinds the three encoder actions.
    pub fn edit_encoder(
        &mut self,
        click: &BindingEdit,
        up: &BindingEdit,
        down: &BindingEdit,
    ) -> Result<(), SessionError> {
        let updated = edit::apply_encoder_edit(self.configuration.as_ref(), click, up, down)
            .map_err(SessionError::Editing)?;

        self.apply(updated)
    }

    /// Replaces the host and display settings.
    pub fn edit_config_display(
        &mut self,
        settings: SystemSettings,
        display: DisplayDraft,
    ) -> Result<(), SessionError> {
        let updated = edit::apply_config_display_edit(self.configuration.as_ref(), settings, display)
            .map_err(SessionError::Editing)?;

        self.apply(updated)
    }

    /// Moves an idle link into a background listener that notices the
    /// device going away.
    ///
    /// The next exchange takes the link back before it reads.
    pub fn watch_for_disconnect(&mut self) {
        self.link = match std::mem::replace(&mut self.link, Link::Detached) {
            Link::Attached(transport) => Link::Listening(DisconnectListener::spawn(transport)),
            link => link,
        };
    }

    /// Collects a listener that has ended on its own.
    ///
    /// Returns whether the session is still connected.
    pub async fn refresh_link(&mut self) -> bool {
        let finished = matches!(&self.link, Link::Listening(listener) if listener.is_finished());

        if finished {
            // the lost link is reported through the status line
            let _ = self.reclaim().await;
        }

        self.is_connected()
    }

    fn apply(&mut self, updated: Option<Configuration>) -> Result<(), SessionError> {
        match updated {
            Some(configuration) => self.replace_configuration(configuration),
            None => Ok(()),
        }
    }

    fn replace_configuration(&mut self, configuration: Configuration) -> Result<(), SessionError> {
        self.editable_text = configuration
            .to_pretty_json()
            .map_err(SessionError::Rendering)?;
        self.configuration = Some(configuration);

        Ok(())
    }

    /// Stops a background listener and takes the transport back.
    async fn reclaim(&mut self) -> Result<(), SessionError> {
        let listener = match std::mem::replace(&mut self.link, Link::Detached) {
            Link::Listening(listener) => listener,
            link => {
                self.link = link;

                return Ok(());
            }
        };

        match listener.stop().await {
            Ok((transport, ListenerExit::Stopped)) => {
                self.link = Link::Attached(transport);

                Ok(())
            }
            Ok((_, exit)) => {
                warn!(%exit, "link lost while idle");
                self.status = format!("Disconnected ({exit})");

                Err(SessionError::LinkLost(exit))
            }
            Err(err) => {
                error!("{err}");
                self.status = format!("Disconnected ({err})");

                Err(SessionError::LinkLost(ListenerExit::LinkDropped))
            }
        }
    }

    async fn close_link(&mut self) {
        match std::mem::replace(&mut self.link, Link::Detached) {
            Link::Detached => {}
            Link::Attached(mut transport) => transport.close().await,
            Link::Listening(listener) => match listener.stop().await {
                Ok((mut transport, _)) => transport.close().await,
                Err(err) => error!("{err}"),
            },
        }
    }
}
