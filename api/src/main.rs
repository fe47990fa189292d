#[macro_use]
extern crate derive_more;

use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use editors_keyboard::{
    devices::macropad::{self, EditorKind, KeyId, Macropad},
    edit::{self, BindingEdit, DisplayDraft},
    firmware,
    key_token,
    schema::device_config::{Configuration, KeyBinding, Layout, Os},
    serial_port::{self, PortSelection, SerialTransport},
    session::Session,
    sync::{SyncOptions, UploadOutcome},
};
use error_stack::{IntoReport, ResultExt};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
};
use tokio_serial::{SerialPortInfo, SerialPortType};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Display, Error)]
#[display("something went wrong running the command")]
struct Error;

/// CLI for loading, editing and uploading the configuration of the Editor's
/// Keyboard macro pad.
#[derive(Parser)]
#[clap(about, author, version)]
struct Cli {
    #[command(flatten)]
    link: LinkArgs,
    /// Raises the log level, repeat for more detail. `RUST_LOG` wins when
    /// set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug)]
struct LinkArgs {
    /// Serial port to use. When omitted the attached USB ports are
    /// searched, asking which one to use if there are several.
    #[arg(long, env = "EKB_PORT", global = true)]
    port: Option<String>,
    /// Baud rate of the serial link.
    #[arg(long, env = "EKB_BAUD", global = true, default_value_t = Macropad::BAUD_RATE)]
    baud: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the USB serial ports attached to this machine.
    Ports,
    /// Reads the configuration from the keyboard.
    Get {
        /// Where to save the configuration. Printed to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite the output file without asking.
        #[arg(short, long)]
        yes: bool,
    },
    /// Uploads a configuration file to the keyboard, which then reboots.
    Apply {
        /// The path of the configuration JSON file.
        path: PathBuf,
    },
    /// Stays connected until the keyboard goes away or Ctrl-C is pressed.
    Watch,
    /// Formats a configuration file.
    Format {
        /// The path of the configuration JSON file.
        path: PathBuf,
    },
    /// Prints what the keyboard diagram would show for a configuration file.
    Labels {
        /// The path of the configuration JSON file.
        path: PathBuf,
    },
    /// Commands for editing configuration files.
    #[command(subcommand)]
    Edit(EditCommands),
    /// Commands for the published firmware images.
    #[command(subcommand)]
    Firmware(FirmwareCommands),
    /// Commands for the key names a combo can use.
    #[command(subcommand)]
    KeyToken(KeyTokenCommands),
}

impl Cli {
    async fn perform(self) -> Result<(), error_stack::Report<Error>> {
        match self.command {
            Commands::Ports => list_ports(),
            Commands::Get { output, yes } => get(&self.link, output, yes).await,
            Commands::Apply { path } => apply(&self.link, &path).await,
            Commands::Watch => watch(&self.link).await,
            Commands::Format { path } => {
                let config = read_json_file::<Configuration>(&path).await?;

                safe_pretty_json_file(&config, &path).await
            }
            Commands::Labels { path } => {
                let config = read_json_file::<Configuration>(&path).await?;

                for (id, label) in macropad::labels(Some(&config)) {
                    println!("{id:>8}  {label}");
                }

                Ok(())
            }
            Commands::Edit(cmd) => cmd.perform().await,
            Commands::Firmware(cmd) => cmd.perform().await,
            Commands::KeyToken(cmd) => cmd.perform(),
        }
    }
}

#[derive(Subcommand)]
enum EditCommands {
    /// Rebinds one of the eight switches.
    ///
    /// # Examples:
    ///
    /// ```sh
    /// ekb edit key config.json --key sw2 --combo ctrl,shift,v --label "Paste plain"
    /// ```
    Key {
        /// The path of the configuration JSON file.
        path: PathBuf,
        /// The switch to rebind, `sw1` to `sw8`.
        #[arg(short, long)]
        key: KeyId,
        /// Comma separated keys pressed together.
        #[arg(short, long, value_delimiter = ',', required = true)]
        combo: Vec<String>,
        /// Text shown on the diagram instead of the combo.
        #[arg(short, long, default_value = "")]
        label: String,
    },
    /// Rebinds the rotary encoder. Omitted actions keep their binding.
    Encoder {
        /// The path of the configuration JSON file.
        path: PathBuf,
        /// Keys sent when the knob is pressed.
        #[arg(long, value_delimiter = ',')]
        click: Option<Vec<String>>,
        /// Label for the click action.
        #[arg(long)]
        click_label: Option<String>,
        /// Keys sent when the knob turns clockwise.
        #[arg(long, value_delimiter = ',')]
        up: Option<Vec<String>>,
        /// Label for the clockwise action.
        #[arg(long)]
        up_label: Option<String>,
        /// Keys sent when the knob turns counter-clockwise.
        #[arg(long, value_delimiter = ',')]
        down: Option<Vec<String>>,
        /// Label for the counter-clockwise action.
        #[arg(long)]
        down_label: Option<String>,
    },
    /// Changes the host and display settings. Omitted values are kept.
    Settings {
        /// The path of the configuration JSON file.
        path: PathBuf,
        /// Host operating system.
        #[arg(long)]
        os: Option<Os>,
        /// Host keyboard layout.
        #[arg(long)]
        layout: Option<Layout>,
        /// Display contrast in percent, clamped to 1..=100.
        #[arg(long, allow_negative_numbers = true)]
        contrast: Option<i64>,
        /// Seconds before the display turns off.
        #[arg(long)]
        timeout: Option<u32>,
    },
}

impl EditCommands {
    async fn perform(self) -> Result<(), error_stack::Report<Error>> {
        match self {
            Self::Key {
                path,
                key,
                combo,
                label,
            } => {
                let EditorKind::Key(index) = key.editor() else {
                    return Err(NotASwitchError(key).into_report().change_context(Error));
                };

                let config = read_json_file::<Configuration>(&path).await?;

                let binding = BindingEdit::new(&combo, label);

                let updated = edit::apply_key_edit(Some(&config), index, &binding)
                    .change_context(Error)
                    .attach_with(|| format!("rebinding `{key}`"))?;

                save_edit(updated, &path).await
            }
            Self::Encoder {
                path,
                click,
                click_label,
                up,
                up_label,
                down,
                down_label,
            } => {
                let config = read_json_file::<Configuration>(&path).await?;
                let encoder = &config.encoder;

                let click = merge_binding(encoder.click.as_ref(), click, click_label);
                let up = merge_binding(encoder.up.as_ref(), up, up_label);
                let down = merge_binding(encoder.down.as_ref(), down, down_label);

                let updated = edit::apply_encoder_edit(Some(&config), &click, &up, &down)
                    .change_context(Error)
                    .attach("rebinding the encoder")?;

                save_edit(updated, &path).await
            }
            Self::Settings {
                path,
                os,
                layout,
                contrast,
                timeout,
            } => {
                let config = read_json_file::<Configuration>(&path).await?;

                let mut settings = config.config;
                let mut display = DisplayDraft::from(&config.display);

                settings.os = os.unwrap_or(settings.os);
                settings.layout = layout.unwrap_or(settings.layout);
                display.contrast_percent = contrast.unwrap_or(display.contrast_percent);
                display.timeout_seconds = timeout.unwrap_or(display.timeout_seconds);

                let updated = edit::apply_config_display_edit(Some(&config), settings, display)
                    .change_context(Error)
                    .attach("changing the settings")?;

                save_edit(updated, &path).await
            }
        }
    }
}

#[derive(Subcommand)]
enum FirmwareCommands {
    /// Lists the published firmware images.
    List {
        /// Query parameters from the link that came with the board, e.g.
        /// `b_oled_v2`. Used to mark the matching image.
        #[arg(long, value_delimiter = ',')]
        params: Vec<String>,
    },
    /// Downloads a firmware image.
    Download {
        /// Query parameters from the link that came with the board, used to
        /// pick the image when `--name` is omitted.
        #[arg(long, value_delimiter = ',')]
        params: Vec<String>,
        /// File name of the image, e.g. `b_bt_oled_v2.u2f`.
        #[arg(short, long)]
        name: Option<String>,
        /// Directory the image is saved to.
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
        /// Where the `firmware/` directory is published.
        #[arg(long, env = "EKB_FIRMWARE_BASE_URL")]
        base_url: String,
    },
}

impl FirmwareCommands {
    async fn perform(self) -> Result<(), error_stack::Report<Error>> {
        match self {
            Self::List { params } => {
                let selected = firmware::preselect(params.as_slice());

                for artifact in &firmware::CATALOG {
                    let marker = if artifact == selected { '*' } else { ' ' };

                    println!("{marker} {}", artifact.name);
                }

                if firmware::oled_detected(params.as_slice()) {
                    println!("\nThe board has an OLED display.");
                }

                Ok(())
            }
            Self::Download {
                params,
                name,
                dest,
                base_url,
            } => {
                let artifact = match name.as_deref() {
                    Some(name) => firmware::find(name),
                    None => Some(firmware::preselect(params.as_slice())),
                };

                let Some(artifact) = artifact else {
                    println!("Please select a firmware file to download.");

                    return Err(UnknownFirmwareError {
                        name: name.unwrap_or_default(),
                        available: firmware::CATALOG.iter().map(|a| a.name).collect(),
                    }
                    .into_report()
                    .change_context(Error));
                };

                println!("Downloading {}...", artifact.name);

                let path = firmware::download(artifact, &base_url, &dest)
                    .await
                    .change_context(Error)
                    .attach_with(|| format!("downloading `{}`", artifact.name))?;

                println!("Saved to {}", path.display());

                Ok(())
            }
        }
    }
}

#[derive(Subcommand)]
enum KeyTokenCommands {
    /// Lists every key name a combo can use.
    List,
    /// Lists the key names containing a term.
    Search {
        /// Part of the name, matched ignoring case.
        term: String,
    },
}

impl KeyTokenCommands {
    fn perform(self) -> Result<(), error_stack::Report<Error>> {
        let tokens = match self {
            Self::List => key_token::all(),
            Self::Search { term } => key_token::search(&term),
        };

        for token in tokens {
            println!("{token}");
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), error_stack::Report<Error>> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    cli.perform().await?;

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("editors_keyboard={level},ekb={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Clone, Debug, Display, Error)]
#[display("`{_0}` is not a switch, expected one of sw1..sw8")]
struct NotASwitchError(#[error(not(source))] KeyId);

#[derive(Clone, Debug, Display, Error)]
#[display(
    "`{name}` is not a published firmware image, expected one of: {}",
    available.join(", ")
)]
struct UnknownFirmwareError {
    name: String,
    available: Vec<&'static str>,
}

fn list_ports() -> Result<(), error_stack::Report<Error>> {
    let ports = serial_port::usb_ports()
        .change_context(Error)
        .attach("listing serial ports")?;

    if ports.is_empty() {
        println!("No USB serial ports found.");
    }

    for port in &ports {
        println!("{}", describe_port(port));
    }

    Ok(())
}

fn describe_port(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{} ({:04x}:{:04x}{})",
            port.port_name,
            usb.vid,
            usb.pid,
            usb.product
                .as_ref()
                .map(|product| format!(" {product}"))
                .unwrap_or_default()
        ),
        _ => port.port_name.clone(),
    }
}

fn choose_port(ports: &[SerialPortInfo]) -> Option<usize> {
    let items = ports.iter().map(describe_port).collect::<Vec<_>>();

    Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Several serial ports found, which one is the keyboard?")
        .items(&items)
        .default(0)
        .interact_opt()
        .ok()
        .flatten()
}

fn confirm(question: &str) -> bool {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(question)
        .default(false)
        .interact_opt()
        .ok()
        .flatten()
        .unwrap_or(false)
}

/// Opens the link and wires Ctrl-C to abort a pending read.
async fn connect(
    link: &LinkArgs,
    options: SyncOptions,
) -> Result<Session<SerialTransport>, error_stack::Report<Error>> {
    let selection = match &link.port {
        Some(name) => PortSelection::Named(name.clone()),
        None => PortSelection::Auto,
    };

    let opened = SerialTransport::open(&selection, link.baud, choose_port).await;

    if let Ok(transport) = &opened {
        let cancel = transport.cancel_handle();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut session = Session::new(options);

    let connected = session.connect(async { opened }).await;

    eprintln!("{}", session.status());

    connected
        .change_context(Error)
        .attach("connecting to the keyboard")?;

    Ok(session)
}

async fn get(
    link: &LinkArgs,
    output: Option<PathBuf>,
    yes: bool,
) -> Result<(), error_stack::Report<Error>> {
    let mut session = connect(link, SyncOptions::default()).await?;

    // an existing output file counts as edits that the load would overwrite
    if let Some(path) = output.as_deref() {
        if let Ok(existing) = tokio::fs::read_to_string(path).await {
            session.edit_text(existing);
        }
    }

    let loaded = session.load(|question| yes || confirm(question)).await;

    eprintln!("{}", session.status());

    let outcome = loaded
        .change_context(Error)
        .attach("loading the configuration")?;

    if outcome.is_completed() {
        match output {
            Some(path) => write_text_file(session.editable_text(), &path).await?,
            None => println!("{}", session.editable_text()),
        }
    }

    session.disconnect(|_| true).await;

    Ok(())
}

async fn apply(link: &LinkArgs, path: &Path) -> Result<(), error_stack::Report<Error>> {
    // validate before touching the device
    let config = read_json_file::<Configuration>(path).await?;

    let mut session = connect(link, SyncOptions::default()).await?;

    let text = config
        .to_pretty_json()
        .change_context(Error)
        .attach("rendering the configuration")?;

    session.edit_text(text);

    let uploaded = session.upload().await;

    eprintln!("{}", session.status());

    match uploaded
        .change_context(Error)
        .attach_with(|| format!("uploading `{}`", path.display()))?
    {
        UploadOutcome::Rebooted { .. } => {}
        UploadOutcome::Interrupted { .. } => {
            eprintln!("The keyboard restarted before confirming, check that the new bindings work.");
        }
    }

    Ok(())
}

async fn watch(link: &LinkArgs) -> Result<(), error_stack::Report<Error>> {
    let mut session = connect(link, SyncOptions::default()).await?;

    session.watch_for_disconnect();

    eprintln!("Watching the keyboard, press Ctrl-C to stop.");

    let mut interval = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.disconnect(|_| true).await;
                break;
            }
            _ = interval.tick() => {
                if !session.refresh_link().await {
                    break;
                }
            }
        }
    }

    eprintln!("{}", session.status());

    Ok(())
}

fn merge_binding(
    current: Option<&KeyBinding>,
    combo: Option<Vec<String>>,
    label: Option<String>,
) -> BindingEdit {
    let mut edit = BindingEdit::from_binding(current);

    if let Some(combo) = combo {
        edit.combo = combo;
    }

    if let Some(label) = label {
        edit.label = label;
    }

    edit
}

async fn save_edit(
    updated: Option<Configuration>,
    path: &Path,
) -> Result<(), error_stack::Report<Error>> {
    match updated {
        Some(config) => safe_pretty_json_file(&config, path).await,
        None => Ok(()),
    }
}

async fn read_json_file<T>(path: &Path) -> Result<T, error_stack::Report<Error>>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let file = File::open(path)
        .await
        .change_context(Error)
        .attach("opening the file")
        .attach_with(|| path.to_string_lossy().into_owned())?;

    let mut data = vec![];

    BufReader::new(file)
        .read_to_end(&mut data)
        .await
        .change_context(Error)
        .attach("reading file contents")
        .attach_with(|| path.to_string_lossy().into_owned())?;

    serde_json::from_slice::<T>(&data)
        .change_context(Error)
        .attach("parsing file contents")
        .attach_with(|| path.to_string_lossy().into_owned())
}

async fn safe_pretty_json_file<T>(data: &T, path: &Path) -> Result<(), error_stack::Report<Error>>
where
    T: serde::Serialize,
{
    let data = serde_json::to_string_pretty(data)
        .change_context(Error)
        .attach("serializing data")?;

    write_text_file(&data, path).await
}

async fn write_text_file(data: &str, path: &Path) -> Result<(), error_stack::Report<Error>> {
    let file = File::create(path)
        .await
        .change_context(Error)
        .attach("creating file")
        .attach_with(|| path.to_string_lossy().into_owned())?;

    let mut writer = BufWriter::new(file);

    writer
        .write_all(data.as_bytes())
        .await
        .change_context(Error)
        .attach("writing data to the file")
        .attach_with(|| path.to_string_lossy().into_owned())?;

    writer
        .flush()
        .await
        .change_context(Error)
        .attach("flushing data to the file")
        .attach_with(|| path.to_string_lossy().into_owned())?;

    Ok(())
}
