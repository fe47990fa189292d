//! The firmware images published for the macro pad.
//!
//! Each image is a UF2 file living under `firmware/` relative to a base URL.
//! The hardware variant (Bluetooth, OLED, board revision) is encoded in the
//! file name, and links handed out with a board carry the matching file stem
//! as a query parameter so the right image can be preselected.

use std::path::{Path, PathBuf};

/// A downloadable firmware image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirmwareArtifact {
    /// File name, e.g. `b_oled_v2.u2f`.
    pub name: &'static str,
    /// Query parameter that selects this image.
    pub param: &'static str,
}

impl FirmwareArtifact {
    const fn new(param: &'static str, name: &'static str) -> Self {
        Self { name, param }
    }

    /// Path relative to the base URL.
    pub fn path(&self) -> String {
        format!("firmware/{}", self.name)
    }

    /// Full URL below `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        if base_url.ends_with('/') {
            format!("{base_url}{}", self.path())
        } else {
            format!("{base_url}/{}", self.path())
        }
    }

    /// Whether the board has a display.
    pub fn has_oled(&self) -> bool {
        OLED_PARAMS.contains(&self.param)
    }
}

/// Every published image, in menu order.
pub const CATALOG: [FirmwareArtifact; 8] = [
    FirmwareArtifact::new("b_v1", "b_v1.u2f"),
    FirmwareArtifact::new("b_v2", "b_v2.u2f"),
    FirmwareArtifact::new("b_oled_v1", "b_oled_v1.u2f"),
    FirmwareArtifact::new("b_oled_v2", "b_oled_v2.u2f"),
    FirmwareArtifact::new("b_bt_v1", "b_bt_v1.u2f"),
    FirmwareArtifact::new("b_bt_v2", "b_bt_v2.u2f"),
    FirmwareArtifact::new("b_bt_oled_v1", "b_bt_oled_v1.u2f"),
    FirmwareArtifact::new("b_bt_oled_v2", "b_bt_oled_v2.u2f"),
];

/// Parameters of the boards that have a display.
pub const OLED_PARAMS: [&str; 4] = ["b_oled_v1", "b_oled_v2", "b_bt_oled_v1", "b_bt_oled_v2"];

/// Splits a query string such as `?b_oled_v2&lang=en` into its keys.
pub fn parse_query(query: &str) -> Vec<String> {
    query
        .trim_start_matches('?')
        .split(['&', ','])
        .map(|pair| pair.split_once('=').map_or(pair, |(key, _)| key).trim())
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .collect()
}

/// The first image whose parameter is present, falling back to the first
/// image of the catalog.
pub fn preselect<S: AsRef<str>>(params: &[S]) -> &'static FirmwareArtifact {
    CATALOG
        .iter()
        .find(|artifact| params.iter().any(|param| param.as_ref() == artifact.param))
        .unwrap_or(&CATALOG[0])
}

/// Whether any of `params` names a board with a display.
pub fn oled_detected<S: AsRef<str>>(params: &[S]) -> bool {
    params
        .iter()
        .any(|param| OLED_PARAMS.contains(&param.as_ref()))
}

/// Looks an image up by file name.
pub fn find(name: &str) -> Option<&'static FirmwareArtifact> {
    CATALOG.iter().find(|artifact| artifact.name == name)
}

/// Error when downloading an image fails.
#[derive(Debug, Display, Error)]
pub enum DownloadError {
    /// The HTTP client could not be built or the request failed.
    #[display("failed to fetch `{url}`: {source}")]
    Fetching {
        /// What was requested.
        url: String,
        /// Why it failed.
        source: reqwest::Error,
    },
    /// The image could not be saved.
    #[display("failed to write `{}`: {source}", path.display())]
    Writing {
        /// Where it was being written.
        path: PathBuf,
        /// Why it failed.
        source: std::io::Error,
    },
}

/// Fetches `artifact` from below `base_url` and writes it into the directory
/// `dest`, returning the path of the written file.
pub async fn download(
    artifact: &FirmwareArtifact,
    base_url: &str,
    dest: &Path,
) -> Result<PathBuf, DownloadError> {
    let url = artifact.url(base_url);

    info!("Downloading {}...", artifact.name);

    let fetching = |source| DownloadError::Fetching {
        url: url.clone(),
        source,
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("ekb/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(fetching)?;

    let image = client
        .get(&url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(fetching)?
        .bytes()
        .await
        .map_err(fetching)?;

    let path = dest.join(artifact.name);

    tokio::fs::write(&path, &image)
        .await
        .map_err(|source| DownloadError::Writing {
            path: path.clone(),
            source,
        })?;

    debug!(bytes = image.len(), path = %path.display(), "firmware image saved");

    Ok(path)
}
