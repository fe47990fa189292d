//! The configuration document stored on the keyboard.
//!
//! The same JSON shape is used everywhere: the firmware streams it in answer
//! to `get`, the editor keeps it pretty-printed, and it goes back to the
//! device compact on a single line. Field names and nesting are the whole
//! contract, there is no version field.

use std::str::FromStr;

/// Number of physical switches on the keyboard.
pub const KEY_COUNT: usize = 8;

/// Error when a configuration document cannot be read.
#[derive(Debug, Display, From, Error)]
#[display("invalid configuration document: {_0}")]
pub struct ParseConfigurationError(serde_json::Error);

/// Error when a configuration cannot be rendered as JSON.
#[derive(Debug, Display, From, Error)]
#[display("failed to serialize configuration: {_0}")]
pub struct SerializeConfigurationError(serde_json::Error);

/// Full device configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Host operating system and keyboard layout settings.
    pub config: SystemSettings,
    /// One binding per switch. The position in the array is the switch.
    pub keys: [KeyBinding; KEY_COUNT],
    /// OLED display settings, in device units.
    pub display: DisplaySettings,
    /// Rotary encoder bindings.
    #[serde(default)]
    pub encoder: Encoder,
    /// Sections this tool does not edit, sent back to the device unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FromStr for Configuration {
    type Err = ParseConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

impl Configuration {
    /// Single-line form sent to the device.
    pub fn to_compact_json(&self) -> Result<String, SerializeConfigurationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented form used for editing.
    pub fn to_pretty_json(&self) -> Result<String, SerializeConfigurationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Operating system the keyboard generates key codes for.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Microsoft Windows.
    #[default]
    #[display("windows")]
    Windows,
    /// macOS.
    #[display("mac")]
    Mac,
    /// Linux.
    #[display("linux")]
    Linux,
}

impl Os {
    /// Every supported operating system, in menu order.
    pub const ALL: [Os; 3] = [Os::Windows, Os::Mac, Os::Linux];
}

/// Error returned when parsing an [`Os`] fails.
#[derive(Clone, Debug, Display, Error)]
#[display("`{_0}` is not a supported OS, expected one of: windows, mac, linux")]
pub struct ParseOsError(#[error(not(source))] String);

impl FromStr for Os {
    type Err = ParseOsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Os::ALL
            .into_iter()
            .find(|os| os.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseOsError(s.to_owned()))
    }
}

/// Keyboard layout configured on the host.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Czech.
    #[default]
    #[display("cs")]
    Cs,
    /// Slovak.
    #[display("sk")]
    Sk,
    /// English.
    #[display("en")]
    En,
    /// German.
    #[display("de")]
    De,
}

impl Layout {
    /// Every supported layout, in menu order.
    pub const ALL: [Layout; 4] = [Layout::Cs, Layout::Sk, Layout::En, Layout::De];
}

/// Error returned when parsing a [`Layout`] fails.
#[derive(Clone, Debug, Display, Error)]
#[display("`{_0}` is not a supported layout, expected one of: cs, sk, en, de")]
pub struct ParseLayoutError(#[error(not(source))] String);

impl FromStr for Layout {
    type Err = ParseLayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layout::ALL
            .into_iter()
            .find(|layout| layout.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseLayoutError(s.to_owned()))
    }
}

/// The `config` section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemSettings {
    /// Host operating system.
    pub os: Os,
    /// Host keyboard layout.
    pub layout: Layout,
}

/// The `display` section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplaySettings {
    /// Raw contrast, `0..=255`.
    pub contrast: u8,
    /// Screen-off timeout in milliseconds.
    pub timeout: u32,
}

/// The `encoder` section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Encoder {
    /// Pressing the knob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click: Option<KeyBinding>,
    /// Turning the knob clockwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<KeyBinding>,
    /// Turning the knob counter-clockwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<KeyBinding>,
}

/// A labelled key combination.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyBinding {
    /// Free text shown on the diagram.
    pub label: String,
    /// Key tokens pressed together, in order.
    pub combo: Vec<String>,
}

impl KeyBinding {
    /// The label, or the combo joined with `+` when the label is empty.
    pub fn caption(&self) -> String {
        if self.label.is_empty() {
            self.combo.join("+")
        } else {
            self.label.clone()
        }
    }
}

/// Maps a contrast percentage from the editor to the raw device value.
///
/// The percentage is clamped to `1..=100` first.
pub fn percent_to_byte(percent: i64) -> u8 {
    let percent = percent.clamp(1, 100);

    // round half up, the product never leaves 0..=255
    ((percent * 255 + 50) / 100) as u8
}

/// Maps a raw device contrast to the closest percentage.
pub fn byte_to_percent(byte: u8) -> u8 {
    ((u32::from(byte) * 200 + 255) / 510) as u8
}

/// Converts the editor's whole seconds to device milliseconds.
pub fn seconds_to_millis(seconds: u32) -> u32 {
    seconds.saturating_mul(1000)
}

/// Converts device milliseconds to whole seconds, rounding to the nearest.
pub fn millis_to_seconds(millis: u32) -> u32 {
    ((u64::from(millis) + 500) / 1000) as u32
}

#[cfg(test)]
pub(crate) const SAMPLE_JSON: &str = concat!(
    r#"{"config":{"os":"windows","layout":"en"},"#,
    r#""keys":["#,
    r#"{"label":"Copy","combo":["ctrl","c"]},"#,
    r#"{"label":"Paste","combo":["ctrl","v"]},"#,
    r#"{"label":"Cut","combo":["ctrl","x"]},"#,
    r#"{"label":"Undo","combo":["ctrl","z"]},"#,
    r#"{"label":"","combo":["ctrl","shift","Z"]},"#,
    r#"{"label":"Save","combo":["ctrl","s"]},"#,
    r#"{"label":"Find","combo":["ctrl","f"]},"#,
    r#"{"label":"Esc","combo":["escape"]}"#,
    r#"],"#,
    r#""display":{"contrast":128,"timeout":30000},"#,
    r#""encoder":{"#,
    r#""click":{"label":"Play","combo":["space"]},"#,
    r#""up":{"label":"Next","combo":["right"]},"#,
    r#""down":{"label":"Prev","combo":["left"]}"#,
    r#"}}"#
);

#[cfg(test)]
pub(crate) fn sample_configuration() -> Configuration {
    SAMPLE_JSON.parse().unwrap()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_form_round_trips_verbatim() {
        let config = sample_configuration();

        assert_eq!(config.to_compact_json().unwrap(), SAMPLE_JSON);
    }

    #[test]
    fn pretty_form_parses_back_to_the_same_configuration() {
        let config = sample_configuration();

        let pretty = config.to_pretty_json().unwrap();

        assert!(pretty.contains('\n'));
        assert_eq!(pretty.parse::<Configuration>().unwrap(), config);
    }

    #[test]
    fn missing_encoder_section_defaults_to_no_bindings() {
        let mut value: serde_json::Value = serde_json::from_str(SAMPLE_JSON).unwrap();
        value.as_object_mut().unwrap().remove("encoder");

        let config: Configuration = serde_json::from_value(value).unwrap();

        assert_eq!(config.encoder, Encoder::default());
        assert!(
            config
                .to_compact_json()
                .unwrap()
                .ends_with(r#""encoder":{}}"#)
        );
    }

    #[test]
    fn wrong_number_of_keys_is_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(SAMPLE_JSON).unwrap();
        value["keys"].as_array_mut().unwrap().pop();

        assert!(serde_json::from_value::<Configuration>(value).is_err());
    }

    #[test]
    fn unknown_sections_survive_a_round_trip() {
        let data = SAMPLE_JSON.replace(
            r#""display":"#,
            r#""bluetooth":{"name":"ekb"},"display":"#,
        );

        let config: Configuration = data.parse().unwrap();

        assert_eq!(config.extra["bluetooth"]["name"], "ekb");
        assert_ne!(config, sample_configuration());

        let compact = config.to_compact_json().unwrap();

        assert!(compact.contains(r#""bluetooth":{"name":"ekb"}"#));
        assert_eq!(compact.parse::<Configuration>().unwrap(), config);
    }

    #[test]
    fn unknown_fields_inside_known_sections_are_rejected() {
        let in_display = SAMPLE_JSON.replace(
            r#""timeout":30000"#,
            r#""timeout":30000,"brightness":7"#,
        );
        let in_key = SAMPLE_JSON.replace(
            r#"{"label":"Copy","#,
            r#"{"label":"Copy","repeat":true,"#,
        );

        assert!(in_display.parse::<Configuration>().is_err());
        assert!(in_key.parse::<Configuration>().is_err());
    }

    #[test]
    fn unknown_os_is_rejected() {
        let data = SAMPLE_JSON.replace(r#""os":"windows""#, r#""os":"beos""#);

        assert!(data.parse::<Configuration>().is_err());
    }

    #[test]
    fn contrast_percentage_round_trips_within_one() {
        for percent in 1..=100 {
            let back = i64::from(byte_to_percent(percent_to_byte(percent)));

            assert!((back - percent).abs() <= 1, "{percent} came back as {back}");
        }
    }

    #[test]
    fn contrast_percentage_is_clamped() {
        assert_eq!(percent_to_byte(0), 3);
        assert_eq!(percent_to_byte(-20), 3);
        assert_eq!(percent_to_byte(100), 255);
        assert_eq!(percent_to_byte(250), 255);
        assert_eq!(percent_to_byte(50), 128);
        assert_eq!(byte_to_percent(128), 50);
        assert_eq!(byte_to_percent(0), 0);
    }

    #[test]
    fn timeout_converts_between_seconds_and_millis() {
        assert_eq!(seconds_to_millis(30), 30_000);
        assert_eq!(millis_to_seconds(30_000), 30);
        assert_eq!(millis_to_seconds(1_499), 1);
        assert_eq!(millis_to_seconds(1_500), 2);
    }

    #[test]
    fn os_and_layout_parse_case_insensitively() {
        assert_eq!("Mac".parse::<Os>().unwrap(), Os::Mac);
        assert_eq!("DE".parse::<Layout>().unwrap(), Layout::De);
        assert!("qwerty".parse::<Layout>().is_err());
    }

    #[test]
    fn caption_falls_back_to_combo() {
        let config = sample_configuration();

        assert_eq!(config.keys[0].caption(), "Copy");
        assert_eq!(config.keys[4].caption(), "ctrl+shift+Z");
    }
}
