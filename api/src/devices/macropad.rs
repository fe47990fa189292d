//! Provides the physical layout of the macro pad and the labels shown on its
//! diagram.

use crate::schema::device_config::{Configuration, KEY_COUNT, KeyBinding};
use std::{collections::BTreeMap, str::FromStr};

/// Constants describing the macro pad.
#[derive(Clone, Copy, Debug)]
pub struct Macropad;

impl Macropad {
    /// Baud rate the firmware listens at.
    pub const BAUD_RATE: u32 = 115_200;
    /// Number of switches.
    pub const KEY_COUNT: usize = KEY_COUNT;
}

/// An element of the diagram that can be clicked to edit it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyId {
    /// One of the eight switches.
    Switch(SwitchNumber),
    /// The rotary encoder.
    Encoder,
    /// The OLED display.
    Oled,
    /// The host settings button.
    Settings,
}

/// Number of a switch, always within `1..=8`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwitchNumber(u8);

impl SwitchNumber {
    /// `None` unless `n` names one of the switches.
    pub const fn new(n: u8) -> Option<Self> {
        if n >= 1 && n as usize <= KEY_COUNT {
            Some(Self(n))
        } else {
            None
        }
    }

    /// The number printed on the board.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Position of the switch in `keys`.
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }
}

/// Which editor a [`KeyId`] opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditorKind {
    /// The binding editor for the switch at this index of `keys`.
    Key(usize),
    /// The three encoder bindings.
    Encoder,
    /// Display contrast and timeout.
    Display,
    /// Host OS and layout.
    Config,
}

impl KeyId {
    /// Every element in diagram order.
    pub const ALL: [KeyId; 11] = [
        KeyId::Switch(SwitchNumber(1)),
        KeyId::Switch(SwitchNumber(2)),
        KeyId::Switch(SwitchNumber(3)),
        KeyId::Switch(SwitchNumber(4)),
        KeyId::Switch(SwitchNumber(5)),
        KeyId::Switch(SwitchNumber(6)),
        KeyId::Switch(SwitchNumber(7)),
        KeyId::Switch(SwitchNumber(8)),
        KeyId::Encoder,
        KeyId::Oled,
        KeyId::Settings,
    ];

    /// The switch numbered `n`, if there is one.
    pub const fn switch(n: u8) -> Option<KeyId> {
        match SwitchNumber::new(n) {
            Some(n) => Some(KeyId::Switch(n)),
            None => None,
        }
    }

    /// Index into `keys` for switches.
    pub fn key_index(self) -> Option<usize> {
        match self {
            KeyId::Switch(n) => Some(n.index()),
            _ => None,
        }
    }

    /// The editor this element opens.
    pub fn editor(self) -> EditorKind {
        match self {
            KeyId::Switch(n) => EditorKind::Key(n.index()),
            KeyId::Encoder => EditorKind::Encoder,
            KeyId::Oled => EditorKind::Display,
            KeyId::Settings => EditorKind::Config,
        }
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyId::Switch(n) => write!(f, "sw{}", n.get()),
            KeyId::Encoder => f.write_str("encoder"),
            KeyId::Oled => f.write_str("oled"),
            KeyId::Settings => f.write_str("settings"),
        }
    }
}

/// Error returned when parsing a [`KeyId`] fails.
#[derive(Clone, Debug, Display, Error)]
#[display("`{_0}` is not a key id, expected sw1..sw8, encoder, oled or settings")]
pub struct ParseKeyIdError(#[error(not(source))] String);

impl FromStr for KeyId {
    type Err = ParseKeyIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyId::ALL
            .into_iter()
            .find(|id| id.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseKeyIdError(s.to_owned()))
    }
}

/// Text shown on each diagram element.
///
/// Empty when no configuration is loaded.
pub fn labels(cfg: Option<&Configuration>) -> BTreeMap<KeyId, String> {
    let Some(cfg) = cfg else {
        return BTreeMap::new();
    };

    let caption = |binding: Option<&KeyBinding>| binding.map(KeyBinding::caption).unwrap_or_default();

    let mut labels = KeyId::ALL
        .into_iter()
        .zip(&cfg.keys)
        .map(|(id, binding)| (id, caption(Some(binding))))
        .collect::<BTreeMap<_, _>>();

    labels.insert(
        KeyId::Encoder,
        format!(
            "C:{} | U:{} | D:{}",
            caption(cfg.encoder.click.as_ref()),
            caption(cfg.encoder.up.as_ref()),
            caption(cfg.encoder.down.as_ref()),
        ),
    );

    labels.insert(
        KeyId::Oled,
        format!(
            "Contrast: {}, Timeout: {}",
            cfg.display.contrast, cfg.display.timeout
        ),
    );

    labels.insert(
        KeyId::Settings,
        format!("OS: {}, Layout: {}", cfg.config.os, cfg.config.layout),
    );

    labels
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::device_config::sample_configuration;

    #[test]
    fn labels_follow_the_configuration() {
        let cfg = sample_configuration();

        let labels = labels(Some(&cfg));

        assert_eq!(labels.len(), 11);
        assert_eq!(labels[&KeyId::switch(1).unwrap()], "Copy");
        assert_eq!(labels[&KeyId::switch(5).unwrap()], "ctrl+shift+Z");
        assert_eq!(labels[&KeyId::Encoder], "C:Play | U:Next | D:Prev");
        assert_eq!(labels[&KeyId::Oled], "Contrast: 128, Timeout: 30000");
        assert_eq!(labels[&KeyId::Settings], "OS: windows, Layout: en");
    }

    #[test]
    fn missing_encoder_bindings_show_as_blank() {
        let mut cfg = sample_configuration();
        cfg.encoder.up = None;

        assert_eq!(labels(Some(&cfg))[&KeyId::Encoder], "C:Play | U: | D:Prev");
    }

    #[test]
    fn no_configuration_means_no_labels() {
        assert!(labels(None).is_empty());
    }

    #[test]
    fn key_ids_parse_and_pick_their_editor() {
        let sw3 = KeyId::switch(3).unwrap();

        assert_eq!("sw3".parse::<KeyId>().unwrap(), sw3);
        assert_eq!("OLED".parse::<KeyId>().unwrap(), KeyId::Oled);
        assert!("sw9".parse::<KeyId>().is_err());
        assert!("sw0".parse::<KeyId>().is_err());

        assert_eq!(sw3.editor(), EditorKind::Key(2));
        assert_eq!(KeyId::switch(8).unwrap().key_index(), Some(7));
        assert_eq!(KeyId::Settings.editor(), EditorKind::Config);
        assert_eq!(KeyId::Encoder.key_index(), None);
    }

    #[test]
    fn only_switches_on_the_board_can_be_named() {
        assert_eq!(KeyId::switch(0), None);
        assert_eq!(KeyId::switch(9), None);
        assert_eq!(SwitchNumber::new(u8::MAX), None);

        let numbers = (1..=8)
            .map(|n| SwitchNumber::new(n).unwrap().index())
            .collect::<Vec<_>>();

        assert_eq!(numbers, (0..8).collect::<Vec<_>>());
    }
}
