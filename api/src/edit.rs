//! Editing operations on a [`Configuration`].
//!
//! Every operation takes the current configuration by reference and hands
//! back a fresh one, so callers can keep the previous value around to
//! discard edits. When there is no configuration loaded yet the operations
//! do nothing and return `Ok(None)`.

use crate::{
    key_token::{self, MAX_COMBO_LEN},
    schema::device_config::{
        Configuration, DisplaySettings, KEY_COUNT, KeyBinding, SystemSettings, byte_to_percent,
        millis_to_seconds, percent_to_byte, seconds_to_millis,
    },
};

/// Error returned when an edit is rejected.
#[derive(Clone, Debug, Display, Error)]
pub enum EditError {
    /// Switches are numbered `0..8`.
    #[display("key index {_0} is out of range, the keyboard has {} keys", KEY_COUNT)]
    KeyIndexOutOfRange(#[error(not(source))] usize),
    /// Nothing was left of the combo after dropping empty tokens.
    #[display("a key combination needs at least one key")]
    EmptyCombo,
    /// The firmware only sends chords of up to five keys.
    #[display("a key combination can have at most {} keys, got {_0}", MAX_COMBO_LEN)]
    ComboTooLong(#[error(not(source))] usize),
    /// A token is not part of the key vocabulary.
    #[display(
        "`{token}` is not a known key, did you mean one of these? {}",
        suggestions.join(", ")
    )]
    UnknownKeyToken {
        /// The offending token, after cleaning.
        token: String,
        /// Closest known names.
        suggestions: Vec<&'static str>,
    },
}

/// A combo and label as entered in an editor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingEdit {
    /// Raw tokens, possibly with blanks and in any case.
    pub combo: Vec<String>,
    /// Label text.
    pub label: String,
}

impl BindingEdit {
    /// Creates an edit from anything string-like.
    pub fn new<S: AsRef<str>>(combo: &[S], label: impl Into<String>) -> Self {
        Self {
            combo: combo.iter().map(|token| token.as_ref().to_owned()).collect(),
            label: label.into(),
        }
    }

    /// Pre-fills an editor from an existing binding.
    ///
    /// Named keys get their picker spelling back, and an empty or missing
    /// combo becomes a single blank slot.
    pub fn from_binding(binding: Option<&KeyBinding>) -> Self {
        let Some(binding) = binding else {
            return Self {
                combo: vec![String::new()],
                label: String::new(),
            };
        };

        let combo = if binding.combo.is_empty() {
            vec![String::new()]
        } else {
            binding
                .combo
                .iter()
                .map(|token| key_token::display_form(token).to_owned())
                .collect()
        };

        Self {
            combo,
            label: binding.label.clone(),
        }
    }

    fn into_binding(self) -> Result<KeyBinding, EditError> {
        let combo = cleaned(&self.combo);

        if combo.is_empty() {
            return Err(EditError::EmptyCombo);
        }

        if combo.len() > MAX_COMBO_LEN {
            return Err(EditError::ComboTooLong(combo.len()));
        }

        if let Some(token) = combo.iter().find(|token| !key_token::is_known(token)) {
            return Err(EditError::UnknownKeyToken {
                token: token.clone(),
                suggestions: key_token::suggestions(token),
            });
        }

        Ok(KeyBinding {
            label: self.label,
            combo,
        })
    }
}

/// Display settings as the editor shows them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayDraft {
    /// Contrast percentage. Values outside `1..=100` are clamped on save.
    pub contrast_percent: i64,
    /// Screen-off timeout in whole seconds.
    pub timeout_seconds: u32,
}

impl From<&DisplaySettings> for DisplayDraft {
    fn from(display: &DisplaySettings) -> Self {
        Self {
            contrast_percent: i64::from(byte_to_percent(display.contrast)),
            timeout_seconds: millis_to_seconds(display.timeout),
        }
    }
}

impl From<DisplayDraft> for DisplaySettings {
    fn from(draft: DisplayDraft) -> Self {
        Self {
            contrast: percent_to_byte(draft.contrast_percent),
            timeout: seconds_to_millis(draft.timeout_seconds),
        }
    }
}

/// Drops empty tokens and normalizes case.
///
/// A single uppercase letter stays uppercase, everything else is lowercased.
/// The result may be empty.
pub fn cleaned<S: AsRef<str>>(combo: &[S]) -> Vec<String> {
    combo
        .iter()
        .map(|token| token.as_ref())
        .filter(|token| !token.is_empty())
        .map(|token| {
            let mut chars = token.chars();

            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_uppercase() => token.to_owned(),
                _ => token.to_lowercase(),
            }
        })
        .collect()
}

/// Replaces the binding of the switch at `index`.
pub fn apply_key_edit(
    cfg: Option<&Configuration>,
    index: usize,
    edit: &BindingEdit,
) -> Result<Option<Configuration>, EditError> {
    let Some(cfg) = cfg else {
        return Ok(None);
    };

    if index >= KEY_COUNT {
        return Err(EditError::KeyIndexOutOfRange(index));
    }

    let binding = edit.clone().into_binding()?;

    let mut updated = cfg.clone();
    updated.keys[index] = binding;

    Ok(Some(updated))
}

/// Replaces all three encoder bindings.
pub fn apply_encoder_edit(
    cfg: Option<&Configuration>,
    click: &BindingEdit,
    up: &BindingEdit,
    down: &BindingEdit,
) -> Result<Option<Configuration>, EditError> {
    let Some(cfg) = cfg else {
        return Ok(None);
    };

    let click = click.clone().into_binding()?;
    let up = up.clone().into_binding()?;
    let down = down.clone().into_binding()?;

    let mut updated = cfg.clone();
    updated.encoder.click = Some(click);
    updated.encoder.up = Some(up);
    updated.encoder.down = Some(down);

    Ok(Some(updated))
}

/// Replaces the `config` and `display` sections.
pub fn apply_config_display_edit(
    cfg: Option<&Configuration>,
    settings: SystemSettings,
    display: DisplayDraft,
) -> Result<Option<Configuration>, EditError> {
    let Some(cfg) = cfg else {
        return Ok(None);
    };

    let mut updated = cfg.clone();
    updated.config = settings;
    updated.display = display.into();

    Ok(Some(updated))
}
