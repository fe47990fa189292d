//! Provides the parser that finds sentinel terminated frames in the data
//! streamed by the firmware.
//!
//! The firmware does not length-prefix anything. A message is over once a
//! fixed marker such as `end-json` shows up, and that marker may straddle two
//! reads, so the parser always runs over the whole accumulated buffer.

use winnow::{Partial, combinator::terminated, prelude::*, token::take_until};

/// Error when looking for a frame in a buffer fails.
#[derive(Clone, Debug, Display, Error)]
pub enum ParseFrameError {
    /// The sentinel has not (fully) arrived yet.
    #[display("data is incomplete")]
    Incomplete,
    /// We encountered an unrecoverable error parsing the frame.
    #[display("failed to parse frame:\n{_0}")]
    Err(#[error(not(source))] String),
}

impl ParseFrameError {
    fn from_winnow_err(err: winnow::error::ErrMode<winnow::error::ContextError>) -> Self {
        match err {
            winnow::error::ErrMode::Incomplete(_) => Self::Incomplete,
            err => Self::Err(err.to_string()),
        }
    }
}

/// A buffer split around the first occurrence of its sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<'s> {
    /// Everything received before the sentinel.
    pub body: &'s str,
    /// Everything received after the sentinel.
    pub trailing: &'s str,
}

impl Frame<'_> {
    /// The buffer with the sentinel removed and surrounding whitespace
    /// trimmed.
    pub fn payload(&self) -> String {
        let mut payload = String::with_capacity(self.body.len() + self.trailing.len());

        payload.push_str(self.body);
        payload.push_str(self.trailing);

        payload.trim().to_owned()
    }
}

/// Looks for `sentinel` in `buffer`.
///
/// Returns [`ParseFrameError::Incomplete`] until the sentinel is present in
/// full.
pub fn find_frame<'s>(buffer: &'s str, sentinel: &str) -> Result<Frame<'s>, ParseFrameError> {
    let mut input = Partial::new(buffer);

    let body = frame_parser(&mut input, sentinel).map_err(ParseFrameError::from_winnow_err)?;

    Ok(Frame {
        body,
        trailing: input.into_inner(),
    })
}

/// Returns `true` once `buffer` contains the whole `sentinel`.
pub fn contains_sentinel(buffer: &str, sentinel: &str) -> bool {
    find_frame(buffer, sentinel).is_ok()
}

fn frame_parser<'s>(input: &mut Partial<&'s str>, sentinel: &str) -> ModalResult<&'s str> {
    terminated(take_until(0.., sentinel), sentinel).parse_next(input)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parser_succeeds_on_complete_frame() {
        let frame = find_frame("{\"a\":1}end-json", "end-json").unwrap();

        assert_eq!(frame.body, "{\"a\":1}");
        assert_eq!(frame.trailing, "");
        assert_eq!(frame.payload(), "{\"a\":1}");
    }

    #[test]
    fn parser_keeps_text_after_the_sentinel() {
        let data = "\r\n{\"a\":1}\r\nend-json\r\n";

        let frame = find_frame(data, "end-json").unwrap();

        assert_eq!(frame.trailing, "\r\n");
        assert_eq!(frame.payload(), "{\"a\":1}");
    }

    #[test]
    fn parser_fails_on_incomplete_data() {
        let res = find_frame("{\"a\":1}end-js", "end-json").unwrap_err();

        assert!(matches! {res, ParseFrameError::Incomplete});
    }

    #[test]
    fn sentinel_split_across_reads_is_found_once_joined() {
        let mut buffer = String::from("ok\nready-to-reb");

        assert!(!contains_sentinel(&buffer, "ready-to-reboot"));

        buffer.push_str("oot\n");

        assert!(contains_sentinel(&buffer, "ready-to-reboot"));
    }
}
