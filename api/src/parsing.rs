//! Parsers for the text the keyboard firmware streams back.

pub mod frame;
