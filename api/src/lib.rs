//! This crate provides the tooling for configuring the Editor's Keyboard, a
//! small macro pad with eight switches, a rotary encoder and an optional OLED
//! display, over its serial link.

#![deny(missing_docs)]

#[macro_use]
extern crate derive_more;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate tracing;

pub mod devices;
pub mod edit;
pub mod firmware;
pub mod key_token;
pub mod parsing;
pub mod schema;
pub mod serial_port;
pub mod session;
pub mod sync;
pub mod transport;
