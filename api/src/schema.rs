//! Schemas for the documents exchanged with the keyboard.

pub mod device_config;
