//! Device specific layouts and handles.

pub mod macropad;
