//! Shared helpers for the relay binary.

pub mod bootstrap;
