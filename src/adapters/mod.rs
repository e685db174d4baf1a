//! Adapters - Concrete implementations of ports.

pub mod client;
pub mod local;

pub use client::HttpUploader;
