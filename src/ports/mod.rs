//! Ports - Trait definitions for everything outside the domain.

pub mod storage;
pub mod uploader;
pub mod worker;
