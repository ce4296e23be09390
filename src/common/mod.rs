//! Shared utilities used by the library and the server binary.

pub mod logger;
