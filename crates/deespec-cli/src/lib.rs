//! Library half of the `deespec` binary: configuration loading kept
//! separate from `main.rs` so it's unit-testable without going through
//! `assert_cmd`.

pub mod config;
