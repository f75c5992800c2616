//! Chess Live (workspace facade crate).
//!
//! Keeps a single `chess_live::{types,core,adapter}` public API while the
//! implementation lives in dedicated crates under `crates/`.

pub use chess_live_adapter as adapter;
pub use chess_live_core as core;
pub use chess_live_types as types;
