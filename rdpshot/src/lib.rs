//! # rdpshot: one-shot RDP screenshot client
//!
//! Connects to a single RDP target, composes the bitmap updates it sends
//! into a framebuffer until the screen goes quiet, and emits one JSON
//! record carrying the encoded image or the reason there is none.
//!
//! ## Modules
//!
//! - **cli**: flags, merged over the config file
//! - **config**: TOML configuration with defaults
//! - **output**: stdout or per-target file sink
//! - **driver**: runs the session and emits its record

pub mod cli;
pub mod config;
pub mod driver;
pub mod output;
