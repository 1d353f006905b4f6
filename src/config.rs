//! Build-time configuration constants.
//!
//! Generated by `build.rs` from `fixpool.toml` (override the path with the
//! `FIXPOOL_CONFIG` environment variable). Provides the class data-size
//! table and the fixed buffer sizes of the auxiliary record.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
