//! Per-operation asset handlers.
//!
//! Each handler reads the asset's source, applies its transform and hands
//! the result to the context's write dispatch. Handlers return `Ok(false)`
//! for a missing source (already logged as missing) and `Err` for failures.

pub mod audio;
pub mod copy;
pub mod patch;
