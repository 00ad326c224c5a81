//! Binary codecs for files the depot stores in a different layout than the
//! workspace.

pub mod apple_double;

pub use apple_double::{
    apple_double_to_apple_single, resource_fork_path, CodecError, Entry, Header,
    APPLE_DOUBLE_MAGIC, APPLE_SINGLE_MAGIC, DATA_FORK_ID, ENTRY_SIZE, HEADER_SIZE,
};
