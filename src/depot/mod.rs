//! Depot client plumbing: subprocess invocation, tagged-output parsing, and
//! the queries the sweep issues.

pub mod client;
pub mod query;
pub mod ztag;

pub use client::{DepotClient, TaggedOutput};
pub use query::{
    client_filter, escape_path, ClientFiles, ClientWorkspace, DepotFileRecord, FileType, HaveFiles,
};
pub use ztag::{TaggedRecord, TaggedRecords, WaitTimer};
