//! gcloud-fs shared library: a read-only FUSE view of cloud storage, tabular catalogs and
//! identity policies.

/// Collaborator interface to the cloud APIs.
pub mod backend;
/// Disk-backed metadata caching.
pub mod cache;
/// Filesystem abstractions and the FUSE adapter.
pub mod fs;
pub mod io;
pub mod lister;
pub mod mount;
/// The node hierarchy served at the mountpoint.
pub mod tree;
