/// Disk-backed TTL cache for backend metadata.
pub mod metadata;
/// Per-key request coalescing.
pub mod single_flight;
