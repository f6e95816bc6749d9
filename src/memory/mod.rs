//! Cluster memory: page-aligned backing allocations and the sources that provide them
//!
//! Object pools never touch the platform allocator directly. They ask a
//! [`ClusterSource`] for one cluster at a time and keep the returned
//! [`Cluster`] until the pool is reset.

pub mod cluster;
pub mod fault;
pub mod source;

pub use cluster::Cluster;
pub use fault::FaultyClusterSource;
pub use source::{system_page_size, AnonClusterSource, ClusterSource};
