//! Ring sets: descriptor headers, ring records and their buffers
//!
//! An owner (one adapter attachment) gets one header object followed by
//! one ring object per ring, each with its slots pointing at buffers. The
//! header carries signed offsets from itself to every ring so a consumer
//! holding only the header offset can reach everything.

pub mod adapter;
pub mod assembler;
pub mod extra;
pub mod layout;

pub use adapter::{AdapterDescriptor, Direction};
pub use assembler::{RingInfo, RingSet, RingSetAssembler};
pub use extra::ExtraBufferChain;
pub use layout::{RingHeader, RingSetHeader, Slot};
