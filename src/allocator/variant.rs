//! Global and private allocator behavior

use serde::{Deserialize, Serialize};

use crate::{error::Result, memory::ClusterSource};

use super::core::AllocatorState;

/// Which lifecycle an allocator follows.
///
/// A global allocator is shared by every owner that does not ask for its
/// own memory. It keeps its clusters across users and is only torn down
/// with the process. A private allocator serves a single owner and gives
/// its memory back as soon as the last user leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocatorKind {
    Global,
    Private,
}

impl AllocatorKind {
    /// Whether this is a per-owner allocator
    pub fn is_private(self) -> bool {
        self == AllocatorKind::Private
    }

    /// Bring the pools up for one more user. The caller bumps `active` on success.
    pub(crate) fn finalize(self, state: &mut AllocatorState, source: &dyn ClusterSource) -> Result<()> {
        match self {
            AllocatorKind::Global => {
                // the first user applies any pending configuration,
                // later users share whatever is already there
                if state.active == 0 {
                    state.config()?;
                }
                if !state.finalized {
                    state.finalize_all(source)?;
                }
                Ok(())
            }
            AllocatorKind::Private => {
                if state.active == 0 {
                    state.config()?;
                    state.finalize_all(source)?;
                }
                Ok(())
            }
        }
    }

    /// Called once `active` has dropped to zero
    pub(crate) fn release(self, state: &mut AllocatorState) {
        state.group = None;
        match self {
            AllocatorKind::Global => {}
            AllocatorKind::Private => state.reset_all(),
        }
    }

    /// Whether `get_info` applies pending configuration before answering
    pub(crate) fn configures_on_info(self) -> bool {
        self == AllocatorKind::Global
    }
}

impl std::fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatorKind::Global => write!(f, "global"),
            AllocatorKind::Private => write!(f, "private"),
        }
    }
}
