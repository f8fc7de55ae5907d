//! Identity types for the pipeline system.
//!
//! `StageId` is a newtype over `u32` that doubles as the index of the stage
//! in its pipeline spec, so lookups into per-stage vectors are O(1).

use std::fmt;

/// Position of a stage within an assembled pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StageId(pub u32);

impl StageId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for StageId {
    fn from(index: usize) -> Self {
        StageId(index as u32)
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageId({})", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
