//! Control-loop processors.
//!
//! Each tick the [`Controller`](crate::Controller) runs, in this order:
//!
//! 1. [`Node::tick`]: device I/O, communication flags, command retries.
//! 2. [`Section::tick`]: aggregation, flow-difference timers, interlocks.
//! 3. [`Line::tick`]: debounced aggregation over sections.
//!
//! Later stages read what earlier stages committed in the same tick.

pub mod line;
pub mod node;
pub mod section;

pub use line::{Line, LineField};
pub use node::{CommandMask, Node};
pub use section::{Section, SectionNodes};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl $name {
            /// Position in the topology.
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

entity_id!(
    /// Handle of a node in a topology.
    NodeId
);
entity_id!(
    /// Handle of a section in a topology.
    SectionId
);
entity_id!(
    /// Handle of a line in a topology.
    LineId
);

/// Milliseconds in `d`, saturating at `u32::MAX`.
pub(crate) fn millis(d: std::time::Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}
