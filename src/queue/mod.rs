pub mod overdue;
pub mod overflow;
pub mod spill;

pub use overdue::{Delayed, MostOverdueDelayQueue};
pub use overflow::BoundedOverflowQueue;
pub use spill::{SpillError, SpillStore, TempfileSpillStore, VecSpillStore};
