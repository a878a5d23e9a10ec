//! Small set and heap utilities shared by the hash graph and linearizers.

mod heap;
mod object_set;

pub use heap::MinHeap;
pub use object_set::ObjectSet;
