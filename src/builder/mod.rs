//! Query builder graph: persistent, composable descriptions of reads and writes.

mod changes;
mod graph;
mod node;

pub use changes::Changes;
pub use graph::{Query, QueryGraph};
pub use node::{NodeHandle, Ordering, Payload, PayloadValue, QueryNode, Source};
