pub mod build;
pub mod stage;

pub use build::{build_graph, Task, TaskGraph, TaskStatus};
pub use stage::{
    discover_samples, BuiltinOp, FileRole, SampleFile, StageAction, StageDescriptor, StageKind,
};
