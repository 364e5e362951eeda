//! Process group orchestration: YAML group specifications, register
//! materialization, supervised launch and atomic teardown.

mod error;
pub mod group;
pub mod sink;
pub mod spec;
mod supervisor;

pub use error::OrchestratorError;
pub use group::{
    run_blocking, run_to_completion, GroupHandle, GroupReport, GroupState, ProcessGroup,
    ProcessReport, ProcessState,
};
pub use sink::{spawn_sink, LogLine, LogSender, Stream};
pub use spec::{GroupSpec, ProcessSpec, ResolvedProcess, DEFAULT_GRACE_PERIOD};
