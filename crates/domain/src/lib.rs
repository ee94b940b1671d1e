//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod event;
mod run;
mod ticker;
mod workflow;

pub use event::{Event, ScheduledWorkflowTrigger};
pub use run::{
    GetGroupKeyRun, JobRun, RunStatus, StepRun, StepRunResultArchive, StepRunStatus, WorkflowRun,
    WorkflowRunTrigger,
};
pub use ticker::{Tenant, Ticker};
pub use workflow::{
    JobDefinition, StepDefinition, WorkflowConcurrency, WorkflowVersion, WorkflowVersionInput,
    next_cron_fire, parse_cron, parse_timeout,
};
