mod inputs;
mod repository;

pub use inputs::{
    AllStepRunsQuery, CreateWorkflowRunInput, StepRunListQuery, StepRunUpdateInfo,
    UpdateGetGroupKeyRunInput, UpdateStepRunInput, UpdateStepRunOverridesDataInput,
};
pub use repository::{
    EventRepository, StepRunRepository, TenantRepository, TickerRepository, WorkflowRepository,
    WorkflowRunRepository,
};
