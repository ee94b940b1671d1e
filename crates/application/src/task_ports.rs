mod payloads;
mod queue;

pub use payloads::{
    CronPayload, EmptyMetadata, EventTaskPayload, GetGroupKeyRunIdPayload,
    GetGroupKeyRunTimedOutPayload, GetGroupKeyRunTimeoutPayload, GroupKeyActionRequeuePayload,
    JobRunIdPayload, JobRunTimedOutPayload, JobRunTimeoutPayload, ScheduledWorkflowPayload,
    StepRunIdPayload, StepRunTimedOutPayload, StepRunTimeoutPayload, TaskKind, TaskPayload,
    TenantMetadata, TickerRemovedPayload, WorkflowRunQueuedPayload, decode_task,
};
pub use queue::{QueueName, SUBSCRIPTION_BUFFER, Task, TaskQueue, TaskSubscription};
