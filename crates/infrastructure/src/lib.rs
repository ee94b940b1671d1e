//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_run_store;
mod in_memory_task_queue;
mod postgres_run_store;
mod redis_task_queue;
mod run_records;

#[cfg(test)]
mod test_fixtures;

pub use in_memory_run_store::InMemoryRunStore;
pub use in_memory_task_queue::InMemoryTaskQueue;
pub use postgres_run_store::PostgresRunStore;
pub use redis_task_queue::RedisTaskQueue;
