use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;
use drover_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// One step declared inside a job definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step identifier unique within its job.
    pub readable_id: String,
    /// Action identifier dispatched to workers.
    pub action: String,
    /// Optional execution timeout such as `30s` or `5m`.
    pub timeout: Option<String>,
    /// Number of retries allowed after a failure.
    pub retries: u32,
    /// Readable ids of steps that must succeed first.
    pub parents: Vec<String>,
}

/// One job declared inside a workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Job name unique within its workflow version.
    pub name: String,
    /// Optional job timeout such as `10m`.
    pub timeout: Option<String>,
    /// Ordered job steps.
    pub steps: Vec<StepDefinition>,
}

/// Concurrency settings that require a group key before jobs start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConcurrency {
    /// Action that resolves the concurrency group key.
    pub action: String,
    /// Optional timeout for the group key run.
    pub timeout: Option<String>,
    /// Maximum concurrent runs per group key.
    pub max_runs: u32,
}

/// Input payload used to construct a validated workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowVersionInput {
    /// Version identifier.
    pub id: String,
    /// Parent workflow identifier.
    pub workflow_id: String,
    /// Parent workflow name.
    pub workflow_name: String,
    /// Version label.
    pub version: String,
    /// Event keys that trigger this version.
    pub event_triggers: Vec<String>,
    /// Five-field cron expressions that trigger this version.
    pub cron_triggers: Vec<String>,
    /// Optional timeout for scheduling step runs.
    pub schedule_timeout: Option<String>,
    /// Optional concurrency settings.
    pub concurrency: Option<WorkflowConcurrency>,
    /// Ordered job definitions.
    pub jobs: Vec<JobDefinition>,
}

/// Validated workflow version definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowVersion {
    id: NonEmptyString,
    workflow_id: NonEmptyString,
    workflow_name: NonEmptyString,
    version: String,
    event_triggers: Vec<String>,
    cron_triggers: Vec<String>,
    schedule_timeout: Option<String>,
    concurrency: Option<WorkflowConcurrency>,
    jobs: Vec<JobDefinition>,
}

impl WorkflowVersion {
    /// Creates a validated workflow version.
    pub fn new(input: WorkflowVersionInput) -> AppResult<Self> {
        let WorkflowVersionInput {
            id,
            workflow_id,
            workflow_name,
            version,
            event_triggers,
            cron_triggers,
            schedule_timeout,
            concurrency,
            jobs,
        } = input;

        if event_triggers.iter().any(|key| key.trim().is_empty()) {
            return Err(AppError::Validation(
                "event trigger keys must not be empty".to_owned(),
            ));
        }

        for expression in &cron_triggers {
            parse_cron(expression)?;
        }

        if let Some(timeout) = &schedule_timeout {
            parse_timeout(timeout)?;
        }

        if let Some(concurrency) = &concurrency {
            validate_concurrency(concurrency)?;
        }

        validate_jobs(&jobs)?;

        Ok(Self {
            id: NonEmptyString::new(id)?,
            workflow_id: NonEmptyString::new(workflow_id)?,
            workflow_name: NonEmptyString::new(workflow_name)?,
            version,
            event_triggers,
            cron_triggers,
            schedule_timeout,
            concurrency,
            jobs,
        })
    }

    /// Returns the version identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the parent workflow identifier.
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        self.workflow_id.as_str()
    }

    /// Returns the parent workflow name.
    #[must_use]
    pub fn workflow_name(&self) -> &str {
        self.workflow_name.as_str()
    }

    /// Returns the version label.
    #[must_use]
    pub fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns event keys that trigger this version.
    #[must_use]
    pub fn event_triggers(&self) -> &[String] {
        &self.event_triggers
    }

    /// Returns cron expressions that trigger this version.
    #[must_use]
    pub fn cron_triggers(&self) -> &[String] {
        &self.cron_triggers
    }

    /// Returns the optional schedule timeout.
    #[must_use]
    pub fn schedule_timeout(&self) -> Option<&str> {
        self.schedule_timeout.as_deref()
    }

    /// Returns concurrency settings when the version requires a group key.
    #[must_use]
    pub fn concurrency(&self) -> Option<&WorkflowConcurrency> {
        self.concurrency.as_ref()
    }

    /// Returns ordered job definitions.
    #[must_use]
    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    /// Returns whether an event key triggers this version.
    #[must_use]
    pub fn matches_event_key(&self, key: &str) -> bool {
        self.event_triggers.iter().any(|trigger| trigger == key)
    }

    /// Returns whether a cron expression is still registered on this version.
    #[must_use]
    pub fn has_cron_trigger(&self, expression: &str) -> bool {
        self.cron_triggers
            .iter()
            .any(|trigger| trigger.trim() == expression.trim())
    }

    /// Converts the version back to its construction input.
    #[must_use]
    pub fn to_input(&self) -> WorkflowVersionInput {
        WorkflowVersionInput {
            id: self.id.as_str().to_owned(),
            workflow_id: self.workflow_id.as_str().to_owned(),
            workflow_name: self.workflow_name.as_str().to_owned(),
            version: self.version.clone(),
            event_triggers: self.event_triggers.clone(),
            cron_triggers: self.cron_triggers.clone(),
            schedule_timeout: self.schedule_timeout.clone(),
            concurrency: self.concurrency.clone(),
            jobs: self.jobs.clone(),
        }
    }
}

/// Parses a timeout such as `45s`, `5m` or `2h`.
pub fn parse_timeout(value: &str) -> AppResult<TimeDelta> {
    let trimmed = value.trim();
    let split_at = trimmed
        .find(|character: char| !character.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (amount, unit) = trimmed.split_at(split_at);

    let amount = amount.parse::<i64>().map_err(|error| {
        AppError::Validation(format!("invalid timeout '{value}': {error}"))
    })?;

    if amount <= 0 {
        return Err(AppError::Validation(format!(
            "timeout '{value}' must be greater than zero"
        )));
    }

    let delta = match unit {
        "s" => TimeDelta::try_seconds(amount),
        "m" => TimeDelta::try_minutes(amount),
        "h" => TimeDelta::try_hours(amount),
        _ => {
            return Err(AppError::Validation(format!(
                "timeout '{value}' must end with one of s, m or h"
            )));
        }
    };

    delta.ok_or_else(|| AppError::Validation(format!("timeout '{value}' is out of range")))
}

/// Parses a five-field cron expression (a six-field one is accepted as is).
///
/// Five-field expressions number days of the week from 0 (Sunday) to 6, with
/// 7 as an alias for Sunday.
pub fn parse_cron(expression: &str) -> AppResult<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, day_of_month, month, day_of_week] => format!(
            "0 {minute} {hour} {day_of_month} {month} {}",
            day_of_week_field(expression, day_of_week)?
        ),
        fields if matches!(fields.len(), 6 | 7) => fields.join(" "),
        _ => {
            return Err(AppError::Validation(format!(
                "cron expression '{expression}' must have five fields"
            )));
        }
    };

    Schedule::from_str(normalized.as_str()).map_err(|error| {
        AppError::Validation(format!("invalid cron expression '{expression}': {error}"))
    })
}

// Rewrites numeric days into the 1 (Sunday) to 7 (Saturday) numbering of `cron`.
fn day_of_week_field(expression: &str, field: &str) -> AppResult<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_owned());
    }

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for item in field.split(',') {
        match standard_days(expression, item)? {
            Some(standard) => days.extend(standard.into_iter().map(|day| day % 7 + 1)),
            None => named.push(item.to_owned()),
        }
    }

    Ok(days
        .into_iter()
        .map(|day| day.to_string())
        .chain(named)
        .collect::<Vec<_>>()
        .join(","))
}

fn standard_days(expression: &str, item: &str) -> AppResult<Option<Vec<u32>>> {
    let invalid = || AppError::Validation(format!("invalid day of week '{item}' in '{expression}'"));

    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step.parse::<usize>().map_err(|_| invalid())?)),
        None => (item, None),
    };

    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((start, end)) = range.split_once('-') {
        let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) else {
            return Ok(None);
        };
        (start, end)
    } else {
        let Ok(day) = range.parse::<u32>() else {
            return Ok(None);
        };
        (day, if step.is_some() { 6 } else { day })
    };

    if start > end || end > 7 || step == Some(0) {
        return Err(invalid());
    }

    Ok(Some((start..=end).step_by(step.unwrap_or(1)).collect()))
}

/// Returns the next fire time of a schedule strictly after `after`.
#[must_use]
pub fn next_cron_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

fn validate_concurrency(concurrency: &WorkflowConcurrency) -> AppResult<()> {
    if concurrency.action.trim().is_empty() {
        return Err(AppError::Validation(
            "concurrency action must not be empty".to_owned(),
        ));
    }

    if concurrency.max_runs == 0 {
        return Err(AppError::Validation(
            "concurrency max_runs must be greater than zero".to_owned(),
        ));
    }

    if let Some(timeout) = &concurrency.timeout {
        parse_timeout(timeout)?;
    }

    Ok(())
}

fn validate_jobs(jobs: &[JobDefinition]) -> AppResult<()> {
    if jobs.is_empty() {
        return Err(AppError::Validation(
            "workflow version must include at least one job".to_owned(),
        ));
    }

    let mut job_names = HashSet::new();
    for job in jobs {
        if job.name.trim().is_empty() {
            return Err(AppError::Validation("job name must not be empty".to_owned()));
        }

        if !job_names.insert(job.name.as_str()) {
            return Err(AppError::Validation(format!(
                "job name '{}' is declared more than once",
                job.name
            )));
        }

        if let Some(timeout) = &job.timeout {
            parse_timeout(timeout)?;
        }

        validate_steps(job)?;
    }

    Ok(())
}

fn validate_steps(job: &JobDefinition) -> AppResult<()> {
    if job.steps.is_empty() {
        return Err(AppError::Validation(format!(
            "job '{}' must include at least one step",
            job.name
        )));
    }

    // Parents must be declared earlier, which keeps the step graph acyclic.
    let mut declared: HashSet<&str> = HashSet::new();
    for step in &job.steps {
        if step.readable_id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "job '{}' has a step without readable_id",
                job.name
            )));
        }

        if step.action.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "step '{}' requires an action",
                step.readable_id
            )));
        }

        if let Some(timeout) = &step.timeout {
            parse_timeout(timeout)?;
        }

        for parent in &step.parents {
            if !declared.contains(parent.as_str()) {
                return Err(AppError::Validation(format!(
                    "step '{}' references unknown or later parent '{parent}'",
                    step.readable_id
                )));
            }
        }

        if !declared.insert(step.readable_id.as_str()) {
            return Err(AppError::Validation(format!(
                "step readable_id '{}' is declared more than once in job '{}'",
                step.readable_id, job.name
            )));
        }
    }

    Ok(())
}
