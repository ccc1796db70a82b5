//! Submit / poll / download driver for async generation tasks.
//!
//! Each job is driven on the caller's thread and owns all of its state; the only thing
//! jobs share is the [`Transport`] (and its connection pool). Abandoning a job, by
//! dropping the call or ignoring its result, does not cancel it remotely: the service
//! keeps running the task and may still bill for it. Timeouts are client-side only.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use modelverse_contracts::events::EventWriter;
use modelverse_contracts::jobs::{
    Job, JobHistory, JobShapeError, JobSubmission, StatusEnvelope, SubmitEnvelope, TaskStatus,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::transport::Transport;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 3;
pub const DEFAULT_UNKNOWN_TOLERANCE: u32 = 1;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_FAILURE_MESSAGE: &str = "Unknown error";

/// Injectable delay between polls.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Source of "now" for the wait budget. Status calls count against it as well as sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    /// Upper bound on the time spent polling, status calls included.
    pub max_wait: Duration,
    /// Consecutive transient poll failures tolerated before giving up.
    pub max_transient_retries: u32,
    /// `Unknown` statuses tolerated per job before escalating.
    pub max_unknown_statuses: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_WAIT)
    }
}

impl PollPolicy {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            max_wait,
            max_transient_retries: DEFAULT_TRANSIENT_RETRIES,
            max_unknown_statuses: DEFAULT_UNKNOWN_TOLERANCE,
        }
    }

    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }

    pub fn with_unknown_tolerance(mut self, tolerated: u32) -> Self {
        self.max_unknown_statuses = tolerated;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub task_id: String,
    pub result_url: String,
    pub polls: u32,
    /// Time from the first poll until the terminal status arrived.
    pub waited: Duration,
    pub history: JobHistory,
}

#[derive(Clone)]
pub struct AsyncJobClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    events: Option<EventWriter>,
}

impl AsyncJobClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(ThreadSleeper),
            clock: Arc::new(SystemClock),
            events: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Sends the job once. Submission is never retried: a lost answer could still have
    /// created a billable task.
    pub fn submit(&self, submission: JobSubmission) -> Result<String, JobError> {
        let payload = submission.payload();
        let raw = self
            .transport
            .submit_task(&payload)
            .map_err(|err| JobError::from_transport(None, err))?;
        let envelope = SubmitEnvelope::from_json(&raw).map_err(|err| JobError::Protocol {
            task_id: None,
            detail: err.to_string(),
        })?;
        let Some(task_id) = envelope.task_id().map(str::to_string) else {
            warn!(
                model = %submission.model,
                request_id = envelope.request_id.as_deref().unwrap_or("unknown"),
                "submission returned no task id"
            );
            return Err(JobError::Submission {
                request_id: envelope.request_id,
            });
        };
        info!(task_id = %task_id, model = %submission.model, "task submitted");
        JobEvents::new(self.events.as_ref(), &task_id)
            .emit("job_submitted", json!({ "model": submission.model }));
        Ok(task_id)
    }

    /// One status request. `Failure` comes back as `TaskFailed`; every other status,
    /// `Unknown` included, comes back as a `Job`.
    pub fn poll(&self, task_id: &str) -> Result<Job, JobError> {
        let raw = self
            .transport
            .task_status(task_id)
            .map_err(|err| JobError::from_transport(Some(task_id), err))?;
        let shape_error = |err: JobShapeError| JobError::Protocol {
            task_id: Some(task_id.to_string()),
            detail: err.to_string(),
        };
        let envelope = StatusEnvelope::from_json(&raw).map_err(shape_error)?;
        let job = Job::from_status(task_id, envelope).map_err(shape_error)?;
        if job.status() == TaskStatus::Failure {
            return Err(JobError::TaskFailed {
                task_id: task_id.to_string(),
                message: job
                    .error_message()
                    .unwrap_or(DEFAULT_FAILURE_MESSAGE)
                    .to_string(),
            });
        }
        Ok(job)
    }

    pub fn run_to_completion(
        &self,
        submission: JobSubmission,
        policy: &PollPolicy,
    ) -> Result<String, JobError> {
        self.run(submission, policy).map(|completed| completed.result_url)
    }

    /// Submits, then polls until a terminal status, the wait budget runs out, or a
    /// fatal error. Polls for one job are strictly sequential.
    pub fn run(&self, submission: JobSubmission, policy: &PollPolicy) -> Result<CompletedJob, JobError> {
        let task_id = self.submit(submission)?;
        let events = JobEvents::new(self.events.as_ref(), &task_id);
        let result = self.drive(&task_id, policy, &events);
        match &result {
            Ok(completed) => {
                info!(task_id = %task_id, polls = completed.polls, "task succeeded");
                events.emit(
                    "job_succeeded",
                    json!({
                        "result_url": completed.result_url,
                        "polls": completed.polls,
                        "waited_s": completed.waited.as_secs_f64(),
                    }),
                );
            }
            Err(err) => {
                warn!(task_id = %task_id, kind = err.kind(), error = %err, "task did not complete");
                events.emit(
                    "job_failed",
                    json!({ "kind": err.kind(), "error": err.to_string() }),
                );
            }
        }
        result
    }

    fn drive(&self, task_id: &str, policy: &PollPolicy, events: &JobEvents) -> Result<CompletedJob, JobError> {
        let mut history = JobHistory::new();
        let started = self.clock.now();
        let mut polls: u32 = 0;
        let mut transient_failures: u32 = 0;
        let mut unknown_seen: u32 = 0;

        loop {
            polls += 1;
            match self.poll(task_id) {
                Ok(job) => {
                    transient_failures = 0;
                    record(&mut history, task_id, job.status())?;
                    debug!(task_id, status = %job.status(), polls, "task polled");
                    events.emit("job_polled", json!({ "status": job.status().as_str(), "poll": polls }));
                    match job.status() {
                        TaskStatus::Success => {
                            let result_url = job.result_url().map(str::to_string).ok_or_else(|| {
                                JobError::Protocol {
                                    task_id: Some(task_id.to_string()),
                                    detail: "task succeeded but no artifact URL was returned".to_string(),
                                }
                            })?;
                            return Ok(CompletedJob {
                                task_id: task_id.to_string(),
                                result_url,
                                polls,
                                waited: self.clock.now().saturating_duration_since(started),
                                history,
                            });
                        }
                        TaskStatus::Unknown => {
                            unknown_seen += 1;
                            let reported = job.reported_status().unwrap_or("<missing>").to_string();
                            if unknown_seen > policy.max_unknown_statuses {
                                return Err(JobError::Protocol {
                                    task_id: Some(task_id.to_string()),
                                    detail: format!("unknown task status: {reported}"),
                                });
                            }
                            warn!(task_id, reported = %reported, "unrecognised task status, polling again");
                        }
                        TaskStatus::Pending | TaskStatus::Running | TaskStatus::Failure => {}
                    }
                }
                Err(JobError::TaskFailed { task_id: failed_id, message }) => {
                    record(&mut history, task_id, TaskStatus::Failure)?;
                    events.emit("job_polled", json!({ "status": TaskStatus::Failure.as_str(), "poll": polls }));
                    return Err(JobError::TaskFailed {
                        task_id: failed_id,
                        message,
                    });
                }
                Err(JobError::Network { message, .. }) => {
                    transient_failures += 1;
                    if transient_failures > policy.max_transient_retries {
                        return Err(JobError::Network {
                            task_id: Some(task_id.to_string()),
                            attempts: transient_failures,
                            message,
                        });
                    }
                    warn!(
                        task_id,
                        attempt = transient_failures,
                        max = policy.max_transient_retries,
                        error = %message,
                        "transient poll failure, retrying"
                    );
                    events.emit(
                        "job_retry",
                        json!({
                            "attempt": transient_failures,
                            "max_retries": policy.max_transient_retries,
                            "error": message,
                        }),
                    );
                }
                Err(other) => return Err(other),
            }

            let waited = self.clock.now().saturating_duration_since(started);
            let fits = waited
                .checked_add(policy.poll_interval)
                .is_some_and(|next| next <= policy.max_wait);
            if !fits {
                return Err(JobError::Timeout {
                    task_id: task_id.to_string(),
                    waited,
                    polls,
                });
            }
            self.sleeper.sleep(policy.poll_interval);
        }
    }

    /// Fetches a finished artifact. Never resubmits: the remote job already succeeded.
    pub fn download(&self, result_url: &str) -> Result<Vec<u8>, JobError> {
        let bytes = self
            .transport
            .fetch(result_url)
            .map_err(|err| JobError::Download {
                url: result_url.to_string(),
                reason: err.to_string(),
            })?;
        if bytes.is_empty() {
            return Err(JobError::Download {
                url: result_url.to_string(),
                reason: "empty body".to_string(),
            });
        }
        info!(url = result_url, bytes = bytes.len(), "artifact downloaded");
        if let Some(events) = &self.events {
            JobEvents(Some(events.clone())).emit(
                "artifact_downloaded",
                json!({ "url": result_url, "bytes": bytes.len() }),
            );
        }
        Ok(bytes)
    }
}

fn record(history: &mut JobHistory, task_id: &str, status: TaskStatus) -> Result<(), JobError> {
    history.record(status).map_err(|err| JobError::Protocol {
        task_id: Some(task_id.to_string()),
        detail: err.to_string(),
    })
}

/// Event sink for one job; a failed append is logged and otherwise ignored.
struct JobEvents(Option<EventWriter>);

impl JobEvents {
    fn new(events: Option<&EventWriter>, task_id: &str) -> Self {
        Self(events.map(|writer| writer.scoped("task_id", task_id)))
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(writer) = &self.0 else {
            return;
        };
        let payload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = writer.emit(event_type, payload) {
            warn!(event = event_type, error = %err, "failed to append run event");
        }
    }
}
