use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Remote task status as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failure,
    Unknown,
}

impl TaskStatus {
    /// Maps the service's `task_status` string. Anything unrecognised, including a
    /// missing field, is `Unknown`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Success") => Self::Success,
            Some("Failure") => Self::Failure,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::Unknown => "Unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /v1/tasks/submit`.
///
/// Fields are read one at a time so a single oddly typed field never hides the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitEnvelope {
    pub task_id: Option<String>,
    pub request_id: Option<String>,
}

impl SubmitEnvelope {
    pub fn from_json(raw: &Value) -> Result<Self, JobShapeError> {
        let body = raw
            .as_object()
            .ok_or_else(|| JobShapeError::Malformed(format!("submit body is not an object: {raw}")))?;
        let output = optional_object(body.get("output"), "output")?;
        Ok(Self {
            task_id: output.and_then(|output| scalar_text(output.get("task_id"))),
            request_id: scalar_text(body.get("request_id")),
        })
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }
}

/// Body of `GET /v1/tasks/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusEnvelope {
    pub output: StatusOutput,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusOutput {
    pub task_status: Option<String>,
    /// String entries of `urls`, in order; nulls and other shapes are skipped.
    pub urls: Vec<String>,
    pub error_message: Option<String>,
}

impl StatusEnvelope {
    pub fn from_json(raw: &Value) -> Result<Self, JobShapeError> {
        let body = raw
            .as_object()
            .ok_or_else(|| JobShapeError::Malformed(format!("status body is not an object: {raw}")))?;
        let output = optional_object(body.get("output"), "output")?;
        let field = |key: &'static str| output.and_then(|output| output.get(key));
        Ok(Self {
            output: StatusOutput {
                task_status: field("task_status")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                urls: match field("urls") {
                    Some(Value::Array(rows)) => rows
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|url| !url.is_empty())
                        .map(str::to_string)
                        .collect(),
                    Some(Value::String(url)) if !url.trim().is_empty() => vec![url.trim().to_string()],
                    _ => Vec::new(),
                },
                error_message: error_text(field("error_message")),
            },
            request_id: scalar_text(body.get("request_id")),
        })
    }
}

fn optional_object<'a>(
    value: Option<&'a Value>,
    name: &str,
) -> Result<Option<&'a Map<String, Value>>, JobShapeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(JobShapeError::Malformed(format!("`{name}` is not an object: {other}"))),
    }
}

/// Strings are trimmed; numbers are rendered. Blank or other shapes give `None`.
fn scalar_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// `error_message` may be a string, an `{message}` object or anything else JSON.
fn error_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(text) => text.trim().to_string(),
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) if !message.trim().is_empty() => message.trim().to_string(),
            _ => Value::Object(map.clone()).to_string(),
        },
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobShapeError {
    SuccessWithoutUrl,
    Malformed(String),
}

impl fmt::Display for JobShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuccessWithoutUrl => f.write_str("task succeeded but no artifact URL was returned"),
            Self::Malformed(detail) => write!(f, "malformed response: {detail}"),
        }
    }
}

/// One remote generation task as last observed.
///
/// `result_url` is present exactly when the status is `Success` and `error_message`
/// only when it is `Failure`; the constructors are the only way in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    task_id: String,
    status: TaskStatus,
    reported_status: Option<String>,
    result_url: Option<String>,
    error_message: Option<String>,
}

impl Job {
    pub fn from_status(task_id: impl Into<String>, envelope: StatusEnvelope) -> Result<Self, JobShapeError> {
        let output = envelope.output;
        let status = TaskStatus::parse(output.task_status.as_deref());
        let result_url = match status {
            TaskStatus::Success => Some(
                output
                    .urls
                    .into_iter()
                    .next()
                    .ok_or(JobShapeError::SuccessWithoutUrl)?,
            ),
            _ => None,
        };
        let error_message = match status {
            TaskStatus::Failure => output.error_message,
            _ => None,
        };
        Ok(Self {
            task_id: task_id.into(),
            status,
            reported_status: output.task_status,
            result_url,
            error_message,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// The raw `task_status` string, kept for diagnosing `Unknown`.
    pub fn reported_status(&self) -> Option<&str> {
        self.reported_status.as_deref()
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result_url.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal status transition {} -> {}", self.from, self.to)
    }
}

/// Statuses a job has visited since submission, in poll order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobHistory {
    visited: Vec<TaskStatus>,
}

impl JobHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, status: TaskStatus) -> Result<(), TransitionError> {
        if let Some(last) = self.last() {
            if last.is_terminal() {
                return Err(TransitionError {
                    from: last,
                    to: status,
                });
            }
        }
        self.visited.push(status);
        Ok(())
    }

    pub fn last(&self) -> Option<TaskStatus> {
        self.visited.last().copied()
    }

    pub fn is_finished(&self) -> bool {
        self.last().map(TaskStatus::is_terminal).unwrap_or(false)
    }

    pub fn visited(&self) -> &[TaskStatus] {
        &self.visited
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(value: serde_json::Value) -> StatusEnvelope {
        StatusEnvelope::from_json(&value).unwrap()
    }

    #[test]
    fn status_strings_map_exactly() {
        assert_eq!(TaskStatus::parse(Some("Pending")), TaskStatus::Pending);
        assert_eq!(TaskStatus::parse(Some("Running")), TaskStatus::Running);
        assert_eq!(TaskStatus::parse(Some("Success")), TaskStatus::Success);
        assert_eq!(TaskStatus::parse(Some("Failure")), TaskStatus::Failure);
        assert_eq!(TaskStatus::parse(Some("success")), TaskStatus::Unknown);
        assert_eq!(TaskStatus::parse(Some("Queued")), TaskStatus::Unknown);
        assert_eq!(TaskStatus::parse(None), TaskStatus::Unknown);
    }

    #[test]
    fn success_carries_first_url_only() {
        let job = Job::from_status(
            "t-1",
            envelope(json!({"output": {"task_status": "Success", "urls": ["http://x/video.mp4", "http://x/other.mp4"]}})),
        )
        .unwrap();
        assert_eq!(job.status(), TaskStatus::Success);
        assert_eq!(job.result_url(), Some("http://x/video.mp4"));
        assert_eq!(job.error_message(), None);
    }

    #[test]
    fn success_without_url_is_a_shape_error() {
        let empty = Job::from_status("t-1", envelope(json!({"output": {"task_status": "Success", "urls": []}})));
        assert_eq!(empty, Err(JobShapeError::SuccessWithoutUrl));
        let blank = Job::from_status("t-1", envelope(json!({"output": {"task_status": "Success", "urls": ["  "]}})));
        assert_eq!(blank, Err(JobShapeError::SuccessWithoutUrl));
    }

    #[test]
    fn non_success_never_exposes_a_url() {
        for status in ["Pending", "Running", "Failure", "Weird"] {
            let job = Job::from_status(
                "t-1",
                envelope(json!({"output": {"task_status": status, "urls": ["http://x/leak.mp4"], "error_message": "boom"}})),
            )
            .unwrap();
            assert_eq!(job.result_url(), None, "status {status}");
        }
    }

    #[test]
    fn error_message_only_on_failure() {
        let failed = Job::from_status(
            "t-1",
            envelope(json!({"output": {"task_status": "Failure", "error_message": "nsfw"}})),
        )
        .unwrap();
        assert_eq!(failed.error_message(), Some("nsfw"));

        let running = Job::from_status(
            "t-1",
            envelope(json!({"output": {"task_status": "Running", "error_message": "nsfw"}})),
        )
        .unwrap();
        assert_eq!(running.error_message(), None);
    }

    #[test]
    fn unknown_keeps_the_reported_string() {
        let job = Job::from_status("t-1", envelope(json!({"output": {"task_status": "Queued"}}))).unwrap();
        assert_eq!(job.status(), TaskStatus::Unknown);
        assert_eq!(job.reported_status(), Some("Queued"));
    }

    #[test]
    fn submit_envelope_ignores_blank_task_ids() {
        let ok = SubmitEnvelope::from_json(&json!({"output": {"task_id": "abc"}})).unwrap();
        assert_eq!(ok.task_id(), Some("abc"));
        let blank =
            SubmitEnvelope::from_json(&json!({"output": {"task_id": ""}, "request_id": "req-1"})).unwrap();
        assert_eq!(blank.task_id(), None);
        assert_eq!(blank.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn submit_envelope_keeps_numeric_request_id_next_to_odd_fields() {
        let parsed =
            SubmitEnvelope::from_json(&json!({"output": {"task_id": null, "extra": [1]}, "request_id": 42}))
                .unwrap();
        assert_eq!(parsed.task_id(), None);
        assert_eq!(parsed.request_id.as_deref(), Some("42"));
    }

    #[test]
    fn failure_with_structured_error_message_stays_a_failure() {
        let job = Job::from_status(
            "t-1",
            envelope(json!({"output": {"task_status": "Failure", "error_message": {"code": 1301, "message": "nsfw"}}})),
        )
        .unwrap();
        assert_eq!(job.status(), TaskStatus::Failure);
        assert_eq!(job.error_message(), Some("nsfw"));

        let coded = Job::from_status(
            "t-1",
            envelope(json!({"output": {"task_status": "Failure", "error_message": 1301}})),
        )
        .unwrap();
        assert_eq!(coded.error_message(), Some("1301"));
    }

    #[test]
    fn success_skips_null_urls() {
        let job = Job::from_status(
            "t-1",
            envelope(json!({"output": {"task_status": "Success", "urls": ["http://x/video.mp4", null]}})),
        )
        .unwrap();
        assert_eq!(job.result_url(), Some("http://x/video.mp4"));
    }

    #[test]
    fn non_object_bodies_are_malformed() {
        assert!(matches!(
            StatusEnvelope::from_json(&json!(["Running"])),
            Err(JobShapeError::Malformed(_))
        ));
        assert!(matches!(
            StatusEnvelope::from_json(&json!({"output": "Running"})),
            Err(JobShapeError::Malformed(_))
        ));
        assert!(matches!(
            SubmitEnvelope::from_json(&json!("task-1")),
            Err(JobShapeError::Malformed(_))
        ));
        assert_eq!(
            StatusEnvelope::from_json(&json!({})).unwrap(),
            StatusEnvelope::default()
        );
    }

    #[test]
    fn history_refuses_to_leave_a_terminal_state() {
        let mut history = JobHistory::new();
        history.record(TaskStatus::Pending).unwrap();
        history.record(TaskStatus::Running).unwrap();
        history.record(TaskStatus::Success).unwrap();
        assert!(history.is_finished());
        assert_eq!(
            history.record(TaskStatus::Running),
            Err(TransitionError {
                from: TaskStatus::Success,
                to: TaskStatus::Running,
            })
        );
        assert_eq!(
            history.visited(),
            &[TaskStatus::Pending, TaskStatus::Running, TaskStatus::Success]
        );
    }
}
