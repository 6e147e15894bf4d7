use derive_more::From;

/// Outcome of a task's `run`.
///
/// Cancellation is not a failure: a task that winds down because
/// `should_abort` turned true returns `Ok(())` and the context records
/// the abort separately.
pub type TaskResult = Result<(), TaskError>;

#[derive(Clone, Debug, PartialEq, Eq, From)]
pub enum TaskError {
    /// The task still has a live execution scope from another
    /// invocation; the sub-task guard refuses to run it again.
    AlreadyRunning,

    /// The task failed, carrying its user-facing message. Sequences
    /// aggregate these by joining messages with newlines.
    #[from]
    Failed(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// The user-facing message a renderer would display.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            TaskError::AlreadyRunning => "Task already running",
            TaskError::Failed(message) => message,
        }
    }
}

impl std::error::Error for TaskError {}

impl core::fmt::Display for TaskError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[cfg(test)]
mod test_result {
    use super::*;

    #[test]
    fn already_running_carries_its_fixed_message() {
        assert_eq!(TaskError::AlreadyRunning.message(), "Task already running");
    }

    #[test]
    fn failed_message_is_displayed_verbatim() {
        let error = TaskError::failed("disk on fire");
        assert_eq!(error.message(), "disk on fire");
        assert_eq!(error.to_string(), "disk on fire");
    }

    #[test]
    fn failed_converts_from_string() {
        let error: TaskError = String::from("bad").into();
        assert_eq!(error, TaskError::failed("bad"));
    }
}
