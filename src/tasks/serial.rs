use super::{ExecutionScope, Task, TaskCore, TaskResult, TaskSequence};

/// Helper task that runs an owned sequence of tasks in series, the
/// whole sequence taking up 100% of its own progress.
///
/// When a base message is set, sub-task status messages are prefixed
/// with it on their way up (separated by a newline), which is handy for
/// a two-line "overall phase / current detail" display.
pub struct SerialTask {
    core: TaskCore,
    tasks: TaskSequence,
    base_message: String,
    stop_on_error: bool,
}

impl SerialTask {
    pub fn new(name: impl Into<String>, stop_on_error: bool) -> Self {
        Self {
            core: TaskCore::new(name),
            tasks: TaskSequence::new(),
            base_message: String::new(),
            stop_on_error,
        }
    }

    /// Appends a task with the default weight of 1.0.
    pub fn push(&mut self, task: Box<dyn Task>) {
        self.tasks.push(task);
    }

    /// Appends a task with a specific relative weight.
    pub fn push_with_weight(&mut self, task: Box<dyn Task>, weight: f64) {
        self.tasks.push_with_weight(task, weight);
    }

    #[must_use]
    pub fn tasks(&self) -> &TaskSequence {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskSequence {
        &mut self.tasks
    }

    pub fn set_base_message(&mut self, message: impl Into<String>) {
        self.base_message = message.into();
    }

    #[must_use]
    pub fn base_message(&self) -> &str {
        &self.base_message
    }

    #[must_use]
    pub fn stops_on_error(&self) -> bool {
        self.stop_on_error
    }
}

impl Task for SerialTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn run(&mut self, scope: &ExecutionScope<'_>) -> TaskResult {
        let stop_on_error = self.stop_on_error;
        let mut tasks = std::mem::take(&mut self.tasks);
        let result = self.perform_sub_task_sequence(scope, &mut tasks, 1.0, stop_on_error);
        self.tasks = tasks;
        result
    }

    fn format_sub_task_status(&self, status: &str) -> String {
        if self.base_message.is_empty() {
            status.to_owned()
        } else {
            format!("{}\n{}", self.base_message, status)
        }
    }
}
