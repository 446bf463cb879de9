use crate::connectors::ConnectorError;
use crate::queue::QueueError;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Failures raised by pipeline stages.
///
/// Stages called from the event dispatcher only log these; callers that await a
/// stage directly (builder, lifecycle, rollback) use them to mark the deployment failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed payload or missing project information. The stage aborts and nothing is retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Non-zero exit (or spawn failure) of a build/runtime CLI invocation.
    #[error("command `{command}` failed: {message}")]
    ToolExecution {
        command: String,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("no port mapping found for container {container}")]
    NoPortMapping { container: String },

    #[error("rollback to deployment {target} failed: {source}")]
    Rollback {
        target: i32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("failed to remove container {container}: {source}")]
    RemoveContainer {
        container: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("template error: {0}")]
    Template(String),

    #[error("container daemon error: {0}")]
    Daemon(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn exit_status(command: impl Into<String>, exit_code: Option<i32>) -> Self {
        let message = match exit_code {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        };
        Self::ToolExecution {
            command: command.into(),
            exit_code,
            message,
        }
    }

    pub fn spawn_failed(command: impl Into<String>, err: &std::io::Error) -> Self {
        Self::ToolExecution {
            command: command.into(),
            exit_code: None,
            message: format!("spawn error: {}", err),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<tera::Error> for PipelineError {
    fn from(err: tera::Error) -> Self {
        Self::Template(format!("{:?}", err))
    }
}

impl From<bollard::errors::Error> for PipelineError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Daemon(err.to_string())
    }
}
