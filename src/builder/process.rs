use super::line_buffer::LineBuffer;
use crate::errors::PipelineError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn docker<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("docker", args)
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Receives process output one complete line at a time.
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn line(&self, line: &str);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CommandExecutor: abstraction over the container CLI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion and return stdout. Non-zero exit is an error carrying stderr.
    async fn run(&self, cmd: &CommandSpec) -> Result<String, PipelineError>;

    /// Run to completion, forwarding stdout and stderr to `sink` line by line.
    async fn run_streaming(&self, cmd: &CommandSpec, sink: &dyn LineSink) -> Result<(), PipelineError>;
}

/// Production executor, spawns real processes.
pub struct ShellExecutor;

impl ShellExecutor {
    fn command(cmd: &CommandSpec) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).kill_on_drop(true);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, cmd: &CommandSpec) -> Result<String, PipelineError> {
        tracing::debug!(command = %cmd, "Running");
        let output = Self::command(cmd)
            .output()
            .await
            .map_err(|err| PipelineError::spawn_failed(cmd.to_string(), &err))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(PipelineError::ToolExecution {
            command: cmd.to_string(),
            exit_code: output.status.code(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn run_streaming(&self, cmd: &CommandSpec, sink: &dyn LineSink) -> Result<(), PipelineError> {
        tracing::debug!(command = %cmd, "Running with streamed output");
        let mut child = Self::command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| PipelineError::spawn_failed(cmd.to_string(), &err))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx.clone()));
        }
        drop(tx);

        while let Some(line) = rx.recv().await {
            sink.line(&line).await;
        }

        let status = child
            .wait()
            .await
            .map_err(|err| PipelineError::spawn_failed(cmd.to_string(), &err))?;
        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::exit_status(cmd.to_string(), status.code()))
        }
    }
}

async fn pump_lines<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in buffer.push(&chunk[..n]) {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::warn!("Reading process output failed: {}", err);
                break;
            }
        }
    }
    if let Some(rest) = buffer.finish() {
        let _ = tx.send(rest);
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records commands; fails those starting with a registered prefix and answers
    /// `run` with canned stdout.
    #[derive(Default)]
    pub struct MockExecutor {
        pub calls: Mutex<Vec<String>>,
        failures: Mutex<Vec<(String, i32)>>,
        responses: Mutex<Vec<(String, String)>>,
        lines: Vec<String>,
    }

    impl MockExecutor {
        pub fn with_lines(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn fail_on(&self, prefix: &str, code: i32) {
            self.failures.lock().unwrap().push((prefix.to_string(), code));
        }

        pub fn respond_on(&self, prefix: &str, stdout: &str) {
            self.responses
                .lock()
                .unwrap()
                .push((prefix.to_string(), stdout.to_string()));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn stdout(&self, cmd: &CommandSpec) -> String {
            let rendered = cmd.to_string();
            self.responses
                .lock()
                .unwrap()
                .iter()
                .find(|(prefix, _)| rendered.starts_with(prefix))
                .map(|(_, stdout)| stdout.clone())
                .unwrap_or_default()
        }

        fn record(&self, cmd: &CommandSpec) -> Result<(), PipelineError> {
            let rendered = cmd.to_string();
            self.calls.lock().unwrap().push(rendered.clone());
            let failures = self.failures.lock().unwrap();
            match failures.iter().find(|(prefix, _)| rendered.starts_with(prefix)) {
                Some((_, code)) => Err(PipelineError::exit_status(rendered, Some(*code))),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for MockExecutor {
        async fn run(&self, cmd: &CommandSpec) -> Result<String, PipelineError> {
            self.record(cmd).map(|_| self.stdout(cmd))
        }

        async fn run_streaming(
            &self,
            cmd: &CommandSpec,
            sink: &dyn LineSink,
        ) -> Result<(), PipelineError> {
            for line in &self.lines {
                sink.line(line).await;
            }
            self.record(cmd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl LineSink for Collect {
        async fn line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_command_display() {
        let cmd = CommandSpec::docker(["build", "-t", "shop:abcd", "."]).current_dir("/srv/shop");
        assert_eq!(cmd.to_string(), "docker build -t shop:abcd .");
        assert_eq!(cmd.cwd, Some(PathBuf::from("/srv/shop")));
    }

    #[tokio::test]
    async fn test_streaming_reassembles_split_writes() {
        let sink = Collect::default();
        let cmd = CommandSpec::new("sh", ["-c", "printf ab; sleep 0.05; printf 'c\\nd'"]);
        ShellExecutor.run_streaming(&cmd, &sink).await.unwrap();
        assert_eq!(*sink.0.lock().unwrap(), vec!["abc\n".to_string(), "d".to_string()]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_code() {
        let sink = Collect::default();
        let cmd = CommandSpec::new("sh", ["-c", "echo building; exit 3"]);
        let err = ShellExecutor.run_streaming(&cmd, &sink).await.unwrap_err();
        match err {
            PipelineError::ToolExecution { exit_code, .. } => assert_eq!(exit_code, Some(3)),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(*sink.0.lock().unwrap(), vec!["building\n".to_string()]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_tool_error() {
        let cmd = CommandSpec::new("definitely-not-a-real-binary-dockhand", Vec::<String>::new());
        let err = ShellExecutor.run(&cmd).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolExecution { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_run_returns_stdout() {
        let cmd = CommandSpec::new("sh", ["-c", "echo hello"]);
        assert_eq!(ShellExecutor.run(&cmd).await.unwrap(), "hello\n");
    }
}
