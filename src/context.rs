//! Pipeline-run scoped key/value context.
//!
//! A scope is opened with [`scope`] (or [`init`] for a fresh one) and is visible to
//! everything awaited inside it. It does not follow work onto a durable queue:
//! producers copy what the worker needs into the job payload via [`snapshot`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::future::Future;
use std::sync::OnceLock;

tokio::task_local! {
    static CONTEXT: RefCell<PipelineContext>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKey {
    RepositoryId,
    Branch,
    ProjectName,
    Framework,
    LastCommitMessage,
    BuildSuffix,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContext {
    pub repository_id: Option<String>,
    pub branch: Option<String>,
    pub project_name: Option<String>,
    pub framework: Option<String>,
    pub last_commit_message: Option<String>,
    pub build_suffix: Option<String>,
}

impl PipelineContext {
    /// A fresh context with a build suffix unique to this run.
    pub fn new() -> Self {
        Self {
            build_suffix: Some(generate_build_suffix()),
            ..Default::default()
        }
    }

    pub fn with(mut self, key: ContextKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: ContextKey) -> Option<&str> {
        let value = match key {
            ContextKey::RepositoryId => &self.repository_id,
            ContextKey::Branch => &self.branch,
            ContextKey::ProjectName => &self.project_name,
            ContextKey::Framework => &self.framework,
            ContextKey::LastCommitMessage => &self.last_commit_message,
            ContextKey::BuildSuffix => &self.build_suffix,
        };
        value.as_deref()
    }

    pub fn set(&mut self, key: ContextKey, value: impl Into<String>) {
        let value = value.into();
        match key {
            ContextKey::RepositoryId => self.repository_id = Some(value),
            ContextKey::Branch => self.branch = Some(value),
            ContextKey::ProjectName => self.project_name = Some(sanitize_project_name(&value)),
            ContextKey::Framework => self.framework = Some(value),
            ContextKey::LastCommitMessage => self.last_commit_message = Some(value),
            ContextKey::BuildSuffix => self.build_suffix = Some(value),
        }
    }
}

/// Run `fut` inside the given context scope.
pub async fn scope<F: Future>(ctx: PipelineContext, fut: F) -> F::Output {
    CONTEXT.scope(RefCell::new(ctx), fut).await
}

/// Run `fut` inside a brand new scope.
pub async fn init<F: Future>(fut: F) -> F::Output {
    scope(PipelineContext::new(), fut).await
}

/// Read a value from the current scope. `None` outside of any scope.
pub fn get(key: ContextKey) -> Option<String> {
    CONTEXT
        .try_with(|ctx| ctx.borrow().get(key).map(str::to_string))
        .ok()
        .flatten()
}

/// Write a value into the current scope. Returns `false` when there is no scope.
pub fn set(key: ContextKey, value: impl Into<String>) -> bool {
    let value = value.into();
    CONTEXT
        .try_with(|ctx| ctx.borrow_mut().set(key, value))
        .is_ok()
}

/// Copy of the current scope, for job payloads and spawned handlers.
pub fn snapshot() -> Option<PipelineContext> {
    CONTEXT.try_with(|ctx| ctx.borrow().clone()).ok()
}

pub fn generate_build_suffix() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Normalize a project name into something usable as a container/image name.
pub fn sanitize_project_name(name: &str) -> String {
    static NON_NAME: OnceLock<Regex> = OnceLock::new();
    let re = NON_NAME.get_or_init(|| Regex::new(r"[^a-z0-9_]+").expect("static regex"));

    let lowered = name.to_lowercase();
    let mut sanitized = re.replace_all(&lowered, "-").into_owned();
    if let Some(first) = sanitized.chars().next() {
        if !first.is_ascii_lowercase() {
            sanitized.replace_range(..first.len_utf8(), "a");
        }
    }
    sanitized.trim_end_matches('-').to_string()
}
