use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Running,
    #[default]
    Stopped,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "STOPPED" => Ok(Self::Stopped),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown project status {}", other)),
        }
    }
}

// A deployable repository branch. Owned by the persistence layer, the pipeline only reads
// it and moves `active_deployment_id` / `status`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Project {
    pub id: i32,
    pub repo_id: String, // repository full name, e.g. "acme/shop"
    pub branch: String,
    pub name: String,
    pub install_command: Option<String>,
    pub build_command: Option<String>,
    pub output_directory: Option<String>,
    pub run_command: Option<String>,
    pub local_repo_path: String,
    pub active_deployment_id: Option<i32>,
    pub docker_compose_file: Option<String>,
    pub framework: Option<String>, // last detected framework, replayed on redeploys
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(repo_id: String, branch: String, name: String, local_repo_path: String) -> Self {
        Self {
            repo_id,
            branch,
            name,
            local_repo_path,
            ..Default::default()
        }
    }
}

impl Default for Project {
    fn default() -> Self {
        Project {
            id: 0,
            repo_id: String::new(),
            branch: "main".to_string(),
            name: String::new(),
            install_command: None,
            build_command: None,
            output_directory: None,
            run_command: None,
            local_repo_path: String::new(),
            active_deployment_id: None,
            docker_compose_file: None,
            framework: None,
            status: ProjectStatus::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
