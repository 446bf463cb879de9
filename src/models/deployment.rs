use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    #[default]
    InProgress,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-progress" => Ok(Self::InProgress),
            "deployed" => Ok(Self::Deployed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown deployment status {}", other)),
        }
    }
}

// One build attempt of a project. Rows are never deleted so that older images stay
// reachable for rollback.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Deployment {
    pub id: i32,
    pub project_id: i32,
    pub status: DeploymentStatus,
    pub branch: String,
    pub container_name: String,
    pub image_name: String,
    pub extension: String, // build suffix that keeps names unique per build
    pub rollback_to_id: Option<i32>,
    pub host_port: Option<i32>,
    pub container_port: Option<i32>, // port the image listens on, `None` for compose stacks
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(
        project_id: i32,
        branch: String,
        container_name: String,
        image_name: String,
        extension: String,
    ) -> Self {
        Self {
            id: 0,
            project_id,
            status: DeploymentStatus::InProgress,
            branch,
            container_name,
            image_name,
            extension,
            rollback_to_id: None,
            host_port: None,
            container_port: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Default for Deployment {
    fn default() -> Self {
        Deployment::new(0, String::new(), String::new(), String::new(), String::new())
    }
}
