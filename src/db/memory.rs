use super::{CustomDomainStore, DeploymentStore, ProjectStore};
use crate::models;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct Tables {
    next_id: i32,
    projects: BTreeMap<i32, models::Project>,
    deployments: BTreeMap<i32, models::Deployment>,
    deployment_logs: HashMap<i32, Vec<String>>,
    custom_domains: BTreeMap<i32, models::CustomDomain>,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store for single-node runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, String> {
        self.tables
            .lock()
            .map_err(|err| format!("memory store lock poisoned: {}", err))
    }

    pub fn insert_project(&self, mut project: models::Project) -> Result<models::Project, String> {
        let mut tables = self.lock()?;
        project.id = tables.next_id();
        tables.projects.insert(project.id, project.clone());
        Ok(project)
    }

    pub fn deployments_for(&self, project_id: i32) -> Result<Vec<models::Deployment>, String> {
        let tables = self.lock()?;
        Ok(tables
            .deployments
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect())
    }

    pub fn logs_for(&self, deployment_id: i32) -> Result<Vec<String>, String> {
        let tables = self.lock()?;
        Ok(tables
            .deployment_logs
            .get(&deployment_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn find(&self, id: i32) -> Result<Option<models::Project>, String> {
        Ok(self.lock()?.projects.get(&id).cloned())
    }

    async fn find_by_repo_and_branch(
        &self,
        repo_id: &str,
        branch: &str,
    ) -> Result<Option<models::Project>, String> {
        Ok(self
            .lock()?
            .projects
            .values()
            .find(|p| p.repo_id == repo_id && p.branch == branch)
            .cloned())
    }

    async fn update(&self, mut project: models::Project) -> Result<models::Project, String> {
        let mut tables = self.lock()?;
        if !tables.projects.contains_key(&project.id) {
            return Err(format!("project {} not found", project.id));
        }
        project.updated_at = Utc::now();
        tables.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn delete(&self, id: i32) -> Result<(), String> {
        self.lock()?.projects.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create(
        &self,
        mut deployment: models::Deployment,
    ) -> Result<models::Deployment, String> {
        let mut tables = self.lock()?;
        deployment.id = tables.next_id();
        tables.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn update(
        &self,
        mut deployment: models::Deployment,
    ) -> Result<models::Deployment, String> {
        let mut tables = self.lock()?;
        if !tables.deployments.contains_key(&deployment.id) {
            return Err(format!("deployment {} not found", deployment.id));
        }
        deployment.updated_at = Utc::now();
        tables.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<models::Deployment>, String> {
        Ok(self.lock()?.deployments.get(&id).cloned())
    }

    async fn add_log(&self, deployment_id: i32, line: &str) -> Result<(), String> {
        self.lock()?
            .deployment_logs
            .entry(deployment_id)
            .or_default()
            .push(line.to_string());
        Ok(())
    }
}

#[async_trait]
impl CustomDomainStore for MemoryStore {
    async fn insert(
        &self,
        mut domain: models::CustomDomain,
    ) -> Result<models::CustomDomain, String> {
        let mut tables = self.lock()?;
        let existing = tables
            .custom_domains
            .values()
            .find(|d| d.domain == domain.domain)
            .map(|d| d.id);
        domain.id = match existing {
            Some(id) => id,
            None => tables.next_id(),
        };
        tables.custom_domains.insert(domain.id, domain.clone());
        Ok(domain)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<models::CustomDomain>, String> {
        Ok(self
            .lock()?
            .custom_domains
            .values()
            .find(|d| d.domain == domain)
            .cloned())
    }

    async fn mark_live(&self, id: i32) -> Result<(), String> {
        let mut tables = self.lock()?;
        match tables.custom_domains.get_mut(&id) {
            Some(domain) => {
                domain.live = true;
                domain.updated_at = Utc::now();
                Ok(())
            }
            None => Err(format!("custom domain {} not found", id)),
        }
    }
}
