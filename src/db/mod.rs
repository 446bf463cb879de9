//! Persistence boundary.
//!
//! The pipeline only talks to the store traits below. `PgStore` backs them with the
//! Postgres helpers in the submodules, `MemoryStore` keeps everything in process.

use crate::models;
use async_trait::async_trait;
use sqlx::PgPool;

pub mod custom_domain;
pub mod deployment;
mod memory;
pub mod project;

pub use memory::MemoryStore;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find(&self, id: i32) -> Result<Option<models::Project>, String>;
    async fn find_by_repo_and_branch(
        &self,
        repo_id: &str,
        branch: &str,
    ) -> Result<Option<models::Project>, String>;
    async fn update(&self, project: models::Project) -> Result<models::Project, String>;
    async fn delete(&self, id: i32) -> Result<(), String>;
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn create(&self, deployment: models::Deployment) -> Result<models::Deployment, String>;
    async fn update(&self, deployment: models::Deployment) -> Result<models::Deployment, String>;
    async fn find_by_id(&self, id: i32) -> Result<Option<models::Deployment>, String>;
    async fn add_log(&self, deployment_id: i32, line: &str) -> Result<(), String>;
}

#[async_trait]
pub trait CustomDomainStore: Send + Sync {
    async fn insert(&self, domain: models::CustomDomain) -> Result<models::CustomDomain, String>;
    async fn find_by_domain(&self, domain: &str) -> Result<Option<models::CustomDomain>, String>;
    async fn mark_live(&self, id: i32) -> Result<(), String>;
}

/// Postgres-backed stores.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), String> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| {
                tracing::error!("Failed to run migrations: {:?}", err);
                "Failed to run migrations".to_string()
            })
    }
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn find(&self, id: i32) -> Result<Option<models::Project>, String> {
        project::fetch(&self.pool, id).await
    }

    async fn find_by_repo_and_branch(
        &self,
        repo_id: &str,
        branch: &str,
    ) -> Result<Option<models::Project>, String> {
        project::fetch_by_repo_and_branch(&self.pool, repo_id, branch).await
    }

    async fn update(&self, project: models::Project) -> Result<models::Project, String> {
        project::update(&self.pool, project).await
    }

    async fn delete(&self, id: i32) -> Result<(), String> {
        project::delete(&self.pool, id).await
    }
}

#[async_trait]
impl DeploymentStore for PgStore {
    async fn create(&self, deployment: models::Deployment) -> Result<models::Deployment, String> {
        deployment::insert(&self.pool, deployment).await
    }

    async fn update(&self, deployment: models::Deployment) -> Result<models::Deployment, String> {
        deployment::update(&self.pool, deployment).await
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<models::Deployment>, String> {
        deployment::fetch(&self.pool, id).await
    }

    async fn add_log(&self, deployment_id: i32, line: &str) -> Result<(), String> {
        deployment::add_log(&self.pool, deployment_id, line).await
    }
}

#[async_trait]
impl CustomDomainStore for PgStore {
    async fn insert(&self, domain: models::CustomDomain) -> Result<models::CustomDomain, String> {
        custom_domain::insert(&self.pool, domain).await
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<models::CustomDomain>, String> {
        custom_domain::fetch_by_domain(&self.pool, domain).await
    }

    async fn mark_live(&self, id: i32) -> Result<(), String> {
        custom_domain::mark_live(&self.pool, id).await
    }
}
