use crate::models;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: i32,
    repo_id: String,
    branch: String,
    name: String,
    install_command: Option<String>,
    build_command: Option<String>,
    output_directory: Option<String>,
    run_command: Option<String>,
    local_repo_path: String,
    active_deployment_id: Option<i32>,
    docker_compose_file: Option<String>,
    framework: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for models::Project {
    type Error = String;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(models::Project {
            id: row.id,
            repo_id: row.repo_id,
            branch: row.branch,
            name: row.name,
            install_command: row.install_command,
            build_command: row.build_command,
            output_directory: row.output_directory,
            run_command: row.run_command,
            local_repo_path: row.local_repo_path,
            active_deployment_id: row.active_deployment_id,
            docker_compose_file: row.docker_compose_file,
            framework: row.framework,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "id, repo_id, branch, name, install_command, build_command, \
     output_directory, run_command, local_repo_path, active_deployment_id, \
     docker_compose_file, framework, status, created_at, updated_at";

pub async fn fetch(pool: &PgPool, id: i32) -> Result<Option<models::Project>, String> {
    tracing::info!("Fetch project {}", id);
    let query = format!("SELECT {} FROM project WHERE id = $1 LIMIT 1", COLUMNS);
    sqlx::query_as::<_, ProjectRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|err| {
            tracing::error!("Failed to fetch project, error: {:?}", err);
            "Could not fetch data".to_string()
        })?
        .map(models::Project::try_from)
        .transpose()
}

pub async fn fetch_by_repo_and_branch(
    pool: &PgPool,
    repo_id: &str,
    branch: &str,
) -> Result<Option<models::Project>, String> {
    let query_span = tracing::info_span!("Fetch project by repository and branch", repo_id, branch);
    let query = format!(
        "SELECT {} FROM project WHERE repo_id = $1 AND branch = $2 LIMIT 1",
        COLUMNS
    );
    sqlx::query_as::<_, ProjectRow>(&query)
        .bind(repo_id)
        .bind(branch)
        .fetch_optional(pool)
        .instrument(query_span)
        .await
        .map_err(|err| {
            tracing::error!("Failed to fetch project by repository, error: {:?}", err);
            "Could not fetch data".to_string()
        })?
        .map(models::Project::try_from)
        .transpose()
}

pub async fn update(pool: &PgPool, mut project: models::Project) -> Result<models::Project, String> {
    let query_span = tracing::info_span!("Updating project in the database");
    sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        UPDATE project
        SET
            repo_id=$2,
            branch=$3,
            name=$4,
            install_command=$5,
            build_command=$6,
            output_directory=$7,
            run_command=$8,
            local_repo_path=$9,
            active_deployment_id=$10,
            docker_compose_file=$11,
            framework=$12,
            status=$13,
            updated_at=NOW()
        WHERE id = $1
        RETURNING updated_at
        "#,
    )
    .bind(project.id)
    .bind(&project.repo_id)
    .bind(&project.branch)
    .bind(&project.name)
    .bind(&project.install_command)
    .bind(&project.build_command)
    .bind(&project.output_directory)
    .bind(&project.run_command)
    .bind(&project.local_repo_path)
    .bind(project.active_deployment_id)
    .bind(&project.docker_compose_file)
    .bind(&project.framework)
    .bind(project.status.as_str())
    .fetch_one(pool)
    .instrument(query_span)
    .await
    .map(|updated_at| {
        tracing::info!("Project {} has been updated", project.id);
        project.updated_at = updated_at;
        project
    })
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        "Failed to update project".to_string()
    })
}

pub async fn delete(pool: &PgPool, id: i32) -> Result<(), String> {
    let query_span = tracing::info_span!("Deleting project", id);
    sqlx::query("DELETE FROM project WHERE id = $1")
        .bind(id)
        .execute(pool)
        .instrument(query_span)
        .await
        .map(|_| ())
        .map_err(|err| {
            tracing::error!("Failed to delete project: {:?}", err);
            "Failed to delete project".to_string()
        })
}
