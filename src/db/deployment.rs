use crate::models;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: i32,
    project_id: i32,
    status: String,
    branch: String,
    container_name: String,
    image_name: String,
    extension: String,
    rollback_to_id: Option<i32>,
    host_port: Option<i32>,
    container_port: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeploymentRow> for models::Deployment {
    type Error = String;

    fn try_from(row: DeploymentRow) -> Result<Self, Self::Error> {
        Ok(models::Deployment {
            id: row.id,
            project_id: row.project_id,
            status: row.status.parse()?,
            branch: row.branch,
            container_name: row.container_name,
            image_name: row.image_name,
            extension: row.extension,
            rollback_to_id: row.rollback_to_id,
            host_port: row.host_port,
            container_port: row.container_port,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn fetch(pool: &PgPool, id: i32) -> Result<Option<models::Deployment>, String> {
    tracing::info!("Fetch deployment {}", id);
    sqlx::query_as::<_, DeploymentRow>(
        r#"
        SELECT id, project_id, status, branch, container_name, image_name, extension,
               rollback_to_id, host_port, container_port, created_at, updated_at
        FROM deployment
        WHERE id=$1
        LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch deployment, error: {:?}", err);
        "Could not fetch data".to_string()
    })?
    .map(models::Deployment::try_from)
    .transpose()
}

pub async fn insert(
    pool: &PgPool,
    mut deployment: models::Deployment,
) -> Result<models::Deployment, String> {
    let query_span = tracing::info_span!("Saving new deployment into the database");
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO deployment (
            project_id, status, branch, container_name, image_name, extension,
            rollback_to_id, host_port, container_port, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id;
        "#,
    )
    .bind(deployment.project_id)
    .bind(deployment.status.as_str())
    .bind(&deployment.branch)
    .bind(&deployment.container_name)
    .bind(&deployment.image_name)
    .bind(&deployment.extension)
    .bind(deployment.rollback_to_id)
    .bind(deployment.host_port)
    .bind(deployment.container_port)
    .bind(deployment.created_at)
    .bind(deployment.updated_at)
    .fetch_one(pool)
    .instrument(query_span)
    .await
    .map(move |id| {
        deployment.id = id;
        deployment
    })
    .map_err(|e| {
        tracing::error!("Failed to execute query: {:?}", e);
        "Failed to insert".to_string()
    })
}

pub async fn update(
    pool: &PgPool,
    mut deployment: models::Deployment,
) -> Result<models::Deployment, String> {
    let query_span = tracing::info_span!("Updating deployment in the database");
    sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        UPDATE deployment
        SET
            status=$2,
            container_name=$3,
            image_name=$4,
            rollback_to_id=$5,
            host_port=$6,
            container_port=$7,
            updated_at=NOW()
        WHERE id = $1
        RETURNING updated_at
        "#,
    )
    .bind(deployment.id)
    .bind(deployment.status.as_str())
    .bind(&deployment.container_name)
    .bind(&deployment.image_name)
    .bind(deployment.rollback_to_id)
    .bind(deployment.host_port)
    .bind(deployment.container_port)
    .fetch_one(pool)
    .instrument(query_span)
    .await
    .map(|updated_at| {
        tracing::info!("Deployment {} has been updated", deployment.id);
        deployment.updated_at = updated_at;
        deployment
    })
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        "Failed to update deployment".to_string()
    })
}

pub async fn add_log(pool: &PgPool, deployment_id: i32, line: &str) -> Result<(), String> {
    sqlx::query("INSERT INTO deployment_log (deployment_id, line) VALUES ($1, $2)")
        .bind(deployment_id)
        .bind(line)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|err| {
            tracing::error!("Failed to append deployment log: {:?}", err);
            "Failed to append log".to_string()
        })
}
