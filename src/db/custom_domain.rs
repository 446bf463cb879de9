use crate::models;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;

#[derive(sqlx::FromRow)]
struct CustomDomainRow {
    id: i32,
    project_id: i32,
    domain: String,
    zone_id: String,
    a_record_id: String,
    cname_record_id: String,
    live: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomDomainRow> for models::CustomDomain {
    fn from(row: CustomDomainRow) -> Self {
        models::CustomDomain {
            id: row.id,
            project_id: row.project_id,
            domain: row.domain,
            zone_id: row.zone_id,
            a_record_id: row.a_record_id,
            cname_record_id: row.cname_record_id,
            live: row.live,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn insert(
    pool: &PgPool,
    mut domain: models::CustomDomain,
) -> Result<models::CustomDomain, String> {
    let query_span = tracing::info_span!("Saving custom domain", domain = %domain.domain);
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO custom_domain (project_id, domain, zone_id, a_record_id, cname_record_id, live)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (domain) DO UPDATE
            SET zone_id = EXCLUDED.zone_id,
                a_record_id = EXCLUDED.a_record_id,
                cname_record_id = EXCLUDED.cname_record_id,
                updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(domain.project_id)
    .bind(&domain.domain)
    .bind(&domain.zone_id)
    .bind(&domain.a_record_id)
    .bind(&domain.cname_record_id)
    .bind(domain.live)
    .fetch_one(pool)
    .instrument(query_span)
    .await
    .map(move |id| {
        domain.id = id;
        domain
    })
    .map_err(|err| {
        tracing::error!("Failed to insert custom domain: {:?}", err);
        "Failed to insert".to_string()
    })
}

pub async fn fetch_by_domain(
    pool: &PgPool,
    domain: &str,
) -> Result<Option<models::CustomDomain>, String> {
    sqlx::query_as::<_, CustomDomainRow>(
        r#"
        SELECT id, project_id, domain, zone_id, a_record_id, cname_record_id, live,
               created_at, updated_at
        FROM custom_domain
        WHERE domain = $1
        LIMIT 1
        "#,
    )
    .bind(domain)
    .fetch_optional(pool)
    .await
    .map(|row| row.map(models::CustomDomain::from))
    .map_err(|err| {
        tracing::error!("Failed to fetch custom domain: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn mark_live(pool: &PgPool, id: i32) -> Result<(), String> {
    sqlx::query("UPDATE custom_domain SET live = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|err| {
            tracing::error!("Failed to mark custom domain live: {:?}", err);
            "Failed to update custom domain".to_string()
        })
}
