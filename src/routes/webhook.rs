use super::JsonResponse;
use crate::context::{self, ContextKey};
use crate::db::ProjectStore;
use crate::errors::PipelineError;
use crate::events::{Event, EventBus, PushEventReceived};
use actix_web::{post, web, HttpRequest, HttpResponse};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Shared secret the repository host signs deliveries with.
#[derive(Clone)]
pub struct WebhookSecret(pub String);

#[derive(Debug, Deserialize)]
pub struct RepositoryOwner {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub clone_url: String,
    pub owner: RepositoryOwner,
}

#[derive(Debug, Deserialize)]
pub struct HeadCommit {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PushPayload {
    pub repository: Repository,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub head_commit: Option<HeadCommit>,
}

impl PushPayload {
    /// `refs/heads/<branch>`; tag pushes and malformed refs are rejected.
    pub fn branch(&self) -> Result<&str, PipelineError> {
        match self.git_ref.strip_prefix("refs/heads/") {
            Some(branch) if !branch.is_empty() => Ok(branch),
            _ => Err(PipelineError::Validation(format!(
                "ref {} is not a branch",
                self.git_ref
            ))),
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.repository.full_name.trim().is_empty() {
            return Err(PipelineError::Validation("repository.full_name is empty".into()));
        }
        if self.repository.clone_url.trim().is_empty() {
            return Err(PipelineError::Validation("repository.clone_url is empty".into()));
        }
        self.branch().map(|_| ())
    }
}

/// Constant-time check of `sha256=<hex>` against HMAC-SHA256 of the raw body.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> Result<(), PipelineError> {
    if secret.is_empty() {
        return Err(PipelineError::SecurityViolation(
            "webhook secret is not configured".into(),
        ));
    }
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or_else(|| PipelineError::SecurityViolation("unsupported signature format".into()))?;
    let expected = hex::decode(hex_digest)
        .map_err(|_| PipelineError::SecurityViolation("signature is not hex".into()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| PipelineError::SecurityViolation(format!("hmac error {:?}", err)))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PipelineError::SecurityViolation("signature mismatch".into()))
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

#[tracing::instrument(name = "Receive push webhook", skip_all)]
#[post("")]
pub async fn push_handler(
    req: HttpRequest,
    body: web::Bytes,
    secret: web::Data<WebhookSecret>,
    projects: web::Data<Arc<dyn ProjectStore>>,
    bus: web::Data<EventBus>,
) -> HttpResponse {
    let signature = header(&req, SIGNATURE_HEADER).unwrap_or_default();
    if let Err(err) = verify_signature(&secret.0, &body, signature) {
        tracing::warn!("Rejected webhook: {}", err);
        return JsonResponse::unauthorized("Invalid signature");
    }

    match header(&req, EVENT_HEADER) {
        Some("push") | None => {}
        Some("ping") => return JsonResponse::ok("pong"),
        Some(other) => {
            tracing::debug!(event = other, "Ignoring webhook event");
            return JsonResponse::accepted("Event ignored");
        }
    }

    let payload: PushPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!("Malformed push payload: {}", err);
            return JsonResponse::not_valid("Malformed payload");
        }
    };
    if let Err(err) = payload.validate() {
        tracing::warn!("{}", err);
        return JsonResponse::not_valid(&err.to_string());
    }
    let branch = payload.branch().unwrap_or_default().to_string();
    let repository = payload.repository.full_name.clone();

    let project = match projects.find_by_repo_and_branch(&repository, &branch).await {
        Ok(Some(project)) => project,
        Ok(None) => {
            tracing::info!(repository, branch, "No project tracks this branch");
            return JsonResponse::not_found("No project for this repository and branch");
        }
        Err(err) => {
            tracing::error!("Project lookup failed: {}", err);
            return JsonResponse::internal_error("");
        }
    };

    let commit_message = payload.head_commit.map(|commit| commit.message);
    let pusher = payload.repository.owner.name.or(payload.repository.owner.email);
    let event = Event::PushEventReceived(PushEventReceived {
        project_id: project.id,
        repository: repository.clone(),
        clone_url: payload.repository.clone_url,
        branch: branch.clone(),
        commit_message: commit_message.clone(),
        pusher,
    });

    context::init(async {
        context::set(ContextKey::RepositoryId, repository.as_str());
        context::set(ContextKey::Branch, branch.as_str());
        context::set(ContextKey::ProjectName, project.name.as_str());
        if let Some(message) = &commit_message {
            context::set(ContextKey::LastCommitMessage, message.as_str());
        }
        bus.emit(event);
    })
    .await;

    tracing::info!(repository, branch, project_id = project.id, "Push accepted");
    JsonResponse::accepted("Deployment scheduled")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        assert!(verify_signature("topsecret", body, &sign("topsecret", body)).is_ok());
    }

    #[test]
    fn test_signature_mismatch_is_security_violation() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let err = verify_signature("topsecret", body, &sign("other", body)).unwrap_err();
        assert!(matches!(err, PipelineError::SecurityViolation(_)));

        let tampered = br#"{"ref":"refs/heads/prod"}"#;
        assert!(verify_signature("topsecret", tampered, &sign("topsecret", body)).is_err());
    }

    #[test]
    fn test_malformed_headers_are_rejected() {
        let body = b"{}";
        assert!(verify_signature("topsecret", body, "").is_err());
        assert!(verify_signature("topsecret", body, "sha1=abcd").is_err());
        assert!(verify_signature("topsecret", body, "sha256=zz").is_err());
        assert!(verify_signature("", body, &sign("", body)).is_err());
    }

    #[test]
    fn test_branch_from_ref() {
        let payload: PushPayload = serde_json::from_value(serde_json::json!({
            "repository": {
                "full_name": "acme/shop",
                "clone_url": "https://github.com/acme/shop.git",
                "owner": {"name": "acme", "email": null}
            },
            "ref": "refs/heads/feature/login",
            "head_commit": null
        }))
        .unwrap();
        assert_eq!(payload.branch().unwrap(), "feature/login");

        let tag = PushPayload {
            git_ref: "refs/tags/v1.0.0".into(),
            ..payload
        };
        assert!(tag.branch().unwrap_err().is_validation());
    }
}
