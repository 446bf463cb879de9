use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_derive::Serialize;

/// Body of every JSON reply: `{"status": "...", "message": "...", "code": 202}`.
#[derive(Debug, Serialize)]
pub struct JsonResponse {
    pub status: String,
    pub message: String,
    pub code: u16,
}

impl JsonResponse {
    fn build(status_code: StatusCode, message: &str, fallback: &str) -> HttpResponse {
        let message = if message.trim().is_empty() {
            fallback.to_string()
        } else {
            message.to_string()
        };
        let status = if status_code.is_success() { "OK" } else { "Error" };
        HttpResponse::build(status_code).json(JsonResponse {
            status: status.to_string(),
            message,
            code: status_code.as_u16(),
        })
    }

    pub fn ok(message: &str) -> HttpResponse {
        Self::build(StatusCode::OK, message, "Success")
    }

    pub fn accepted(message: &str) -> HttpResponse {
        Self::build(StatusCode::ACCEPTED, message, "Accepted")
    }

    pub fn not_valid(message: &str) -> HttpResponse {
        Self::build(StatusCode::BAD_REQUEST, message, "Validation error")
    }

    pub fn unauthorized(message: &str) -> HttpResponse {
        Self::build(StatusCode::UNAUTHORIZED, message, "Unauthorized")
    }

    pub fn not_found(message: &str) -> HttpResponse {
        Self::build(StatusCode::NOT_FOUND, message, "Object not found")
    }

    pub fn internal_error(message: &str) -> HttpResponse {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, message, "Internal error")
    }
}
