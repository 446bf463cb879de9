pub mod health_checks;
pub mod logs;
mod response;
pub mod webhook;

pub use health_checks::*;
pub use logs::log_socket;
pub use response::JsonResponse;
pub use webhook::{push_handler, verify_signature, WebhookSecret};
