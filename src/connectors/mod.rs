//! External provider connectors.
//!
//! Every outbound integration sits behind a trait so stages and jobs can be
//! exercised without network access:
//!
//! 1. the trait and its HTTP client live together in `{provider}.rs`
//! 2. settings come from [`crate::configuration::Settings`]
//! 3. callers hold `Arc<dyn Trait>` and never see reqwest

pub mod cloudflare;
pub mod errors;
pub mod notifier;

pub use cloudflare::{CloudflareClient, DnsProvider, DnsRecordType, Zone};
pub use errors::ConnectorError;
pub use notifier::{HttpNotifier, LogNotifier, Notification, Notifier};
