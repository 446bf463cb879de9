pub mod builder;
pub mod configuration;
pub mod connectors;
pub mod context;
pub mod db;
pub mod detector;
pub mod dns;
pub mod domains;
pub mod errors;
pub mod events;
pub mod frameworks;
pub mod lifecycle;
pub mod logs;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod routes;
pub mod source;
pub mod startup;
pub mod telemetry;
