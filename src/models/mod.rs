mod custom_domain;
mod deployment;
mod project;

pub use custom_domain::*;
pub use deployment::*;
pub use project::*;
