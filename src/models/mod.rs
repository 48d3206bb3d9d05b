//! # Data Models
//!
//! SeaORM entities for users, imported projects, their pull requests and the
//! decision records attached to them.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod decision;
pub mod project;
pub mod pull_request;
pub mod user;

pub use decision::{DecisionStatus, Entity as Decision};
pub use project::{Entity as Project, Visibility};
pub use pull_request::{Entity as PullRequest, PullRequestStatus};
pub use user::Entity as User;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "whystack".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
