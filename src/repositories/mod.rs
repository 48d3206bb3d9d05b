//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for WhyStack's entities.

pub mod decision;
pub mod project;
pub mod pull_request;
pub mod user;

pub use decision::{DecisionContent, DecisionRepository, DecisionSearch};
pub use project::{NewProject, ProjectRepository};
pub use pull_request::{
    PullRequestRepository, PullRequestSnapshot, PullRequestWithDecision, UpsertOutcome,
};
pub use user::{GitHubIdentity, UserRepository};
