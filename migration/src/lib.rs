//! Database migrations for the WhyStack API.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_users;
mod m2025_01_10_000002_create_projects;
mod m2025_01_10_000003_create_pull_requests;
mod m2025_01_10_000004_create_decisions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_users::Migration),
            Box::new(m2025_01_10_000002_create_projects::Migration),
            Box::new(m2025_01_10_000003_create_pull_requests::Migration),
            Box::new(m2025_01_10_000004_create_decisions::Migration),
        ]
    }
}
