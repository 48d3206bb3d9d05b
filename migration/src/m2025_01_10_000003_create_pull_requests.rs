//! Migration to create the pull_requests table.
//!
//! Rows are written by the webhook reconciler and the initial import sync.
//! The composite unique index on (project_id, external_pr_number) is the
//! conflict target for the atomic upsert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PullRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PullRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PullRequests::ProjectId).uuid().not_null())
                    .col(
                        ColumnDef::new(PullRequests::ExternalPrNumber)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PullRequests::Title).text().not_null())
                    .col(ColumnDef::new(PullRequests::Author).text().not_null())
                    .col(
                        ColumnDef::new(PullRequests::Status)
                            .text()
                            .not_null()
                            .default("OPEN"),
                    )
                    .col(
                        ColumnDef::new(PullRequests::MergedWithoutDecision)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PullRequests::ExternalCreatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::ExternalUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::ExternalClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::ExternalMergedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::SystemCreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PullRequests::SystemUpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pull_requests_project_id")
                            .from(PullRequests::Table, PullRequests::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_project_number")
                    .table(PullRequests::Table)
                    .col(PullRequests::ProjectId)
                    .col(PullRequests::ExternalPrNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_project_updated")
                    .table(PullRequests::Table)
                    .col(PullRequests::ProjectId)
                    .col(PullRequests::ExternalUpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_pull_requests_project_number")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_pull_requests_project_updated")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(PullRequests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PullRequests {
    Table,
    Id,
    ProjectId,
    ExternalPrNumber,
    Title,
    Author,
    Status,
    MergedWithoutDecision,
    ExternalCreatedAt,
    ExternalUpdatedAt,
    ExternalClosedAt,
    ExternalMergedAt,
    SystemCreatedAt,
    SystemUpdatedAt,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
