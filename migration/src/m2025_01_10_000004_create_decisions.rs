//! Migration to create the decisions table.
//!
//! At most one decision exists per pull request, enforced by a unique index
//! on `pull_request_id`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Decisions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Decisions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Decisions::PullRequestId).uuid().not_null())
                    .col(ColumnDef::new(Decisions::What).text().not_null())
                    .col(ColumnDef::new(Decisions::Why).text().not_null())
                    .col(ColumnDef::new(Decisions::OptionsConsidered).text().null())
                    .col(ColumnDef::new(Decisions::Tradeoffs).text().null())
                    .col(ColumnDef::new(Decisions::Author).text().not_null())
                    .col(
                        ColumnDef::new(Decisions::Status)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(Decisions::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Decisions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Decisions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_decisions_pull_request_id")
                            .from(Decisions::Table, Decisions::PullRequestId)
                            .to(PullRequests::Table, PullRequests::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_decisions_pull_request_id")
                    .table(Decisions::Table)
                    .col(Decisions::PullRequestId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_decisions_author_created")
                    .table(Decisions::Table)
                    .col(Decisions::Author)
                    .col(Decisions::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_decisions_pull_request_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_decisions_author_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Decisions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Decisions {
    Table,
    Id,
    PullRequestId,
    What,
    Why,
    OptionsConsidered,
    Tradeoffs,
    Author,
    Status,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PullRequests {
    Table,
    Id,
}
