//! Migration to create the projects table.
//!
//! A project is an imported GitHub repository. `external_repo_id` is unique
//! system-wide so a repository can only be imported once.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Projects::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Projects::ExternalRepoId).text().not_null())
                    .col(ColumnDef::new(Projects::Name).text().not_null())
                    .col(ColumnDef::new(Projects::Owner).text().not_null())
                    .col(
                        ColumnDef::new(Projects::Visibility)
                            .text()
                            .not_null()
                            .default("public"),
                    )
                    .col(ColumnDef::new(Projects::ImportedBy).uuid().not_null())
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_projects_imported_by")
                            .from(Projects::Table, Projects::ImportedBy)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_projects_external_repo_id")
                    .table(Projects::Table)
                    .col(Projects::ExternalRepoId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Listing a user's projects filters on the importer
        manager
            .create_index(
                Index::create()
                    .name("idx_projects_imported_by")
                    .table(Projects::Table)
                    .col(Projects::ImportedBy)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_projects_external_repo_id").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_projects_imported_by").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
    ExternalRepoId,
    Name,
    Owner,
    Visibility,
    ImportedBy,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
