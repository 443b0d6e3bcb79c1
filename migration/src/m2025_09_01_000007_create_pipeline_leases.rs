//! Migration to create the pipeline_leases table (cross-process single-flight guard).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PipelineLeases::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipelineLeases::Name)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PipelineLeases::Holder).uuid().not_null())
                    .col(
                        ColumnDef::new(PipelineLeases::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PipelineLeases::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PipelineLeases::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PipelineLeases {
    Table,
    Name,
    Holder,
    ExpiresAt,
    UpdatedAt,
}
