//! Migration to create the fema_disasters table.
//!
//! The primary key is the feed's own declaration id so re-ingesting a record can never
//! produce a second row. `fanout_pending` marks declarations whose notification fan-out
//! has not completed yet.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FemaDisasters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FemaDisasters::Id)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::DisasterNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::FipsStateCode)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::FipsCountyCode)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::DeclarationDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::IncidentBeginDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::IncidentEndDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::DeclarationType)
                            .string_len(2)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::DesignatedArea)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::DesignatedIncidentTypes)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::LastRefresh)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::FanoutPending)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::FanoutCompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(FemaDisasters::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_fema_disasters_fanout_pending")
                    .table(FemaDisasters::Table)
                    .col(FemaDisasters::FanoutPending)
                    .col(FemaDisasters::DeclarationDate)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_fema_disasters_fanout_pending")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(FemaDisasters::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FemaDisasters {
    Table,
    Id,
    DisasterNumber,
    FipsStateCode,
    FipsCountyCode,
    DeclarationDate,
    IncidentBeginDate,
    IncidentEndDate,
    DeclarationType,
    DesignatedArea,
    DesignatedIncidentTypes,
    LastRefresh,
    FanoutPending,
    FanoutCompletedAt,
    CreatedAt,
    UpdatedAt,
}
