//! Migration to create the email_jobs table backing the durable email dispatch queue.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(EmailJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(EmailJobs::NotificationId).uuid().not_null())
                    .col(ColumnDef::new(EmailJobs::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(EmailJobs::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(EmailJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(EmailJobs::AvailableAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EmailJobs::LockedUntil)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(EmailJobs::ClaimToken).uuid().null())
                    .col(ColumnDef::new(EmailJobs::LastError).text().null())
                    .col(
                        ColumnDef::new(EmailJobs::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(EmailJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EmailJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One email per notification, even if enqueue is retried
        manager
            .create_index(
                Index::create()
                    .name("uq_email_jobs_notification_id")
                    .table(EmailJobs::Table)
                    .col(EmailJobs::NotificationId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_jobs_status_available")
                    .table(EmailJobs::Table)
                    .col(EmailJobs::Status)
                    .col(EmailJobs::AvailableAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_jobs_claim_token")
                    .table(EmailJobs::Table)
                    .col(EmailJobs::ClaimToken)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_email_jobs_claim_token",
            "idx_email_jobs_status_available",
            "uq_email_jobs_notification_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }
        manager
            .drop_table(Table::drop().table(EmailJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EmailJobs {
    Table,
    Id,
    NotificationId,
    Payload,
    Status,
    Attempts,
    AvailableAt,
    LockedUntil,
    ClaimToken,
    LastError,
    SentAt,
    CreatedAt,
    UpdatedAt,
}
