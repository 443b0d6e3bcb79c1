//! Migration to create the disaster_notifications table.
//!
//! The unique `(user_id, fema_disaster_id)` index is what serialises concurrent fan-out:
//! a second insert for the same pair fails and is turned into a refresh.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DisasterNotifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DisasterNotifications::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DisasterNotifications::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(DisasterNotifications::FemaDisasterId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::LocationAddressId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::IsWeb)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::IsEmail)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::NotificationStatus)
                            .text()
                            .not_null()
                            .default("unread"),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::FirstSentAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::LastSentAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::ReadAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DisasterNotifications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_disaster_notifications_user_id")
                            .from(DisasterNotifications::Table, DisasterNotifications::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_disaster_notifications_fema_disaster_id")
                            .from(
                                DisasterNotifications::Table,
                                DisasterNotifications::FemaDisasterId,
                            )
                            .to(FemaDisasters::Table, FemaDisasters::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_disaster_notifications_location_address_id")
                            .from(
                                DisasterNotifications::Table,
                                DisasterNotifications::LocationAddressId,
                            )
                            .to(LocationAddresses::Table, LocationAddresses::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_disaster_notifications_user_disaster")
                    .table(DisasterNotifications::Table)
                    .col(DisasterNotifications::UserId)
                    .col(DisasterNotifications::FemaDisasterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_disaster_notifications_user_status")
                    .table(DisasterNotifications::Table)
                    .col(DisasterNotifications::UserId)
                    .col(DisasterNotifications::NotificationStatus)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_disaster_notifications_user_status")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("uq_disaster_notifications_user_disaster")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(DisasterNotifications::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DisasterNotifications {
    Table,
    Id,
    UserId,
    FemaDisasterId,
    LocationAddressId,
    IsWeb,
    IsEmail,
    NotificationStatus,
    FirstSentAt,
    LastSentAt,
    ReadAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum FemaDisasters {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum LocationAddresses {
    Table,
    Id,
}
