//! Migration to create the location_addresses table.
//!
//! Every business location carries the FIPS state and county codes used as the
//! disaster matching key, so both columns are mandatory and indexed together.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LocationAddresses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LocationAddresses::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LocationAddresses::CompanyId).uuid().not_null())
                    .col(ColumnDef::new(LocationAddresses::Alias).text().null())
                    .col(
                        ColumnDef::new(LocationAddresses::StreetAddress)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LocationAddresses::City).text().not_null())
                    .col(
                        ColumnDef::new(LocationAddresses::StateProvince)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LocationAddresses::PostalCode).text().not_null())
                    .col(ColumnDef::new(LocationAddresses::Country).text().not_null())
                    .col(
                        ColumnDef::new(LocationAddresses::FipsStateCode)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LocationAddresses::FipsCountyCode)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LocationAddresses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_location_addresses_company_id")
                            .from(LocationAddresses::Table, LocationAddresses::CompanyId)
                            .to(Companies::Table, Companies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_location_addresses_fips")
                    .table(LocationAddresses::Table)
                    .col(LocationAddresses::FipsStateCode)
                    .col(LocationAddresses::FipsCountyCode)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_location_addresses_fips").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LocationAddresses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LocationAddresses {
    Table,
    Id,
    CompanyId,
    Alias,
    StreetAddress,
    City,
    StateProvince,
    PostalCode,
    Country,
    FipsStateCode,
    FipsCountyCode,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Companies {
    Table,
    Id,
}
