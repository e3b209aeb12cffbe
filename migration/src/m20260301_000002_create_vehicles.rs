use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vehicles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Vehicles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Vehicles::Serie).string().not_null())
                    .col(ColumnDef::new(Vehicles::Brand).string().not_null())
                    .col(ColumnDef::new(Vehicles::Model).string().not_null())
                    .col(ColumnDef::new(Vehicles::Year).integer().not_null())
                    .col(ColumnDef::new(Vehicles::Color).string().not_null())
                    .col(ColumnDef::new(Vehicles::Plates).string().not_null())
                    .col(ColumnDef::new(Vehicles::OwnerUserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Vehicles::Photos)
                            .json()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(Vehicles::PolicyNumber).string())
                    .col(
                        ColumnDef::new(Vehicles::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Vehicles::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_vehicles_serie")
                    .table(Vehicles::Table)
                    .col(Vehicles::Serie)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_vehicles_plates")
                    .table(Vehicles::Table)
                    .col(Vehicles::Plates)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Policy assignment lists vehicles still waiting for a policy
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_vehicles_policy_number")
                    .table(Vehicles::Table)
                    .col(Vehicles::PolicyNumber)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Vehicles::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Vehicles {
    Table,
    Id,
    Serie,
    Brand,
    Model,
    Year,
    Color,
    Plates,
    OwnerUserId,
    Photos,
    PolicyNumber,
    CreatedAt,
    UpdatedAt,
}
