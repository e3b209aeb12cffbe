use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Policies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Policies::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Policies::Number).string().not_null())
                    .col(ColumnDef::new(Policies::Holder).string().not_null())
                    .col(ColumnDef::new(Policies::Phone).string())
                    .col(ColumnDef::new(Policies::Insurer).string().not_null())
                    .col(ColumnDef::new(Policies::Agent).string())
                    .col(ColumnDef::new(Policies::IssueDate).date())
                    .col(ColumnDef::new(Policies::Brand).string())
                    .col(ColumnDef::new(Policies::Model).string())
                    .col(ColumnDef::new(Policies::Year).integer())
                    .col(ColumnDef::new(Policies::Color).string())
                    .col(ColumnDef::new(Policies::Serie).string())
                    .col(ColumnDef::new(Policies::Plates).string())
                    .col(
                        ColumnDef::new(Policies::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Policies::DeletionReason).string())
                    .col(
                        ColumnDef::new(Policies::Payments)
                            .json()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Policies::Services)
                            .json()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Policies::Files)
                            .json()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Policies::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Policies::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Policy numbers are the lookup key for every flow
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_policies_number")
                    .table(Policies::Table)
                    .col(Policies::Number)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Policies::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Policies {
    Table,
    Id,
    Number,
    Holder,
    Phone,
    Insurer,
    Agent,
    IssueDate,
    Brand,
    Model,
    Year,
    Color,
    Serie,
    Plates,
    Status,
    DeletionReason,
    Payments,
    Services,
    Files,
    CreatedAt,
    UpdatedAt,
}
