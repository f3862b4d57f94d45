use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
pub enum BankConnections {
    Table,
    Id,
    UserId,
    AccessToken,
    ConsentId,
    BankName,
    TokenExpiresAt,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BankConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BankConnections::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BankConnections::UserId).string().not_null())
                    .col(
                        ColumnDef::new(BankConnections::AccessToken)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BankConnections::ConsentId).string())
                    .col(ColumnDef::new(BankConnections::BankName).string())
                    .col(
                        ColumnDef::new(BankConnections::TokenExpiresAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BankConnections::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(BankConnections::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BankConnections::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-bank_connections-user_id-is_active")
                    .table(BankConnections::Table)
                    .col(BankConnections::UserId)
                    .col(BankConnections::IsActive)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BankConnections::Table).to_owned())
            .await
    }
}
