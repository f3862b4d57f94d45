use sea_orm_migration::prelude::*;

use crate::m20261010_000001_bank_connections::BankConnections;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum BankAccounts {
    Table,
    Id,
    UserId,
    BankConnectionId,
    AccountId,
    Currency,
    AccountName,
    AccountType,
    Iban,
    CurrentBalanceMinor,
    LastBalanceUpdate,
    CreatedAt,
    UpdatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BankAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BankAccounts::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BankAccounts::UserId).string().not_null())
                    .col(
                        ColumnDef::new(BankAccounts::BankConnectionId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BankAccounts::AccountId).string().not_null())
                    .col(ColumnDef::new(BankAccounts::Currency).string().not_null())
                    .col(ColumnDef::new(BankAccounts::AccountName).string())
                    .col(ColumnDef::new(BankAccounts::AccountType).string())
                    .col(ColumnDef::new(BankAccounts::Iban).string())
                    .col(ColumnDef::new(BankAccounts::CurrentBalanceMinor).big_integer())
                    .col(ColumnDef::new(BankAccounts::LastBalanceUpdate).timestamp())
                    .col(ColumnDef::new(BankAccounts::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(BankAccounts::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-bank_accounts-bank_connection_id")
                            .from(BankAccounts::Table, BankAccounts::BankConnectionId)
                            .to(BankConnections::Table, BankConnections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-bank_accounts-user_id")
                    .table(BankAccounts::Table)
                    .col(BankAccounts::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-bank_accounts-bank_connection_id")
                    .table(BankAccounts::Table)
                    .col(BankAccounts::BankConnectionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BankAccounts::Table).to_owned())
            .await
    }
}
