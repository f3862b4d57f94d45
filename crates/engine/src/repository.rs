//! Persistence of bank connections and their accounts.

use chrono::Utc;
use sea_orm::{
    DatabaseConnection, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    prelude::*, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    BankConnection, ResultEngine, StoredBankAccount, bank_accounts, bank_connections,
};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

#[derive(Clone, Debug)]
pub struct ConnectionRepository {
    database: DatabaseConnection,
}

impl ConnectionRepository {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    pub async fn connection(&self, connection_id: Uuid) -> ResultEngine<Option<BankConnection>> {
        bank_connections::Entity::find_by_id(connection_id.to_string())
            .one(&self.database)
            .await?
            .map(BankConnection::try_from)
            .transpose()
    }

    /// Active connections of `user_id`, newest first.
    pub async fn active_connections(&self, user_id: &str) -> ResultEngine<Vec<BankConnection>> {
        bank_connections::Entity::find()
            .filter(bank_connections::Column::UserId.eq(user_id))
            .filter(bank_connections::Column::IsActive.eq(true))
            .order_by_desc(bank_connections::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(BankConnection::try_from)
            .collect()
    }

    /// Retire every active connection of the owner of `connection` and insert
    /// it, in one transaction. Accounts of the retired connections are
    /// deleted with them.
    ///
    /// Returns how many connections were deactivated and how many accounts
    /// were removed.
    pub async fn replace_active_connection(
        &self,
        connection: &BankConnection,
    ) -> ResultEngine<(u64, u64)> {
        with_tx!(self, |db_tx| {
            let previous: Vec<String> = bank_connections::Entity::find()
                .select_only()
                .column(bank_connections::Column::Id)
                .filter(bank_connections::Column::UserId.eq(connection.user_id.as_str()))
                .filter(bank_connections::Column::IsActive.eq(true))
                .into_tuple()
                .all(&db_tx)
                .await?;

            let mut removed_accounts = 0;
            let mut deactivated = 0;
            if !previous.is_empty() {
                removed_accounts = bank_accounts::Entity::delete_many()
                    .filter(bank_accounts::Column::UserId.eq(connection.user_id.as_str()))
                    .filter(bank_accounts::Column::BankConnectionId.is_in(previous.clone()))
                    .exec(&db_tx)
                    .await?
                    .rows_affected;

                deactivated = bank_connections::Entity::update_many()
                    .col_expr(bank_connections::Column::IsActive, Expr::value(false))
                    .col_expr(bank_connections::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(bank_connections::Column::Id.is_in(previous))
                    .exec(&db_tx)
                    .await?
                    .rows_affected;
            }

            bank_connections::ActiveModel::from(connection)
                .insert(&db_tx)
                .await?;
            ResultEngine::Ok((deactivated, removed_accounts))
        })
    }

    /// Set `is_active = false` if it is still set. Returns `true` only for the
    /// caller that flipped it.
    pub async fn deactivate_if_active(&self, connection_id: Uuid) -> ResultEngine<bool> {
        let result = bank_connections::Entity::update_many()
            .col_expr(bank_connections::Column::IsActive, Expr::value(false))
            .col_expr(bank_connections::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(bank_connections::Column::Id.eq(connection_id.to_string()))
            .filter(bank_connections::Column::IsActive.eq(true))
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Deactivate a connection and delete its accounts together. Returns the
    /// number of accounts removed.
    pub async fn retire_connection(&self, connection_id: Uuid) -> ResultEngine<u64> {
        with_tx!(self, |db_tx| {
            bank_connections::Entity::update_many()
                .col_expr(bank_connections::Column::IsActive, Expr::value(false))
                .col_expr(bank_connections::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(bank_connections::Column::Id.eq(connection_id.to_string()))
                .exec(&db_tx)
                .await?;

            let removed = bank_accounts::Entity::delete_many()
                .filter(bank_accounts::Column::BankConnectionId.eq(connection_id.to_string()))
                .exec(&db_tx)
                .await?
                .rows_affected;
            ResultEngine::Ok(removed)
        })
    }

    pub async fn insert_account(&self, account: &StoredBankAccount) -> ResultEngine<()> {
        bank_accounts::ActiveModel::from(account)
            .insert(&self.database)
            .await?;
        Ok(())
    }

    /// Look up a stored account by its row id, scoped to its owner.
    pub async fn account_for_user(
        &self,
        id: Uuid,
        user_id: &str,
    ) -> ResultEngine<Option<StoredBankAccount>> {
        bank_accounts::Entity::find_by_id(id.to_string())
            .filter(bank_accounts::Column::UserId.eq(user_id))
            .one(&self.database)
            .await?
            .map(StoredBankAccount::try_from)
            .transpose()
    }

    pub async fn accounts_for_user(&self, user_id: &str) -> ResultEngine<Vec<StoredBankAccount>> {
        bank_accounts::Entity::find()
            .filter(bank_accounts::Column::UserId.eq(user_id))
            .order_by_asc(bank_accounts::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(StoredBankAccount::try_from)
            .collect()
    }

    pub async fn count_accounts(&self, connection_id: Uuid) -> ResultEngine<u64> {
        let count = bank_accounts::Entity::find()
            .filter(bank_accounts::Column::BankConnectionId.eq(connection_id.to_string()))
            .count(&self.database)
            .await?;
        Ok(count)
    }

    /// Returns `false` when there was nothing to delete.
    pub async fn delete_account(&self, id: Uuid) -> ResultEngine<bool> {
        let result = bank_accounts::Entity::delete_by_id(id.to_string())
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn delete_accounts_for_user(&self, user_id: &str) -> ResultEngine<u64> {
        let result = bank_accounts::Entity::delete_many()
            .filter(bank_accounts::Column::UserId.eq(user_id))
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected)
    }
}
