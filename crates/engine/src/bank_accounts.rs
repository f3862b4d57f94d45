//! The module contains `StoredBankAccount` and its table.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LinkError, ResultEngine, session::ParsedAccount};

/// A bank account read through a connection.
///
/// Always owned by exactly one `BankConnection`; removed before or together
/// with that connection's deactivation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBankAccount {
    pub id: Uuid,
    pub user_id: String,
    pub bank_connection_id: Uuid,
    /// Aggregator-side identifier, stable across syncs.
    pub account_id: String,
    pub currency: String,
    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub iban: Option<String>,
    pub current_balance_minor: Option<i64>,
    pub last_balance_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredBankAccount {
    pub fn from_parsed(user_id: &str, bank_connection_id: Uuid, parsed: ParsedAccount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            bank_connection_id,
            account_id: parsed.account_id,
            currency: parsed.currency,
            account_name: parsed.name,
            account_type: parsed.account_type,
            iban: parsed.iban,
            current_balance_minor: parsed.balance_minor,
            last_balance_update: parsed.balance_minor.map(|_| now),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bank_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub bank_connection_id: String,
    pub account_id: String,
    pub currency: String,
    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub iban: Option<String>,
    pub current_balance_minor: Option<i64>,
    pub last_balance_update: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bank_connections::Entity",
        from = "Column::BankConnectionId",
        to = "super::bank_connections::Column::Id"
    )]
    BankConnection,
}

impl Related<super::bank_connections::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BankConnection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&StoredBankAccount> for ActiveModel {
    fn from(account: &StoredBankAccount) -> Self {
        Self {
            id: ActiveValue::Set(account.id.to_string()),
            user_id: ActiveValue::Set(account.user_id.clone()),
            bank_connection_id: ActiveValue::Set(account.bank_connection_id.to_string()),
            account_id: ActiveValue::Set(account.account_id.clone()),
            currency: ActiveValue::Set(account.currency.clone()),
            account_name: ActiveValue::Set(account.account_name.clone()),
            account_type: ActiveValue::Set(account.account_type.clone()),
            iban: ActiveValue::Set(account.iban.clone()),
            current_balance_minor: ActiveValue::Set(account.current_balance_minor),
            last_balance_update: ActiveValue::Set(account.last_balance_update),
            created_at: ActiveValue::Set(account.created_at),
            updated_at: ActiveValue::Set(account.updated_at),
        }
    }
}

impl TryFrom<Model> for StoredBankAccount {
    type Error = LinkError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        let not_found = || LinkError::NotFound("bank account".to_string());
        Ok(Self {
            id: Uuid::parse_str(&model.id).map_err(|_| not_found())?,
            user_id: model.user_id,
            bank_connection_id: Uuid::parse_str(&model.bank_connection_id)
                .map_err(|_| not_found())?,
            account_id: model.account_id,
            currency: model.currency,
            account_name: model.account_name,
            account_type: model.account_type,
            iban: model.iban,
            current_balance_minor: model.current_balance_minor,
            last_balance_update: model.last_balance_update,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
