//! The module contains `BankConnection` and its table.
//!
//! A connection is the durable proof that a user authorized the service to
//! read from their bank. Connections are never deleted by the linking flow:
//! a newer link or a disconnect only clears `is_active`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LinkError, ResultEngine};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankConnection {
    pub id: Uuid,
    pub user_id: String,
    /// Aggregator session identifier. Not a banking credential.
    pub access_token: String,
    pub consent_id: Option<String>,
    pub bank_name: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankConnection {
    /// A new active connection for `user_id`.
    pub fn new(
        user_id: &str,
        access_token: String,
        consent_id: Option<String>,
        bank_name: Option<String>,
        token_expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            access_token,
            consent_id,
            bank_name,
            token_expires_at,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at <= now
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bank_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    pub consent_id: Option<String>,
    pub bank_name: Option<String>,
    pub token_expires_at: DateTimeUtc,
    pub is_active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::bank_accounts::Entity")]
    BankAccounts,
}

impl Related<super::bank_accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BankAccounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&BankConnection> for ActiveModel {
    fn from(connection: &BankConnection) -> Self {
        Self {
            id: ActiveValue::Set(connection.id.to_string()),
            user_id: ActiveValue::Set(connection.user_id.clone()),
            access_token: ActiveValue::Set(connection.access_token.clone()),
            consent_id: ActiveValue::Set(connection.consent_id.clone()),
            bank_name: ActiveValue::Set(connection.bank_name.clone()),
            token_expires_at: ActiveValue::Set(connection.token_expires_at),
            is_active: ActiveValue::Set(connection.is_active),
            created_at: ActiveValue::Set(connection.created_at),
            updated_at: ActiveValue::Set(connection.updated_at),
        }
    }
}

impl TryFrom<Model> for BankConnection {
    type Error = LinkError;

    fn try_from(model: Model) -> ResultEngine<Self> {
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| LinkError::NotFound("bank connection".to_string()))?,
            user_id: model.user_id,
            access_token: model.access_token,
            consent_id: model.consent_id,
            bank_name: model.bank_name,
            token_expires_at: model.token_expires_at,
            is_active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
