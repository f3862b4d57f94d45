//! Reading the session document returned by the aggregator.
//!
//! Aggregators do not agree on a response shape, so every field is probed
//! through a fixed, ordered list of candidate keys. Each probe reports which
//! key matched or that nothing did.

use serde_json::{Map, Value};

use crate::amount;

/// Candidate keys for the session identifier, in priority order.
pub const SESSION_ID_KEYS: [&str; 5] = ["uid", "session_id", "id", "sessionId", "session_uid"];

const CONSENT_ID_KEYS: [&str; 3] = ["consent_id", "consentId", "authorization_id"];
const ACCOUNT_ID_KEYS: [&str; 4] = ["uid", "account_id", "resourceId", "id"];
const ACCOUNT_NAME_KEYS: [&str; 3] = ["name", "official_name", "product"];
const ACCOUNT_TYPE_KEYS: [&str; 3] = ["cash_account_type", "type", "subtype"];

/// Currency assumed when an account entry does not carry one.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// Outcome of looking up a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe<T> {
    Found { key: &'static str, value: T },
    NotFound,
}

impl<T> Probe<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Probe::Found { value, .. } => Some(value),
            Probe::NotFound => None,
        }
    }
}

/// An account entry that could be read from the session document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAccount {
    pub account_id: String,
    pub currency: String,
    pub name: Option<String>,
    pub account_type: Option<String>,
    pub iban: Option<String>,
    pub balance_minor: Option<i64>,
}

/// An account entry that was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedAccount {
    pub index: usize,
    pub reason: &'static str,
}

/// What the `accounts` field of a session document contained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountsProbe {
    /// No `accounts` key at all.
    NotFound,
    /// `accounts` is present but not an array.
    Malformed,
    Parsed {
        accounts: Vec<ParsedAccount>,
        rejected: Vec<RejectedAccount>,
    },
}

/// A borrowed view over an aggregator session document.
#[derive(Clone, Copy, Debug)]
pub struct SessionDocument<'a> {
    root: &'a Value,
}

impl<'a> SessionDocument<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    pub fn session_id(&self) -> Probe<String> {
        match self.root.as_object() {
            Some(object) => first_identifier(object, &SESSION_ID_KEYS),
            None => Probe::NotFound,
        }
    }

    /// Consent id embedded in the session itself, if the aggregator sends one.
    pub fn consent_id(&self) -> Probe<String> {
        match self.root.as_object() {
            Some(object) => first_identifier(object, &CONSENT_ID_KEYS),
            None => Probe::NotFound,
        }
    }

    pub fn bank_name(&self) -> Option<String> {
        let object = self.root.as_object()?;
        object
            .get("aspsp")
            .and_then(|aspsp| aspsp.get("name"))
            .and_then(non_empty_str)
            .or_else(|| object.get("institution_name").and_then(non_empty_str))
            .or_else(|| object.get("bank_name").and_then(non_empty_str))
            .map(ToString::to_string)
    }

    pub fn accounts(&self) -> AccountsProbe {
        let Some(field) = self.root.as_object().and_then(|o| o.get("accounts")) else {
            return AccountsProbe::NotFound;
        };
        let Some(entries) = field.as_array() else {
            return AccountsProbe::Malformed;
        };

        let mut accounts = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            match parse_account(entry) {
                Ok(account) => accounts.push(account),
                Err(reason) => rejected.push(RejectedAccount { index, reason }),
            }
        }
        AccountsProbe::Parsed { accounts, rejected }
    }
}

fn parse_account(entry: &Value) -> Result<ParsedAccount, &'static str> {
    let object = entry.as_object().ok_or("entry is not an object")?;
    let account_id = first_identifier(object, &ACCOUNT_ID_KEYS)
        .into_option()
        .ok_or("missing account id")?;

    let currency = object
        .get("currency")
        .and_then(non_empty_str)
        .or_else(|| {
            object
                .get("balances")
                .and_then(|b| b.get("iso_currency_code"))
                .and_then(non_empty_str)
        })
        .unwrap_or(DEFAULT_CURRENCY)
        .to_uppercase();

    let name = first_text(object, &ACCOUNT_NAME_KEYS);
    let account_type = first_text(object, &ACCOUNT_TYPE_KEYS);
    let iban = object
        .get("iban")
        .and_then(non_empty_str)
        .or_else(|| {
            object
                .get("account_id")
                .and_then(|id| id.get("iban"))
                .and_then(non_empty_str)
        })
        .map(ToString::to_string);

    let balance_minor = object
        .get("balance")
        .and_then(|b| b.get("amount"))
        .and_then(amount::minor_units)
        .or_else(|| {
            object
                .get("balances")
                .and_then(|b| b.get("current"))
                .and_then(amount::minor_units)
        })
        .or_else(|| object.get("current_balance").and_then(amount::minor_units));

    Ok(ParsedAccount {
        account_id,
        currency,
        name,
        account_type,
        iban,
        balance_minor,
    })
}

/// First key whose value is a non-empty string or an integer. Fractional
/// numbers are not identifiers.
fn first_identifier(object: &Map<String, Value>, keys: &[&'static str]) -> Probe<String> {
    for key in keys {
        let value = match object.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            _ => continue,
        };
        return Probe::Found { key: *key, value };
    }
    Probe::NotFound
}

fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(non_empty_str))
        .map(ToString::to_string)
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}
