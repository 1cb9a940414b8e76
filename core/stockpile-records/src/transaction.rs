//! Borrow/return transactions against a shared resource.

use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockpile_types::namespaces;

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Borrow,
    Return,
}

/// A resource moving to or from a borrower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub resource_id: String,
    pub borrower_id: String,
    pub quantity: i64,
    pub kind: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A new, unsaved transaction stamped with the current time.
    pub fn new(
        resource_id: impl Into<String>,
        borrower_id: impl Into<String>,
        quantity: i64,
        kind: TransactionKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            resource_id: resource_id.into(),
            borrower_id: borrower_id.into(),
            quantity,
            kind,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Marks the transaction as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Record for Transaction {
    const COLLECTION: &'static str = namespaces::TRANSACTIONS;
    const ID_PREFIX: &'static str = "txn";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), String> {
        if self.resource_id.trim().is_empty() {
            return Err("resource_id is required".into());
        }
        if self.borrower_id.trim().is_empty() {
            return Err("borrower_id is required".into());
        }
        if self.quantity <= 0 {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transaction() {
        let txn = Transaction::new("r1", "b1", 2, TransactionKind::Borrow);
        assert!(txn.validate().is_ok());
    }

    #[test]
    fn missing_fields_rejected() {
        let txn = Transaction::new(" ", "b1", 1, TransactionKind::Borrow);
        assert_eq!(txn.validate().unwrap_err(), "resource_id is required");

        let txn = Transaction::new("r1", "", 1, TransactionKind::Return);
        assert_eq!(txn.validate().unwrap_err(), "borrower_id is required");
    }

    #[test]
    fn non_positive_quantity_rejected() {
        let txn = Transaction::new("r1", "b1", 0, TransactionKind::Borrow);
        assert!(txn.validate().unwrap_err().contains("quantity"));
    }

    #[test]
    fn unsaved_id_is_omitted_from_json() {
        let txn = Transaction::new("r1", "b1", 1, TransactionKind::Return);
        let json = serde_json::to_value(&txn).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("notes").is_none());
        assert_eq!(json["kind"], "return");
    }

    #[test]
    fn notes_are_serialized_when_set() {
        let txn = Transaction::new("r1", "b1", 1, TransactionKind::Borrow).with_notes("back Friday");
        let json = serde_json::to_value(&txn).unwrap();
        assert_eq!(json["notes"], "back Friday");
    }
}
