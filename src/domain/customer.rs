//! The customer record as stored in the `customers` table.

use serde::{Deserialize, Serialize};

/// A customer. `id` is assigned by the database on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: Option<i32>,
    pub name: String,
    /// Unique across the table.
    pub email: String,
}

impl Customer {
    /// A customer that has not been stored yet.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: email.into(),
        }
    }
}
