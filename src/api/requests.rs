use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::wallet_service::{validate_amount, validate_currency};

/// Request to open a wallet for the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    pub currency: String,
}

impl CreateWalletRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if validate_currency(&self.currency).is_err() {
            errors.push(ValidationError::new("currency", "currency must be a 3-letter ISO 4217 code"));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Body of a deposit or withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

impl AmountRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if let Err(e) = validate_amount(self.amount) {
            errors.push(ValidationError::new("amount", e.user_message()));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Request to move funds between two wallets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Uuid,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.from_wallet_id == self.to_wallet_id {
            errors.push(ValidationError::new("to_wallet_id", "destination must differ from source"));
        }
        if let Err(e) = validate_amount(self.amount) {
            errors.push(ValidationError::new("amount", e.user_message()));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Query parameters for listing wallet transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct ListTransactionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl ListTransactionsQuery {
    /// Clamps paging to sane bounds.
    pub fn bounds(&self) -> (i64, i64) {
        (self.limit.clamp(1, 500), self.offset.max(0))
    }
}

fn default_limit() -> i64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_wallet_request_validation() {
        assert!(CreateWalletRequest { currency: "USD".to_string() }.validate().is_ok());

        let errors = CreateWalletRequest { currency: "DOLLARS".to_string() }
            .validate()
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "currency");
    }

    #[test]
    fn test_transfer_request_collects_all_errors() {
        let id = Uuid::new_v4();
        let request = TransferRequest {
            from_wallet_id: id,
            to_wallet_id: id,
            amount: dec!(-1),
        };
        let errors = request.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["to_wallet_id", "amount"]);
    }

    #[test]
    fn test_list_query_bounds() {
        let query = ListTransactionsQuery { limit: 10_000, offset: -3 };
        assert_eq!(query.bounds(), (500, 0));
    }
}
