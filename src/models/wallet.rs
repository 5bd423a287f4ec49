use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A currency wallet owned by one authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: String,
    pub currency: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner_id: impl Into<String>, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            currency: currency.into(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, caller_id: &str) -> bool {
        self.owner_id == caller_id
    }

    pub fn can_debit(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// Kind of balance movement recorded against a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_transaction_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletTransactionKind {
    Deposit,
    Withdrawal,
    /// Debit leg of a transfer.
    TransferOut,
    /// Credit leg of a transfer.
    TransferIn,
}

impl WalletTransactionKind {
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            WalletTransactionKind::Deposit | WalletTransactionKind::TransferIn
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletTransactionKind::Deposit => "deposit",
            WalletTransactionKind::Withdrawal => "withdrawal",
            WalletTransactionKind::TransferOut => "transfer_out",
            WalletTransactionKind::TransferIn => "transfer_in",
        }
    }
}

/// One balance movement. Amounts are always positive; `kind` carries the sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: WalletTransactionKind,
    pub amount: Decimal,
    pub counterparty_wallet_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn new(wallet_id: Uuid, kind: WalletTransactionKind, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            kind,
            amount,
            counterparty_wallet_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_counterparty(mut self, counterparty_wallet_id: Uuid) -> Self {
        self.counterparty_wallet_id = Some(counterparty_wallet_id);
        self
    }

    /// Signed effect of this movement on the wallet balance.
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_wallet_is_empty() {
        let wallet = Wallet::new("user-1", "USD");
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert!(wallet.is_owned_by("user-1"));
        assert!(!wallet.is_owned_by("user-2"));
    }

    #[test]
    fn test_can_debit() {
        let mut wallet = Wallet::new("user-1", "USD");
        wallet.balance = dec!(100);
        assert!(wallet.can_debit(dec!(100)));
        assert!(!wallet.can_debit(dec!(100.01)));
    }

    #[test]
    fn test_signed_amount() {
        let id = Uuid::new_v4();
        let deposit = WalletTransaction::new(id, WalletTransactionKind::Deposit, dec!(25));
        let withdrawal = WalletTransaction::new(id, WalletTransactionKind::Withdrawal, dec!(25));
        assert_eq!(deposit.signed_amount(), dec!(25));
        assert_eq!(withdrawal.signed_amount(), dec!(-25));
    }

    #[test]
    fn test_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&WalletTransactionKind::TransferOut).unwrap();
        assert_eq!(json, "\"TRANSFER_OUT\"");
    }
}
