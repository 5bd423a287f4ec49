use crate::error::{AppError, Result};
use crate::models::{Wallet, WalletTransaction, WalletTransactionKind};
use crate::observability::{get_metrics, mask_amount};
use crate::repositories::{TransactionRepository, WalletRepository};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Largest scale the `NUMERIC(20, 4)` balance columns hold.
pub const MAX_AMOUNT_SCALE: u32 = 4;

/// Outcome of a transfer: both legs and the source balance after the debit.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub debit: WalletTransaction,
    pub credit: WalletTransaction,
    pub source: Wallet,
}

/// Wallet operations. Every mutation runs in one database transaction.
pub struct WalletService {
    pool: PgPool,
    wallet_repo: WalletRepository,
    transaction_repo: TransactionRepository,
}

impl WalletService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            wallet_repo: WalletRepository::new(pool.clone()),
            transaction_repo: TransactionRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn create_wallet(&self, owner_id: &str, currency: &str) -> Result<Wallet> {
        let currency = validate_currency(currency)?;
        let wallet = self.wallet_repo.create(&Wallet::new(owner_id, currency)).await?;

        tracing::info!(wallet_id = %wallet.id, currency = %wallet.currency, "Wallet created");
        Ok(wallet)
    }

    /// Returns the wallet if the caller owns it.
    pub async fn get_wallet(&self, owner_id: &str, wallet_id: Uuid) -> Result<Wallet> {
        let wallet = self
            .wallet_repo
            .find_by_id(wallet_id)
            .await?
            .ok_or_else(|| wallet_not_found(wallet_id))?;
        ensure_owner(&wallet, owner_id)?;
        Ok(wallet)
    }

    pub async fn list_wallets(&self, owner_id: &str) -> Result<Vec<Wallet>> {
        self.wallet_repo.list_by_owner(owner_id).await
    }

    pub async fn list_transactions(
        &self,
        owner_id: &str,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>> {
        self.get_wallet(owner_id, wallet_id).await?;
        self.transaction_repo
            .list_by_wallet(wallet_id, limit, offset)
            .await
    }

    /// Number of movements on a wallet. Ownership is checked by the caller.
    pub async fn count_transactions(&self, wallet_id: Uuid) -> Result<i64> {
        self.transaction_repo.count_by_wallet(wallet_id).await
    }

    pub async fn deposit(
        &self,
        owner_id: &str,
        wallet_id: Uuid,
        amount: Decimal,
    ) -> Result<WalletTransaction> {
        validate_amount(amount)?;

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;
        let wallet = lock_owned(&mut tx, owner_id, wallet_id).await?;

        let txn = WalletTransaction::new(wallet.id, WalletTransactionKind::Deposit, amount);
        let (txn, _) = record_movement(&mut tx, &txn).await?;

        tx.commit().await.map_err(AppError::Database)?;

        get_metrics().record_wallet_mutation(txn.kind.as_str(), &wallet.currency);
        tracing::info!(wallet_id = %wallet.id, amount = %mask_amount(&amount), "Deposit applied");
        Ok(txn)
    }

    pub async fn withdraw(
        &self,
        owner_id: &str,
        wallet_id: Uuid,
        amount: Decimal,
    ) -> Result<WalletTransaction> {
        validate_amount(amount)?;

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;
        let wallet = lock_owned(&mut tx, owner_id, wallet_id).await?;

        if !wallet.can_debit(amount) {
            get_metrics().record_wallet_mutation_rejected("withdrawal", "insufficient_funds");
            return Err(AppError::InsufficientFunds(format!(
                "Wallet '{}' cannot cover the requested amount",
                wallet.id
            )));
        }

        let txn = WalletTransaction::new(wallet.id, WalletTransactionKind::Withdrawal, amount);
        let (txn, _) = record_movement(&mut tx, &txn).await?;

        tx.commit().await.map_err(AppError::Database)?;

        get_metrics().record_wallet_mutation(txn.kind.as_str(), &wallet.currency);
        tracing::info!(wallet_id = %wallet.id, amount = %mask_amount(&amount), "Withdrawal applied");
        Ok(txn)
    }

    /// Moves funds from a caller-owned wallet to any wallet in the same currency.
    pub async fn transfer(
        &self,
        owner_id: &str,
        from_wallet_id: Uuid,
        to_wallet_id: Uuid,
        amount: Decimal,
    ) -> Result<TransferResult> {
        validate_amount(amount)?;
        if from_wallet_id == to_wallet_id {
            return Err(AppError::Validation(
                "Source and destination wallets must differ".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        // Lock in id order so opposing transfers cannot deadlock.
        let (first, second) = if from_wallet_id < to_wallet_id {
            (from_wallet_id, to_wallet_id)
        } else {
            (to_wallet_id, from_wallet_id)
        };
        let first = WalletRepository::lock(&mut tx, first)
            .await?
            .ok_or_else(|| wallet_not_found(first))?;
        let second = WalletRepository::lock(&mut tx, second)
            .await?
            .ok_or_else(|| wallet_not_found(second))?;
        let (source, destination) = if first.id == from_wallet_id {
            (first, second)
        } else {
            (second, first)
        };

        ensure_owner(&source, owner_id)?;
        if source.currency != destination.currency {
            return Err(AppError::Validation(format!(
                "Currency mismatch: {} to {}",
                source.currency, destination.currency
            )));
        }
        if !source.can_debit(amount) {
            get_metrics().record_wallet_mutation_rejected("transfer", "insufficient_funds");
            return Err(AppError::InsufficientFunds(format!(
                "Wallet '{}' cannot cover the requested amount",
                source.id
            )));
        }

        let debit = WalletTransaction::new(source.id, WalletTransactionKind::TransferOut, amount)
            .with_counterparty(destination.id);
        let credit =
            WalletTransaction::new(destination.id, WalletTransactionKind::TransferIn, amount)
                .with_counterparty(source.id);

        let (debit, source) = record_movement(&mut tx, &debit).await?;
        let (credit, _) = record_movement(&mut tx, &credit).await?;

        tx.commit().await.map_err(AppError::Database)?;

        get_metrics().record_wallet_mutation("transfer", &source.currency);
        tracing::info!(
            from_wallet_id = %source.id,
            to_wallet_id = %destination.id,
            amount = %mask_amount(&amount),
            "Transfer applied"
        );

        Ok(TransferResult {
            debit,
            credit,
            source,
        })
    }
}

async fn lock_owned(conn: &mut PgConnection, owner_id: &str, wallet_id: Uuid) -> Result<Wallet> {
    let wallet = WalletRepository::lock(conn, wallet_id)
        .await?
        .ok_or_else(|| wallet_not_found(wallet_id))?;
    ensure_owner(&wallet, owner_id)?;
    Ok(wallet)
}

/// Inserts the movement and applies its signed amount to the wallet balance.
async fn record_movement(
    conn: &mut PgConnection,
    txn: &WalletTransaction,
) -> Result<(WalletTransaction, Wallet)> {
    let recorded = TransactionRepository::insert(conn, txn).await?;
    let wallet = WalletRepository::apply_delta(conn, txn.wallet_id, txn.signed_amount()).await?;
    Ok((recorded, wallet))
}

fn ensure_owner(wallet: &Wallet, owner_id: &str) -> Result<()> {
    if wallet.is_owned_by(owner_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Wallet '{}' does not belong to the caller",
            wallet.id
        )))
    }
}

fn wallet_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Wallet with id '{}' not found", id))
}

/// Amounts must be positive and fit the stored scale.
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(AppError::Validation(format!(
            "Amount supports at most {} decimal places",
            MAX_AMOUNT_SCALE
        )));
    }
    Ok(())
}

/// Accepts a 3-letter ISO 4217 style code and returns it upper-cased.
pub fn validate_currency(currency: &str) -> Result<String> {
    let currency = currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation(
            "Currency must be a 3-letter ISO 4217 code".to_string(),
        ));
    }
    Ok(currency.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(dec!(100)).is_ok());
        assert!(validate_amount(dec!(0.0001)).is_ok());
        assert!(validate_amount(dec!(1.50000)).is_ok());
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(dec!(-5)).is_err());
        assert!(validate_amount(dec!(0.00001)).is_err());
    }

    #[test]
    fn test_validate_currency() {
        assert_eq!(validate_currency("usd").unwrap(), "USD");
        assert_eq!(validate_currency(" EUR ").unwrap(), "EUR");
        assert!(validate_currency("US").is_err());
        assert!(validate_currency("US1").is_err());
        assert!(validate_currency("EURO").is_err());
    }

    #[test]
    fn test_ensure_owner() {
        let wallet = Wallet::new("user-1", "USD");
        assert!(ensure_owner(&wallet, "user-1").is_ok());
        assert!(matches!(
            ensure_owner(&wallet, "user-2"),
            Err(AppError::Forbidden(_))
        ));
    }
}
