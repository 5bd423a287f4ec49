use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Wallet, WalletTransaction, WalletTransactionKind};
use crate::services::wallet_service::TransferResult;

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ValidationErrorDetail>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Validation error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub services: ServiceHealth,
}

/// Service health status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub database: bool,
    pub redis: Option<bool>,
    pub idempotency_backend: String,
}

/// Wallet response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletResponse {
    pub id: Uuid,
    pub owner_id: String,
    pub currency: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            id: wallet.id,
            owner_id: wallet.owner_id,
            currency: wallet.currency,
            balance: wallet.balance,
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
        }
    }
}

/// Wallet transaction response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransactionResponse {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: WalletTransactionKind,
    pub amount: Decimal,
    pub counterparty_wallet_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<WalletTransaction> for WalletTransactionResponse {
    fn from(txn: WalletTransaction) -> Self {
        Self {
            id: txn.id,
            wallet_id: txn.wallet_id,
            kind: txn.kind,
            amount: txn.amount,
            counterparty_wallet_id: txn.counterparty_wallet_id,
            created_at: txn.created_at,
        }
    }
}

/// Transfer response: both legs plus the source balance afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub debit: WalletTransactionResponse,
    pub credit: WalletTransactionResponse,
    pub source_balance: Decimal,
}

impl From<TransferResult> for TransferResponse {
    fn from(result: TransferResult) -> Self {
        Self {
            debit: result.debit.into(),
            credit: result.credit.into(),
            source_balance: result.source.balance,
        }
    }
}

/// Result of a manual idempotency purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub purged: u64,
}

/// Paginated list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: i64, limit: i64, offset: i64) -> Self {
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}
