pub mod wallet;

pub use wallet::{Wallet, WalletTransaction, WalletTransactionKind};
