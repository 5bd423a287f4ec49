pub mod transaction_repository;
pub mod wallet_repository;

pub use transaction_repository::TransactionRepository;
pub use wallet_repository::WalletRepository;
