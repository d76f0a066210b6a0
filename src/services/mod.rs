pub mod ledger;
pub mod monitor;
pub mod oracle;
pub mod payments;
pub mod rates;
pub mod store;
pub mod wallet;

pub use ledger::Ledger;
pub use monitor::{CompletionHandler, PaymentMonitor, TickOutcome};
pub use oracle::{BalanceOracle, BalanceSource, EthRpcSource, EtherscanSource, SolanaRpcSource};
pub use payments::PaymentService;
pub use rates::{RateQuote, RateService, RateSource};
pub use store::{connect_redis, open_store, MemoryStore, PaymentStore, RedisStore};
pub use wallet::{generate_wallet, GeneratedWallet};
