pub mod audit;
pub mod compliance;
pub mod fees;
pub mod ledger;
pub mod limits;
pub mod orchestrator;
pub mod poller;
pub mod rates;
pub mod settlement;

pub use audit::{AuditEvent, AuditQueue, AuditSink, AuditWriter, PostgresAuditWriter, TracingAuditWriter};
pub use compliance::ComplianceScreener;
pub use fees::{Charges, FeeBreakdown, FeeCalculator};
pub use ledger::LedgerPoster;
pub use limits::{LimitCheck, LimitKind, LimitValidator};
pub use orchestrator::{
    OrchestratorSettings, Quote, SendOutcome, SendRequest, SendResult, TransactionOrchestrator,
};
pub use poller::{run_confirmation_poller, ConfirmationPoller, PollSummary};
pub use rates::{MemoryRateCache, RateCache, RateProvider, RedisRateCache};
pub use settlement::{SettlementOutcome, SettlementService, SettlementUpdate};
