pub mod core;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod ratelimit;
pub mod storage;
pub mod store;
pub mod xml;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use crate::core::{EngineConfig, EngineError, EngineResult, NamedLimit, ProviderSettings};
pub use engine::{
    Engine, EngineMessage, KafkaBus, MemoryBus, MessageBus, StatusPoller, SubmitOrchestrator,
    MAX_ATTEMPTS,
};
pub use models::{
    DocumentKind, EInvoiceSubmission, InvoiceDocument, InvoiceLine, InvoiceRecord, InvoiceState,
    MonetaryTotal, Party, PaymentMeans, PostalAddress, ProviderId, SubmissionStatus, TaxCategory,
    TaxTotal,
};
pub use providers::{CredentialsResolver, ProviderRegistry, StaticCredentials};
pub use ratelimit::{GovernorRateLimitGuard, RateLimitGuard, RedisRateLimitGuard, UnlimitedGuard};
pub use storage::{MemoryObjectStore, ObjectStore};
pub use store::{InvoiceStore, MemoryStore, SubmissionStore};
