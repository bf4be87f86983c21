//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod authorization;
pub mod logging;
pub mod migration;
mod status;
mod transfer;

pub use authorization::{generate_token, Authorization, TokenStore, TOKEN_BYTES};
pub use logging::{EntryPoint, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use status::{AccountSummary, StatusService, StatusSummary, TransferSummary, RECENT_TRANSFERS};
pub use transfer::TransferEngine;
