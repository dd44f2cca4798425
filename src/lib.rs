pub mod adapters;
pub mod audit;
pub mod config;
pub mod credits;
pub mod error;
pub mod estimate;
pub mod ledger;
pub mod providers;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

pub use audit::SharedAuditLog;
pub use config::GatewayConfig;
pub use credits::Credits;
pub use error::{GatewayError, Result};
pub use server::{build_router, AppState};
pub use session::Gateway;
