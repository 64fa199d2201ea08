pub mod models;
pub mod error;
pub mod policy;
pub mod tokens;
pub mod notify;
pub mod manager;
pub mod orchestrator;
pub mod verifier;
pub mod approval;
pub mod download;
pub mod sweep;
pub mod memory;

pub use error::OrderError;
pub use policy::OrderPolicy;
pub use manager::{CreateOrderRequest, CreatedOrder, CustomerDetails, OrderManager};
pub use orchestrator::{MockPaymentGateway, PaymentOrchestrator};
pub use verifier::{PaymentVerifier, Verification, WebhookOutcome};
pub use approval::{ApprovalWorkflow, OrderDetails};
pub use download::{DownloadAuthorizer, DownloadCredential, DownloadGrant, DownloadRequest};
pub use sweep::PendingOrderSweeper;
