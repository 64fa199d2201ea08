use folio_catalog::{CatalogError, CurrencyError, PricingError};
use folio_core::order::{DownloadDenial, OrderStatus};
use folio_core::payment::GatewayError;
use folio_core::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("None of the requested templates exist")]
    NoTemplatesFound,

    #[error("Unknown template ids: {0:?}")]
    InvalidTemplates(Vec<i64>),

    #[error("Template {0} is not available for purchase")]
    TemplateInactive(i64),

    #[error("Order is {current}, cannot move to {attempted}")]
    InvalidStatus {
        current: OrderStatus,
        attempted: OrderStatus,
    },

    #[error("Payment signature verification failed")]
    InvalidSignature,

    #[error("Order has not been approved for download")]
    OrderNotApproved,

    #[error("Download link has expired")]
    LinkExpired,

    #[error("Download limit reached")]
    DownloadLimitExceeded,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Currency(#[from] CurrencyError),
}

impl From<PricingError> for OrderError {
    fn from(err: PricingError) -> Self {
        OrderError::Validation(err.to_string())
    }
}

impl From<DownloadDenial> for OrderError {
    fn from(denial: DownloadDenial) -> Self {
        match denial {
            DownloadDenial::NotApproved => OrderError::OrderNotApproved,
            DownloadDenial::LinkExpired => OrderError::LinkExpired,
            DownloadDenial::LimitExceeded => OrderError::DownloadLimitExceeded,
        }
    }
}
