pub mod template;
pub mod pricing;
pub mod currency;

pub use template::{Template, TemplateStatus, TemplateCatalog, CatalogError};
pub use pricing::{PriceBreakdown, PricingError};
pub use currency::{CurrencyCode, CurrencyError, ExchangeRate, ExchangeRateProvider, StaticRateTable};
