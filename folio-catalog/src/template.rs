use serde::{Deserialize, Serialize};
use async_trait::async_trait;

/// Publication state of a template in the catalog
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Draft,
    Active,
    Archived,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Draft => "draft",
            TemplateStatus::Active => "active",
            TemplateStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(TemplateStatus::Draft),
            "active" => Some(TemplateStatus::Active),
            "archived" => Some(TemplateStatus::Archived),
            _ => None,
        }
    }
}

/// A sellable digital template as the catalog knows it right now.
/// Orders copy the fields they need; later edits here never reach an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Template {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub file_ref: String,
    pub price_minor: i64,
    pub status: TemplateStatus,
}

impl Template {
    pub fn is_sellable(&self) -> bool {
        self.status == TemplateStatus::Active && self.price_minor >= 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog lookup failed: {0}")]
    Unavailable(String),
}

/// Read-only view of the template catalog
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Resolve a batch of ids. Unknown ids are simply absent from the result;
    /// each known id appears once regardless of how often it was requested.
    async fn resolve_by_ids(&self, ids: &[i64]) -> Result<Vec<Template>, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(status: TemplateStatus) -> Template {
        Template {
            id: 1,
            title: "Budget Planner".to_string(),
            slug: "budget-planner".to_string(),
            file_ref: "templates/budget-planner.xlsx".to_string(),
            price_minor: 49900,
            status,
        }
    }

    #[test]
    fn only_active_templates_are_sellable() {
        assert!(template(TemplateStatus::Active).is_sellable());
        assert!(!template(TemplateStatus::Draft).is_sellable());
        assert!(!template(TemplateStatus::Archived).is_sellable());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [TemplateStatus::Draft, TemplateStatus::Active, TemplateStatus::Archived] {
            assert_eq!(TemplateStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TemplateStatus::parse("published"), None);
    }
}
