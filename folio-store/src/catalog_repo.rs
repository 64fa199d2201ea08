use async_trait::async_trait;
use folio_catalog::{CatalogError, Template, TemplateCatalog, TemplateStatus};
use sqlx::PgPool;
use tracing::warn;

pub struct PgTemplateCatalog {
    pool: PgPool,
}

impl PgTemplateCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    title: String,
    slug: String,
    file_ref: String,
    price_minor: i64,
    status: String,
}

#[async_trait]
impl TemplateCatalog for PgTemplateCatalog {
    async fn resolve_by_ids(&self, ids: &[i64]) -> Result<Vec<Template>, CatalogError> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, title, slug, file_ref, price_minor, status
            FROM templates
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let mut templates = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(status) = TemplateStatus::parse(&row.status) else {
                warn!("Template {} has unknown status '{}', skipping", row.id, row.status);
                continue;
            };
            templates.push(Template {
                id: row.id,
                title: row.title,
                slug: row.slug,
                file_ref: row.file_ref,
                price_minor: row.price_minor,
                status,
            });
        }
        Ok(templates)
    }
}
