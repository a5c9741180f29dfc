use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::context::RowscopeContext;
use crate::query::pagination::PaginationPlanner;
use crate::repository::{interface::Repository, sqlite::SqliteRepository};

#[cfg(feature = "store-postgres")]
use crate::repository::postgres::PostgresRepository;

use super::schema;

async fn build_repository(
    config: &schema::RowscopeConfig,
) -> Result<Arc<dyn Repository>, sqlx::Error> {
    let repository: Arc<dyn Repository> = match &config.store {
        #[cfg(feature = "store-postgres")]
        schema::Store::Postgres(schema::Postgres {
            dsn,
            max_connections,
        }) => Arc::new(PostgresRepository::try_new(dsn.to_string(), *max_connections).await?),
        schema::Store::Sqlite(schema::Sqlite {
            dsn,
            max_connections,
        }) => Arc::new(SqliteRepository::try_new(dsn.to_string(), *max_connections).await?),
    };

    Ok(repository)
}

pub async fn build_context(cfg: schema::RowscopeConfig) -> Result<RowscopeContext, sqlx::Error> {
    let repository = build_repository(&cfg).await?;
    let browser = cfg.browser;

    if browser.schemas.is_empty() {
        info!("No schema allow-list configured, every schema is browsable");
    }

    Ok(RowscopeContext::new(
        repository,
        PaginationPlanner::new(
            browser.keyset_threshold,
            browser.page_size,
            browser.max_page_size,
        ),
        Duration::from_secs(browser.catalog_ttl),
        browser.schemas,
        browser.audit_columns,
        browser.export_batch_size,
    ))
}
