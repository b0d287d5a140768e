use std::sync::Arc;

use concierge_agent::llm::{build_client, LlmError};
use concierge_agent::retrieval::{KeywordRetriever, NoopRetriever, RetrievalError, Retriever};
use concierge_agent::{OrchestratorSettings, ResponseOrchestrator};
use concierge_channel::{FormatError, WhatsAppFormatter};
use concierge_core::config::AppConfig;
use concierge_db::{connect_with_config, migrations, DbPool, Repositories};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<ResponseOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("knowledge base could not be loaded: {0}")]
    Knowledge(#[source] RetrievalError),
    #[error("llm client could not be built: {0}")]
    Llm(#[source] LlmError),
    #[error("formatter could not be built: {0}")]
    Formatter(#[source] FormatError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let retriever: Arc<dyn Retriever> = match &config.retrieval.knowledge_path {
        Some(path) => Arc::new(
            KeywordRetriever::from_json_file(path).await.map_err(BootstrapError::Knowledge)?,
        ),
        None => Arc::new(NoopRetriever),
    };
    let llm = build_client(&config.llm).map_err(BootstrapError::Llm)?;
    let formatter = WhatsAppFormatter::new(config.channel.max_chunk_chars)
        .map_err(BootstrapError::Formatter)?;

    info!(
        event_name = "system.bootstrap.orchestrator_ready",
        llm_provider = llm.name(),
        knowledge_base = config.retrieval.knowledge_path.is_some(),
        timeout_ms = config.pipeline.timeout_ms,
        "response orchestrator initialized"
    );

    let orchestrator = ResponseOrchestrator::new(
        Repositories::sql(db_pool.clone()),
        retriever,
        llm,
        Arc::new(formatter),
        OrchestratorSettings::from_config(&config),
    );

    Ok(Application { config, db_pool, orchestrator: Arc::new(orchestrator) })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use concierge_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn config(knowledge_path: Option<PathBuf>) -> AppConfig {
        AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                knowledge_path,
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config should load")
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_builds_orchestrator() {
        let app = bootstrap_with_config(config(None)).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('assistants', 'conversations', 'messages')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 3);
        assert_eq!(app.orchestrator.settings().timeout_ms, app.config.pipeline.timeout_ms);
        assert_eq!(app.orchestrator.stats().total_requests, 0);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_missing_knowledge_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = bootstrap_with_config(config(Some(dir.path().join("missing.json")))).await;

        assert!(matches!(result, Err(BootstrapError::Knowledge(_))));
    }

    #[tokio::test]
    async fn bootstrap_loads_knowledge_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("knowledge.json");
        std::fs::write(
            &path,
            r#"[{"business_id":"b1","source":"faq","source_id":"hours","content":"Abrimos às 7h."}]"#,
        )
        .expect("write knowledge");

        let app = bootstrap_with_config(config(Some(path))).await.expect("bootstrap should succeed");
        app.db_pool.close().await;
    }
}
