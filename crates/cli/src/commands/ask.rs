use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use concierge_agent::llm::build_client;
use concierge_agent::retrieval::{KeywordRetriever, NoopRetriever, Retriever};
use concierge_agent::{OrchestratorSettings, ResponseOrchestrator};
use concierge_channel::WhatsAppFormatter;
use concierge_core::config::AppConfig;
use concierge_core::domain::assistant::{AssistantId, BusinessId};
use concierge_core::domain::conversation::ConversationId;
use concierge_core::domain::customer::CustomerMetadata;
use concierge_core::domain::request::{ProcessingOptions, ResponseRequest};
use concierge_core::domain::response::ResponseResult;
use concierge_db::fixtures::{DEMO_ASSISTANT_ID, DEMO_BUSINESS_ID};
use concierge_db::{DbPool, Repositories};
use serde_json::json;

use crate::commands::seed::load_and_verify;
use crate::commands::{open_migrated_pool, prepare, CommandResult, StepFailure};

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(help = "Customer message to answer")]
    pub message: String,
    #[arg(long, default_value = "conv-demo-pt")]
    pub conversation: String,
    #[arg(long, default_value = DEMO_ASSISTANT_ID)]
    pub assistant: String,
    #[arg(long, default_value = DEMO_BUSINESS_ID)]
    pub business: String,
    #[arg(long, help = "Customer name hint")]
    pub name: Option<String>,
    #[arg(long, help = "Customer phone hint")]
    pub phone: Option<String>,
    #[arg(long, help = "Preferred language hint, e.g. pt-BR or en")]
    pub language: Option<String>,
    #[arg(long, help = "Per-request pipeline time budget in milliseconds")]
    pub timeout_ms: Option<u64>,
    #[arg(long, help = "Load the demo dataset before answering")]
    pub seed: bool,
}

impl AskArgs {
    fn into_request(self) -> ResponseRequest {
        let customer = CustomerMetadata {
            name: self.name,
            phone: self.phone,
            language: self.language,
            sentiment: None,
        };
        let mut request = ResponseRequest::new(
            self.message,
            ConversationId::new(self.conversation),
            AssistantId::new(self.assistant),
            BusinessId::new(self.business),
        );
        if customer != CustomerMetadata::default() {
            request = request.with_customer(customer);
        }
        if self.timeout_ms.is_some() {
            request = request.with_options(ProcessingOptions {
                timeout_ms: self.timeout_ms,
                ..ProcessingOptions::default()
            });
        }
        request
    }
}

pub fn run(args: AskArgs) -> CommandResult {
    let (config, runtime) = match prepare("ask") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let seed = args.seed;
    let request = args.into_request();

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let outcome = answer(&config, &pool, request, seed).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok((result, orchestrator_stats)) => render(result, orchestrator_stats),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
    }
}

async fn answer(
    config: &AppConfig,
    pool: &DbPool,
    request: ResponseRequest,
    seed: bool,
) -> Result<(ResponseResult, serde_json::Value), StepFailure> {
    let repositories = Repositories::sql(pool.clone());
    if seed {
        load_and_verify(&repositories).await?;
    }

    let orchestrator = build_orchestrator(config, repositories)
        .await
        .map_err(|error| ("pipeline_init", format!("{error:#}"), 5u8))?;

    let result = orchestrator.generate_response(request).await;
    let stats = serde_json::to_value(orchestrator.stats()).unwrap_or_default();
    Ok((result, stats))
}

async fn build_orchestrator(
    config: &AppConfig,
    repositories: Repositories,
) -> anyhow::Result<ResponseOrchestrator> {
    let retriever: Arc<dyn Retriever> = match &config.retrieval.knowledge_path {
        Some(path) => Arc::new(
            KeywordRetriever::from_json_file(path)
                .await
                .with_context(|| format!("loading knowledge file `{}`", path.display()))?,
        ),
        None => Arc::new(NoopRetriever),
    };
    let llm = build_client(&config.llm).context("building llm client")?;
    let formatter = WhatsAppFormatter::new(config.channel.max_chunk_chars)
        .context("building whatsapp formatter")?;

    Ok(ResponseOrchestrator::new(
        repositories,
        retriever,
        llm,
        Arc::new(formatter),
        OrchestratorSettings::from_config(config),
    ))
}

fn render(result: ResponseResult, stats: serde_json::Value) -> CommandResult {
    let data = Some(json!({ "result": &result, "stats": stats }));

    match &result {
        ResponseResult::Success { .. } => {
            CommandResult::success_with_data("ask", result.messages().join("\n\n"), data)
        }
        ResponseResult::Failure { error, .. } => {
            CommandResult::failure_with_data("ask", error.kind(), error.user_message(), 6, data)
        }
    }
}
