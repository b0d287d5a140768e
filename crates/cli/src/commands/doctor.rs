use concierge_agent::llm::build_client;
use concierge_agent::retrieval::KeywordRetriever;
use concierge_core::config::{AppConfig, LoadOptions};
use concierge_db::{connect_with_config, ping};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let mut checks = vec![
                DoctorCheck::pass("config_validation", "configuration loaded and validated"),
                check_llm_provider(&config),
            ];
            checks.extend(run_async_checks(&config));
            checks
        }
        Err(error) => {
            let skipped = "skipped because configuration did not load";
            vec![
                DoctorCheck::fail("config_validation", error.to_string()),
                DoctorCheck::skipped("llm_provider_readiness", skipped),
                DoctorCheck::skipped("knowledge_base", skipped),
                DoctorCheck::skipped("database_connectivity", skipped),
            ]
        }
    };

    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let name = "llm_provider_readiness";
    match build_client(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            name,
            format!("{} client ready for model `{}`", client.name(), config.llm.model),
        ),
        Err(error) => DoctorCheck::fail(name, error.to_string()),
    }
}

fn run_async_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck::fail("knowledge_base", details.clone()),
                DoctorCheck::fail("database_connectivity", details),
            ];
        }
    };

    runtime.block_on(async {
        vec![check_knowledge_base(config).await, check_database(config).await]
    })
}

async fn check_knowledge_base(config: &AppConfig) -> DoctorCheck {
    let name = "knowledge_base";
    let Some(path) = &config.retrieval.knowledge_path else {
        return DoctorCheck::skipped(name, "no knowledge file configured; retrieval disabled");
    };

    match KeywordRetriever::from_json_file(path).await {
        Ok(retriever) => DoctorCheck::pass(
            name,
            format!("loaded {} entries from `{}`", retriever.len(), path.display()),
        ),
        Err(error) => DoctorCheck::fail(name, error.to_string()),
    }
}

async fn check_database(config: &AppConfig) -> DoctorCheck {
    let name = "database_connectivity";
    match connect_with_config(&config.database).await {
        Ok(pool) => {
            let reachable = ping(&pool).await;
            pool.close().await;
            match reachable {
                Ok(()) => {
                    DoctorCheck::pass(name, format!("connected using `{}`", config.database.url))
                }
                Err(error) => DoctorCheck::fail(name, format!("database ping failed: {error}")),
            }
        }
        Err(error) => DoctorCheck::fail(name, format!("failed to connect to database: {error}")),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
