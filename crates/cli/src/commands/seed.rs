use crate::commands::{open_migrated_pool, prepare, CommandResult, StepFailure};
use concierge_db::{DemoSeedDataset, Repositories, SeedResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let outcome = load_and_verify(&Repositories::sql(pool.clone())).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", describe(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

pub(crate) async fn load_and_verify(
    repositories: &Repositories,
) -> Result<SeedResult, StepFailure> {
    let seeded = DemoSeedDataset::load(repositories)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    let verification = DemoSeedDataset::verify(repositories)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

    if !verification.all_present {
        return Err(("seed_verification", verification_message(&verification.checks), 6u8));
    }

    Ok(seeded)
}

fn describe(seeded: &SeedResult) -> String {
    let conversations = seeded
        .conversations_seeded
        .iter()
        .map(|id| format!("  - conversation: {id}"))
        .collect::<Vec<_>>();

    format!(
        "demo dataset loaded for business `{}` with assistant `{}`:\n{}",
        seeded.business_id,
        seeded.assistant_id,
        conversations.join("\n")
    )
}

fn verification_message(checks: &[(&str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();

    if failed_checks.is_empty() {
        "some demo records failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_message_names_failed_checks() {
        let checks = [("assistant", true), ("conv-demo-pt", false), ("conv-demo-en", false)];

        assert_eq!(
            verification_message(&checks),
            "seed verification failed for checks: conv-demo-pt, conv-demo-en"
        );
    }

    #[test]
    fn verification_message_falls_back_to_generic_text() {
        let checks = [("assistant", true)];

        assert_eq!(verification_message(&checks), "some demo records failed to load");
    }
}
