use secrecy::ExposeSecret;

use crate::commands::CommandResult;
use cashpoint_core::config::{AppConfig, LoadOptions};
use cashpoint_db::fixtures::DEFAULT_SEED_PASSWORD;
use cashpoint_db::{connect_with_settings, migrations, SeedUsers};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let seed_password = config
        .auth
        .seed_password
        .as_ref()
        .map(|secret| secret.expose_secret().to_string())
        .unwrap_or_else(|| DEFAULT_SEED_PASSWORD.to_string());

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = SeedUsers::load(&pool, &seed_password)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = SeedUsers::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedOutput, (&'static str, String, u8)> =
            if !verification.all_present {
                let failed_checks = verification
                    .checks
                    .iter()
                    .filter_map(|(check, passed)| (!passed).then_some(*check))
                    .collect::<Vec<_>>();
                let message = if failed_checks.is_empty() {
                    "Some seed users failed to load".to_string()
                } else {
                    format!("Seed verification failed for users: {}", failed_checks.join(", "))
                };
                Err(("seed_verification", message, 6u8))
            } else {
                Ok(SeedOutput { users: seed_result.users_seeded })
            };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => {
            let user_descriptions: Vec<String> = output
                .users
                .iter()
                .map(|user| format!("  - {} ({})", user.username, user.role.as_str()))
                .collect();
            let message = format!(
                "seed users loaded, one per workflow role:\n{}",
                user_descriptions.join("\n")
            );
            CommandResult::success("seed", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    users: Vec<cashpoint_db::SeedUserInfo>,
}
