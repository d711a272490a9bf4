// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use platform_client::config::{schedule_from_env, LOG_FORMAT_ENV};
use platform_client::scheduler::get_execution_stats;
use platform_client::{ClientConfig, PlatformClient};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid client configuration");
            return ExitCode::FAILURE;
        }
    };
    let schedule = match schedule_from_env() {
        Ok(schedule) => schedule,
        Err(e) => {
            error!(error = %e, "Invalid schedule configuration");
            return ExitCode::FAILURE;
        }
    };

    let client = match PlatformClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build platform client");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = client.authenticate().await {
        error!(error = %e, error_code = e.error_code(), "Login failed");
        return ExitCode::FAILURE;
    }

    let handle = match client.schedule(schedule) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to start schedule");
            return ExitCode::FAILURE;
        }
    };

    // Stop after the current iteration on Ctrl-C.
    let shutdown = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current iteration");
            shutdown.cancel();
        }
    });

    let summary = match handle.join().await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Schedule task failed");
            return ExitCode::FAILURE;
        }
    };

    let stats = get_execution_stats(&summary.results);
    let dispatch = client.stats();
    info!(
        total = stats.total,
        successful = stats.successful,
        failed = stats.failed,
        success_rate = stats.success_rate,
        average_interval_secs = stats.average_interval,
        stopped = summary.stopped,
        requests = dispatch.requests,
        encrypted = dispatch.encrypted,
        "Schedule finished"
    );

    client.logout().await;

    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some iterations failed");
    }
    ExitCode::SUCCESS
}
