use std::io::Write;
use std::sync::Arc;

use crate::config::Config;
use crate::error::PublishError;
use crate::publish::{PublishReport, Publisher};

pub const SUCCESS_MESSAGE: &str = "Deploy Complete!";

pub type DeployResult = Result<PublishReport, PublishError>;

/// Publish `config.source_dir` through `publisher`, then hand the outcome to `on_complete`.
///
/// `on_complete` runs exactly once and only after the publisher has returned.
/// Configuration problems and a missing source directory are reported through
/// it as well, without calling the publisher.
pub async fn deploy<P, F>(config: &Config, publisher: Arc<P>, on_complete: F) -> DeployResult
where
    P: Publisher,
    F: FnOnce(&DeployResult),
{
    let result = run(config, publisher).await;
    on_complete(&result);
    result
}

async fn run<P: Publisher>(config: &Config, publisher: Arc<P>) -> DeployResult {
    config.validate()?;

    if !config.source_dir.exists() {
        return Err(PublishError::SourceMissing {
            path: config.source_dir.clone(),
        });
    }
    if !config.source_dir.is_dir() {
        return Err(PublishError::NotADirectory {
            path: config.source_dir.clone(),
        });
    }

    let source_dir = config.source_dir.clone();
    let options = config.publish_options();
    log::info!(
        "Deploying {} to {} on {}",
        source_dir.display(),
        options.branch,
        options.repo
    );

    tokio::task::spawn_blocking(move || publisher.publish(&source_dir, &options))
        .await
        .map_err(|e| PublishError::Aborted(e.to_string()))?
}

/// Default completion handler: success on stdout, failure on stderr.
pub fn report_completion(result: &DeployResult) {
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    if let Err(e) = write_completion(result, &mut stdout.lock(), &mut stderr.lock()) {
        log::warn!("Failed to write deploy status: {}", e);
    }
}

fn write_completion(
    result: &DeployResult,
    out: &mut impl Write,
    err: &mut impl Write,
) -> std::io::Result<()> {
    match result {
        Ok(report) => {
            match &report.commit {
                Some(commit) => log::info!(
                    "{} is now at {} ({} file(s), pushed: {})",
                    report.branch,
                    commit,
                    report.files,
                    report.pushed
                ),
                None => log::info!("{} was already up to date", report.branch),
            }
            writeln!(out, "{SUCCESS_MESSAGE}")
        }
        Err(e) => {
            let chain = error_chain(e);
            log::error!("Deploy failed: {}", chain);
            writeln!(err, "Deploy failed: {chain}")
        }
    }
}

fn error_chain(error: &PublishError) -> String {
    anyhow::Chain::new(error)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}
