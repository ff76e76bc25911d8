//! `shipyard functions`: batched function deployment.

use anyhow::Result;
use shipyard::config::ShipyardConfig;
use shipyard::functions::{
    BatchReport, BatchRequest, BatchSettings, GithubFunctionSource, GithubManifest, ManifestStore,
    Secret, YandexFunctions, run_batch,
};
use shipyard::github::{GithubClient, normalize_repository};
use shipyard::report::{Outcome, RunLog};

use super::print_outcome;

#[derive(Debug, Clone)]
pub struct FunctionsOptions {
    pub batch_size: Option<usize>,
    pub offset: usize,
    pub only: Option<String>,
    pub secrets: Vec<Secret>,
    pub until_done: bool,
    pub update_manifest: bool,
}

/// Deploy one batch of `repo`'s functions.
pub async fn execute_functions(
    config: &ShipyardConfig,
    repo: &str,
    request: &BatchRequest,
    update_manifest: bool,
) -> Outcome<BatchReport> {
    let mut log = RunLog::new();
    let Some(repository) = normalize_repository(repo) else {
        return Outcome::failed(
            log,
            format!("Cannot parse repository reference '{}'", repo),
            None,
        );
    };
    if let Err(e) = request.validate() {
        return Outcome::failed(log, e, None);
    }

    log.info("Getting IAM token...");
    let platform = match YandexFunctions::connect(&config.functions).await {
        Ok(platform) => platform,
        Err(e) => return Outcome::failed(log, e, None),
    };
    log.info(format!("Folder: {}", platform.folder_id()));

    let client = GithubClient::new(config.github.api_base.clone(), config.github.token.clone());
    let mut source =
        GithubFunctionSource::new(client.clone(), repository.clone(), config.functions.source_dir.clone());
    let manifest = GithubManifest::new(
        client,
        repository,
        config.github.manifest_path.clone(),
        config.github.manifest_branch.clone(),
    );
    let manifest: Option<&dyn ManifestStore> = update_manifest.then_some(&manifest as &dyn ManifestStore);

    run_batch(
        request,
        &BatchSettings::from(&config.functions),
        &mut source,
        &platform,
        manifest,
        log,
    )
    .await
}

pub async fn cmd_functions(
    config: &ShipyardConfig,
    repo: &str,
    options: FunctionsOptions,
    json: bool,
) -> Result<bool> {
    let mut request = BatchRequest {
        secrets: options.secrets,
        batch_size: options
            .batch_size
            .unwrap_or(config.functions.default_batch_size),
        offset: options.offset,
        only: options.only,
    };

    loop {
        let outcome = execute_functions(config, repo, &request, options.update_manifest).await;
        let success = print_outcome(&outcome, json)?;
        if !success || !options.until_done {
            return Ok(success);
        }

        let next = outcome
            .details
            .as_ref()
            .filter(|report| !report.quota_exhausted)
            .and_then(|report| report.next_offset);
        match next {
            Some(offset) => {
                if !json {
                    println!();
                    println!(
                        "{}",
                        console::style(format!("Continuing from offset {}", offset)).cyan()
                    );
                    println!();
                }
                request.offset = offset;
            }
            None => return Ok(success),
        }
    }
}
