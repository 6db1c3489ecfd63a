use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::stream::{FuturesUnordered, StreamExt};
use strata_engine::{
    CacheType, LoadError, LoadOutcome, LoadProgress, LoadedResource, OnComplete, OnProgress,
    RequestContext, RequestOptions, ResourceId, ResourceManager,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::utils::files::{create_dirs, extract_filename_from_url, output_path};
use crate::utils::format_bytes;
use crate::utils::progress::ProgressManager;

/// Load every URL concurrently and write each payload to `output_dir`.
///
/// Returns the number of resources that failed.
pub async fn process_inputs(
    manager: &ResourceManager,
    inputs: &[String],
    output_dir: &Path,
    options: RequestOptions,
    progress: &ProgressManager,
) -> Result<usize, AppError> {
    if inputs.is_empty() {
        return Err(AppError::InvalidInput("No URLs provided".to_string()));
    }

    let inputs_len = inputs.len();
    info!(
        inputs_count = inputs_len,
        "Starting processing of {} input{}",
        inputs_len,
        if inputs_len == 1 { "" } else { "s" }
    );

    create_dirs(output_dir).await?;

    let mut pending = FuturesUnordered::new();
    for (index, input) in inputs.iter().enumerate() {
        pending.push(process_url(
            manager,
            input,
            name_suffix(inputs, index),
            output_dir,
            options,
            progress,
        ));
    }

    let mut failed = 0;
    while let Some(result) = pending.next().await {
        match result {
            Ok(path) => info!(path = %path.display(), "Saved resource"),
            Err(e) => {
                error!(error = %e, "Resource failed");
                failed += 1;
            }
        }
    }

    info!(
        "Finished: {} loaded, {} failed",
        inputs_len - failed,
        failed
    );
    Ok(failed)
}

async fn process_url(
    manager: &ResourceManager,
    input: &str,
    suffix: usize,
    output_dir: &Path,
    options: RequestOptions,
    progress: &ProgressManager,
) -> Result<PathBuf, AppError> {
    let identifier = ResourceId::new(input);
    let (loaded, cache_type) = load_with_progress(manager, &identifier, options, progress).await?;

    let resource = &loaded.resource;
    let source = match cache_type {
        CacheType::None => "network".to_string(),
        other => format!("{other:?} cache").to_lowercase(),
    };
    info!(
        url = %identifier,
        media_type = ?resource.media_type(),
        size = %format_bytes(resource.byte_size()),
        "Loaded from {source}"
    );

    let path = output_path(output_dir, input, resource.media_type(), suffix)?;
    tokio::fs::write(&path, resource.payload()).await?;
    Ok(path)
}

/// URLs sharing a file stem get numbered files, in input order
fn name_suffix(inputs: &[String], index: usize) -> usize {
    let stem = |url: &str| extract_filename_from_url(url).ok().map(|(stem, _)| stem);
    let Some(own) = stem(inputs[index].as_str()) else {
        return 0;
    };
    inputs[..index]
        .iter()
        .filter(|earlier| stem(earlier.as_str()).as_ref() == Some(&own))
        .count()
}

/// Bridge the callback API to a future, feeding the progress bars on the way.
async fn load_with_progress(
    manager: &ResourceManager,
    identifier: &ResourceId,
    options: RequestOptions,
    progress: &ProgressManager,
) -> Result<(LoadedResource, CacheType), AppError> {
    let (sender, receiver) = oneshot::channel();
    let sender = Arc::new(Mutex::new(Some(sender)));

    let bars = progress.clone();
    let on_progress: OnProgress = Arc::new(move |update: LoadProgress| bars.update(update));

    let bars = progress.clone();
    let on_complete: OnComplete = Arc::new(move |outcome: LoadOutcome| {
        if !outcome.finished {
            match &outcome.result {
                Ok(loaded) if loaded.resource.is_partial() => debug!(
                    url = %outcome.identifier,
                    received = loaded.resource.byte_size(),
                    "Partial payload"
                ),
                Ok(_) => info!(url = %outcome.identifier, "Served cached copy, refreshing"),
                Err(e) => warn!(url = %outcome.identifier, error = %e, "Interim failure"),
            }
            return;
        }

        let message = if outcome.result.is_ok() { "Loaded" } else { "Failed" };
        bars.finish(&outcome.identifier, message);
        if let Ok(mut slot) = sender.lock() {
            if let Some(sender) = slot.take() {
                let _ = sender.send((outcome.result, outcome.cache_type));
            }
        }
    });

    progress.start(identifier);
    let operation = manager.load_resource(
        identifier.clone(),
        options,
        RequestContext::new(),
        Some(on_progress),
        Some(on_complete),
    );

    let result = receiver.await;
    if result.is_err() {
        operation.cancel();
        progress.finish(identifier, "Cancelled");
    }
    let (result, cache_type) = result.unwrap_or((Err(LoadError::Cancelled), CacheType::None));
    Ok((result?, cache_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use indicatif::MultiProgress;
    use strata_engine::{
        CachesAggregator, FetchError, LoadRequest, LoaderEvents, LoadersAggregator,
        ResourceLoader,
    };

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    struct FixtureLoader;

    #[async_trait]
    impl ResourceLoader for FixtureLoader {
        fn can_load(&self, _identifier: &ResourceId) -> bool {
            true
        }

        async fn load(
            &self,
            request: LoadRequest,
            events: LoaderEvents,
        ) -> Result<Bytes, FetchError> {
            if request.identifier.as_str().contains("missing") {
                return Err(FetchError::NotFound(request.identifier.to_string()));
            }
            events.progress(PNG.len() as u64, Some(PNG.len() as u64));
            Ok(Bytes::from_static(PNG))
        }
    }

    fn fixture_manager() -> ResourceManager {
        ResourceManager::new(
            Arc::new(CachesAggregator::new(vec![])),
            Arc::new(LoadersAggregator::new(vec![Arc::new(FixtureLoader)])),
        )
    }

    #[tokio::test]
    async fn test_process_inputs_writes_payloads_and_counts_failures() {
        let temp = tempfile::tempdir().unwrap();
        let output = temp.path().join("out");
        let inputs = vec![
            "http://x/avatar".to_string(),
            "http://x/missing.png".to_string(),
        ];

        let failed = process_inputs(
            &fixture_manager(),
            &inputs,
            &output,
            RequestOptions::empty(),
            &ProgressManager::new_disabled(MultiProgress::new()),
        )
        .await
        .unwrap();

        assert_eq!(failed, 1);
        let written = std::fs::read(output.join("avatar.png")).unwrap();
        assert_eq!(written, PNG);
        assert!(!output.join("missing.png").exists());
    }

    #[tokio::test]
    async fn test_process_inputs_rejects_empty_list() {
        let temp = tempfile::tempdir().unwrap();
        let err = process_inputs(
            &fixture_manager(),
            &[],
            temp.path(),
            RequestOptions::empty(),
            &ProgressManager::new_disabled(MultiProgress::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_name_suffix_numbers_shared_stems() {
        let inputs: Vec<String> = [
            "https://a.com/logo.png",
            "https://b.com/logo.svg",
            "https://a.com/icon.png",
            "https://c.com/x/logo",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(name_suffix(&inputs, 0), 0);
        assert_eq!(name_suffix(&inputs, 1), 1);
        assert_eq!(name_suffix(&inputs, 2), 0);
        assert_eq!(name_suffix(&inputs, 3), 2);
    }
}
