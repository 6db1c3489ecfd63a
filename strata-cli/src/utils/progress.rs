use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use strata_engine::{LoadProgress, ResourceId};

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {bytes}/{total_bytes} @ {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// One progress bar per in-flight resource
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<ResourceId, ProgressBar>>>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: true,
        }
    }

    pub fn start(&self, identifier: &ResourceId) {
        if self.disabled {
            return;
        }

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(download_style());
        bar.set_message(format!("Loading {identifier}"));
        bar.enable_steady_tick(Duration::from_millis(500));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(identifier.clone(), bar);
        }
    }

    pub fn update(&self, progress: LoadProgress) {
        if self.disabled {
            return;
        }

        let Ok(bars) = self.bars.lock() else {
            return;
        };
        if let Some(bar) = bars.get(&progress.identifier) {
            if let Some(total) = progress.expected {
                bar.set_length(total);
            }
            bar.set_position(progress.received);
        }
    }

    pub fn finish(&self, identifier: &ResourceId, message: &str) {
        if self.disabled {
            return;
        }

        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        if let Some(bar) = bars.remove(identifier) {
            bar.finish_with_message(format!("{message} {identifier}"));
        }
    }

    #[inline]
    #[allow(unused)]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.bars.lock().map(|bars| bars.len()).unwrap_or(0)
    }
}
