//! Training and serving container lifecycles.
//!
//! Remote channel sync only happens when the stage is `prod`; other stages
//! run against whatever is mounted into the container.

use std::fs;

use crate::artifacts::{ArtifactManager, AssetTransport};
use crate::container::ContainerLayout;
use crate::error::Result;

fn prepare<T: AssetTransport>(manager: &ArtifactManager<T>) -> Result<ContainerLayout> {
    let settings = manager.settings();
    let layout = settings.layout();
    layout.prepare()?;
    layout.setup_hyperparameters(settings.hyperparameters.as_deref())?;
    Ok(layout)
}

pub struct TrainingLifecycle<T: AssetTransport> {
    manager: ArtifactManager<T>,
}

impl<T: AssetTransport> TrainingLifecycle<T> {
    pub fn new(manager: ArtifactManager<T>) -> Self {
        Self { manager }
    }

    pub fn startup(&self) -> Result<ContainerLayout> {
        tracing::info!("setting up instance");
        let layout = prepare(&self.manager)?;
        if self.manager.settings().is_prod() {
            tracing::info!("stage is prod, syncing inputs and model artifacts");
            self.manager.setup_inputs()?;
            self.manager.setup_model_artifacts()?;
        }
        tracing::info!("setup complete");
        Ok(layout)
    }

    pub fn cleanup(&self) -> Result<()> {
        tracing::info!("running cleanup");
        if self.manager.settings().is_prod() {
            tracing::info!("stage is prod, uploading model artifacts and outputs");
            self.manager.cleanup_model_artifacts()?;
            self.manager.cleanup_outputs()?;
        }
        tracing::info!("cleanup complete");
        Ok(())
    }

    /// Run `job` between startup and cleanup.
    ///
    /// On failure the error is written to `output/failure`. Cleanup runs on
    /// every path; a job error takes precedence over a cleanup error.
    pub fn run<R, F>(&self, job: F) -> Result<R>
    where
        F: FnOnce(&ContainerLayout) -> Result<R>,
    {
        let result = self.startup().and_then(|layout| job(&layout));
        if let Err(err) = &result {
            let layout = self.manager.settings().layout();
            let path = layout.failure_path();
            tracing::error!(error = %err, "exception during training");
            if let Err(e) = fs::create_dir_all(layout.output_dir())
                .and_then(|_| fs::write(&path, format!("Exception during training: {err}\n")))
            {
                tracing::warn!(path = %path.display(), error = %e, "failed to write failure file");
            }
        }
        let cleanup = self.cleanup();
        match (result, cleanup) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                tracing::error!(error = %cleanup_err, "cleanup failed after training error");
                Err(e)
            }
        }
    }
}

pub struct ServingLifecycle<T: AssetTransport> {
    manager: ArtifactManager<T>,
}

impl<T: AssetTransport> ServingLifecycle<T> {
    pub fn new(manager: ArtifactManager<T>) -> Self {
        Self { manager }
    }

    pub fn startup(&self) -> Result<ContainerLayout> {
        tracing::info!("setting up instance");
        let layout = prepare(&self.manager)?;
        if self.manager.settings().is_prod() {
            tracing::info!("stage is prod, syncing model artifacts");
            self.manager.setup_model_artifacts()?;
        }
        tracing::info!("setup complete");
        Ok(layout)
    }

    pub fn cleanup(&self) -> Result<()> {
        tracing::info!("cleaning instance");
        Ok(())
    }
}
