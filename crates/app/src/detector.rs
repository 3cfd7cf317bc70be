//! Detector construction for session threads.

use anyhow::{Result, bail};
use vision::{DetectorFactory, TriggerConfig};

#[cfg(feature = "with-tch")]
pub fn factory(config: &TriggerConfig) -> Result<DetectorFactory> {
    use std::sync::Arc;

    use ml_core::{Detect, TorchDetector, tch::Device};
    use tracing::info;

    if !config.model_path.exists() {
        bail!("model not found at {}", config.model_path.display());
    }
    let model_path = config.model_path.clone();
    let use_cpu = config.use_cpu;
    let min_confidence = config.policy.confidence_threshold;
    Ok(Arc::new(move || {
        let device = if use_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available()
        };
        let detector =
            TorchDetector::new(&model_path, device, (640, 640))?.with_min_confidence(min_confidence);
        info!(
            "Loaded detector {} on {:?}",
            model_path.display(),
            detector.device()
        );
        Ok(Box::new(detector) as Box<dyn Detect>)
    }))
}

#[cfg(not(feature = "with-tch"))]
pub fn factory(_config: &TriggerConfig) -> Result<DetectorFactory> {
    bail!("trigger was built without a detector; rebuild with `--features with-tch`")
}
