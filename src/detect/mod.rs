mod backend;
mod backends;
mod detector;
mod result;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use detector::Detector;
pub use result::{BoundingBox, Detection};

/// Build the backend named by the detector settings.
///
/// `stub` replays the looping demo script; `tract` loads the configured ONNX
/// model and requires the `backend-tract` feature.
pub fn backend_from_settings(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::demo()?)),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let backend = TractBackend::new(
                &settings.model_path,
                settings.input_width,
                settings.input_height,
                settings.class_names.clone(),
            )?
            .with_threshold(settings.confidence_threshold)
            .with_iou_threshold(settings.iou_threshold);
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "detector backend 'tract' requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}
