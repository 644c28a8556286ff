//! Build an [`AdmissionService`] from settings.

use std::sync::Arc;

use tracing::info;

use crate::config::{ModelSpec, Settings};
use crate::core::{AdmissionController, DocumentPipeline, JobRunner, ServiceError, StatusReporter};
use crate::service::AdmissionService;

/// Build the admission service from validated settings.
///
/// `readiness` reports whether each configured model finished loading; it is
/// asked once per model and the answer is fixed for the process lifetime.
///
/// # Errors
///
/// - [`ServiceError::Config`] if `settings` fail validation
/// - [`ServiceError::Usage`] if the slot pool cannot be created
pub fn build_service<FR>(
    settings: Settings,
    mut readiness: FR,
    pipeline: Arc<dyn DocumentPipeline>,
) -> Result<AdmissionService, ServiceError>
where
    FR: FnMut(&ModelSpec) -> bool,
{
    settings.validate().map_err(ServiceError::Config)?;

    let controller = AdmissionController::with_limits(settings.admission.limits())?;
    let models = settings
        .models
        .iter()
        .map(|spec| spec.status(readiness(spec)))
        .collect::<Vec<_>>();
    for model in &models {
        info!(
            role = %model.role,
            model = %model.name,
            device = %model.device,
            ready = model.ready,
            "model registered"
        );
    }

    let reporter = StatusReporter::new(&controller, models);
    let runner = JobRunner::new(controller.clone(), pipeline);
    Ok(AdmissionService::new(settings, controller, runner, reporter))
}
