use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use admission_forms::config::AppConfig;
use admission_forms::error::AppError;
use admission_forms::events::{EventCatalog, InMemoryEventRepository};
use admission_forms::forms::{
    seed_admission_form, FormSubmissionService, InMemoryFormRepository,
    InMemorySubmissionRepository, LocalFileStorage, Notifier, RateLimiter, SmtpMailer,
    SubmissionPdfRenderer,
};
use admission_forms::search::{backend_from_config, SearchBackend};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Domain services shared by every router.
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) forms: Arc<FormSubmissionService>,
    pub(crate) events: Arc<EventCatalog>,
    pub(crate) search: Arc<dyn SearchBackend>,
}

/// Form schemas from `dir` (when given), plus the built-in admission form when `seed` is set.
pub(crate) fn load_forms(
    dir: Option<&Path>,
    seed: bool,
) -> Result<InMemoryFormRepository, AppError> {
    let forms = InMemoryFormRepository::default();
    if let Some(dir) = dir {
        let loaded = forms.load_dir(dir)?;
        info!(dir = %dir.display(), loaded, "form schemas loaded");
    }
    if seed {
        seed_admission_form(&forms)?;
    }
    Ok(forms)
}

pub(crate) fn build_services(config: &AppConfig) -> Result<Services, AppError> {
    let forms = load_forms(
        config.forms.schema_dir.as_deref(),
        config.forms.seed_admission_form,
    )?;

    let mailer = SmtpMailer::from_config(&config.smtp)?;
    let notifier = Notifier::new(Arc::new(mailer), config.links.clone(), config.smtp.timeout);

    let submissions = FormSubmissionService::new(
        Arc::new(forms),
        Arc::new(InMemorySubmissionRepository::default()),
        Arc::new(LocalFileStorage::new(&config.forms.upload_dir)),
        Arc::new(SubmissionPdfRenderer::default()),
        notifier,
    )
    .with_rate_limiter(Arc::new(RateLimiter::in_memory()))
    .with_pdf_timeout(config.forms.pdf_timeout)
    .with_server_url(config.links.server_url.clone());

    Ok(Services {
        forms: Arc::new(submissions),
        events: Arc::new(EventCatalog::new(Arc::new(InMemoryEventRepository::default()))),
        search: backend_from_config(&config.search)?,
    })
}
