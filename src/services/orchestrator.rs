use std::time::Instant;

use crate::app_state::AppState;
use crate::models::job::{
    CallbackTarget, DocumentType, Job, JobOutcome, JobSource, JobStatus,
};
use crate::models::verification::CallbackPayload;
use crate::services::normalize::normalize_image;
use crate::services::validation;

/// Drive one job through intake → normalize → extract → validate and return
/// its terminal outcome. Every failure is captured as a structured outcome;
/// nothing propagates to the caller, and temp artifacts are released on all
/// paths.
pub async fn run_job(state: &AppState, mut job: Job, source: JobSource) -> JobOutcome {
    metrics::counter!("verification_jobs_total").increment(1);
    let started = Instant::now();

    let outcome = run_stages(state, &mut job, source).await;

    job.advance(if outcome.is_success() {
        JobStatus::Succeeded
    } else {
        JobStatus::Failed
    });
    metrics::histogram!("verification_processing_seconds").record(started.elapsed().as_secs_f64());
    match &outcome {
        JobOutcome::Succeeded { .. } => {
            metrics::counter!("verification_jobs_completed").increment(1);
            tracing::info!(job_id = %job.id, document_type = %job.document_type, "job succeeded");
        }
        JobOutcome::SoftFailed { message, .. } => {
            metrics::counter!("verification_jobs_failed").increment(1);
            tracing::info!(job_id = %job.id, document_type = %job.document_type, %message,
                "job failed validation");
        }
        JobOutcome::HardFailed { error } => {
            metrics::counter!("verification_jobs_failed").increment(1);
            tracing::warn!(job_id = %job.id, document_type = %job.document_type, %error,
                "job failed");
        }
    }
    outcome
}

/// Fire-and-forget entry point for asynchronous jobs: run to a terminal
/// state, then notify the callback receiver. Completion is observed only
/// through that side effect — there is no return channel to the intake
/// request.
pub async fn run_async_job(
    state: AppState,
    document_type: DocumentType,
    file_url: String,
    callback: CallbackTarget,
) {
    let job = Job::new(document_type);
    tracing::info!(job_id = %job.id, %document_type, "starting background job");
    let outcome = run_job(&state, job, JobSource::RemoteUrl(file_url)).await;
    let payload = CallbackPayload::from_outcome(document_type, outcome);
    state.notifier.deliver(&callback, &payload).await;
}

async fn run_stages(state: &AppState, job: &mut Job, source: JobSource) -> JobOutcome {
    let original = match source {
        JobSource::Bytes(bytes) => bytes,
        JobSource::RemoteUrl(url) => {
            job.advance(JobStatus::Fetching);
            match fetch_source(state, &url).await {
                Ok(bytes) => bytes,
                Err(error) => return JobOutcome::HardFailed { error },
            }
        }
    };

    // Dropped at the end of this scope, on every path out of it.
    let mut artifact = state.artifacts.acquire(job.id);
    if let Err(e) = artifact.write("original.png", &original) {
        return JobOutcome::HardFailed {
            error: format!("Failed to store working copy: {e}"),
        };
    }

    job.advance(JobStatus::Normalizing);
    let options = state.normalize_options.clone();
    let input = original.clone();
    let normalized =
        match tokio::task::spawn_blocking(move || normalize_image(&input, &options)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                // Advisory: extraction still gets the unprocessed image.
                tracing::warn!(job_id = %job.id, error = %e,
                    "normalization failed, using original image");
                original
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e,
                    "normalization task aborted, using original image");
                original
            }
        };
    if let Err(e) = artifact.write("normalized.png", &normalized) {
        tracing::warn!(job_id = %job.id, error = %e, "failed to store normalized copy");
    }

    job.advance(JobStatus::Extracting);
    let result = match state.extractor.extract(&normalized, job.document_type).await {
        Ok(result) => result,
        Err(e) => {
            return JobOutcome::HardFailed {
                error: e.to_string(),
            }
        }
    };

    job.advance(JobStatus::Validating);
    let check = validation::validate(job.document_type, &result);
    if check.usable {
        JobOutcome::Succeeded { data: result }
    } else {
        JobOutcome::SoftFailed {
            message: check
                .reason
                .unwrap_or_else(|| format!("Could not verify {}", job.document_type)),
            data: result,
        }
    }
}

/// Download the source image, bounded by the configured intake timeout.
async fn fetch_source(state: &AppState, url: &str) -> Result<Vec<u8>, String> {
    let response = state
        .fetch
        .get(url)
        .timeout(state.fetch_timeout)
        .send()
        .await
        .map_err(|e| format!("Failed to download image: {e}"))?;

    if !response.status().is_success() {
        return Err(format!(
            "Failed to download image. Status: {}",
            response.status().as_u16()
        ));
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| format!("Failed to download image: {e}"))
}
