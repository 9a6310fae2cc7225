use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::{CallbackTarget, DocumentType, Job, JobSource};
use crate::models::verification::{AcceptedResponse, AsyncVerifyRequest, VerifyResponse};
use crate::services::orchestrator;

/// POST /api/v1/verify — synchronous verification of an uploaded document.
///
/// Multipart form with an `image` file and a `document_type` text field.
/// The full pipeline runs inline; the response carries the terminal result.
pub async fn submit_verification(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<VerifyResponse>), StatusCode> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut document_type_raw: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() == Some("image") {
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            // Reject non-image payloads before any processing.
            image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
            image_data = Some(data.to_vec());
        } else if field.name() == Some("document_type") {
            document_type_raw = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
        }
    }

    let image_data = image_data.ok_or(StatusCode::BAD_REQUEST)?;
    let document_type_raw = document_type_raw.ok_or(StatusCode::BAD_REQUEST)?;

    // Unsupported types fail here, before any temp artifact exists.
    let Some(document_type) = DocumentType::parse(&document_type_raw) else {
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(VerifyResponse::intake_error(format!(
                "Unsupported document type: {}",
                document_type_raw.trim()
            ))),
        ));
    };

    let job = Job::new(document_type);
    tracing::info!(job_id = %job.id, %document_type, "starting synchronous job");
    let outcome = orchestrator::run_job(&state, job, JobSource::Bytes(image_data)).await;

    Ok((
        StatusCode::OK,
        Json(VerifyResponse::from_outcome(document_type, outcome)),
    ))
}

/// POST /api/v1/verify_async — accept the job, reply instantly, process in
/// the background, and notify the callback URL once terminal.
pub async fn submit_verification_async(
    State(state): State<AppState>,
    Json(request): Json<AsyncVerifyRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), (StatusCode, Json<VerifyResponse>)> {
    if let Err(report) = request.validate() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(VerifyResponse::intake_error(format!(
                "Invalid request: {report}"
            ))),
        ));
    }

    let Some(document_type) = DocumentType::parse(&request.document_type) else {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(VerifyResponse::intake_error(format!(
                "Unsupported document type: {}",
                request.document_type.trim()
            ))),
        ));
    };

    let callback = CallbackTarget {
        url: request.callback_url,
        token: request.callback_token,
    };

    // Fire and forget: no return channel to this request.
    tokio::spawn(orchestrator::run_async_job(
        state,
        document_type,
        request.file_url,
        callback,
    ));

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::queued())))
}
