use crate::{
    classification::ClassificationResult, model_service::PredictionError, routes::ErrorBody,
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::{Bytes, BytesMut};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/predict/";
const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No image file provided")]
    MissingImage,
    #[error("File too large (max {}MB)", .max_bytes / (1024 * 1024))]
    FileTooLarge { max_bytes: usize },
    #[error("Invalid multipart request")]
    InvalidMultipart(String),
    #[error("Image processing or prediction failed")]
    Processing(#[from] PredictionError),
}

impl PredictError {
    fn status(&self) -> StatusCode {
        match self {
            PredictError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PredictError::Processing(_) => "processing",
            _ => "validation",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            PredictError::InvalidMultipart(detail) => Some(detail.clone()),
            PredictError::Processing(err) => Some(err.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            detail: self.detail(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassificationResult>, PredictError> {
    state.metrics.record_request(ROUTE);

    let result = classify_upload(&state, multipart).await;
    match &result {
        Ok(classification) => tracing::info!(
            tumor = %classification.tumor,
            confidence = classification.confidence,
            "Image classified"
        ),
        Err(err) => {
            state.metrics.record_error(ROUTE, err.kind());
            match err {
                PredictError::Processing(cause) => tracing::error!("Prediction failed: {}", cause),
                other => tracing::warn!("Rejected prediction request: {}", other),
            }
        }
    }

    result.map(Json)
}

async fn classify_upload(
    state: &SharedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ClassificationResult, PredictError> {
    let mut multipart = multipart.map_err(|e| PredictError::InvalidMultipart(e.body_text()))?;
    let image_data = read_image_field(&mut multipart, state.upload.max_file_size_bytes).await?;
    tracing::debug!("Received image of {} bytes", image_data.len());

    let start = Instant::now();
    let classification = state.model_service.predict(image_data).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);

    Ok(classification)
}

/// Reads the `image` field, stopping as soon as it grows past `max_bytes`.
async fn read_image_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<Bytes, PredictError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let mut image_data = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?
        {
            if image_data.len() + chunk.len() > max_bytes {
                return Err(PredictError::FileTooLarge { max_bytes });
            }
            image_data.extend_from_slice(&chunk);
        }

        return Ok(image_data.freeze());
    }

    Err(PredictError::MissingImage)
}

fn multipart_error(err: axum::extract::multipart::MultipartError, max_bytes: usize) -> PredictError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PredictError::FileTooLarge { max_bytes }
    } else {
        PredictError::InvalidMultipart(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{
        default_router, json_body, router_with, MockChatService, MockModelService,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
    use std::{io::Cursor, sync::Arc};
    use tower::ServiceExt;

    const BOUNDARY: &str = "----brain-tumor-api-test";

    fn multipart_request(uri: &str, fields: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, data) in fields {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}.png\"\r\n",
                    name, name
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut image_data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut image_data), ImageFormat::Png)
            .unwrap();
        image_data
    }

    fn scan_png() -> Vec<u8> {
        png_bytes(DynamicImage::ImageRgb8(ImageBuffer::from_pixel(
            32,
            32,
            Rgb([40, 40, 40]),
        )))
    }

    #[tokio::test]
    async fn test_predict_returns_classification() {
        let image = scan_png();
        let response = default_router()
            .oneshot(multipart_request("/predict/", &[("image", image.as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["tumor"], "Glioma");
        assert_eq!(body["confidence"], 91.2);
        assert_eq!(body["probabilities"]["No Tumour"], 3.0);

        let total: f64 = body["probabilities"]
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_f64().unwrap())
            .sum();
        assert!((total - 100.0).abs() <= 0.1);
    }

    #[tokio::test]
    async fn test_predict_accepts_grayscale_and_skips_other_fields() {
        let image = png_bytes(DynamicImage::ImageLuma8(ImageBuffer::from_pixel(
            16,
            16,
            Luma([200u8]),
        )));
        let response = default_router()
            .oneshot(multipart_request(
                "/predict",
                &[("patient", b"anonymous".as_slice()), ("image", image.as_slice())],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_image_field_is_rejected() {
        let response = default_router()
            .oneshot(multipart_request("/predict/", &[("file", scan_png().as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No image file provided");
        assert!(body.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_oversized_image_is_rejected() {
        let image = vec![0u8; 11 * 1024 * 1024];
        let response = default_router()
            .oneshot(multipart_request("/predict/", &[("image", image.as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "File too large (max 10MB)");
    }

    #[tokio::test]
    async fn test_image_of_exactly_max_size_passes_size_check() {
        let image = vec![0u8; 10 * 1024 * 1024];
        let response = default_router()
            .oneshot(multipart_request("/predict/", &[("image", image.as_slice())]))
            .await
            .unwrap();

        // Not an image, so it fails in decoding rather than the size check.
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_empty_file_fails_processing() {
        let response = default_router()
            .oneshot(multipart_request("/predict/", &[("image", b"".as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Image processing or prediction failed");
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Unreadable image"));
    }

    #[tokio::test]
    async fn test_non_image_file_fails_processing() {
        let response = default_router()
            .oneshot(multipart_request("/predict/", &[("image", b"%PDF-1.4 not a scan".as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Image processing or prediction failed");
    }

    #[tokio::test]
    async fn test_inference_failure_is_reported() {
        let router = router_with(
            MockModelService {
                probabilities: vec![0.5, 0.5],
            },
            Arc::new(MockChatService::default()),
        );
        let response = router
            .oneshot(multipart_request("/predict/", &[("image", scan_png().as_slice())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .starts_with("Inference failed"));
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_rejected() {
        let request = Request::post("/predict/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = default_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Invalid multipart request");
    }
}
