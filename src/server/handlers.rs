use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    response::{IntoResponse, Response},
    Json,
};
use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{Result, SegError};
use crate::palette::ColorMap;
use crate::pipeline::{encode_png_data_url, ClassPercentages, PredictionResult};
use crate::server::{error::ApiError, AppState};

/// Multipart field names accepted for the upload.
const FILE_FIELDS: [&str; 2] = ["file", "image"];

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    pub loaded: bool,
    pub classes: Vec<String>,
    pub num_classes: usize,
}

#[derive(Serialize)]
pub struct ClassesResponse<'a> {
    pub classes: Vec<String>,
    pub class_dict: ColorMap<'a>,
    pub num_classes: usize,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub original_image: String,
    pub segmentation_mask: String,
    pub overlay: String,
    pub class_percentages: ClassPercentages,
    pub original_size: [u32; 2],
    pub prediction_size: [u32; 2],
}

impl PredictionResponse {
    pub fn from_prediction(prediction: PredictionResult) -> Result<Self> {
        let original_size = prediction.original_size();
        let prediction_size = prediction.prediction_size();
        Ok(Self {
            success: true,
            original_image: encode_png_data_url(&prediction.original)?,
            segmentation_mask: encode_png_data_url(&DynamicImage::ImageRgb8(prediction.mask))?,
            overlay: encode_png_data_url(&DynamicImage::ImageRgb8(prediction.overlay))?,
            class_percentages: prediction.class_percentages,
            original_size,
            prediction_size,
        })
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.service.is_loaded(),
    })
}

pub async fn model_status(State(state): State<AppState>) -> Json<ModelStatusResponse> {
    let palette = state.service.palette();
    Json(ModelStatusResponse {
        loaded: state.service.is_loaded(),
        classes: palette.names(),
        num_classes: palette.len(),
    })
}

pub async fn classes(State(state): State<AppState>) -> Response {
    let palette = state.service.palette();
    Json(ClassesResponse {
        classes: palette.names(),
        class_dict: palette.as_color_map(),
        num_classes: palette.len(),
    })
    .into_response()
}

/// The uploaded part, before any validation.
struct Upload {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn read_upload(
    mut multipart: Multipart,
) -> std::result::Result<Option<Upload>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        let is_file = field.name().is_some_and(|name| FILE_FIELDS.contains(&name));
        if !is_file {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        return Ok(Some(Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        }));
    }
    Ok(None)
}

pub async fn predict(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Json<PredictionResponse>, ApiError> {
    let flavor = state.flavor;
    if !state.service.is_loaded() {
        return Err(ApiError::from_seg(&SegError::ModelUnavailable, flavor));
    }

    let upload = match multipart {
        // body-limit overruns surface here and keep their 413
        Ok(multipart) => read_upload(multipart).await.map_err(|e| {
            ApiError::new(e.status(), format!("Invalid upload: {}", e.body_text()), flavor)
        })?,
        Err(rejection) => {
            debug!("multipart rejected: {}", rejection.body_text());
            None
        }
    };
    let upload = upload.ok_or_else(|| ApiError::bad_request("No image uploaded", flavor))?;

    if upload.file_name.as_deref() == Some("") {
        return Err(ApiError::bad_request("No image selected", flavor));
    }
    let is_image = upload
        .content_type
        .as_deref()
        .is_some_and(|content_type| content_type.starts_with("image/"));
    if !is_image {
        return Err(ApiError::bad_request("File must be an image", flavor));
    }

    info!(
        file = upload.file_name.as_deref().unwrap_or("<unnamed>"),
        bytes = upload.bytes.len(),
        "prediction request"
    );

    let worker_state = state.clone();
    let response = tokio::task::spawn_blocking(move || {
        let prediction = worker_state.service.predict_bytes(&upload.bytes)?;
        PredictionResponse::from_prediction(prediction)
    })
    .await
    .map_err(|e| ApiError::internal(format!("prediction task failed: {e}"), flavor))?
    .map_err(|e| ApiError::from_seg(&e, flavor))?;

    Ok(Json(response))
}
