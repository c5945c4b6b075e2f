use crate::{classification::ClassificationResult, preprocessing::PreprocessError};
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

impl From<PreprocessError> for PredictionError {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::UnreadableImage(msg) => PredictionError::UnreadableImage(msg),
        }
    }
}

/// Classifies one uploaded image. Implementations are shared across
/// concurrent requests.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn predict(&self, image_data: Bytes) -> Result<ClassificationResult, PredictionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_image_maps_to_prediction_error() {
        let err: PredictionError =
            PreprocessError::UnreadableImage("unsupported format".into()).into();

        assert!(matches!(err, PredictionError::UnreadableImage(_)));
        assert_eq!(err.to_string(), "Unreadable image: unsupported format");
    }
}
