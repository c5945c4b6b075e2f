use crate::{
    classification::ClassificationResult,
    config::ModelConfig,
    model_service::{ModelService, PredictionError},
    preprocessing::preprocess,
};
use async_trait::async_trait;
use bytes::Bytes;
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Pool of ONNX Runtime sessions over the same classifier. A session is
/// only ever used behind its own mutex; requests are spread round-robin.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ort::Error> {
        ort::init().with_name("brain_tumor_api").commit()?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, PredictionError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovering poisoned lock on session {}", index);
            poisoned.into_inner()
        });

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view).map_err(|e| {
            PredictionError::InferenceFailed(format!("failed to build tensor: {}", e))
        })?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| PredictionError::InferenceFailed(e.to_string()))?;

        let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            PredictionError::InferenceFailed(format!("failed to extract tensor: {}", e))
        })?;

        Ok(data.to_vec())
    }

    fn classify(&self, image_data: &[u8]) -> Result<ClassificationResult, PredictionError> {
        let input = preprocess(image_data)?;
        let probabilities = self.run_inference(&input)?;

        ClassificationResult::from_probabilities(&probabilities)
            .map_err(|e| PredictionError::InferenceFailed(e.to_string()))
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, image_data: Bytes) -> Result<ClassificationResult, PredictionError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.classify(&image_data))
            .await
            .map_err(|e| PredictionError::InferenceFailed(format!("inference task failed: {}", e)))?
    }
}
