use crate::errors::Result;
use ndarray::prelude::*;

/// Forward-only segmentation network.
///
/// Implementations must tolerate concurrent `forward` calls through a shared
/// reference; the inference service holds one instance for the whole process.
pub trait SegmentationModel: Send + Sync {
    /// Per-class logits `(batch, classes, height, width)` for an NCHW input.
    fn forward(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;

    /// Number of output channels.
    fn num_classes(&self) -> usize;

    /// Square spatial size the network expects.
    fn image_size(&self) -> u32 {
        crate::MODEL_IMAGE_SIZE
    }
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for Box<M> {
    fn forward(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        (**self).forward(tensor)
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn image_size(&self) -> u32 {
        (**self).image_size()
    }
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for std::sync::Arc<M> {
    fn forward(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        (**self).forward(tensor)
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn image_size(&self) -> u32 {
        (**self).image_size()
    }
}

/// Loss and logits of one optimisation or evaluation step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub loss: f32,
    /// `(batch, classes, height, width)`
    pub logits: Array4<f32>,
}

/// Backend the training loop drives. Gradients, optimizer state and the loss
/// graph live behind this seam.
pub trait TrainableModel {
    /// Forward, backward and one optimizer update.
    fn train_step(&mut self, images: ArrayView4<f32>, masks: ArrayView3<i64>) -> Result<StepOutput>;

    /// Forward and loss only; parameters are left untouched.
    fn eval_step(&mut self, images: ArrayView4<f32>, masks: ArrayView3<i64>) -> Result<StepOutput>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32) -> Result<()>;

    /// Persists an inference-ready model to `path`.
    fn save_checkpoint(&mut self, path: &std::path::Path) -> Result<()>;
}

/// Epoch-wise producer of training batches.
pub trait BatchSource {
    /// Number of samples per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batch order for the next epoch (shuffled or not, per implementation).
    fn plan_epoch(&mut self) -> Vec<crate::dataset::BatchPlan>;

    fn load_batch(&self, plan: &crate::dataset::BatchPlan) -> Result<crate::dataset::Batch>;
}
