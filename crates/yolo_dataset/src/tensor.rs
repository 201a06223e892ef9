//! Burn tensor export for dataset items.

use crate::encode::ScaleTarget;
use crate::types::DatasetItem;
use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Standardized image as a `[3, H, W]` tensor.
pub fn image_tensor<B: Backend>(
    item: &DatasetItem,
    mean: [f32; 3],
    std: [f32; 3],
    device: &B::Device,
) -> Tensor<B, 3> {
    let (width, height) = item.image.dimensions();
    Tensor::<B, 3>::from_data(
        TensorData::new(
            item.image_chw(mean, std),
            [3, height as usize, width as usize],
        ),
        device,
    )
}

/// One `[anchors, S, S, 6]` tensor per scale, in scale order.
pub fn targets_to_tensors<B: Backend>(
    targets: &[ScaleTarget],
    device: &B::Device,
) -> Vec<Tensor<B, 4>> {
    targets.iter().map(|t| t.to_tensor::<B>(device)).collect()
}
