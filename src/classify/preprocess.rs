use image::{imageops, RgbImage};
use ndarray::Array4;

/// Channel ordering expected by the model's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// [1, 3, height, width] (PyTorch exports)
    Nchw,
    /// [1, height, width, 3] (Keras exports)
    #[default]
    Nhwc,
}

/// Preprocessor for converting RGB frames to classifier input
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Resize to the target dimensions, copying if already there
    pub fn resize(&self, image: &RgbImage) -> RgbImage {
        let _span = tracing::debug_span!("resize").entered();

        if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        }
    }

    /// Preprocess an RGB image into a normalized tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Arrange channels per `layout`
    pub fn to_tensor(&self, image: &RgbImage, layout: TensorLayout) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = self.resize(image);
        let (width, height) = resized.dimensions();
        let (h, w) = (height as usize, width as usize);

        let mut tensor = match layout {
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
        };

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                match layout {
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                }
            }
        }

        tensor
    }
}
