use image::{DynamicImage, imageops::FilterType};
use rten_tensor::NdTensor;

/// Model input plus the factors that map model coordinates back to the source.
pub struct ModelInput {
    pub tensor: NdTensor<f32, 4>,
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Resize to `size x size` and lay out as NCHW RGB in `[0, 1]`.
pub fn to_input_tensor(img: &DynamicImage, size: u32) -> ModelInput {
    let rgb = img.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = (y * size + x) as usize;
        for channel in 0..3 {
            data[channel * plane + offset] = f32::from(pixel[channel]) / 255.0;
        }
    }

    ModelInput {
        tensor: NdTensor::from_data([1, 3, size as usize, size as usize], data),
        scale_x: img.width() as f32 / size as f32,
        scale_y: img.height() as f32 / size as f32,
    }
}
