use image::{imageops::FilterType, DynamicImage, ImageReader, RgbImage};
use ndarray::{Array, Ix4};
use std::io::Cursor;
use thiserror::Error;

pub const MODEL_INPUT_SIZE: u32 = 299;
pub const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),
}

/// Decodes an uploaded image into the `(1, 299, 299, 3)` NHWC tensor the
/// classifier was trained on: RGB, bicubic resize, values scaled to `[0, 1]`.
pub fn preprocess(image_data: &[u8]) -> Result<Array<f32, Ix4>, PreprocessError> {
    let image = decode(image_data)?;
    Ok(to_tensor(&image))
}

fn decode(image_data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let image_reader = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| PreprocessError::UnreadableImage(e.to_string()))?;

    image_reader
        .decode()
        .map_err(|e| PreprocessError::UnreadableImage(e.to_string()))
}

fn to_tensor(image: &DynamicImage) -> Array<f32, Ix4> {
    let rgb: RgbImage = image.to_rgb8();
    let resized = image::imageops::resize(
        &rgb,
        MODEL_INPUT_SIZE,
        MODEL_INPUT_SIZE,
        FilterType::CatmullRom,
    );

    let side = MODEL_INPUT_SIZE as usize;
    let mut input = Array::zeros((1, side, side, CHANNELS));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, y, x, 0]] = (r as f32) / 255.;
        input[[0, y, x, 1]] = (g as f32) / 255.;
        input[[0, y, x, 2]] = (b as f32) / 255.;
    }

    input
}
