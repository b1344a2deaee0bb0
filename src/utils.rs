use burn::prelude::*;
use image::{imageops, Rgb, RgbImage};
use std::path::Path;

use crate::error::{Error, Result};

/// Converts a `[C, H, W]` tensor in `[-1, 1]` to an RGB image.
///
/// Single-channel tensors are rendered as grey.
pub fn tensor_to_image<B: Backend>(image: Tensor<B, 3>) -> Result<RgbImage> {
    let [channels, height, width] = image.dims();
    if channels != 1 && channels != 3 {
        return Err(Error::shape(
            "image export",
            format!("expected 1 or 3 channels, got {channels}"),
        ));
    }

    let values = ((image.clamp(-1.0, 1.0) + 1.0) * 127.5)
        .into_data()
        .iter::<f32>()
        .map(|v| v.round() as u8)
        .collect::<Vec<_>>();

    let plane = height * width;
    let mut output = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let offset = y as usize * width + x as usize;
        *pixel = if channels == 1 {
            Rgb([values[offset]; 3])
        } else {
            Rgb([
                values[offset],
                values[plane + offset],
                values[2 * plane + offset],
            ])
        };
    }

    Ok(output)
}

/// Tiles a `[B, C, H, W]` batch into a grid `nrow` images wide and saves it.
pub fn save_mosaic<B: Backend, Q: AsRef<Path>>(
    images: Tensor<B, 4>,
    nrow: u32,
    path: Q,
) -> Result<()> {
    if nrow == 0 {
        return Err(Error::config("image export", "nrow must be positive"));
    }
    let [batch, _, height, width] = images.dims();
    let ncol = (batch as u32).div_ceil(nrow);

    let mut imgbuf = RgbImage::new(nrow * width as u32, ncol * height as u32);
    for index in 0..batch {
        let image: Tensor<B, 3> = images.clone().narrow(0, index, 1).squeeze(0);
        let tile = tensor_to_image(image)?;

        let (col, row) = (index as u32 % nrow, index as u32 / nrow);
        imageops::replace(
            &mut imgbuf,
            &tile,
            i64::from(col * width as u32),
            i64::from(row * height as u32),
        );
    }

    imgbuf.save(path)?;
    Ok(())
}
