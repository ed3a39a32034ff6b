//! image 与 tensor 相互转换
//!
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, GrayImage, ImageBuffer, Rgb};

use crate::error::Error;

/// 将张量转换为图像
///
/// samples: NHWC, 取值范围 [0, 1]
pub fn tensor_to_image(samples: &Tensor) -> Result<Vec<DynamicImage>, Error> {
    let (batch, height, width, channels) = samples.dims4()?;
    if channels != 3 {
        return Err(Error::InvalidTensorShape(format!(
            "expected 3 channels, got {channels}"
        )));
    }

    let samples = samples.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;

    let mut images = Vec::with_capacity(batch);
    for i in 0..batch {
        // HWC
        let array = samples.get(i)?.flatten_all()?.to_vec1::<f32>()?;

        // 数值处理 (缩放 + clip + 类型转换)
        let data: Vec<u8> = array
            .iter()
            .map(|&x| (255.0 * x).round().clamp(0.0, 255.0) as u8)
            .collect();

        let img_buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(width as u32, height as u32, data).ok_or(Error::ImageBuffer)?;

        images.push(DynamicImage::ImageRgb8(img_buffer));
    }

    Ok(images)
}

/// 将 mask 图像转换为张量
///
/// output: [H, W], 非零像素为 1.0
pub fn mask_to_tensor(mask: &GrayImage, device: &Device) -> Result<Tensor, Error> {
    let (width, height) = mask.dimensions();
    let data: Vec<f32> = mask
        .pixels()
        .map(|p| if p.0[0] > 0 { 1.0 } else { 0.0 })
        .collect();

    let tensor = Tensor::from_vec(data, (height as usize, width as usize), device)?;
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Luma};

    use super::*;

    #[test]
    fn test_tensor_to_image() -> anyhow::Result<()> {
        // 1x2x3x3: 第一个像素为白色, 其余为黑色
        let mut data = vec![0f32; 2 * 3 * 3];
        data[0] = 1.0;
        data[1] = 1.0;
        data[2] = 1.0;
        let tensor = Tensor::from_vec(data, (1, 2, 3, 3), &Device::Cpu)?;

        let images = tensor_to_image(&tensor)?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].dimensions(), (3, 2));

        let rgb = images[0].to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(2, 1).0, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_tensor_to_image_channels() -> anyhow::Result<()> {
        let tensor = Tensor::zeros((1, 2, 2, 4), DType::F32, &Device::Cpu)?;
        assert!(tensor_to_image(&tensor).is_err());
        Ok(())
    }

    #[test]
    fn test_mask_to_tensor() -> anyhow::Result<()> {
        let mut mask = GrayImage::new(3, 2);
        mask.put_pixel(1, 0, Luma([255]));
        mask.put_pixel(2, 1, Luma([7]));

        let tensor = mask_to_tensor(&mask, &Device::Cpu)?;
        assert_eq!(tensor.dims(), &[2, 3]);
        assert_eq!(
            tensor.to_vec2::<f32>()?,
            vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]
        );
        Ok(())
    }
}
