use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use opencv::{
    core::{Mat, CV_64F},
    imgproc,
    prelude::*,
};

use crate::{calibration::CameraIntrinsics, frame::CameraFrame};

/// BGR capture output to an RGBA frame.
pub fn bgr_to_frame(bgr: &Mat, index: u64, timestamp: Duration) -> Result<CameraFrame> {
    let mut rgba = Mat::default();
    imgproc::cvt_color_def(bgr, &mut rgba, imgproc::COLOR_BGR2RGBA)?;

    let (width, height) = (rgba.cols() as u32, rgba.rows() as u32);
    let data = rgba.data_bytes().context("Converted frame is not continuous")?;
    let Some(image) = RgbaImage::from_raw(width, height, data.to_vec()) else {
        bail!("Frame buffer does not match {}x{}", width, height);
    };

    Ok(CameraFrame {
        image,
        index,
        timestamp,
    })
}

fn rgba_mat(image: &RgbaImage) -> Result<Mat> {
    let flat = Mat::from_slice(image.as_raw().as_slice())?;
    let rgba = flat.reshape(4, image.height() as i32)?;
    Ok(rgba.try_clone()?)
}

pub fn frame_to_gray(frame: &CameraFrame) -> Result<Mat> {
    let rgba = rgba_mat(&frame.image)?;
    let mut gray = Mat::default();
    imgproc::cvt_color_def(&rgba, &mut gray, imgproc::COLOR_RGBA2GRAY)?;
    Ok(gray)
}

pub fn frame_to_bgr(frame: &CameraFrame) -> Result<Mat> {
    let rgba = rgba_mat(&frame.image)?;
    let mut bgr = Mat::default();
    imgproc::cvt_color_def(&rgba, &mut bgr, imgproc::COLOR_RGBA2BGR)?;
    Ok(bgr)
}

/// Camera matrix (3x3) and distortion row vector as `CV_64F` mats.
pub fn intrinsics_to_mats(intrinsics: &CameraIntrinsics) -> Result<(Mat, Mat)> {
    let mut camera_matrix = Mat::zeros(3, 3, CV_64F)?.to_mat()?;
    for (row, values) in intrinsics.matrix.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            *camera_matrix.at_2d_mut::<f64>(row as i32, col as i32)? = *value;
        }
    }

    let dist_coeffs = Mat::from_slice(intrinsics.distortion.as_slice())?.try_clone()?;

    Ok((camera_matrix, dist_coeffs))
}

pub fn vec3_to_mat(values: &[f64; 3]) -> Result<Mat> {
    Ok(Mat::from_slice(&values[..])?.try_clone()?)
}

/// 3x1 or 1x3 `CV_64F` mat to an array.
pub fn mat_to_vec3(m: &Mat) -> Result<[f64; 3]> {
    let at = |i: i32| {
        if m.rows() == 1 {
            m.at_2d::<f64>(0, i)
        } else {
            m.at_2d::<f64>(i, 0)
        }
    };
    Ok([*at(0)?, *at(1)?, *at(2)?])
}
