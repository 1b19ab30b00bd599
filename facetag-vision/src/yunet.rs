//! YuNet detector post-processing
//!
//! YuNet is an anchor-free face detector that predicts directly from grid locations.
//! For each stride (8, 16, 32), it outputs:
//! - cls: [1, rows*cols, 1] - classification scores (already sigmoid-activated)
//! - obj: [1, rows*cols, 1] - objectness scores (already sigmoid-activated)
//! - bbox: [1, rows*cols, 4] - bbox deltas (dx, dy, log dw, log dh)
//! - kps: [1, rows*cols, 10] - landmark deltas (5 points x 2 coords)
//!
//! The network accepts any input whose sides are multiples of 32, so the grid
//! of every stride is derived from the input size of the current image:
//! cx = (col + dx) * stride
//! cy = (row + dy) * stride
//! w = exp(dw) * stride
//! h = exp(dh) * stride

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Network input dimensions, padded up to a multiple of the largest stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub width: usize,
    pub height: usize,
}

impl InputSize {
    /// Input size for an image of the given pixel dimensions.
    pub fn for_image(width: u32, height: u32) -> Self {
        let align = STRIDES[STRIDES.len() - 1];
        let pad = |v: u32| (v as usize).div_ceil(align) * align;
        Self {
            width: pad(width).max(align),
            height: pad(height).max(align),
        }
    }

    /// Grid shape `(rows, cols)` for one stride.
    pub fn grid(&self, stride: usize) -> (usize, usize) {
        (self.height / stride, self.width / stride)
    }

    pub fn locations(&self, stride: usize) -> usize {
        let (rows, cols) = self.grid(stride);
        rows * cols
    }
}

/// Output maps for one stride.
#[derive(Debug, Clone)]
pub struct ScaleOutputs {
    pub cls: Array2<f32>,
    pub obj: Array2<f32>,
    pub bbox: Array2<f32>,
    pub kps: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h in input pixels
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 in input pixels
}

/// Combined face score as computed by the reference YuNet post-processing.
pub fn face_score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

/// Decode YuNet output maps to detection boxes.
///
/// Boxes below `score_threshold` are dropped here; NMS happens in the caller.
pub fn decode_detections(
    scales: &[ScaleOutputs],
    score_threshold: f32,
    input: InputSize,
) -> Result<Vec<RawDetection>> {
    if scales.len() != STRIDES.len() {
        anyhow::bail!("expected {} scales, got {}", STRIDES.len(), scales.len());
    }

    let mut detections = Vec::new();

    for (scale, &stride) in scales.iter().zip(STRIDES.iter()) {
        let (rows, cols) = input.grid(stride);
        let num_boxes = scale.cls.shape()[0];

        if num_boxes != rows * cols {
            anyhow::bail!(
                "Expected {} boxes for stride {} ({}x{} grid), got {}",
                rows * cols,
                stride,
                rows,
                cols,
                num_boxes
            );
        }

        let s = stride as f32;
        for row in 0..rows {
            for col in 0..cols {
                let idx = row * cols + col;
                let score = face_score(scale.cls[[idx, 0]], scale.obj[[idx, 0]]);
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + scale.bbox[[idx, 0]]) * s;
                let cy = (row as f32 + scale.bbox[[idx, 1]]) * s;
                let w = scale.bbox[[idx, 2]].exp() * s;
                let h = scale.bbox[[idx, 3]].exp() * s;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] = (col as f32 + scale.kps[[idx, k * 2]]) * s;
                    landmarks[k * 2 + 1] = (row as f32 + scale.kps[[idx, k * 2 + 1]]) * s;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}

/// Parse YuNet raw outputs into per-stride maps
///
/// Output order: cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32
pub fn parse_yunet_outputs(
    outputs: &[(&[i64], &[f32])],
    input: InputSize,
) -> Result<Vec<ScaleOutputs>> {
    if outputs.len() < 12 {
        anyhow::bail!("YuNet produced {} outputs, expected 12", outputs.len());
    }

    let map = |group: usize, scale: usize, width: usize, name: &str| -> Result<Array2<f32>> {
        let idx = group * STRIDES.len() + scale;
        let expected = input.locations(STRIDES[scale]);
        let (shape, data) = outputs[idx];
        if shape.len() != 3 || shape[0] != 1 || shape[2] != width as i64 {
            anyhow::bail!(
                "Unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                name,
                idx,
                shape,
                expected,
                width
            );
        }
        if shape[1] as usize != expected {
            anyhow::bail!(
                "Expected {} locations for {} at index {}, got {}",
                expected,
                name,
                idx,
                shape[1]
            );
        }
        Ok(Array2::from_shape_vec((expected, width), data.to_vec())?)
    };

    (0..STRIDES.len())
        .map(|scale| {
            Ok(ScaleOutputs {
                cls: map(0, scale, 1, "cls")?,
                obj: map(1, scale, 1, "obj")?,
                bbox: map(2, scale, 4, "bbox")?,
                kps: map(3, scale, 10, "kps")?,
            })
        })
        .collect()
}
