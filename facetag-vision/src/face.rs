use crate::yunet::{self, InputSize};
use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// SFace input side length.
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmarks for a 112x112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Detection result from YuNet
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

impl Detection {
    pub fn landmark_points(&self) -> [(f32, f32); 5] {
        let mut points = [(0.0, 0.0); 5];
        for (i, p) in points.iter_mut().enumerate() {
            *p = (self.landmarks[i * 2], self.landmarks[i * 2 + 1]);
        }
        points
    }
}

/// Face embedding (SFace output)
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

/// Tunables forwarded to the detector post-processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            score_threshold: 0.8,
            nms_threshold: 0.3,
            top_k: 5000,
        }
    }
}

/// Build the detector input tensor for `img` at its own resolution.
///
/// The image is placed at the top-left of a zero canvas padded to a multiple
/// of 32, so detections come back in source pixel coordinates.
pub fn detector_input(img: &DynamicImage) -> Result<(Array4<f32>, InputSize)> {
    let (width, height) = img.dimensions();
    let input = InputSize::for_image(width, height);
    let img_rgb = img.to_rgb8();

    // YuNet expects [1, 3, H, W] in BGR order with values in [0, 255]
    let mut tensor = Array4::<f32>::zeros((1, 3, input.height, input.width));
    for (x, y, pixel) in img_rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[2] as f32;
        tensor[[0, 1, y, x]] = pixel[1] as f32;
        tensor[[0, 2, y, x]] = pixel[0] as f32;
    }

    Ok((tensor, input))
}

/// Detect faces in an image using YuNet detector
///
/// The input size is recomputed for every call; the anchor grid depends on it.
/// Results are sorted by descending score.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    params: &DetectorParams,
) -> Result<Vec<Detection>> {
    let (input_array, input) = detector_input(img)?;
    let input_tensor = Value::from_array(input_array)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let scales = yunet::parse_yunet_outputs(&output_refs, input)?;
    let raw = yunet::decode_detections(&scales, params.score_threshold, input)?;

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| Detection {
            bbox: d.bbox,
            score: d.score,
            landmarks: d.landmarks,
        })
        .collect();

    let mut kept = nms(&detections, params.nms_threshold);
    kept.truncate(params.top_k);
    log::debug!(
        "detected {} face(s) at input {}x{}",
        kept.len(),
        input.width,
        input.height
    );
    Ok(kept)
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }

    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let area_a = a[2] * a[3];
    let area_b = b[2] * b[3];
    inter / (area_a + area_b - inter)
}

/// Least-squares similarity transform (scale, rotation, translation) mapping
/// `src` onto `dst`.
///
/// Returns `[a, -b, tx, b, a, ty]`, i.e. the matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// or `None` when all source points coincide.
pub fn similarity_transform(
    src: &[(f32, f32); 5],
    dst: &[(f32, f32); 5],
) -> Option<[f32; 6]> {
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        (sx / n, sy / n)
    };
    let (smx, smy) = mean(src);
    let (dmx, dmy) = mean(dst);

    // Closed form on centered points:
    // a = sum(sx*dx + sy*dy) / sum(|s|^2), b = sum(sx*dy - sy*dx) / sum(|s|^2)
    let mut num_a = 0.0f32;
    let mut num_b = 0.0f32;
    let mut denom = 0.0f32;
    for (s, d) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (s.0 - smx, s.1 - smy);
        let (dx, dy) = (d.0 - dmx, d.1 - dmy);
        num_a += sx * dx + sy * dy;
        num_b += sx * dy - sy * dx;
        denom += sx * sx + sy * sy;
    }

    if denom < 1e-12 {
        return None;
    }

    let a = num_a / denom;
    let b = num_b / denom;
    let tx = dmx - (a * smx - b * smy);
    let ty = dmy - (b * smx + a * smy);

    Some([a, -b, tx, b, a, ty])
}

/// Align and crop face to the 112x112 SFace layout using all five landmarks
pub fn align_face(img: &DynamicImage, detection: &Detection) -> Result<DynamicImage> {
    let m = similarity_transform(&detection.landmark_points(), &REFERENCE_LANDMARKS)
        .ok_or_else(|| anyhow::anyhow!("degenerate landmarks, cannot align face"))?;
    let (a, b, tx, ty) = (m[0], m[3], m[2], m[5]);
    let det = a * a + b * b;
    if det < 1e-12 {
        anyhow::bail!("degenerate alignment transform");
    }

    let (img_w, img_h) = img.dimensions();
    let size = ALIGNED_SIZE;
    let mut output = image::RgbImage::new(size, size);

    // For each output pixel, invert the transform to find the source pixel
    for out_y in 0..size {
        for out_x in 0..size {
            let dx = out_x as f32 - tx;
            let dy = out_y as f32 - ty;
            let in_x = (a * dx + b * dy) / det;
            let in_y = (-b * dx + a * dy) / det;

            if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
                continue;
            }

            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);

            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut rgb = [0u8; 3];
            for (c, value) in rgb.iter_mut().enumerate() {
                *value = (p00[c] as f32 * w00
                    + p10[c] as f32 * w10
                    + p01[c] as f32 * w01
                    + p11[c] as f32 * w11)
                    .round()
                    .clamp(0.0, 255.0) as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(rgb));
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop to an L2-normalized embedding using SFace
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let size = ALIGNED_SIZE;
    let face_rgb = if face_img.dimensions() == (size, size) {
        face_img.to_rgb8()
    } else {
        face_img
            .resize_exact(size, size, image::imageops::FilterType::Triangle)
            .to_rgb8()
    };

    // SFace consumes RGB planes with values in [0, 255]
    let side = size as usize;
    let mut input_array = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in face_rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            input_array[[0, c, y, x]] = pixel[c] as f32;
        }
    }
    let input_tensor = Value::from_array(input_array)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let raw = &data[0..embedding_size];

    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    let normalized = if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    };

    Ok(Embedding::from_vec(normalized))
}

/// Cosine similarity between two embeddings, in [-1, 1].
pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.vector.iter().zip(b.vector.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
