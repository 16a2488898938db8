use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

use crate::detector;

/// Detector input is letterboxed to this square size.
pub const DETECT_SIZE: u32 = 640;
/// Recognition network input size.
pub const ENCODE_SIZE: u32 = 112;

/// One detected face, in source-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

impl Detection {
    /// Bounding-box area in square pixels.
    pub fn area(&self) -> f32 {
        self.bbox[2].max(0.0) * self.bbox[3].max(0.0)
    }
}

/// L2-normalized face embedding.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        self.vector.as_slice().unwrap_or(&[])
    }
}

/// Pick the most prominent face: largest bounding-box area, first one in
/// detector output order on a tie. Assumes the subject is the largest face.
pub fn largest_detection(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for d in detections {
        match best {
            Some(b) if d.area() <= b.area() => {}
            _ => best = Some(d),
        }
    }
    best
}

/// RGB image to planar BGR f32 tensor data, values kept in [0, 255].
fn bgr_planes(img: &image::RgbImage) -> Vec<f32> {
    let pixels = (img.width() * img.height()) as usize;
    let mut data = vec![0.0f32; 3 * pixels];
    let (blue, rest) = data.split_at_mut(pixels);
    let (green, red) = rest.split_at_mut(pixels);
    for (i, px) in img.pixels().enumerate() {
        red[i] = px[0] as f32;
        green[i] = px[1] as f32;
        blue[i] = px[2] as f32;
    }
    data
}

/// Detect faces. The image is letterboxed onto a square canvas to avoid
/// distortion; returned coordinates are mapped back to source pixels.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let target = DETECT_SIZE;
    let (orig_w, orig_h) = img.dimensions();

    let scale = target as f32 / orig_w.max(orig_h) as f32;
    let new_w = (orig_w as f32 * scale) as u32;
    let new_h = (orig_h as f32 * scale) as u32;

    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);
    let mut canvas = DynamicImage::new_rgb8(target, target);
    let offset_x = (target - new_w) / 2;
    let offset_y = (target - new_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let data = bgr_planes(&canvas.to_rgb8());
    let input = Array4::from_shape_vec((1, 3, target as usize, target as usize), data)?;
    let tensor = Value::from_array(input)?;

    let outputs = session.run(ort::inputs![tensor])?;

    let mut raw: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        raw.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = raw
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let grouped = detector::group_outputs(&refs, target as usize)?;
    let candidates = detector::decode(&grouped, score_threshold, target as usize)?;

    // Undo the letterbox: normalized canvas coords -> source pixels.
    let mut detections: Vec<Detection> = candidates
        .into_iter()
        .map(|c| {
            let to_src_x = |v: f32| (v * target as f32 - offset_x as f32) / scale;
            let to_src_y = |v: f32| (v * target as f32 - offset_y as f32) / scale;

            let mut landmarks = [0.0f32; 10];
            for p in 0..5 {
                landmarks[p * 2] = to_src_x(c.landmarks[p * 2]);
                landmarks[p * 2 + 1] = to_src_y(c.landmarks[p * 2 + 1]);
            }

            Detection {
                bbox: [
                    to_src_x(c.bbox[0]),
                    to_src_y(c.bbox[1]),
                    c.bbox[2] * target as f32 / scale,
                    c.bbox[3] * target as f32 / scale,
                ],
                score: c.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }

    Ok(detections)
}

/// Non-maximum suppression over overlapping detections.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return vec![];
    }

    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(sorted[i].clone());
        for j in (i + 1)..sorted.len() {
            if !suppressed[j] && iou(&sorted[i].bbox, &sorted[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Align and crop a face to the encoder's reference geometry using the eye
/// landmarks: rotate and scale so the eyes land on the ArcFace template.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    // Reference eye positions for a 112x112 crop (ArcFace standard).
    let ref_left = (38.3_f32, 51.7_f32);
    let ref_right = (73.5_f32, 51.5_f32);

    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right.0 - left.0;
    let eye_dy = right.1 - left.1;
    let angle = eye_dy.atan2(eye_dx);

    let ref_dist = ((ref_right.0 - ref_left.0).powi(2) + (ref_right.1 - ref_left.1).powi(2)).sqrt();
    let dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();
    let scale = (size as f32 / ENCODE_SIZE as f32) * (ref_dist / dist);

    let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let ref_center = (
        (ref_left.0 + ref_right.0) / 2.0 * size as f32 / ENCODE_SIZE as f32,
        (ref_left.1 + ref_right.1) / 2.0 * size as f32 / ENCODE_SIZE as f32,
    );

    // Forward affine [a b; c d] + t mapping source to crop coordinates.
    let (a, b) = (scale * angle.cos(), scale * angle.sin());
    let (c, d) = (-scale * angle.sin(), scale * angle.cos());
    let tx = ref_center.0 - (a * center.0 + b * center.1);
    let ty = ref_center.1 - (c * center.0 + d * center.1);
    let det = a * d - b * c;

    let (img_w, img_h) = img.dimensions();
    let mut output = image::RgbImage::new(size, size);

    for out_y in 0..size {
        for out_x in 0..size {
            // Invert the affine to find the source sample point.
            let rx = out_x as f32 - tx;
            let ry = out_y as f32 - ty;
            let sx = (d * rx - b * ry) / det;
            let sy = (-c * rx + a * ry) / det;

            if sx < 0.0 || sx >= img_w as f32 || sy < 0.0 || sy >= img_h as f32 {
                continue; // outside source, leave black
            }

            // Bilinear sample.
            let x0 = sx.floor() as u32;
            let y0 = sy.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut px = [0u8; 3];
            for ch in 0..3 {
                px[ch] = (p00[ch] as f32 * w00
                    + p10[ch] as f32 * w10
                    + p01[ch] as f32 * w01
                    + p11[ch] as f32 * w11) as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(px));
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop to an L2-normalized embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let size = ENCODE_SIZE;
    let crop = face_img
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let data = bgr_planes(&crop);
    let input = Array4::from_shape_vec((1, 3, size as usize, size as usize), data)?;
    let tensor = Value::from_array(input)?;

    let outputs = session.run(ort::inputs![tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting [1, dim]; fall back to the flat length for other layouts.
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut vector: Vec<f32> = data[0..dim].to_vec();

    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }

    Ok(Embedding {
        vector: Array1::from_vec(vector),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection {
            bbox: [x, y, w, h],
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn iou_overlap_and_disjoint() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let v = iou(&a, &b);
        assert!(v > 0.0 && v < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(iou(&a, &c), 0.0);
    }

    #[test]
    fn nms_suppresses_overlaps() {
        let detections = vec![
            det(10.0, 10.0, 20.0, 20.0, 0.9),
            det(12.0, 12.0, 20.0, 20.0, 0.8),
            det(100.0, 100.0, 20.0, 20.0, 0.85),
        ];
        let kept = nms(&detections, 0.3);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn largest_detection_prefers_area_over_score() {
        // Areas 100 and 400; the bigger box wins regardless of score.
        let detections = vec![det(0.0, 0.0, 10.0, 10.0, 0.99), det(50.0, 50.0, 20.0, 20.0, 0.5)];
        let best = largest_detection(&detections).unwrap();
        assert_eq!(best.bbox[2], 20.0);
    }

    #[test]
    fn largest_detection_tie_keeps_first() {
        let detections = vec![det(1.0, 1.0, 10.0, 10.0, 0.6), det(2.0, 2.0, 10.0, 10.0, 0.9)];
        let best = largest_detection(&detections).unwrap();
        assert_eq!(best.bbox[0], 1.0);
    }

    #[test]
    fn largest_detection_empty() {
        assert!(largest_detection(&[]).is_none());
    }
}
