//! Post-processing for the anchor-free face detector.
//!
//! The detector predicts directly from grid locations at three strides
//! (8, 16, 32). For each stride it emits four tensors:
//! - cls: [1, H*W, 1] classification scores
//! - obj: [1, H*W, 1] objectness scores
//! - bbox: [1, H*W, 4] box deltas (dx, dy, dw, dh)
//! - kps: [1, H*W, 10] landmark deltas (5 points x 2 coords)
//!
//! Decoding maps grid cells straight to normalized image coordinates:
//! cx = (grid_x + dx) * stride / input_size, w = dw * stride / input_size.

use anyhow::Result;
use ndarray::Array2;

const STRIDES: [usize; 3] = [8, 16, 32];

/// A decoded candidate box, normalized to [0, 1] of the detector input.
#[derive(Debug, Clone)]
pub struct GridDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // x1,y1 .. x5,y5
}

/// Per-stride tensors grouped by meaning, shapes already validated.
pub struct DetectorOutputs {
    pub scores: Vec<Array2<f32>>, // sigmoid(cls * obj), one per stride
    pub boxes: Vec<Array2<f32>>,
    pub landmarks: Vec<Array2<f32>>,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn take_scale(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    rows: usize,
    cols: usize,
    what: &str,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        anyhow::bail!("missing {what} output at index {index}");
    };
    if shape.len() != 3 || shape[0] != 1 || shape[2] != cols as i64 {
        anyhow::bail!("unexpected {what} shape at index {index}: {shape:?}, expected [1, {rows}, {cols}]");
    }
    if shape[1] as usize != rows {
        anyhow::bail!("expected {rows} locations for {what} at index {index}, got {}", shape[1]);
    }
    Ok(Array2::from_shape_vec((rows, cols), data.to_vec())?)
}

/// Group the detector's 12 raw output tensors by stride and meaning.
///
/// Tensor order is cls_8, cls_16, cls_32, obj_8.., bbox_8.., kps_8..
/// The returned scores are already sigmoid(cls * obj).
pub fn group_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<DetectorOutputs> {
    let cells: Vec<usize> = STRIDES
        .iter()
        .map(|s| (input_size / s) * (input_size / s))
        .collect();

    let mut scores = Vec::with_capacity(STRIDES.len());
    let mut boxes = Vec::with_capacity(STRIDES.len());
    let mut landmarks = Vec::with_capacity(STRIDES.len());

    for (i, &rows) in cells.iter().enumerate() {
        let cls = take_scale(outputs, i, rows, 1, "cls")?;
        let obj = take_scale(outputs, i + 3, rows, 1, "obj")?;
        let mut combined = cls * obj;
        combined.mapv_inplace(sigmoid);
        scores.push(combined);
        boxes.push(take_scale(outputs, i + 6, rows, 4, "bbox")?);
        landmarks.push(take_scale(outputs, i + 9, rows, 10, "kps")?);
    }

    Ok(DetectorOutputs {
        scores,
        boxes,
        landmarks,
    })
}

/// Decode grouped outputs into candidate boxes above `score_threshold`.
pub fn decode(
    outputs: &DetectorOutputs,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<GridDetection>> {
    let mut detections = Vec::new();
    let inv = 1.0 / input_size as f32;

    for (scale, &stride) in STRIDES.iter().enumerate() {
        let scores = &outputs.scores[scale];
        let boxes = &outputs.boxes[scale];
        let kps = &outputs.landmarks[scale];

        let grid = input_size / stride;
        if scores.shape()[0] != grid * grid {
            anyhow::bail!(
                "expected {} cells for stride {stride}, got {}",
                grid * grid,
                scores.shape()[0]
            );
        }

        for row in 0..grid {
            for col in 0..grid {
                let idx = row * grid + col;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + boxes[[idx, 0]]) * stride as f32 * inv;
                let cy = (row as f32 + boxes[[idx, 1]]) * stride as f32 * inv;
                let w = boxes[[idx, 2]] * stride as f32 * inv;
                let h = boxes[[idx, 3]] * stride as f32 * inv;

                let mut landmarks = [0.0f32; 10];
                for p in 0..5 {
                    landmarks[p * 2] = (col as f32 + kps[[idx, p * 2]]) * stride as f32 * inv;
                    landmarks[p * 2 + 1] =
                        (row as f32 + kps[[idx, p * 2 + 1]]) * stride as f32 * inv;
                }

                detections.push(GridDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeros(rows: usize, cols: usize) -> Array2<f32> {
        Array2::zeros((rows, cols))
    }

    #[test]
    fn sigmoid_midpoint_and_tails() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn decode_single_cell() {
        let input_size = 640;

        // Empty stride-8 and stride-16 maps, one hit at stride 32 cell (10, 10).
        let grid32 = 20;
        let mut scores32 = zeros(grid32 * grid32, 1);
        let mut boxes32 = zeros(grid32 * grid32, 4);
        let kps32 = zeros(grid32 * grid32, 10);

        let idx = 10 * grid32 + 10;
        scores32[[idx, 0]] = 0.9;
        boxes32[[idx, 0]] = 0.5;
        boxes32[[idx, 1]] = 0.3;
        boxes32[[idx, 2]] = 4.0; // 4 * stride = 128 px
        boxes32[[idx, 3]] = 4.0;

        let outputs = DetectorOutputs {
            scores: vec![zeros(6400, 1), zeros(1600, 1), scores32],
            boxes: vec![zeros(6400, 4), zeros(1600, 4), boxes32],
            landmarks: vec![zeros(6400, 10), zeros(1600, 10), kps32],
        };

        let detections = decode(&outputs, 0.5, input_size).unwrap();
        assert_eq!(detections.len(), 1);

        // cx = (10 + 0.5) * 32 / 640 = 0.525, w = 4 * 32 / 640 = 0.2
        let d = &detections[0];
        assert!((d.bbox[0] - 0.425).abs() < 1e-5);
        assert!((d.bbox[1] - 0.415).abs() < 1e-5);
        assert!((d.bbox[2] - 0.2).abs() < 1e-5);
        assert!((d.bbox[3] - 0.2).abs() < 1e-5);
        assert!((d.score - 0.9).abs() < 1e-5);

        // Landmark with zero delta sits at its cell: 10 * 32 / 640 = 0.5.
        assert!((d.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((d.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn group_outputs_rejects_bad_shape() {
        // 12 tensors, but the first cls map has the wrong cell count.
        let shape_ok = |n: usize, c: usize| (vec![1i64, n as i64, c as i64], vec![0.0f32; n * c]);
        let mut raw = Vec::new();
        raw.push(shape_ok(100, 1)); // should be 6400
        for _ in 0..2 {
            raw.push(shape_ok(1600, 1));
        }
        for n in [6400usize, 1600, 400] {
            raw.push(shape_ok(n, 1));
        }
        for n in [6400usize, 1600, 400] {
            raw.push(shape_ok(n, 4));
        }
        for n in [6400usize, 1600, 400] {
            raw.push(shape_ok(n, 10));
        }

        let refs: Vec<(&[i64], &[f32])> = raw
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();
        assert!(group_outputs(&refs, 640).is_err());
    }
}
