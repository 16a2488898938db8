//! Model-free checks of the detector post-processing: grid decoding, NMS and
//! prominent-face selection composed the way the pipeline uses them.

use facerank_vision::detector::{decode, DetectorOutputs};
use facerank_vision::face::{largest_detection, nms, Detection};
use ndarray::Array2;

fn empty(rows: usize, cols: usize) -> Array2<f32> {
    Array2::zeros((rows, cols))
}

fn outputs_with_cells(cells: &[(usize, usize, f32, [f32; 4])]) -> DetectorOutputs {
    // (stride index 0..3, cell index, score, bbox deltas)
    let sizes = [6400usize, 1600, 400];
    let mut scores: Vec<Array2<f32>> = sizes.iter().map(|&n| empty(n, 1)).collect();
    let mut boxes: Vec<Array2<f32>> = sizes.iter().map(|&n| empty(n, 4)).collect();
    let landmarks: Vec<Array2<f32>> = sizes.iter().map(|&n| empty(n, 10)).collect();

    for &(scale, idx, score, bbox) in cells {
        scores[scale][[idx, 0]] = score;
        for (k, v) in bbox.iter().enumerate() {
            boxes[scale][[idx, k]] = *v;
        }
    }

    DetectorOutputs {
        scores,
        boxes,
        landmarks,
    }
}

#[test]
fn decode_respects_the_score_threshold() {
    let outputs = outputs_with_cells(&[
        (2, 0, 0.9, [0.0, 0.0, 2.0, 2.0]),
        (2, 50, 0.4, [0.0, 0.0, 2.0, 2.0]),
    ]);

    let detections = decode(&outputs, 0.5, 640).unwrap();
    assert_eq!(detections.len(), 1);
    assert!((detections[0].score - 0.9).abs() < 1e-6);
}

#[test]
fn decode_emits_multiple_scales() {
    let outputs = outputs_with_cells(&[
        (0, 10, 0.8, [0.0, 0.0, 1.0, 1.0]),
        (2, 100, 0.7, [0.0, 0.0, 4.0, 4.0]),
    ]);

    let detections = decode(&outputs, 0.5, 640).unwrap();
    assert_eq!(detections.len(), 2);

    // Stride-32 boxes are coarser, so equal deltas mean bigger boxes.
    let widths: Vec<f32> = detections.iter().map(|d| d.bbox[2]).collect();
    assert!(widths.iter().any(|w| (*w - 1.0 * 8.0 / 640.0).abs() < 1e-6));
    assert!(widths.iter().any(|w| (*w - 4.0 * 32.0 / 640.0).abs() < 1e-6));
}

#[test]
fn nms_then_largest_selection_matches_the_pipeline_policy() {
    // Two well-separated faces: a small confident one and a large one.
    let detections = vec![
        Detection {
            bbox: [10.0, 10.0, 10.0, 10.0],
            score: 0.95,
            landmarks: [0.0; 10],
        },
        Detection {
            bbox: [200.0, 200.0, 20.0, 20.0],
            score: 0.7,
            landmarks: [0.0; 10],
        },
        // Near-duplicate of the large face that NMS should drop.
        Detection {
            bbox: [201.0, 201.0, 20.0, 20.0],
            score: 0.6,
            landmarks: [0.0; 10],
        },
    ];

    let kept = nms(&detections, 0.3);
    assert_eq!(kept.len(), 2);

    let best = largest_detection(&kept).unwrap();
    assert_eq!(best.bbox[2], 20.0, "area 400 beats area 100");
}
