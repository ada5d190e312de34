//! Post-processing of raw YOLO output.
//!
//! Tests cover:
//! - Decoding center/size rows into scaled corner boxes
//! - Best-class selection and the confidence floor
//! - Rejection of malformed output shapes
//! - Per-class non-maximum suppression

use carwatch::BoundingBox;
use carwatch::detection::preprocessing::to_input_tensor;
use carwatch::detection::yolo::{RawBox, decode_output, non_max_suppression};
use image::{DynamicImage, ImageBuffer, Rgb};
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

/// Build a `[1, rows, anchors]` tensor from rows of per-anchor values.
fn output(rows: &[&[f32]]) -> NdTensor<f32, 3> {
    let anchors = rows[0].len();
    let data: Vec<f32> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    NdTensor::from_data([1, rows.len(), anchors], data)
}

fn raw(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> RawBox {
    RawBox {
        bbox: BoundingBox::new(x1, y1, x2, y2),
        confidence,
        class_id,
    }
}

#[test]
fn test_decode_scales_to_source_coordinates() -> anyhow::Result<()> {
    let tensor = output(&[
        &[100.0, 300.0],
        &[50.0, 300.0],
        &[40.0, 10.0],
        &[20.0, 10.0],
        &[0.9, 0.2],
    ]);

    let boxes = decode_output(&tensor, 0.5, 2.0, 0.5)?;

    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].bbox, BoundingBox::new(160.0, 20.0, 240.0, 30.0));
    assert_eq!(boxes[0].confidence, 0.9);
    assert_eq!(boxes[0].class_id, 0);

    Ok(())
}

#[test]
fn test_decode_picks_best_class() -> anyhow::Result<()> {
    let tensor = output(&[
        &[10.0],
        &[10.0],
        &[4.0],
        &[4.0],
        &[0.1],
        &[0.7],
        &[0.3],
    ]);

    let boxes = decode_output(&tensor, 0.25, 1.0, 1.0)?;
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].class_id, 1);
    assert_eq!(boxes[0].confidence, 0.7);

    Ok(())
}

#[test]
fn test_decode_rejects_bad_shape() {
    let tensor = NdTensor::from_data([1, 4, 2], vec![0.0; 8]);
    assert!(decode_output(&tensor, 0.5, 1.0, 1.0).is_err());
}

#[test]
fn test_nms_suppresses_overlaps_within_class() {
    let boxes = vec![
        raw(0.0, 0.0, 10.0, 10.0, 0.6, 0),
        raw(1.0, 1.0, 11.0, 11.0, 0.9, 0),
        raw(1.0, 1.0, 11.0, 11.0, 0.8, 1),
        raw(50.0, 50.0, 60.0, 60.0, 0.4, 0),
    ];

    let kept = non_max_suppression(boxes, 0.5);

    let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
    assert_eq!(confidences, vec![0.9, 0.8, 0.4]);
}

#[test]
fn test_input_tensor_layout() {
    let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(8, 4, |_, _| Rgb([255u8, 0u8, 51u8])));

    let input = to_input_tensor(&img, 16);

    assert_eq!(input.tensor.shape(), [1, 3, 16, 16]);
    assert_eq!(input.scale_x, 0.5);
    assert_eq!(input.scale_y, 0.25);
    assert!((input.tensor[[0, 0, 3, 3]] - 1.0).abs() < 1e-6);
    assert!(input.tensor[[0, 1, 3, 3]].abs() < 1e-6);
    assert!((input.tensor[[0, 2, 3, 3]] - 0.2).abs() < 1e-6);
}
