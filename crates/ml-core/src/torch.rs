use std::{convert::TryFrom, path::Path};

use anyhow::{Result, bail};
use image::{ImageBuffer, Rgb, imageops::FilterType};
use tch::{self, Device, Kind, Tensor};
use tracing::debug;

use crate::{
    detector::{Detect, Detection},
    labels::class_name,
};

const MAX_DETECTIONS: usize = 300;

/// TorchScript export of a YOLOv8-style detector (`[1, 4 + classes, anchors]` output).
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    min_confidence: f32,
    iou_threshold: f32,
}

impl TorchDetector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(model_path: P, device: Device, input_size: (i64, i64)) -> Result<Self> {
        if device.is_cuda() {
            crate::runtime::load_torch_cuda_runtime();
        }
        let module = tch::CModule::load_on_device(model_path, device)?;
        Ok(Self {
            module,
            device,
            input_size,
            min_confidence: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Detections below this score are discarded before non-maximum suppression.
    pub fn with_min_confidence(mut self, confidence: f32) -> Self {
        self.min_confidence = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Resize a BGR8 frame to the model input and build a normalised NCHW RGB tensor.
    fn bgr_to_tensor(&self, bgr: &[u8], width: i32, height: i32) -> Result<Tensor> {
        let expected = (width as usize) * (height as usize) * 3;
        if bgr.len() != expected {
            bail!(
                "unexpected frame buffer size: got {} bytes, expected {}",
                bgr.len(),
                expected
            );
        }

        let mut rgb = Vec::with_capacity(bgr.len());
        for chunk in bgr.chunks_exact(3) {
            rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
        }
        let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(width as u32, height as u32, rgb)
            .ok_or_else(|| anyhow::anyhow!("failed to wrap frame for resizing"))?;

        let (in_w, in_h) = self.input_size;
        let resized = if (width as i64, height as i64) == (in_w, in_h) {
            image
        } else {
            image::imageops::resize(&image, in_w as u32, in_h as u32, FilterType::Triangle)
        };

        let tensor = Tensor::from_slice(resized.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h, in_w, 3])
            .permute([0, 3, 1, 2])
            / 255.0;
        Ok(tensor)
    }
}

impl Detect for TorchDetector {
    fn detect(&self, bgr: &[u8], width: i32, height: i32) -> Result<Vec<Detection>> {
        let input = self.bgr_to_tensor(bgr, width, height)?;
        let output = tch::no_grad(|| self.module.forward_ts(&[input]))?;
        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[1] < 5 {
            bail!(
                "detector output requires at least 5 channels (x,y,w,h,class...), got {}",
                shape[1]
            );
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)?;

        let (in_w, in_h) = self.input_size;
        let scale_x = width as f32 / in_w as f32;
        let scale_y = height as f32 / in_h as f32;
        let max_x = (width - 1).max(0) as f32;
        let max_y = (height - 1).max(0) as f32;

        let mut candidates: Vec<(usize, Detection)> = Vec::new();
        for row in rows {
            let Some((class_id, score)) = row[4..]
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if score < self.min_confidence {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let bbox = [
                ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
                ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
                ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
                ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
            ];
            candidates.push((class_id, Detection::new(class_name(class_id), score, bbox)));
        }

        let kept = non_max_suppression(candidates, self.iou_threshold);
        debug!("detector kept {} detection(s)", kept.len());
        Ok(kept)
    }
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<(usize, Detection)>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class_id, det) in candidates {
        let overlaps = kept
            .iter()
            .any(|(kept_class, other)| *kept_class == class_id && iou(&det.bbox, &other.bbox) > iou_threshold);
        if !overlaps {
            kept.push((class_id, det));
            if kept.len() >= MAX_DETECTIONS {
                break;
            }
        }
    }
    kept.into_iter().map(|(_, det)| det).collect()
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_drops_overlapping_boxes_of_the_same_class() {
        let candidates = vec![
            (73, Detection::new("book", 0.6, [0.0, 0.0, 10.0, 10.0])),
            (73, Detection::new("book", 0.9, [1.0, 1.0, 11.0, 11.0])),
            (41, Detection::new("cup", 0.7, [1.0, 1.0, 11.0, 11.0])),
        ];
        let kept = non_max_suppression(candidates, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].label, "cup");
    }
}
