#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, COCO_LABELS};
use crate::frame::Frame;
use crate::geometry::BoundingBox;

/// Letterbox padding value used by the YOLO training pipeline.
const PAD_VALUE: u8 = 114;

/// Settings for a YOLOv8 ONNX export.
#[derive(Clone, Debug)]
pub struct TractConfig {
    pub model_path: PathBuf,
    /// Square model input edge (640 for stock exports).
    pub input_size: u32,
    /// Candidates below this score are discarded before NMS.
    pub score_floor: f32,
    /// Overlap above which the weaker same-class box is suppressed.
    pub iou_threshold: f32,
    /// Class names in model output order. Empty means COCO.
    pub labels: Vec<String>,
}

impl Default for TractConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("weights/yolov8s.onnx"),
            input_size: 640,
            score_floor: 0.05,
            iou_threshold: 0.45,
            labels: Vec::new(),
        }
    }
}

/// Tract-based YOLOv8 backend.
///
/// Loads a local ONNX export and decodes its `[1, 4 + classes, anchors]`
/// head (or the transposed layout) into pixel-space detections.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    config: TractConfig,
    labels: Vec<String>,
}

/// Mapping from model input space back to frame pixels.
#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f64,
    pad_x: f64,
    pad_y: f64,
}

impl Letterbox {
    fn unmap(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(config: TractConfig) -> Result<Self> {
        let model_path: &Path = config.model_path.as_ref();
        let size = config.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = if config.labels.is_empty() {
            COCO_LABELS.iter().map(|s| s.to_string()).collect()
        } else {
            config.labels.clone()
        };
        log::info!(
            "TractBackend: loaded {} ({} classes, input {}x{})",
            model_path.display(),
            labels.len(),
            size,
            size
        );

        Ok(Self {
            model,
            config,
            labels,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;

        let size = self.config.input_size;
        let scale = (size as f64 / frame.width as f64).min(size as f64 / frame.height as f64);
        let new_w = ((frame.width as f64 * scale).round() as u32).clamp(1, size);
        let new_h = ((frame.height as f64 * scale).round() as u32).clamp(1, size);
        let resized = image::imageops::resize(&image, new_w, new_h, FilterType::Triangle);

        let pad_x = (size - new_w) / 2;
        let pad_y = (size - new_h) / 2;
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f64,
                pad_y: pad_y as f64,
            },
        ))
    }

    fn decode(&self, outputs: TVec<TValue>, letterbox: Letterbox, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("YOLO output is not rank 3")?;
        // Stock exports are [1, 4 + classes, anchors]; some tools transpose.
        let transposed = shape[1] > shape[2];
        let (rows, anchors) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if rows <= 4 {
            return Err(anyhow!("YOLO output has no class rows: {:?}", shape));
        }
        let at = |row: usize, anchor: usize| -> f32 {
            if transposed {
                view[[0, anchor, row]]
            } else {
                view[[0, row, anchor]]
            }
        };

        let (fw, fh) = (frame.width as f64, frame.height as f64);
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class, score) = (4..rows)
                .map(|row| (row - 4, at(row, anchor)))
                .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score < self.config.score_floor {
                continue;
            }
            let (cx, cy) = (at(0, anchor) as f64, at(1, anchor) as f64);
            let (w, h) = (at(2, anchor) as f64, at(3, anchor) as f64);
            let (x0, y0) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
            let (x1, y1) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
            let label = self
                .labels
                .get(class)
                .cloned()
                .unwrap_or_else(|| format!("class{}", class));
            candidates.push(Detection::new(
                label,
                score.clamp(0.0, 1.0),
                BoundingBox::new(x0.clamp(0.0, fw), y0.clamp(0.0, fh), x1.clamp(0.0, fw), y1.clamp(0.0, fh)),
            ));
        }

        Ok(non_max_suppression(candidates, self.config.iou_threshold as f64))
    }
}

/// Class-aware greedy NMS: keep the strongest box, drop same-label boxes
/// overlapping it by more than `iou_threshold`.
pub(crate) fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.label == cand.label && k.bbox.iou(&cand.bbox) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, letterbox, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.config.input_size;
        let frame = Frame::new(0, size, size, vec![PAD_VALUE; (size * size * 3) as usize])?;
        self.detect(&frame).map(|_| ())
    }
}
