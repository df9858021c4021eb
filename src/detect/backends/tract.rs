#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::{BackendOptions, ObjectBackend};
use crate::frame::InferenceView;
use crate::model::{ObjectDetection, PixelBox};

const LETTERBOX_FILL: u8 = 114;

/// COCO class names in YOLO output order.
const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// YOLOv8-style ONNX object detector running on tract.
///
/// Expects a `[1, 3, S, S]` f32 input and a `[1, 4 + classes, anchors]` output
/// with `cx, cy, w, h` boxes in input pixels.
pub struct TractObjectBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    options: BackendOptions,
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

struct Candidate {
    class: usize,
    score: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl TractObjectBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, options: BackendOptions) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            options,
        })
    }

    fn build_input(&self, pixels: &RgbImage) -> Result<(Tensor, Letterbox)> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot run object detection on an empty frame"));
        }
        let side = self.input_size;
        let scale = (side as f32 / width as f32).min(side as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, side);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, side);
        let resized = image::imageops::resize(pixels, new_w, new_h, FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(side, side, Rgb([LETTERBOX_FILL; 3]));
        let pad_x = (side - new_w) / 2;
        let pad_y = (side - new_h) / 2;
        image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn decode(&self, outputs: TVec<TValue>, letterbox: &Letterbox, width: u32, height: u32) -> Result<Vec<Candidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let rows = shape[1];
        let anchors = shape[2];
        let classes = rows - 4;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let score = view[[0, 4 + c, a]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 < self.options.confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, a]];
            let cy = view[[0, 1, a]];
            let w = view[[0, 2, a]];
            let h = view[[0, 3, a]];
            let unmap_x = |v: f32| ((v - letterbox.pad_x) / letterbox.scale).clamp(0.0, width as f32);
            let unmap_y = |v: f32| ((v - letterbox.pad_y) / letterbox.scale).clamp(0.0, height as f32);
            candidates.push(Candidate {
                class: best.0,
                score: best.1,
                x1: unmap_x(cx - w / 2.0),
                y1: unmap_y(cy - h / 2.0),
                x2: unmap_x(cx + w / 2.0),
                y2: unmap_y(cy + h / 2.0),
            });
        }
        Ok(non_max_suppression(candidates, self.options.iou_threshold))
    }
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Class-wise greedy NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class == cand.class && iou(k, &cand) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

impl ObjectBackend for TractObjectBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, view: &InferenceView<'_>) -> Result<Vec<ObjectDetection>> {
        let (input, letterbox) = self.build_input(view.pixels())?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let region = view.region();
        let detections: Vec<ObjectDetection> = self
            .decode(outputs, &letterbox, view.width(), view.height())?
            .into_iter()
            .map(|c| ObjectDetection {
                label: COCO_LABELS
                    .get(c.class)
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| format!("class_{}", c.class)),
                confidence: c.score,
                bbox: PixelBox::new(
                    c.x1 as i32 + region.x as i32,
                    c.y1 as i32 + region.y as i32,
                    c.x2 as i32 + region.x as i32,
                    c.y2 as i32 + region.y as i32,
                ),
            })
            .collect();
        if self.options.verbose {
            log::debug!(
                "tract: {} objects in {}",
                detections.len(),
                view.source().display()
            );
        }
        Ok(detections)
    }
}
