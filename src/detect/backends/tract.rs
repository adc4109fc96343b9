#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection};

type Plan = TypedRunnableModel<TypedModel>;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// The model is expected to take a `1x3xSxS` float input in 0..1 and produce
/// a `1x(4+C)xN` output: center-x, center-y, width, height in input pixels,
/// followed by C class scores per candidate.
pub struct TractBackend {
    model_path: PathBuf,
    labels: Vec<String>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    model: Option<Plan>,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            labels: vec!["pothole".to_string()],
            input_size,
            confidence_threshold: 0.3,
            iou_threshold: 0.5,
            model: None,
        }
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Class labels, one per line, in model output order.
    pub fn with_labels_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels from {}", path.display()))?;
        let labels: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if labels.is_empty() {
            return Err(anyhow!("labels file {} is empty", path.display()));
        }
        self.labels = labels;
        Ok(self)
    }

    fn load(&self) -> Result<Plan> {
        let size = self.input_size as usize;
        tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn build_input(&self, image: &RgbaImage) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);
        let size = size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let classes = shape[1] - 4;
        let size = self.input_size as f32;
        let mut boxes = Vec::new();
        for i in 0..shape[2] {
            let (class_id, score) = (0..classes)
                .map(|c| (c, view[[0, 4 + c, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score < self.confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, i]] / size;
            let cy = view[[0, 1, i]] / size;
            let w = view[[0, 2, i]] / size;
            let h = view[[0, 3, i]] / size;
            let label = self
                .labels
                .get(class_id)
                .map(String::as_str)
                .unwrap_or("unknown");
            boxes.push(
                BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0, score, label)
                    .with_class_id(class_id),
            );
        }
        Ok(non_max_suppression(boxes, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn setup(&mut self, accelerated: bool) -> Result<()> {
        if accelerated {
            return Err(anyhow!("tract backend runs on the CPU only"));
        }
        self.model = Some(self.load()?);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn detect(&mut self, image: &RgbaImage) -> Result<Detection> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend not set up"))?;
        let started = Instant::now();
        let input = self.build_input(image);
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let boxes = self.decode(outputs)?;
        Ok(Detection::new(boxes, started.elapsed()))
    }

    fn close(&mut self) {
        self.model = None;
    }
}
