use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::time::Instant;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection};

const GRID: u32 = 16;
const CLASS_NAME: &str = "pothole";

/// CPU backend that flags dark road patches.
///
/// The image is divided into a 16x16 grid of cells. Cells whose mean
/// luminance falls below `darkness_ratio` times the frame mean are marked,
/// and 4-connected groups of marked cells become one box. Confidence grows
/// with how much darker the group is than the frame.
pub struct CpuBackend {
    darkness_ratio: f32,
    min_cells: usize,
    ready: bool,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            darkness_ratio: 0.45,
            min_cells: 1,
            ready: false,
        }
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_darkness_ratio(mut self, ratio: f32) -> Self {
        self.darkness_ratio = ratio.clamp(0.05, 0.95);
        self
    }

    pub fn with_min_cells(mut self, cells: usize) -> Self {
        self.min_cells = cells.max(1);
        self
    }

    /// Mean luminance per grid cell; `None` for cells no pixel maps to
    /// (images narrower or shorter than the grid).
    fn cell_luminance(image: &RgbaImage) -> Vec<Option<f32>> {
        let (w, h) = image.dimensions();
        let mut sums = vec![0f32; (GRID * GRID) as usize];
        let mut counts = vec![0u32; (GRID * GRID) as usize];
        for (x, y, pixel) in image.enumerate_pixels() {
            let cx = (x * GRID / w).min(GRID - 1);
            let cy = (y * GRID / h).min(GRID - 1);
            let [r, g, b, _] = pixel.0;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            let idx = (cy * GRID + cx) as usize;
            sums[idx] += luma;
            counts[idx] += 1;
        }
        sums.iter()
            .zip(&counts)
            .map(|(sum, &count)| (count > 0).then(|| sum / count as f32))
            .collect()
    }

    fn group_boxes(&self, luma: &[Option<f32>]) -> Vec<BoundingBox> {
        let populated: Vec<f32> = luma.iter().flatten().copied().collect();
        if populated.is_empty() {
            return Vec::new();
        }
        let mean = populated.iter().sum::<f32>() / populated.len() as f32;
        if mean <= 0.0 {
            return Vec::new();
        }
        let cutoff = mean * self.darkness_ratio;
        let marked: Vec<bool> = luma
            .iter()
            .map(|v| v.is_some_and(|v| v < cutoff))
            .collect();

        let mut visited = vec![false; marked.len()];
        let mut boxes = Vec::new();
        for start in 0..marked.len() {
            if !marked[start] || visited[start] {
                continue;
            }
            let mut stack = vec![start];
            visited[start] = true;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (GRID, GRID, 0, 0);
            let mut cells = 0usize;
            let mut darkness = 0f32;
            while let Some(idx) = stack.pop() {
                let (x, y) = (idx as u32 % GRID, idx as u32 / GRID);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                cells += 1;
                darkness += 1.0 - luma[idx].unwrap_or(mean) / mean;

                let mut neighbours = Vec::with_capacity(4);
                if x > 0 {
                    neighbours.push(idx - 1);
                }
                if x + 1 < GRID {
                    neighbours.push(idx + 1);
                }
                if y > 0 {
                    neighbours.push(idx - GRID as usize);
                }
                if y + 1 < GRID {
                    neighbours.push(idx + GRID as usize);
                }
                for n in neighbours {
                    if marked[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
            if cells < self.min_cells {
                continue;
            }
            let g = GRID as f32;
            boxes.push(BoundingBox::new(
                min_x as f32 / g,
                min_y as f32 / g,
                (max_x + 1) as f32 / g,
                (max_y + 1) as f32 / g,
                (darkness / cells as f32).clamp(0.0, 1.0),
                CLASS_NAME,
            ));
        }
        non_max_suppression(boxes, 0.5)
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn setup(&mut self, accelerated: bool) -> Result<()> {
        if accelerated {
            return Err(anyhow!("cpu backend has no accelerated execution target"));
        }
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn detect(&mut self, image: &RgbaImage) -> Result<Detection> {
        if !self.ready {
            return Err(anyhow!("cpu backend not set up"));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("cannot run detection on an empty image"));
        }
        let started = Instant::now();
        let luma = Self::cell_luminance(image);
        let boxes = self.group_boxes(&luma);
        Ok(Detection::new(boxes, started.elapsed()))
    }

    fn close(&mut self) {
        self.ready = false;
    }
}
