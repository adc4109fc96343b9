//! Directory replay source.
//!
//! Replays still images (PNG/JPEG) from a local directory in file-name order,
//! decoding each into an RGBA `RawFrame` tagged with the configured rotation
//! and mirror flag. Used for offline runs and for dash-cam dumps copied off a
//! device.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{frame_interval, FrameSource};
use crate::frame::{PixelFormat, RawFrame, Rotation};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Configuration for a directory source.
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    pub path: PathBuf,
    /// Frames per second to pace replay at; 0 replays as fast as possible.
    pub target_fps: u32,
    pub rotation: Rotation,
    pub mirrored: bool,
    /// Start over from the first file once the directory is exhausted.
    pub looped: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            target_fps: 10,
            rotation: Rotation::Deg0,
            mirrored: false,
            looped: false,
        }
    }
}

pub struct DirectorySource {
    config: DirectoryConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

impl DirectorySource {
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let files = list_images(&config.path)?;
        if files.is_empty() {
            return Err(anyhow!(
                "no png/jpeg images found in {}",
                config.path.display()
            ));
        }
        Ok(Self {
            config,
            files,
            cursor: 0,
            last_frame_at: None,
            frame_count: 0,
        })
    }

    /// Number of images in the directory.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        let min_interval = frame_interval(self.config.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for DirectorySource {
    fn describe(&self) -> String {
        format!("dir://{}", self.config.path.display())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.cursor >= self.files.len() {
            if !self.config.looped {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;

        let image = image::open(path)
            .with_context(|| format!("decode image {}", path.display()))?
            .into_rgba8();
        let (width, height) = image.dimensions();
        let frame = RawFrame::new(image.into_raw(), width, height, PixelFormat::Rgba8888)?
            .with_orientation(self.config.rotation, self.config.mirrored);

        self.pace();
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read frame directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn replays_images_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbaImage::from_pixel(4, 2, Rgba([9, 9, 9, 255])).save(dir.path().join("b.png"))?;
        RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut source = DirectorySource::new(DirectoryConfig {
            path: dir.path().to_path_buf(),
            target_fps: 0,
            rotation: Rotation::Deg90,
            ..DirectoryConfig::default()
        })?;
        assert_eq!(source.len(), 2);

        let first = source.next_frame()?.expect("first frame");
        assert_eq!((first.width, first.height), (2, 2));
        assert_eq!(first.rotation, Rotation::Deg90);
        let second = source.next_frame()?.expect("second frame");
        assert_eq!((second.width, second.height), (4, 2));
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.frames_captured(), 2);
        Ok(())
    }

    #[test]
    fn empty_directory_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = DirectorySource::new(DirectoryConfig {
            path: dir.path().to_path_buf(),
            ..DirectoryConfig::default()
        });
        assert!(result.is_err());
        Ok(())
    }
}
