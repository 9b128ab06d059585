// src/replay.rs
//
// Offline frame source: a directory of still images (one per frame, sorted
// by file name) replayed through the counter as if captured live.

use crate::types::{Frame, ReplayConfig};
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// All image files under `dir`, sorted by path.
pub fn find_frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Frame directory not found: {}", dir.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    info!("Found {} frame files in {}", files.len(), dir.display());
    Ok(files)
}

pub fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("Failed to decode frame {}", path.display()))?;
    Ok(Frame::new(image.to_rgb8()))
}

pub struct FrameSequence {
    files: Vec<PathBuf>,
    next: usize,
    name: String,
}

impl FrameSequence {
    pub fn open(config: &ReplayConfig) -> Result<Self> {
        let dir = Path::new(&config.input_dir);
        let files = find_frame_files(dir)?;
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("frames")
            .to_string();
        Ok(Self {
            files,
            next: 0,
            name,
        })
    }

    /// Sequence name, used for output files.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn position(&self) -> usize {
        self.next
    }

    /// Decode the next frame; Ok(None) once the sequence is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        debug!("Loading frame {}", path.display());
        load_frame(path).map(Some)
    }
}

/// Line-delimited JSON writer for counter events.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl JsonlWriter {
    pub fn create(output_dir: &str, name: &str) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output dir {}", output_dir))?;
        let path = Path::new(output_dir).join(format!("{}_rows.jsonl", name));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn write<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(PathBuf, usize)> {
        self.writer.flush()?;
        Ok((self.path, self.lines))
    }
}
