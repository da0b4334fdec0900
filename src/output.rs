use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbaImage};
use tracing::{debug, info};

use crate::error::{PaintError, Result};

/// `<stem>-sketch.<ext>` next to a render file.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}-sketch.{}", stem, ext.to_string_lossy()),
        None => format!("{}-sketch", stem),
    };
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|e| PaintError::io(format!("Failed to create {}", dir.display()), e))?;
    }
    Ok(())
}

/// Write encoded render bytes to `path`.
pub fn save_image(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, bytes).map_err(|e| PaintError::io(format!("Failed to write {}", path.display()), e))
}

/// Write the sketch region next to a render as its `-sketch` companion.
pub fn save_sketch(render_path: &Path, sketch: &RgbaImage) -> Result<PathBuf> {
    let sidecar = sidecar_path(render_path);
    ensure_parent(&sidecar)?;
    // RGB so the sidecar can also be written as JPEG.
    DynamicImage::ImageRgba8(sketch.clone()).to_rgb8().save(&sidecar)?;
    Ok(sidecar)
}

/// Save a render and its sketch companion.
pub fn save_render(path: &Path, bytes: &[u8], sketch: &RgbaImage) -> Result<PathBuf> {
    save_image(path, bytes)?;
    save_sketch(path, sketch)
}

/// Delete an image and its sidecar, ignoring missing files.
pub fn delete_image(path: &Path) -> Result<()> {
    for file in [path.to_path_buf(), sidecar_path(path)] {
        if file.exists() {
            fs::remove_file(&file)
                .map_err(|e| PaintError::io(format!("Failed to delete {}", file.display()), e))?;
        }
    }
    Ok(())
}

/// Move an image (and its sidecar, if any) over `dest`.
pub fn rename_image(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        return Ok(());
    }
    delete_image(dest)?;
    ensure_parent(dest)?;
    fs::rename(src, dest).map_err(|e| {
        PaintError::io(
            format!("Failed to move {} to {}", src.display(), dest.display()),
            e,
        )
    })?;
    let src_sketch = sidecar_path(src);
    if src_sketch.exists() {
        let dest_sketch = sidecar_path(dest);
        fs::rename(&src_sketch, &dest_sketch).map_err(|e| {
            PaintError::io(format!("Failed to move {}", src_sketch.display()), e)
        })?;
    }
    Ok(())
}

/// Which family of autosave files a rotation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveKind {
    /// `image.png`
    Single,
    /// `batch-NN.png`
    Batch,
}

fn is_batch_name(name: &str) -> bool {
    name.strip_prefix("batch-")
        .and_then(|rest| rest.strip_suffix(".png"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Split `NN-<name>` into the generation number and the file name, for the
/// given kind. Sidecars do not match; they travel with their render.
pub fn parse_autosave_name(file_name: &str, kind: AutosaveKind) -> Option<(u32, &str)> {
    let (number, rest) = file_name.split_once('-')?;
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let matches = match kind {
        AutosaveKind::Single => rest == "image.png",
        AutosaveKind::Batch => is_batch_name(rest),
    };
    if !matches {
        return None;
    }
    Some((number.parse().ok()?, rest))
}

/// Rotating store of recent renders.
///
/// The current render lives at `<root>/image.png` (or `<root>/batch-NN.png`).
/// Each new render pushes the previous one into `<root>/autosave` as
/// `01-image.png`, shifting older generations up by one and dropping those
/// past `images_max`.
#[derive(Debug, Clone)]
pub struct Autosave {
    root: PathBuf,
    images_max: u32,
}

impl Autosave {
    pub fn new(root: impl Into<PathBuf>, images_max: u32) -> Self {
        Self {
            root: root.into(),
            images_max,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("autosave")
    }

    /// Shift `NN-` generations of `kind` up by one, deleting the overflow.
    pub fn rotate(&self, kind: AutosaveKind) -> Result<()> {
        let dir = self.history_dir();
        if !dir.exists() {
            return Ok(());
        }
        let entries = fs::read_dir(&dir)
            .map_err(|e| PaintError::io(format!("Failed to list {}", dir.display()), e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));

        for name in &names {
            let Some((generation, rest)) = parse_autosave_name(name, kind) else {
                continue;
            };
            let path = dir.join(name);
            if generation >= self.images_max {
                debug!("Dropping autosave {}", path.display());
                delete_image(&path)?;
            } else {
                rename_image(&path, &dir.join(format!("{:02}-{}", generation + 1, rest)))?;
            }
        }
        Ok(())
    }

    fn archive(&self, current: &Path) -> Result<()> {
        if self.images_max == 0 || !current.exists() {
            return Ok(());
        }
        let Some(name) = current.file_name() else {
            return Ok(());
        };
        let dest = self
            .history_dir()
            .join(format!("01-{}", name.to_string_lossy()));
        rename_image(current, &dest)
    }

    /// Store a single render as the current `image.png`.
    pub fn save_single(&self, bytes: &[u8], sketch: &RgbaImage) -> Result<PathBuf> {
        if self.images_max > 0 {
            fs::create_dir_all(self.history_dir()).map_err(|e| {
                PaintError::io(format!("Failed to create {}", self.history_dir().display()), e)
            })?;
        }
        self.rotate(AutosaveKind::Single)?;
        let path = self.root.join("image.png");
        self.archive(&path)?;
        save_render(&path, bytes, sketch)?;
        info!("Autosaved {}", path.display());
        Ok(path)
    }

    /// Store a batch as the current `batch-NN.png` files.
    pub fn save_batch(&self, images: &[Vec<u8>], sketch: &RgbaImage) -> Result<Vec<PathBuf>> {
        if self.images_max > 0 {
            fs::create_dir_all(self.history_dir()).map_err(|e| {
                PaintError::io(format!("Failed to create {}", self.history_dir().display()), e)
            })?;
        }
        self.rotate(AutosaveKind::Batch)?;

        if self.root.exists() {
            let entries = fs::read_dir(&self.root)
                .map_err(|e| PaintError::io(format!("Failed to list {}", self.root.display()), e))?;
            let previous: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.is_file())
                .filter(|p| {
                    p.file_name()
                        .map(|n| is_batch_name(&n.to_string_lossy()))
                        .unwrap_or(false)
                })
                .collect();
            for path in previous {
                if self.images_max > 0 {
                    self.archive(&path)?;
                } else {
                    delete_image(&path)?;
                }
            }
        }

        let mut paths = Vec::with_capacity(images.len());
        for (i, bytes) in images.iter().enumerate() {
            let path = self.root.join(format!("batch-{:02}.png", i + 1));
            save_render(&path, bytes, sketch)?;
            paths.push(path);
        }
        info!("Autosaved {} batch images", paths.len());
        Ok(paths)
    }
}
