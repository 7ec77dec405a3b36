use crate::error::{OqcError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 認識対象の写真1枚
#[derive(Debug, Clone, PartialEq)]
pub struct Photograph {
    pub path: PathBuf,
    pub file_name: String,
}

impl Photograph {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, file_name }
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

pub fn scan_folder(folder: &Path) -> Result<Vec<Photograph>> {
    if !folder.is_dir() {
        return Err(OqcError::FolderNotFound(folder.display().to_string()));
    }

    let mut photos: Vec<Photograph> = WalkDir::new(folder)
        .max_depth(1)  // 直下のみ（再帰しない）
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| is_image_extension(&ext.to_string_lossy()))
                .unwrap_or(false)
        })
        .map(|e| Photograph::new(e.path()))
        .collect();

    // ファイル名でソート
    photos.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    Ok(photos)
}

fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext)
}
