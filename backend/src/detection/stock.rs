//! Locating the trained cascades that ship with OpenCV.

use std::env;
use std::path::PathBuf;

use super::HaarCascade;
use crate::error::DetectionError;

pub const FRONTAL_FACE: &str = "haarcascade_frontalface_default.xml";
pub const EYE: &str = "haarcascade_eye.xml";

/// Directory searched before the working directory and the install locations.
pub const CASCADE_DIR_ENV: &str = "HAARCASCADE_DIR";

const INSTALL_DIRS: [&str; 4] = [
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv/haarcascades",
];

pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = env::var_os(CASCADE_DIR_ENV) {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(PathBuf::from("."));
    dirs.extend(INSTALL_DIRS.iter().map(PathBuf::from));
    dirs
}

/// First `dirs` entry containing `file_name`.
pub fn locate(file_name: &str, dirs: &[PathBuf]) -> Result<PathBuf, DetectionError> {
    dirs.iter()
        .map(|dir| dir.join(file_name))
        .find(|path| path.is_file())
        .ok_or_else(|| DetectionError::CascadeNotFound {
            file: file_name.to_string(),
            searched: dirs.to_vec(),
        })
}

pub fn load(file_name: &str) -> Result<HaarCascade, DetectionError> {
    let path = locate(file_name, &search_dirs())?;
    log::info!("Loading {} from {}", file_name, path.display());
    HaarCascade::load(path)
}
