use std::{fmt, io};

#[derive(Debug)]
pub enum SplatError {
    ParsePly(String),
    EmptyPointCloud,
    NoRenderablePoints,
    IoError(io::Error),
}

impl fmt::Display for SplatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplatError::ParsePly(e) => {
                write!(f, "Failed to parse the PLY asset: {}", e)
            }
            SplatError::EmptyPointCloud => {
                write!(f, "The point cloud declares no vertices.")
            }
            SplatError::NoRenderablePoints => {
                write!(f, "No renderable points survived decoding.")
            }
            SplatError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for SplatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplatError::IoError(e) => Some(e),
            _ => None,
        }
    }
}
