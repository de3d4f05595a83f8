/*!
Pixel count extraction from camera configuration (CCF) files.

Only the `Crop Width` entry is consulted; everything else in the file belongs
to the grab console.
*/

use crate::error::CcfError;
use crate::protocol::CROP_WIDTH_KEY;
use std::path::Path;
use tracing::{debug, info};

/// Read the sensor pixel width from a CCF file
pub fn read_pixel_count<P: AsRef<Path>>(path: P) -> Result<usize, CcfError> {
    let path = path.as_ref();
    debug!("Reading CCF file: {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|source| CcfError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let pixels = parse_pixel_count(&content)?;
    info!("CCF {} reports {} pixels", path.display(), pixels);
    Ok(pixels)
}

/// Scan `key=value` lines for the crop width. The last matching line wins.
pub fn parse_pixel_count(content: &str) -> Result<usize, CcfError> {
    let value = content
        .lines()
        .filter(|line| line.contains(CROP_WIDTH_KEY))
        .filter_map(|line| line.rsplit('=').next())
        .last()
        .ok_or(CcfError::MissingKey { key: CROP_WIDTH_KEY })?
        .trim();

    match value.parse::<usize>() {
        Ok(pixels) if pixels > 0 => Ok(pixels),
        _ => Err(CcfError::Malformed {
            value: value.to_string(),
        }),
    }
}
