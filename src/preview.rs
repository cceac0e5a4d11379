//! Quantized preview raster assembly.

use crate::codec::ImageCodec;
use crate::error::{BlueprintError, Result};

/// Expand (labels, per-label RGB) into a W*H*3 raster and PNG-encode it.
pub fn encode_preview(
    codec: &dyn ImageCodec,
    labels: &[u32],
    label_colors: &[[u8; 3]],
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    let mut rgb = Vec::with_capacity(labels.len() * 3);
    for &label in labels {
        let color = label_colors.get(label as usize).ok_or_else(|| {
            BlueprintError::internal(
                "preview",
                format!("label {} outside palette of {}", label, label_colors.len()),
            )
        })?;
        rgb.extend_from_slice(color);
    }
    codec.encode_png(&rgb, width, height)
}
