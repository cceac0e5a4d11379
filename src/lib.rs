//! Image-to-blueprint engine.
//!
//! Transforms a raster image into a small perceptual color palette, a
//! quantized label map, optional connected regions with contours, and an
//! optional mapping from each palette color to the nearest thread in the
//! DMC reference catalog. Heavy per-pixel work is offloaded to rayon;
//! everything observable is deterministic for a fixed (image, parameters,
//! seed) triple.
//!
//! Typical flow: register an image with the [`store::ImageStore`] (or via
//! [`blueprint::BlueprintService::register_image`]), then call
//! [`blueprint::BlueprintService::generate`] with the returned id.

pub mod blueprint;
pub mod cancel;
pub mod catalog;
pub mod codec;
pub mod color;
pub mod error;
pub mod preview;
pub mod quantize;
pub mod region;
pub mod rng;
pub mod store;

pub use blueprint::{
    Blueprint, BlueprintParams, BlueprintRegion, BlueprintService, PaletteEntry, RegionBounds,
    ServiceConfig, ServiceStats, ThreadMatchResult,
};
pub use cancel::CancellationToken;
pub use catalog::{DeltaEMetric, ThreadCatalog, ThreadEntry, ThreadMatch};
pub use codec::{DecodedImage, ImageCodec, StandardCodec};
pub use error::{BlueprintError, Result};
pub use store::{ImageStore, StoreConfig};
