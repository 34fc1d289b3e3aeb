//! Turns engine images into response rasters.

use std::sync::Arc;
use stitchd_core::{Error, Image, ImputedRaster, RasterProvider, Request, Result};

/// Pairs each image with the metadata of its request's first source image,
/// resizing the image to that raster's dimensions.
///
/// Metadata is looked up fresh for every item. The lookup and the resize both
/// run on the blocking pool.
///
/// # Errors
///
/// Fails on the first item whose metadata cannot be resolved.
pub async fn assemble(
    raster: &Arc<dyn RasterProvider>,
    requests: &[Request],
    images: Vec<Image>,
) -> Result<Vec<ImputedRaster>> {
    if requests.len() != images.len() {
        return Err(Error::Engine {
            reason: format!(
                "{} image(s) for {} request(s)",
                images.len(),
                requests.len()
            ),
        });
    }

    let mut rasters = Vec::with_capacity(requests.len());
    for (request, image) in requests.iter().zip(images) {
        let path = request
            .primary_source()
            .ok_or_else(|| Error::InvalidRequest {
                reason: format!("request for '{}' has no source images", request.geohash),
            })?
            .to_string();

        rasters.push(fit_to_raster(Arc::clone(raster), path, image).await?);
    }

    Ok(rasters)
}

async fn fit_to_raster(
    raster: Arc<dyn RasterProvider>,
    path: String,
    image: Image,
) -> Result<ImputedRaster> {
    let for_error = path.clone();
    tokio::task::spawn_blocking(move || -> Result<ImputedRaster> {
        let metadata = raster.metadata(&path)?;
        let image = image.resize(metadata.width, metadata.height)?;
        Ok(ImputedRaster { metadata, image })
    })
    .await
    .map_err(|e| Error::Raster {
        path: for_error,
        reason: format!("metadata lookup aborted: {e}"),
    })?
}
