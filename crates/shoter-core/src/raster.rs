//! Owned RGB rasters with explicit lineage.
//!
//! A [`Raster`] owns exactly one pixel buffer. Each pipeline step consumes the
//! raster it was given and hands back exactly one raster: either the same one
//! (identity, buffer reused) or a new one, in which case the input is released
//! before the step returns. Every raster is registered with a [`RasterLedger`]
//! so callers can check that a pipeline run left nothing alive.

use image::RgbImage;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts rasters allocated and still alive.
#[derive(Debug, Default)]
pub struct RasterLedger {
    live: AtomicUsize,
    allocated: AtomicUsize,
}

impl RasterLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rasters currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Rasters ever allocated through this ledger.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.allocated.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An RGB8 image buffer owned by one pipeline invocation.
pub struct Raster {
    image: RgbImage,
    ledger: Arc<RasterLedger>,
}

impl Raster {
    pub fn new(image: RgbImage, ledger: &Arc<RasterLedger>) -> Self {
        ledger.acquire();
        Self {
            image,
            ledger: Arc::clone(ledger),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Consume this raster and replace it with the output of `f`.
    ///
    /// `None` from `f` is the identity: `self` comes back untouched. Otherwise the
    /// input buffer is released before the new raster is returned.
    pub fn transform<F>(self, f: F) -> Raster
    where
        F: FnOnce(&RgbImage) -> Option<RgbImage>,
    {
        match f(&self.image) {
            None => self,
            Some(next) => {
                let out = Raster::new(next, &self.ledger);
                drop(self);
                out
            }
        }
    }

    /// Produce a child raster (e.g. a crop) while keeping this one alive.
    pub fn derive<F>(&self, f: F) -> Option<Raster>
    where
        F: FnOnce(&RgbImage) -> Option<RgbImage>,
    {
        f(&self.image).map(|child| Raster::new(child, &self.ledger))
    }
}

impl Deref for Raster {
    type Target = RgbImage;

    fn deref(&self) -> &RgbImage {
        &self.image
    }
}

impl Drop for Raster {
    fn drop(&mut self) {
        self.ledger.release();
    }
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}
