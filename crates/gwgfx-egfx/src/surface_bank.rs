//! GFX surface bank: §4.7 surface operations over BGRA32 pixel buffers.
//!
//! This module owns pixel state directly rather than forwarding decoded
//! bitmaps to a handler trait: each surface is a BGRA32 buffer, the primary
//! buffer is the compositing target for mapped surfaces, and a session-level
//! bitmap cache backs `SurfaceToCache`/`CacheToSurface`.
//!
//! [MS-RDPEGFX 3.3.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpegfx/83cb08ff-c97f-4d08-b834-7aa69cdea6c5

use std::collections::HashMap;
use std::fmt;

use gwgfx_graphics::image_processing::{ImageRegion, ImageRegionMut, PixelFormat as RawFormat};
use ironrdp_pdu::geometry::{InclusiveRectangle, Rectangle as _};

use crate::pdu::Color;

/// Session-wide bitmap cache size, per [MS-RDPEGFX] cache slot addressing.
pub const CACHE_SLOTS: usize = 4096;

/// Cap on tracked per-frame dirty rectangles before collapsing to full-frame.
pub const MAX_DIRTY_RECTS: usize = 512;

#[derive(Debug)]
pub enum SurfaceBankError {
    SurfaceAlreadyExists(u16),
    UnknownSurface(u16),
    CacheSlotOutOfRange(u16),
    EmptyCacheSlot(u16),
    FrameAlreadyInProgress,
    FrameNotInProgress,
    Io(std::io::Error),
}

impl fmt::Display for SurfaceBankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SurfaceAlreadyExists(id) => write!(f, "surface {id} already exists"),
            Self::UnknownSurface(id) => write!(f, "unknown surface {id}"),
            Self::CacheSlotOutOfRange(slot) => write!(f, "cache slot {slot} out of range"),
            Self::EmptyCacheSlot(slot) => write!(f, "cache slot {slot} has no contents"),
            Self::FrameAlreadyInProgress => write!(f, "StartFrame received while a frame is already in progress"),
            Self::FrameNotInProgress => write!(f, "frame-scoped operation received outside StartFrame/EndFrame"),
            Self::Io(e) => write!(f, "pixel copy failed: {e}"),
        }
    }
}

impl core::error::Error for SurfaceBankError {}

impl From<std::io::Error> for SurfaceBankError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A server-created drawing surface: an independent BGRA32 pixel buffer,
/// optionally mapped to an origin on the primary (output) buffer.
pub struct Surface {
    pub width: u16,
    pub height: u16,
    pub buffer: Vec<u8>,
    pub mapped_origin: Option<(u32, u32)>,
}

impl Surface {
    fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            buffer: vec![0u8; usize::from(width) * usize::from(height) * 4],
            mapped_origin: None,
        }
    }

    fn region(&self, rect: &InclusiveRectangle) -> ImageRegion<'_> {
        ImageRegion {
            region: rect.clone(),
            step: u16::from(self.width).saturating_mul(4),
            pixel_format: RawFormat::BgrA32,
            data: &self.buffer,
        }
    }

    fn region_mut(&mut self, rect: &InclusiveRectangle) -> ImageRegionMut<'_> {
        ImageRegionMut {
            region: rect.clone(),
            step: u16::from(self.width).saturating_mul(4),
            pixel_format: RawFormat::BgrA32,
            data: &mut self.buffer,
        }
    }
}

struct CacheEntry {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

/// Per-frame dirty state on the primary buffer: an explicit rect list that
/// collapses to "full frame" once it grows past [`MAX_DIRTY_RECTS`].
#[derive(Debug, Clone)]
pub enum DirtyState {
    Rects(Vec<InclusiveRectangle>),
    FullFrame,
}

impl Default for DirtyState {
    fn default() -> Self {
        Self::Rects(Vec::new())
    }
}

impl DirtyState {
    fn push(&mut self, rect: InclusiveRectangle) {
        match self {
            Self::FullFrame => {}
            Self::Rects(rects) => {
                rects.push(rect);
                if rects.len() > MAX_DIRTY_RECTS {
                    *self = Self::FullFrame;
                }
            }
        }
    }
}

/// Owns all per-session pixel state: surfaces, the primary output buffer,
/// the bitmap cache, and the current frame's dirty-rect list.
pub struct SurfaceBank {
    surfaces: HashMap<u16, Surface>,
    primary: Option<Surface>,
    cache: Vec<Option<CacheEntry>>,
    dirty: DirtyState,
    frame_in_progress: bool,
}

impl Default for SurfaceBank {
    fn default() -> Self {
        Self {
            surfaces: HashMap::new(),
            primary: None,
            cache: (0..CACHE_SLOTS).map(|_| None).collect(),
            dirty: DirtyState::default(),
            frame_in_progress: false,
        }
    }
}

impl SurfaceBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_in_progress
    }

    pub fn surface(&self, id: u16) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    /// `RESETGRAPHICS`: per [MS-RDPEGFX 2.2.2.14], destroys all surfaces and the
    /// bitmap cache, and (re)allocates the primary buffer at the new size.
    pub fn reset_graphics(&mut self, width: u32, height: u32) {
        self.surfaces.clear();
        self.cache.iter_mut().for_each(|slot| *slot = None);
        self.dirty = DirtyState::default();
        self.frame_in_progress = false;

        #[expect(clippy::as_conversions, reason = "width/height bounded by MAX_RESET_GRAPHICS_WIDTH_HEIGHT")]
        let (w, h) = (width as u16, height as u16);
        self.primary = Some(Surface::new(w, h));
    }

    pub fn create_surface(&mut self, id: u16, width: u16, height: u16) -> Result<(), SurfaceBankError> {
        if self.surfaces.contains_key(&id) {
            return Err(SurfaceBankError::SurfaceAlreadyExists(id));
        }
        self.surfaces.insert(id, Surface::new(width, height));
        Ok(())
    }

    pub fn delete_surface(&mut self, id: u16) -> Result<(), SurfaceBankError> {
        self.surfaces
            .remove(&id)
            .map(drop)
            .ok_or(SurfaceBankError::UnknownSurface(id))
    }

    pub fn map_surface_to_output(&mut self, id: u16, output_origin_x: u32, output_origin_y: u32) -> Result<(), SurfaceBankError> {
        let surface = self
            .surfaces
            .get_mut(&id)
            .ok_or(SurfaceBankError::UnknownSurface(id))?;
        surface.mapped_origin = Some((output_origin_x, output_origin_y));
        Ok(())
    }

    fn stamp_to_primary(&mut self, id: u16, rect: &InclusiveRectangle) -> Result<(), SurfaceBankError> {
        let Some(surface) = self.surfaces.get(&id) else {
            return Err(SurfaceBankError::UnknownSurface(id));
        };
        let Some((origin_x, origin_y)) = surface.mapped_origin else {
            return Ok(());
        };
        let Some(primary) = self.primary.as_mut() else {
            return Ok(());
        };

        #[expect(clippy::as_conversions, reason = "surface coordinates fit u16 output space")]
        let primary_rect = InclusiveRectangle {
            left: (u32::from(rect.left) + origin_x) as u16,
            top: (u32::from(rect.top) + origin_y) as u16,
            right: (u32::from(rect.right) + origin_x) as u16,
            bottom: (u32::from(rect.bottom) + origin_y) as u16,
        };

        let surface = self.surfaces.get(&id).expect("checked above");
        let src = surface.region(rect);
        let mut dst = primary.region_mut(&primary_rect);
        src.copy_to(&mut dst)?;

        self.dirty.push(primary_rect);
        Ok(())
    }

    /// `SOLIDFILL`: fills `rects` on the surface with `color`, then stamps the
    /// filled regions onto the primary buffer if the surface is mapped.
    pub fn solid_fill(&mut self, id: u16, rects: &[InclusiveRectangle], color: &Color) -> Result<(), SurfaceBankError> {
        let surface = self
            .surfaces
            .get_mut(&id)
            .ok_or(SurfaceBankError::UnknownSurface(id))?;

        for rect in rects {
            fill_rect(&mut surface.buffer, surface.width, rect, color);
        }
        for rect in rects {
            self.stamp_to_primary(id, rect)?;
        }

        Ok(())
    }

    /// `SURFACETOSURFACE`: copies `src_rect` from `src_id` to each point in
    /// `dst_points` on `dst_id`. Uses an intermediate buffer so in-place
    /// (same-surface, overlapping) copies behave like `memmove`.
    pub fn surface_to_surface(
        &mut self,
        src_id: u16,
        dst_id: u16,
        src_rect: &InclusiveRectangle,
        dst_points: &[(u16, u16)],
    ) -> Result<(), SurfaceBankError> {
        let staged = {
            let src = self.surfaces.get(&src_id).ok_or(SurfaceBankError::UnknownSurface(src_id))?;
            let mut buf = vec![0u8; usize::from(src_rect.width()) * usize::from(src_rect.height()) * 4];
            let staged_rect = InclusiveRectangle {
                left: 0,
                top: 0,
                right: src_rect.width() - 1,
                bottom: src_rect.height() - 1,
            };
            let dst = ImageRegionMut {
                region: staged_rect,
                step: 0,
                pixel_format: RawFormat::BgrA32,
                data: &mut buf,
            };
            let mut dst = dst;
            src.region(src_rect).copy_to(&mut dst)?;
            buf
        };

        if !self.surfaces.contains_key(&dst_id) {
            return Err(SurfaceBankError::UnknownSurface(dst_id));
        }

        for &(x, y) in dst_points {
            let dst_rect = InclusiveRectangle {
                left: x,
                top: y,
                right: x + src_rect.width() - 1,
                bottom: y + src_rect.height() - 1,
            };

            {
                let staged_rect = InclusiveRectangle {
                    left: 0,
                    top: 0,
                    right: src_rect.width() - 1,
                    bottom: src_rect.height() - 1,
                };
                let src_region = ImageRegion {
                    region: staged_rect,
                    step: 0,
                    pixel_format: RawFormat::BgrA32,
                    data: &staged,
                };
                let dst_surface = self.surfaces.get_mut(&dst_id).expect("checked above");
                let mut dst_region = dst_surface.region_mut(&dst_rect);
                src_region.copy_to(&mut dst_region)?;
            }

            self.stamp_to_primary(dst_id, &dst_rect)?;
        }

        Ok(())
    }

    /// `SURFACETOCACHE`: reads `rect` from `surface_id` into cache `slot`,
    /// overwriting any prior contents.
    pub fn surface_to_cache(&mut self, surface_id: u16, slot: u16, rect: &InclusiveRectangle) -> Result<(), SurfaceBankError> {
        let index = usize::from(slot);
        if index >= CACHE_SLOTS {
            return Err(SurfaceBankError::CacheSlotOutOfRange(slot));
        }

        let surface = self
            .surfaces
            .get(&surface_id)
            .ok_or(SurfaceBankError::UnknownSurface(surface_id))?;

        let width = rect.width();
        let height = rect.height();
        let mut data = vec![0u8; usize::from(width) * usize::from(height) * 4];
        let staged_rect = InclusiveRectangle {
            left: 0,
            top: 0,
            right: width - 1,
            bottom: height - 1,
        };
        let mut dst = ImageRegionMut {
            region: staged_rect,
            step: 0,
            pixel_format: RawFormat::BgrA32,
            data: &mut data,
        };
        surface.region(rect).copy_to(&mut dst)?;

        self.cache[index] = Some(CacheEntry { width, height, data });
        Ok(())
    }

    /// `CACHETOSURFACE`: writes cache `slot` to each point in `dst_points` on
    /// `dst_id`, stamping the primary buffer too when mapped. Both targets
    /// are written unconditionally — writing only the primary is the
    /// documented "stale cache" bug this must avoid.
    pub fn cache_to_surface(&mut self, slot: u16, dst_id: u16, dst_points: &[(u16, u16)]) -> Result<(), SurfaceBankError> {
        let index = usize::from(slot);
        if index >= CACHE_SLOTS {
            return Err(SurfaceBankError::CacheSlotOutOfRange(slot));
        }
        let (width, height) = {
            let entry = self.cache[index].as_ref().ok_or(SurfaceBankError::EmptyCacheSlot(slot))?;
            (entry.width, entry.height)
        };

        if !self.surfaces.contains_key(&dst_id) {
            return Err(SurfaceBankError::UnknownSurface(dst_id));
        }

        for &(x, y) in dst_points {
            let dst_rect = InclusiveRectangle {
                left: x,
                top: y,
                right: x + width - 1,
                bottom: y + height - 1,
            };

            {
                let entry = self.cache[index].as_ref().expect("checked above");
                let staged_rect = InclusiveRectangle {
                    left: 0,
                    top: 0,
                    right: width - 1,
                    bottom: height - 1,
                };
                let src_region = ImageRegion {
                    region: staged_rect,
                    step: 0,
                    pixel_format: RawFormat::BgrA32,
                    data: &entry.data,
                };
                let dst_surface = self.surfaces.get_mut(&dst_id).expect("checked above");
                let mut dst_region = dst_surface.region_mut(&dst_rect);
                src_region.copy_to(&mut dst_region)?;
            }

            self.stamp_to_primary(dst_id, &dst_rect)?;
        }

        Ok(())
    }

    /// `WIRETOSURFACE`: applies already-decoded BGRA32 pixels for `rect` to
    /// `surface_id`, then stamps the primary buffer if mapped. Codec decode
    /// (uncompressed, RemoteFX Progressive tiles, ...) happens upstream; this
    /// only owns the "land the pixels" half of the contract.
    pub fn wire_to_surface(&mut self, surface_id: u16, rect: &InclusiveRectangle, pixels: &[u8]) -> Result<(), SurfaceBankError> {
        {
            let surface = self
                .surfaces
                .get_mut(&surface_id)
                .ok_or(SurfaceBankError::UnknownSurface(surface_id))?;
            let src_region = ImageRegion {
                region: InclusiveRectangle {
                    left: 0,
                    top: 0,
                    right: rect.width() - 1,
                    bottom: rect.height() - 1,
                },
                step: 0,
                pixel_format: RawFormat::BgrA32,
                data: pixels,
            };
            let mut dst_region = surface.region_mut(rect);
            src_region.copy_to(&mut dst_region)?;
        }

        self.stamp_to_primary(surface_id, rect)
    }

    pub fn start_frame(&mut self) -> Result<(), SurfaceBankError> {
        if self.frame_in_progress {
            return Err(SurfaceBankError::FrameAlreadyInProgress);
        }
        self.frame_in_progress = true;
        Ok(())
    }

    /// Ends the current frame, handing back the dirty state accumulated since
    /// `start_frame` and resetting it for the next frame. This is the only
    /// point at which dirty rectangles may be reported downstream.
    pub fn end_frame(&mut self) -> Result<DirtyState, SurfaceBankError> {
        if !self.frame_in_progress {
            return Err(SurfaceBankError::FrameNotInProgress);
        }
        self.frame_in_progress = false;
        Ok(std::mem::take(&mut self.dirty))
    }
}

fn fill_rect(buffer: &mut [u8], surface_width: u16, rect: &InclusiveRectangle, color: &Color) {
    let stride = usize::from(surface_width) * 4;
    for y in usize::from(rect.top)..=usize::from(rect.bottom) {
        let row_start = y * stride + usize::from(rect.left) * 4;
        for x in 0..usize::from(rect.width()) {
            let px = row_start + x * 4;
            if px + 4 <= buffer.len() {
                buffer[px] = color.b;
                buffer[px + 1] = color.g;
                buffer[px + 2] = color.r;
                buffer[px + 3] = color.xa;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(left: u16, top: u16, right: u16, bottom: u16) -> InclusiveRectangle {
        InclusiveRectangle { left, top, right, bottom }
    }

    #[test]
    fn create_surface_rejects_duplicate_id() {
        let mut bank = SurfaceBank::new();
        bank.create_surface(1, 4, 4).unwrap();
        assert!(matches!(
            bank.create_surface(1, 4, 4),
            Err(SurfaceBankError::SurfaceAlreadyExists(1))
        ));
    }

    #[test]
    fn solid_fill_stamps_mapped_primary() {
        let mut bank = SurfaceBank::new();
        bank.reset_graphics(8, 8);
        bank.create_surface(1, 4, 4).unwrap();
        bank.map_surface_to_output(1, 2, 2).unwrap();

        let color = Color { b: 10, g: 20, r: 30, xa: 255 };
        bank.solid_fill(1, &[rect(0, 0, 3, 3)], &color).unwrap();

        let surface = bank.surface(1).unwrap();
        assert_eq!(&surface.buffer[0..4], &[10, 20, 30, 255]);

        let primary = bank.primary.as_ref().unwrap();
        // primary origin (2,2) maps to surface (0,0): stride is 8*4=32
        let offset = 2 * 32 + 2 * 4;
        assert_eq!(&primary.buffer[offset..offset + 4], &[10, 20, 30, 255]);
    }

    #[test]
    fn cache_to_surface_writes_both_targets() {
        let mut bank = SurfaceBank::new();
        bank.reset_graphics(8, 8);
        bank.create_surface(1, 4, 4).unwrap();
        bank.map_surface_to_output(1, 0, 0).unwrap();

        let color = Color { b: 1, g: 2, r: 3, xa: 4 };
        bank.solid_fill(1, &[rect(0, 0, 3, 3)], &color).unwrap();
        bank.surface_to_cache(1, 0, &rect(0, 0, 1, 1)).unwrap();

        bank.create_surface(2, 4, 4).unwrap();
        bank.map_surface_to_output(2, 0, 0).unwrap();
        bank.cache_to_surface(0, 2, &[(0, 0)]).unwrap();

        let surface2 = bank.surface(2).unwrap();
        assert_eq!(&surface2.buffer[0..4], &[1, 2, 3, 4]);

        let primary = bank.primary.as_ref().unwrap();
        assert_eq!(&primary.buffer[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn cache_to_surface_requires_known_slot() {
        let mut bank = SurfaceBank::new();
        bank.create_surface(1, 4, 4).unwrap();
        assert!(matches!(
            bank.cache_to_surface(0, 1, &[(0, 0)]),
            Err(SurfaceBankError::EmptyCacheSlot(0))
        ));
    }

    #[test]
    fn surface_to_surface_handles_overlap_like_memmove() {
        let mut bank = SurfaceBank::new();
        bank.create_surface(1, 4, 1).unwrap();
        {
            let surface = bank.surfaces.get_mut(&1).unwrap();
            for (i, px) in surface.buffer.chunks_exact_mut(4).enumerate() {
                #[expect(clippy::cast_possible_truncation, reason = "test data, bounded by 4 pixels")]
                let v = i as u8;
                px.copy_from_slice(&[v, v, v, v]);
            }
        }

        // shift [0..3] right by one pixel onto [1..4), overlapping in-place
        bank.surface_to_surface(1, 1, &rect(0, 0, 2, 0), &[(1, 0)]).unwrap();

        let surface = bank.surface(1).unwrap();
        assert_eq!(&surface.buffer[4..8], &[0, 0, 0, 0]);
        assert_eq!(&surface.buffer[8..12], &[1, 1, 1, 1]);
        assert_eq!(&surface.buffer[12..16], &[2, 2, 2, 2]);
    }

    #[test]
    fn dirty_state_collapses_past_cap() {
        let mut state = DirtyState::default();
        for _ in 0..=MAX_DIRTY_RECTS {
            state.push(rect(0, 0, 1, 1));
        }
        assert!(matches!(state, DirtyState::FullFrame));
    }

    #[test]
    fn start_frame_rejects_reentry() {
        let mut bank = SurfaceBank::new();
        bank.start_frame().unwrap();
        assert!(matches!(bank.start_frame(), Err(SurfaceBankError::FrameAlreadyInProgress)));
        bank.end_frame().unwrap();
    }

    #[test]
    fn end_frame_rejects_without_start() {
        let mut bank = SurfaceBank::new();
        assert!(matches!(bank.end_frame(), Err(SurfaceBankError::FrameNotInProgress)));
    }

    #[test]
    fn wire_to_surface_stamps_primary_when_mapped() {
        let mut bank = SurfaceBank::new();
        bank.reset_graphics(4, 4);
        bank.create_surface(1, 2, 2).unwrap();
        bank.map_surface_to_output(1, 1, 1).unwrap();

        let pixels = vec![9u8; 2 * 2 * 4];
        bank.wire_to_surface(1, &rect(0, 0, 1, 1), &pixels).unwrap();

        let primary = bank.primary.as_ref().unwrap();
        let stride = 4 * 4;
        let offset = 1 * stride + 1 * 4;
        assert_eq!(&primary.buffer[offset..offset + 4], &[9, 9, 9, 9]);
    }
}
