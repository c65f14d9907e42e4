//! Client-side compositor: routes tagged data messages (§6) onto a drawable
//! surface, in the order a browser frontend would actually receive and apply
//! them (§4.9).
//!
//! Grounded on `gwgfx-egfx`'s `GraphicsPipelineHandler` callback-dispatch
//! shape: a trait of per-kind callbacks invoked from one central dispatch
//! function, generalized here from "decoded GFX operation" to "decoded wire
//! tag".

use std::collections::{HashMap, VecDeque};

use gwgfx_protocol::DataMessage;
use thiserror::Error;

/// Maximum number of pending H.264 destination rects tracked per surface
/// before the oldest is evicted, mirroring `gwgfx-h264::MAX_QUEUED_FRAMES`
/// so the compositor's bookkeeping can never outgrow the producer's queue.
const MAX_PENDING_H264_REGIONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        let self_right = self.x + i32::try_from(self.w).unwrap_or(i32::MAX);
        let self_bottom = self.y + i32::try_from(self.h).unwrap_or(i32::MAX);
        let other_right = other.x + i32::try_from(other.w).unwrap_or(i32::MAX);
        let other_bottom = other.y + i32::try_from(other.h).unwrap_or(i32::MAX);

        self.x < other_right && other.x < self_right && self.y < other_bottom && other.y < self_bottom
    }
}

/// A surface the compositor draws decoded content onto. Implemented by the
/// browser-side canvas/bitmap owner; this crate only decides what to draw
/// and in what order.
pub trait Drawable {
    /// Draws decoded BGRA32 pixels at `rect` on `surface_id`.
    fn draw_pixels(&mut self, surface_id: u16, rect: Rect, bgra: &[u8]);

    /// Draws a WebP-encoded tile at `rect`, skipping any portion masked by
    /// an active H.264 region (§4.9: "H.264 active regions mask WebP tiles
    /// so a late-arriving still frame never overwrites live video").
    fn draw_webp(&mut self, surface_id: u16, rect: Rect, webp: &[u8]);

    /// Draws a JPEG-encoded tile at `rect`.
    fn draw_jpeg(&mut self, surface_id: u16, rect: Rect, jpeg: &[u8]);

    /// Creates a backing surface of the given dimensions.
    fn create_surface(&mut self, surface_id: u16, width: u32, height: u32);

    /// Deletes a backing surface.
    fn delete_surface(&mut self, surface_id: u16);

    /// Called when a frame boundary (`STFR`/`ENFR`) is crossed.
    fn on_frame_boundary(&mut self, frame_id: u32, start: bool);

    /// Called when the drawable's owner should be notified of a resize.
    fn on_resize(&mut self, width: u32, height: u32) {
        let _ = (width, height);
    }

    /// Submits an H.264 NAL unit for decode. The compositor has already
    /// recorded `rect` as an active region before calling this, so a
    /// caller that decodes asynchronously can look the region back up
    /// from `pop_h264_region` once the decoded frame is ready.
    fn submit_h264(&mut self, surface_id: u16, rect: Rect, nal: &[u8]);
}

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("wire decode error: {0}")]
    Decode(#[from] gwgfx_protocol::DataMessageError),
    #[error("unknown surface {0}")]
    UnknownSurface(u16),
}

/// One H.264 decode job's destination, recorded at submission time and
/// retrieved when the decode completes (§4.9: "push before submit, pop on
/// callback" so the consumer never has to thread geometry through the
/// decoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRegion {
    surface_id: u16,
    rect: Rect,
}

/// Routes tagged wire messages onto a [`Drawable`], enforcing §4.9's
/// H.264-masks-WebP ordering rule and tracking in-flight H.264 regions per
/// surface.
pub struct Compositor {
    active_h264_regions: HashMap<u16, Vec<Rect>>,
    pending_h264: VecDeque<PendingRegion>,
}

impl Compositor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active_h264_regions: HashMap::new(),
            pending_h264: VecDeque::new(),
        }
    }

    /// Dispatches one decoded wire message onto `drawable`.
    pub fn dispatch(&mut self, drawable: &mut dyn Drawable, data: &[u8]) -> Result<(), CompositorError> {
        let message = DataMessage::decode(data)?;
        match message {
            DataMessage::Surf { surface_id, width, height } => {
                drawable.create_surface(surface_id, width, height);
            }
            DataMessage::Dels { surface_id } => {
                self.active_h264_regions.remove(&surface_id);
                drawable.delete_surface(surface_id);
            }
            DataMessage::Stfr { frame_id } => drawable.on_frame_boundary(frame_id, true),
            DataMessage::Enfr { frame_id } => drawable.on_frame_boundary(frame_id, false),
            DataMessage::H264 {
                surface_id,
                x,
                y,
                w,
                h,
                nal,
                ..
            } => {
                let rect = Rect { x: i32::from(x), y: i32::from(y), w: u32::from(w), h: u32::from(h) };
                self.push_active_region(surface_id, rect);
                drawable.submit_h264(surface_id, rect, nal);
            }
            DataMessage::WebP(webp) => {
                // Geometry for WebP/JPEG/TILE tiles is carried by the
                // preceding `TILE`/`DELT` message in this gateway's framing;
                // masking only needs the surface-wide active-region set, so
                // the caller-supplied rect comes from `TILE`'s own dispatch
                // below and WebP here is only reachable when wrapped by a
                // `TILE` payload. Standalone WebP with no known rect draws
                // full-surface at (0, 0) sized to the payload's own header,
                // which the drawable implementation is responsible for
                // parsing (this crate treats WebP/JPEG bitstreams as
                // opaque).
                drawable.draw_webp(0, Rect { x: 0, y: 0, w: 0, h: 0 }, webp);
            }
            DataMessage::Jpeg(jpeg) => {
                drawable.draw_jpeg(0, Rect { x: 0, y: 0, w: 0, h: 0 }, jpeg);
            }
            DataMessage::Tile {
                surface_id,
                left,
                top,
                right,
                bottom,
                pixels,
            } => {
                let rect = rect_from_bounds(left, top, right, bottom);
                if self.is_masked(surface_id, rect) {
                    tracing::debug!(surface_id, ?rect, "tile masked by active H.264 region, dropping");
                } else {
                    drawable.draw_pixels(surface_id, rect, pixels);
                }
            }
            DataMessage::Sfil {
                surface_id,
                left,
                top,
                right,
                bottom,
                b,
                g,
                r,
                a,
            } => {
                let rect = rect_from_bounds(left, top, right, bottom);
                let pixel = [b, g, r, a];
                let mut buf = Vec::with_capacity(usize::try_from(rect.w.saturating_mul(rect.h)).unwrap_or(0) * 4);
                for _ in 0..rect.w.saturating_mul(rect.h) {
                    buf.extend_from_slice(&pixel);
                }
                drawable.draw_pixels(surface_id, rect, &buf);
            }
            DataMessage::S2sf { .. } | DataMessage::C2sf { .. } | DataMessage::Delt { .. } | DataMessage::Prog(_) => {
                // These carry cache/delta bookkeeping the drawable owner
                // applies directly against its own backing store; this
                // router only masks and sequences H.264 vs. still-image
                // tiles, so it has nothing to add for these tags.
            }
            DataMessage::Opus { .. } | DataMessage::Audi { .. } => {
                // Audio has no drawable surface; routed elsewhere by the
                // gateway layer, not the compositor.
            }
        }
        Ok(())
    }

    /// Records `rect` as an active H.264 region on `surface_id` before the
    /// decode is submitted, per §4.9's push-before-submit ordering.
    fn push_active_region(&mut self, surface_id: u16, rect: Rect) {
        let regions = self.active_h264_regions.entry(surface_id).or_default();
        regions.push(rect);

        self.pending_h264.push_back(PendingRegion { surface_id, rect });
        if self.pending_h264.len() > MAX_PENDING_H264_REGIONS {
            if let Some(evicted) = self.pending_h264.pop_front() {
                if let Some(regions) = self.active_h264_regions.get_mut(&evicted.surface_id) {
                    regions.retain(|r| *r != evicted.rect);
                }
            }
        }
    }

    /// Pops the oldest pending H.264 region, called from the decode
    /// callback once a frame finishes decoding (§4.9's pop-on-callback).
    pub fn pop_h264_region(&mut self) -> Option<(u16, Rect)> {
        let pending = self.pending_h264.pop_front()?;
        if let Some(regions) = self.active_h264_regions.get_mut(&pending.surface_id) {
            regions.retain(|r| *r != pending.rect);
        }
        Some((pending.surface_id, pending.rect))
    }

    fn is_masked(&self, surface_id: u16, rect: Rect) -> bool {
        self.active_h264_regions
            .get(&surface_id)
            .is_some_and(|regions| regions.iter().any(|active| active.intersects(&rect)))
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

fn rect_from_bounds(left: u16, top: u16, right: u16, bottom: u16) -> Rect {
    Rect {
        x: i32::from(left),
        y: i32::from(top),
        w: u32::from(right.saturating_sub(left)).saturating_add(1),
        h: u32::from(bottom.saturating_sub(top)).saturating_add(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeDrawable {
        created: Vec<(u16, u32, u32)>,
        pixel_draws: Vec<(u16, Rect)>,
        webp_draws: Vec<Rect>,
        h264_submits: Vec<(u16, Rect)>,
        frame_boundaries: Vec<(u32, bool)>,
    }

    impl Drawable for FakeDrawable {
        fn draw_pixels(&mut self, surface_id: u16, rect: Rect, _bgra: &[u8]) {
            self.pixel_draws.push((surface_id, rect));
        }

        fn draw_webp(&mut self, _surface_id: u16, rect: Rect, _webp: &[u8]) {
            self.webp_draws.push(rect);
        }

        fn draw_jpeg(&mut self, _surface_id: u16, _rect: Rect, _jpeg: &[u8]) {}

        fn create_surface(&mut self, surface_id: u16, width: u32, height: u32) {
            self.created.push((surface_id, width, height));
        }

        fn delete_surface(&mut self, _surface_id: u16) {}

        fn on_frame_boundary(&mut self, frame_id: u32, start: bool) {
            self.frame_boundaries.push((frame_id, start));
        }

        fn submit_h264(&mut self, surface_id: u16, rect: Rect, _nal: &[u8]) {
            self.h264_submits.push((surface_id, rect));
        }
    }

    #[test]
    fn surf_dispatches_to_create_surface() {
        let mut compositor = Compositor::new();
        let mut drawable = FakeDrawable::default();
        let msg = DataMessage::Surf { surface_id: 1, width: 800, height: 600 };
        compositor.dispatch(&mut drawable, &msg.encode()).unwrap();
        assert_eq!(drawable.created, vec![(1, 800, 600)]);
    }

    #[test]
    fn h264_submission_masks_overlapping_tile() {
        let mut compositor = Compositor::new();
        let mut drawable = FakeDrawable::default();

        let h264 = DataMessage::H264 {
            frame_id: 1,
            surface_id: 1,
            codec: 0,
            frame_type: 1,
            x: 0,
            y: 0,
            w: 100,
            h: 100,
            nal: &[1, 2, 3],
            chroma: &[],
        };
        compositor.dispatch(&mut drawable, &h264.encode()).unwrap();
        assert_eq!(drawable.h264_submits, vec![(1, Rect { x: 0, y: 0, w: 100, h: 100 })]);

        let tile = DataMessage::Tile {
            surface_id: 1,
            left: 10,
            top: 10,
            right: 20,
            bottom: 20,
            pixels: &[0u8; 4],
        };
        compositor.dispatch(&mut drawable, &tile.encode()).unwrap();
        assert!(drawable.pixel_draws.is_empty(), "tile overlapping the active H.264 region should be masked");
    }

    #[test]
    fn non_overlapping_tile_is_not_masked() {
        let mut compositor = Compositor::new();
        let mut drawable = FakeDrawable::default();

        let h264 = DataMessage::H264 {
            frame_id: 1,
            surface_id: 1,
            codec: 0,
            frame_type: 1,
            x: 0,
            y: 0,
            w: 50,
            h: 50,
            nal: &[1],
            chroma: &[],
        };
        compositor.dispatch(&mut drawable, &h264.encode()).unwrap();

        let tile = DataMessage::Tile {
            surface_id: 1,
            left: 200,
            top: 200,
            right: 210,
            bottom: 210,
            pixels: &[0u8; 4],
        };
        compositor.dispatch(&mut drawable, &tile.encode()).unwrap();
        assert_eq!(drawable.pixel_draws.len(), 1);
    }

    #[test]
    fn popping_h264_region_clears_the_mask() {
        let mut compositor = Compositor::new();
        let mut drawable = FakeDrawable::default();

        let h264 = DataMessage::H264 {
            frame_id: 1,
            surface_id: 1,
            codec: 0,
            frame_type: 1,
            x: 0,
            y: 0,
            w: 50,
            h: 50,
            nal: &[1],
            chroma: &[],
        };
        compositor.dispatch(&mut drawable, &h264.encode()).unwrap();
        assert_eq!(compositor.pop_h264_region(), Some((1, Rect { x: 0, y: 0, w: 50, h: 50 })));

        let tile = DataMessage::Tile {
            surface_id: 1,
            left: 0,
            top: 0,
            right: 10,
            bottom: 10,
            pixels: &[0u8; 4],
        };
        compositor.dispatch(&mut drawable, &tile.encode()).unwrap();
        assert_eq!(drawable.pixel_draws.len(), 1, "mask should be cleared after popping the region");
    }

    #[test]
    fn frame_boundaries_are_forwarded() {
        let mut compositor = Compositor::new();
        let mut drawable = FakeDrawable::default();

        compositor.dispatch(&mut drawable, &DataMessage::Stfr { frame_id: 5 }.encode()).unwrap();
        compositor.dispatch(&mut drawable, &DataMessage::Enfr { frame_id: 5 }.encode()).unwrap();
        assert_eq!(drawable.frame_boundaries, vec![(5, true), (5, false)]);
    }

    #[test]
    fn solid_fill_draws_correct_pixel_count() {
        let mut compositor = Compositor::new();
        let mut drawable = FakeDrawable::default();

        let msg = DataMessage::Sfil { surface_id: 1, left: 0, top: 0, right: 1, bottom: 1, b: 1, g: 2, r: 3, a: 4 };
        compositor.dispatch(&mut drawable, &msg.encode()).unwrap();
        assert_eq!(drawable.pixel_draws, vec![(1, Rect { x: 0, y: 0, w: 2, h: 2 })]);
    }
}
