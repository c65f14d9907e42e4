//! H.264 frame queue and AVC444 -> AVC420 transcode (§4.8).
//!
//! A `WireToSurface` carrying an AVC-coded payload does not decode inline:
//! it extracts NAL units into a [`Frame`] and pushes it onto a [`FrameQueue`].
//! The transport drains the queue in `frame_id` order. When the downstream
//! decoder declares 4:4:4 unsupported, [`transcode_avc444_to_avc420`] combines
//! the luma and chroma streams into a single 4:2:0-tagged payload.

use ironrdp_pdu::geometry::InclusiveRectangle;
use thiserror::Error;

/// Queue capacity: at most this many frames pending at once.
pub const MAX_QUEUED_FRAMES: usize = 16;

/// Per-frame payload size cap (luma + chroma combined).
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// Codec tag carried alongside a queued frame, rewritten by transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCodec {
    Avc420,
    Avc444,
    Avc444v2,
}

/// A queued H.264 frame: NAL data plus the destination rectangle it paints.
///
/// `chroma` is empty for AVC420 frames (the 4:2:0 stream is self-contained);
/// it holds the second `Avc420BitmapStream`'s data for AVC444/AVC444v2.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u32,
    pub surface_id: u16,
    pub dest_rect: InclusiveRectangle,
    pub codec: FrameCodec,
    pub luma: Vec<u8>,
    pub chroma: Vec<u8>,
}

impl Frame {
    fn byte_len(&self) -> usize {
        self.luma.len() + self.chroma.len()
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("frame {frame_id} is {size} bytes, exceeds the {MAX_FRAME_BYTES}-byte cap")]
    FrameTooLarge { frame_id: u32, size: usize },
}

/// FIFO ring of pending H.264 frames, bounded to [`MAX_QUEUED_FRAMES`].
///
/// Per §4.8/§7, resource exhaustion prefers liveness over completeness: when
/// full, the oldest pending frame is dropped to make room for the new one.
pub struct FrameQueue {
    frames: std::collections::VecDeque<Frame>,
    dropped_for_pressure: u64,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            frames: std::collections::VecDeque::with_capacity(MAX_QUEUED_FRAMES),
            dropped_for_pressure: 0,
        }
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total frames ever dropped to relieve queue pressure.
    pub fn dropped_for_pressure(&self) -> u64 {
        self.dropped_for_pressure
    }

    /// Push a frame, dropping the oldest queued frame first if already full.
    pub fn push(&mut self, frame: Frame) -> Result<(), QueueError> {
        let size = frame.byte_len();
        if size > MAX_FRAME_BYTES {
            return Err(QueueError::FrameTooLarge {
                frame_id: frame.frame_id,
                size,
            });
        }

        if self.frames.len() >= MAX_QUEUED_FRAMES {
            self.frames.pop_front();
            self.dropped_for_pressure = self.dropped_for_pressure.saturating_add(1);
            tracing::warn!(queued = self.frames.len(), "H.264 queue full, dropped oldest frame");
        }

        self.frames.push_back(frame);
        Ok(())
    }

    /// Pop the oldest queued frame, in `frame_id` order.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}

/// Combine an AVC444 frame's luma and chroma NAL streams into a single
/// AVC420-tagged payload.
///
/// This is a structural transform (concatenation + codec retag), not a pixel
/// re-encode: the downstream decoder is expected to consume the combined NAL
/// stream as ordinary 4:2:0 AVC. Invoked when the downstream decoder declares
/// 4:4:4 unsupported.
#[must_use]
pub fn transcode_avc444_to_avc420(frame: Frame) -> Frame {
    let mut combined = frame.luma;
    combined.extend_from_slice(&frame.chroma);

    Frame {
        frame_id: frame.frame_id,
        surface_id: frame.surface_id,
        dest_rect: frame.dest_rect,
        codec: FrameCodec::Avc420,
        luma: combined,
        chroma: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(frame_id: u32) -> Frame {
        Frame {
            frame_id,
            surface_id: 1,
            dest_rect: InclusiveRectangle {
                left: 0,
                top: 0,
                right: 15,
                bottom: 15,
            },
            codec: FrameCodec::Avc420,
            luma: vec![0u8; 16],
            chroma: Vec::new(),
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = FrameQueue::new();
        queue.push(frame(1)).unwrap();
        queue.push(frame(2)).unwrap();
        queue.push(frame(3)).unwrap();

        assert_eq!(queue.pop().unwrap().frame_id, 1);
        assert_eq!(queue.pop().unwrap().frame_id, 2);
        assert_eq!(queue.pop().unwrap().frame_id, 3);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn drops_oldest_frame_under_pressure() {
        let mut queue = FrameQueue::new();
        for id in 0..MAX_QUEUED_FRAMES as u32 {
            queue.push(frame(id)).unwrap();
        }
        assert_eq!(queue.len(), MAX_QUEUED_FRAMES);

        // one more push should evict frame 0
        queue.push(frame(MAX_QUEUED_FRAMES as u32)).unwrap();
        assert_eq!(queue.len(), MAX_QUEUED_FRAMES);
        assert_eq!(queue.dropped_for_pressure(), 1);
        assert_eq!(queue.pop().unwrap().frame_id, 1);
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut queue = FrameQueue::new();
        let mut too_big = frame(0);
        too_big.luma = vec![0u8; MAX_FRAME_BYTES + 1];

        let err = queue.push(too_big).unwrap_err();
        assert!(matches!(err, QueueError::FrameTooLarge { frame_id: 0, .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn transcode_combines_luma_and_chroma_and_retags_codec() {
        let mut f = frame(7);
        f.codec = FrameCodec::Avc444;
        f.luma = vec![1, 2, 3];
        f.chroma = vec![4, 5];

        let transcoded = transcode_avc444_to_avc420(f);
        assert_eq!(transcoded.codec, FrameCodec::Avc420);
        assert_eq!(transcoded.luma, vec![1, 2, 3, 4, 5]);
        assert!(transcoded.chroma.is_empty());
    }
}
