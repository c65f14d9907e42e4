//! Pluggable per-codec-id decode dispatch for `WireToSurface1` payloads that
//! aren't H.264 or raw/uncompressed (§10.5 of the expanded spec).
//!
//! ClearCodec and Planar are in the mandatory codec set but a full bit-exact
//! bitstream decoder for either is out of this crate's core scope (that
//! scope is the progressive RFX wavelet pipeline and the GFX surface bank).
//! What *is* in scope is the dispatch contract: decode into the surface
//! buffer, then conditionally copy to primary, the same contract every
//! other codec branch in `client.rs` honors. `SurfaceCodec` is the seam a
//! real ClearCodec/Planar decoder would plug into; the implementations here
//! are minimal and documented as such, grounded in `gwgfx_graphics::image_processing`
//! for the pixel-format-conversion part of the contract they do implement.

use gwgfx_graphics::image_processing::PixelFormat as RawFormat;
use ironrdp_pdu::geometry::{InclusiveRectangle, Rectangle as _};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload too short for {codec} header")]
    Truncated { codec: &'static str },
}

/// Decodes one `WireToSurface1` payload into BGRA32 pixels covering `rect`.
pub trait SurfaceCodec: Send {
    fn decode(&mut self, payload: &[u8], rect: &InclusiveRectangle) -> Result<Vec<u8>, CodecError>;
}

/// Minimal ClearCodec dispatch: ClearCodec frames open with a one-byte
/// `glyphFlags`/`vBar`-selector header (MS-RDPNSC-adjacent framing); this
/// stub recognizes the "raw subcodec" flag (header byte `0x00`) and passes
/// the remaining bytes through as already-BGRA32 pixels, which is the one
/// ClearCodec encoding that degenerates to uncompressed. Any other header
/// byte (glyph cache, residual/band subcodecs) is not implemented and
/// zero-fills per §7's transient-codec-error policy.
#[derive(Default)]
pub struct ClearCodecStub;

impl SurfaceCodec for ClearCodecStub {
    fn decode(&mut self, payload: &[u8], rect: &InclusiveRectangle) -> Result<Vec<u8>, CodecError> {
        let expected_len =
            usize::from(rect.width()) * usize::from(rect.height()) * usize::from(RawFormat::BgrA32.bytes_per_pixel());

        let Some((&0x00, body)) = payload.split_first() else {
            tracing::warn!("ClearCodec subcodec not implemented, zero-filling tile");
            return Ok(vec![0u8; expected_len]);
        };

        if body.len() < expected_len {
            return Err(CodecError::Truncated { codec: "ClearCodec" });
        }
        Ok(body[..expected_len].to_vec())
    }
}

/// Minimal Planar dispatch: full RLE/delta-plane decode is not implemented
/// (§1 Non-goals: codec fidelity beyond the documented tolerances is out of
/// scope for non-core codecs); this stub decodes only the "no compression"
/// planar header (`formatHeader & 0x08 == 0`, meaning each plane is stored
/// raw) and zero-fills otherwise.
#[derive(Default)]
pub struct PlanarCodec;

impl SurfaceCodec for PlanarCodec {
    fn decode(&mut self, payload: &[u8], rect: &InclusiveRectangle) -> Result<Vec<u8>, CodecError> {
        const RLE_COMPRESSED: u8 = 0x08;

        let width = usize::from(rect.width());
        let height = usize::from(rect.height());
        let expected_len = width * height * 4;

        let Some((&format_header, body)) = payload.split_first() else {
            return Err(CodecError::Truncated { codec: "Planar" });
        };

        if format_header & RLE_COMPRESSED != 0 {
            tracing::warn!("Planar RLE-compressed planes not implemented, zero-filling tile");
            return Ok(vec![0u8; expected_len]);
        }

        let plane_len = width * height;
        if body.len() < plane_len * 3 {
            return Err(CodecError::Truncated { codec: "Planar" });
        }

        let (r_plane, rest) = body.split_at(plane_len);
        let (g_plane, rest) = rest.split_at(plane_len);
        let (b_plane, _) = rest.split_at(plane_len);

        let mut bgra = vec![0u8; expected_len];
        for i in 0..plane_len {
            bgra[i * 4] = b_plane[i];
            bgra[i * 4 + 1] = g_plane[i];
            bgra[i * 4 + 2] = r_plane[i];
            bgra[i * 4 + 3] = 0xFF;
        }
        Ok(bgra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: u16, h: u16) -> InclusiveRectangle {
        InclusiveRectangle { left: 0, top: 0, right: w - 1, bottom: h - 1 }
    }

    #[test]
    fn clear_codec_passes_through_raw_subcodec() {
        let mut codec = ClearCodecStub;
        let mut payload = vec![0x00u8];
        payload.extend_from_slice(&[7u8; 2 * 2 * 4]);
        let decoded = codec.decode(&payload, &rect(2, 2)).unwrap();
        assert_eq!(decoded, vec![7u8; 16]);
    }

    #[test]
    fn clear_codec_zero_fills_unimplemented_subcodec() {
        let mut codec = ClearCodecStub;
        let payload = vec![0x01u8, 0xAA];
        let decoded = codec.decode(&payload, &rect(2, 2)).unwrap();
        assert_eq!(decoded, vec![0u8; 16]);
    }

    #[test]
    fn planar_decodes_uncompressed_planes() {
        let mut codec = PlanarCodec;
        let mut payload = vec![0x00u8];
        payload.extend(std::iter::repeat(0x10u8).take(4)); // R plane, 2x2
        payload.extend(std::iter::repeat(0x20u8).take(4)); // G plane
        payload.extend(std::iter::repeat(0x30u8).take(4)); // B plane
        let decoded = codec.decode(&payload, &rect(2, 2)).unwrap();
        assert_eq!(decoded, vec![0x30, 0x20, 0x10, 0xFF].repeat(4));
    }

    #[test]
    fn planar_zero_fills_rle_compressed() {
        let mut codec = PlanarCodec;
        let payload = vec![0x08u8, 0xAA, 0xBB];
        let decoded = codec.decode(&payload, &rect(2, 2)).unwrap();
        assert_eq!(decoded, vec![0u8; 16]);
    }
}
