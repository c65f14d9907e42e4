//! Progressive RemoteFX block/tile state machine.
//!
//! Parses the progressive bitstream's block stream (SYNC/FRAME_BEGIN/CONTEXT/REGION/
//! TILE_SIMPLE/TILE_FIRST/TILE_UPGRADE/FRAME_END) and maintains per-tile refinement state
//! across passes, per the pipeline order confirmed by the legacy (non-progressive) RemoteFX
//! decoder: RLGR decode -> LL3 differential decode -> dequantize -> inverse DWT -> color convert.
//!
//! Tile grid coordinates are scoped per surface; callers own the mapping from `surface_id` to
//! a `ProgressiveDecoder` (one decoder instance per surface is the natural split, since SYNC
//! resets only the tiles of the surface it arrived on).

use std::collections::HashMap;

use crate::color_conversion::{ycbcr_to_bgra_exact, YCbCrBuffer};
use crate::quantization::{self, Quant};
use crate::rlgr::{self, EntropyAlgorithm};
use crate::{dwt, subband_reconstruction};

const SYNC_MAGIC: u32 = 0xCACC_ACCA;
const SYNC_VERSION: u16 = 0x0100;
const TILE_SIZE: usize = 64;
const TILE_PIXELS: usize = TILE_SIZE * TILE_SIZE;

const BLOCK_SYNC: u16 = 0xCCC0;
const BLOCK_FRAME_BEGIN: u16 = 0xCCC1;
const BLOCK_FRAME_END: u16 = 0xCCC2;
const BLOCK_CONTEXT: u16 = 0xCCC3;
const BLOCK_REGION: u16 = 0xCCC4;
const BLOCK_TILE_SIMPLE: u16 = 0xCCC5;
const BLOCK_TILE_FIRST: u16 = 0xCCC6;
const BLOCK_TILE_UPGRADE: u16 = 0xCCC7;

const DWT_REDUCE_EXTRAPOLATE: u8 = 0x01;

#[derive(Debug)]
pub enum ProgressiveError {
    Truncated { what: &'static str },
    InvalidSyncMagic,
    InvalidSyncVersion,
    InvalidTileSize,
    InvalidQuantIndex,
    UnknownBlockType(u16),
    Rlgr(rlgr::RlgrError),
}

impl core::fmt::Display for ProgressiveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Truncated { what } => write!(f, "truncated progressive bitstream reading {what}"),
            Self::InvalidSyncMagic => write!(f, "SYNC block has invalid magic"),
            Self::InvalidSyncVersion => write!(f, "SYNC block has unsupported version"),
            Self::InvalidTileSize => write!(f, "CONTEXT/REGION tile size is not 64"),
            Self::InvalidQuantIndex => write!(f, "tile quantization index is out of range for its REGION's tables"),
            Self::UnknownBlockType(ty) => write!(f, "unknown progressive block type 0x{ty:04x}"),
            Self::Rlgr(err) => write!(f, "RLGR decode failed: {err}"),
        }
    }
}

impl core::error::Error for ProgressiveError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Rlgr(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rlgr::RlgrError> for ProgressiveError {
    fn from(err: rlgr::RlgrError) -> Self {
        Self::Rlgr(err)
    }
}

/// A single 64x64-pixel tile's decode state, addressed by `(x_idx, y_idx)` within a surface.
pub struct Tile {
    pub pixels: Box<[u8; TILE_PIXELS * 4]>,
    coeff_y: Box<[i16; 4096]>,
    coeff_cb: Box<[i16; 4096]>,
    coeff_cr: Box<[i16; 4096]>,
    sign_y: Box<[bool; 4096]>,
    sign_cb: Box<[bool; 4096]>,
    sign_cr: Box<[bool; 4096]>,
    /// 0 = empty, >= 1 = decoded at least once (number of upgrade passes applied + 1).
    pub pass: u32,
    /// Cleared on SYNC/CONTEXT; set true after a TILE_SIMPLE/TILE_FIRST.
    pub valid: bool,
    /// True iff this tile was touched by the frame currently being assembled.
    pub dirty: bool,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            pixels: Box::new([0; TILE_PIXELS * 4]),
            coeff_y: Box::new([0; 4096]),
            coeff_cb: Box::new([0; 4096]),
            coeff_cr: Box::new([0; 4096]),
            sign_y: Box::new([false; 4096]),
            sign_cb: Box::new([false; 4096]),
            sign_cr: Box::new([false; 4096]),
            pass: 0,
            valid: false,
            dirty: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub x_idx: u16,
    pub y_idx: u16,
}

/// Per-surface progressive decoder context. One instance per GFX surface using progressive
/// codec; SYNC/CONTEXT reset only this surface's tiles, matching `§4.5`.
#[derive(Default)]
pub struct ProgressiveDecoder {
    tiles: HashMap<TileKey, Tile>,
    extrapolated_layout: bool,
    updated_tile_indices: Vec<TileKey>,
    frame_index: Option<u32>,
}

/// Outcome of decoding one FRAME_BEGIN..FRAME_END span: the tiles touched, in the order they
/// were updated. Pixels are only meant to be read by callers after this is produced (the
/// `§4.5` FRAME_END synchronization point).
pub struct FrameResult {
    pub frame_index: u32,
    pub updated_tiles: Vec<TileKey>,
}

impl ProgressiveDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile(&self, key: TileKey) -> Option<&Tile> {
        self.tiles.get(&key)
    }

    /// Parses and applies every block in `data`, which must contain exactly one
    /// FRAME_BEGIN..FRAME_END span (callers demux per-surface payloads before calling this).
    pub fn decode_frame(&mut self, data: &[u8]) -> Result<FrameResult, ProgressiveError> {
        self.updated_tile_indices.clear();
        let mut cursor = data;
        let mut frame_index = None;

        while !cursor.is_empty() {
            let (block_type, block_len, body, rest) = read_block_header(cursor)?;
            cursor = rest;

            match block_type {
                BLOCK_SYNC => self.handle_sync(body)?,
                BLOCK_FRAME_BEGIN => frame_index = Some(handle_frame_begin(body)?),
                BLOCK_CONTEXT => self.handle_context(body)?,
                BLOCK_REGION => self.handle_region(body)?,
                BLOCK_FRAME_END => break,
                other => return Err(ProgressiveError::UnknownBlockType(other)),
            }
            let _ = block_len;
        }

        Ok(FrameResult {
            frame_index: frame_index.unwrap_or(0),
            updated_tiles: self.updated_tile_indices.clone(),
        })
    }

    fn handle_sync(&mut self, body: &[u8]) -> Result<(), ProgressiveError> {
        let magic = read_u32(body, 0, "SYNC magic")?;
        let version = read_u16(body, 4, "SYNC version")?;
        if magic != SYNC_MAGIC {
            return Err(ProgressiveError::InvalidSyncMagic);
        }
        if version != SYNC_VERSION {
            return Err(ProgressiveError::InvalidSyncVersion);
        }
        for tile in self.tiles.values_mut() {
            tile.pass = 0;
            tile.valid = false;
        }
        Ok(())
    }

    fn handle_context(&mut self, body: &[u8]) -> Result<(), ProgressiveError> {
        let tile_size = *body.get(4).ok_or(ProgressiveError::Truncated { what: "CONTEXT" })?;
        if tile_size != 0 && usize::from(tile_size) != TILE_SIZE {
            return Err(ProgressiveError::InvalidTileSize);
        }
        let flags = *body.get(5).unwrap_or(&0);
        self.extrapolated_layout = flags & DWT_REDUCE_EXTRAPOLATE != 0;
        Ok(())
    }

    /// Parses the documented REGION structure (`§4.5`): tile size byte, rectangle list,
    /// quantization tables, progressive-quant tables, then the per-tile subblocks. The rectangle
    /// list is consumed for framing only — tile placement already comes from each tile header's
    /// own `(xIdx, yIdx)`, and `client.rs` clips the decoded tile against the surface's real
    /// dimensions — so rectangles are parsed but not retained.
    fn handle_region(&mut self, body: &[u8]) -> Result<(), ProgressiveError> {
        let mut cursor = body;

        let _tile_size = *cursor.first().ok_or(ProgressiveError::Truncated { what: "REGION tile size" })?;
        cursor = cursor.get(1..).ok_or(ProgressiveError::Truncated { what: "REGION" })?;

        let num_rects = read_u16(cursor, 0, "REGION rect count")?;
        cursor = cursor.get(2..).ok_or(ProgressiveError::Truncated { what: "REGION" })?;
        let rects_len = usize::from(num_rects) * 8;
        cursor = cursor.get(rects_len..).ok_or(ProgressiveError::Truncated { what: "REGION rect list" })?;

        let num_quant = *cursor.first().ok_or(ProgressiveError::Truncated { what: "REGION quant count" })?;
        cursor = cursor.get(1..).ok_or(ProgressiveError::Truncated { what: "REGION" })?;
        let mut quant_tables = Vec::with_capacity(usize::from(num_quant));
        for _ in 0..num_quant {
            quant_tables.push(Quant::from_bytes(read_array::<5>(cursor, "REGION quant table")?));
            cursor = &cursor[5..];
        }

        let num_prog_quant = *cursor.first().ok_or(ProgressiveError::Truncated { what: "REGION prog-quant count" })?;
        cursor = cursor.get(1..).ok_or(ProgressiveError::Truncated { what: "REGION" })?;
        let mut prog_quant_tables = Vec::with_capacity(usize::from(num_prog_quant));
        for _ in 0..num_prog_quant {
            prog_quant_tables.push(Quant::from_bytes(read_array::<5>(cursor, "REGION prog-quant table")?));
            cursor = &cursor[5..];
        }

        while !cursor.is_empty() {
            let (block_type, _block_len, tile_body, rest) = read_block_header(cursor)?;
            cursor = rest;
            match block_type {
                BLOCK_TILE_SIMPLE => self.decode_simple_tile(tile_body, &quant_tables, &prog_quant_tables, false)?,
                BLOCK_TILE_FIRST => self.decode_simple_tile(tile_body, &quant_tables, &prog_quant_tables, true)?,
                BLOCK_TILE_UPGRADE => self.decode_upgrade_tile(tile_body)?,
                other => return Err(ProgressiveError::UnknownBlockType(other)),
            }
        }

        Ok(())
    }

    /// Decodes a TILE_SIMPLE (16-byte header) or TILE_FIRST (17-byte header, one extra
    /// progressive-quant index) block per `§4.6`. Both carry three per-component quantization
    /// indices into the REGION's quant tables; FIRST additionally carries one progressive-quant
    /// index shared across components, applied as an additive per-subband delta (`§4.4`).
    fn decode_simple_tile(
        &mut self,
        body: &[u8],
        quant_tables: &[Quant],
        prog_quant_tables: &[Quant],
        is_first: bool,
    ) -> Result<(), ProgressiveError> {
        let quant_idx_y = *body.first().ok_or(ProgressiveError::Truncated { what: "tile quant index Y" })?;
        let quant_idx_cb = *body.get(1).ok_or(ProgressiveError::Truncated { what: "tile quant index Cb" })?;
        let quant_idx_cr = *body.get(2).ok_or(ProgressiveError::Truncated { what: "tile quant index Cr" })?;
        let x_idx = read_u16(body, 4, "tile xIdx")?;
        let y_idx = read_u16(body, 6, "tile yIdx")?;
        let y_len = usize::from(read_u16(body, 8, "tile yLen")?);
        let cb_len = usize::from(read_u16(body, 10, "tile cbLen")?);
        let cr_len = usize::from(read_u16(body, 12, "tile crLen")?);
        // 14..16 is the tail length field (§4.6); trailing per-tile metadata, not otherwise used.

        let header_len = if is_first { 17 } else { 16 };
        let payload = body.get(header_len..).ok_or(ProgressiveError::Truncated { what: "tile payload" })?;

        let quant_y = quant_tables
            .get(usize::from(quant_idx_y))
            .ok_or(ProgressiveError::InvalidQuantIndex)?;
        let quant_cb = quant_tables
            .get(usize::from(quant_idx_cb))
            .ok_or(ProgressiveError::InvalidQuantIndex)?;
        let quant_cr = quant_tables
            .get(usize::from(quant_idx_cr))
            .ok_or(ProgressiveError::InvalidQuantIndex)?;

        let prog_quant = if is_first {
            let idx = usize::from(*body.get(16).ok_or(ProgressiveError::Truncated { what: "tile prog-quant index" })?);
            Some(
                prog_quant_tables
                    .get(idx)
                    .ok_or(ProgressiveError::InvalidQuantIndex)?,
            )
        } else {
            None
        };

        let y_data = payload.get(..y_len).ok_or(ProgressiveError::Truncated { what: "Y component" })?;
        let cb_data = payload
            .get(y_len..y_len + cb_len)
            .ok_or(ProgressiveError::Truncated { what: "Cb component" })?;
        let cr_data = payload
            .get(y_len + cb_len..y_len + cb_len + cr_len)
            .ok_or(ProgressiveError::Truncated { what: "Cr component" })?;

        let extrapolated = self.extrapolated_layout;
        let key = TileKey { x_idx, y_idx };
        let tile = self.tiles.entry(key).or_default();

        decode_component(y_data, &mut tile.coeff_y, quant_y, prog_quant, extrapolated)?;
        decode_component(cb_data, &mut tile.coeff_cb, quant_cb, prog_quant, extrapolated)?;
        decode_component(cr_data, &mut tile.coeff_cr, quant_cr, prog_quant, extrapolated)?;

        tile.sign_y.iter_mut().zip(tile.coeff_y.iter()).for_each(|(s, &c)| *s = c != 0);
        tile.sign_cb.iter_mut().zip(tile.coeff_cb.iter()).for_each(|(s, &c)| *s = c != 0);
        tile.sign_cr.iter_mut().zip(tile.coeff_cr.iter()).for_each(|(s, &c)| *s = c != 0);

        recolor_tile(tile, extrapolated);
        tile.pass = 1;
        tile.valid = true;
        tile.dirty = true;
        self.updated_tile_indices.push(key);

        Ok(())
    }

    fn decode_upgrade_tile(&mut self, body: &[u8]) -> Result<(), ProgressiveError> {
        let x_idx = read_u16(body, 0, "upgrade xIdx")?;
        let y_idx = read_u16(body, 2, "upgrade yIdx")?;
        let y_srl_len = usize::from(read_u16(body, 4, "upgrade ySrlLen")?);
        let y_raw_len = usize::from(read_u16(body, 6, "upgrade yRawLen")?);
        let cb_srl_len = usize::from(read_u16(body, 8, "upgrade cbSrlLen")?);
        let cb_raw_len = usize::from(read_u16(body, 10, "upgrade cbRawLen")?);
        let cr_srl_len = usize::from(read_u16(body, 12, "upgrade crSrlLen")?);
        let cr_raw_len = usize::from(read_u16(body, 14, "upgrade crRawLen")?);

        let key = TileKey { x_idx, y_idx };
        let Some(tile) = self.tiles.get_mut(&key) else {
            // Upgrade for a tile never produced by a FIRST block; per `§4.6`, skip.
            return Ok(());
        };
        if !tile.valid {
            return Ok(());
        }

        let bit_pos = 6_u32.saturating_sub(tile.pass);

        let mut offset = 20;
        let y_srl = body.get(offset..offset + y_srl_len).unwrap_or(&[]);
        offset += y_srl_len + y_raw_len;
        let cb_srl = body.get(offset..offset + cb_srl_len).unwrap_or(&[]);
        offset += cb_srl_len + cb_raw_len;
        let cr_srl = body.get(offset..offset + cr_srl_len).unwrap_or(&[]);

        if !y_srl.is_empty() {
            crate::srl::decode(y_srl, &mut *tile.coeff_y, &mut *tile.sign_y, bit_pos);
        }
        if !cb_srl.is_empty() {
            crate::srl::decode(cb_srl, &mut *tile.coeff_cb, &mut *tile.sign_cb, bit_pos);
        }
        if !cr_srl.is_empty() {
            crate::srl::decode(cr_srl, &mut *tile.coeff_cr, &mut *tile.sign_cr, bit_pos);
        }

        recolor_tile(tile, self.extrapolated_layout);
        tile.pass += 1;
        tile.dirty = true;
        self.updated_tile_indices.push(key);

        Ok(())
    }
}

/// RLGR decode -> LL3 differential decode -> dequantize, leaving `coeffs` holding dequantized,
/// frequency-domain coefficients (`§4.4`: "the per-tile coefficient planes must store the
/// dequantized values"). The inverse DWT runs later, in `recolor_tile`, on a scratch copy — an
/// upgrade pass refines these same dequantized coefficients and must not re-transform them here.
fn decode_component(
    data: &[u8],
    coeffs: &mut [i16; 4096],
    quant: &Quant,
    prog_quant: Option<&Quant>,
    extrapolated: bool,
) -> Result<(), ProgressiveError> {
    rlgr::decode(EntropyAlgorithm::Rlgr1, data, &mut coeffs[..])?;
    let ll3_start = if extrapolated { 4015 } else { 4032 };
    subband_reconstruction::decode(&mut coeffs[ll3_start..]);
    quantization::decode_progressive(&mut coeffs[..], quant, prog_quant, extrapolated);
    Ok(())
}

/// The single place the inverse DWT runs: takes a scratch copy of each component's dequantized
/// coefficient plane, inverse-transforms the copy, and color-converts into the tile's pixel
/// buffer. `tile.coeff_*` themselves are left untouched so a later upgrade pass still has the
/// dequantized values to refine (`§4.4`/`§4.6`).
fn recolor_tile(tile: &mut Tile, extrapolated: bool) {
    let mut y_spatial = *tile.coeff_y;
    let mut cb_spatial = *tile.coeff_cb;
    let mut cr_spatial = *tile.coeff_cr;
    let mut temp = [0_i16; 4096];
    if extrapolated {
        dwt::decode_extrapolated(&mut y_spatial, &mut temp);
        dwt::decode_extrapolated(&mut cb_spatial, &mut temp);
        dwt::decode_extrapolated(&mut cr_spatial, &mut temp);
    } else {
        dwt::decode(&mut y_spatial, &mut temp);
        dwt::decode(&mut cb_spatial, &mut temp);
        dwt::decode(&mut cr_spatial, &mut temp);
    }

    let buffer = YCbCrBuffer {
        y: &y_spatial,
        cb: &cb_spatial,
        cr: &cr_spatial,
    };
    let _ = ycbcr_to_bgra_exact(buffer, &mut tile.pixels[..]);
}

fn read_block_header(data: &[u8]) -> Result<(u16, u32, &[u8], &[u8]), ProgressiveError> {
    let block_type = read_u16(data, 0, "block type")?;
    let block_len = read_u32(data, 2, "block length")?;
    let total = usize::try_from(block_len).map_err(|_| ProgressiveError::Truncated { what: "block length" })?;
    if total < 6 || total > data.len() {
        return Err(ProgressiveError::Truncated { what: "block body" });
    }
    let body = &data[6..total];
    let rest = &data[total..];
    Ok((block_type, block_len, body, rest))
}

fn handle_frame_begin(body: &[u8]) -> Result<u32, ProgressiveError> {
    read_u32(body, 0, "FRAME_BEGIN index")
}

fn read_u16(data: &[u8], offset: usize, what: &'static str) -> Result<u16, ProgressiveError> {
    let bytes = data.get(offset..offset + 2).ok_or(ProgressiveError::Truncated { what })?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize, what: &'static str) -> Result<u32, ProgressiveError> {
    let bytes = data.get(offset..offset + 4).ok_or(ProgressiveError::Truncated { what })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_array<const N: usize>(data: &[u8], what: &'static str) -> Result<[u8; N], ProgressiveError> {
    let slice = data.get(..N).ok_or(ProgressiveError::Truncated { what })?;
    let mut out = [0_u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(block_type: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&block_type.to_le_bytes());
        out.extend_from_slice(&(u32::try_from(body.len() + 6).unwrap()).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn sync_resets_tile_pass_and_valid() {
        let mut decoder = ProgressiveDecoder::new();
        let key = TileKey { x_idx: 0, y_idx: 0 };
        decoder.tiles.insert(key, Tile::default());
        decoder.tiles.get_mut(&key).unwrap().pass = 3;
        decoder.tiles.get_mut(&key).unwrap().valid = true;

        let mut sync_body = Vec::new();
        sync_body.extend_from_slice(&SYNC_MAGIC.to_le_bytes());
        sync_body.extend_from_slice(&SYNC_VERSION.to_le_bytes());
        let frame = block(BLOCK_SYNC, &sync_body);

        decoder.decode_frame(&frame).unwrap();
        let tile = decoder.tile(key).unwrap();
        assert_eq!(tile.pass, 0);
        assert!(!tile.valid);
    }

    #[test]
    fn unknown_block_type_is_rejected() {
        let mut decoder = ProgressiveDecoder::new();
        let frame = block(0xDEAD, &[]);
        assert!(decoder.decode_frame(&frame).is_err());
    }

    #[test]
    fn frame_begin_index_is_reported() {
        let mut decoder = ProgressiveDecoder::new();
        let mut data = block(BLOCK_FRAME_BEGIN, &42_u32.to_le_bytes());
        data.extend_from_slice(&block(BLOCK_FRAME_END, &[]));
        let result = decoder.decode_frame(&data).unwrap();
        assert_eq!(result.frame_index, 42);
        assert!(result.updated_tiles.is_empty());
    }

    /// Regression test for the double-inverse-DWT bug: `decode_component` must leave `coeffs`
    /// holding dequantized, frequency-domain values. If the inverse DWT ran here (as it used
    /// to), a single isolated non-zero coefficient would spread energy across the whole plane
    /// instead of staying put at its own index.
    #[test]
    fn decode_component_leaves_coefficients_dequantized_not_spatial() {
        let quant = Quant::from_bytes([0x11, 0x11, 0x11, 0x11, 0x11]); // factor 1 everywhere: shift 0
        let mut original = [0_i16; 4096];
        original[10] = 5; // inside HL1, far from LL3's differential-decode region
        original[2000] = -3; // inside HH1

        let mut encoded = vec![0_u8; 8192];
        let len = rlgr::encode(EntropyAlgorithm::Rlgr1, &original, &mut encoded).unwrap();

        let mut coeffs = [0_i16; 4096];
        decode_component(&encoded[..len], &mut coeffs, &quant, None, false).unwrap();

        assert_eq!(coeffs[10], 5);
        assert_eq!(coeffs[2000], -3);
    }

    fn simple_tile_body(quant_idx: u8, y_data: &[u8], cb_data: &[u8], cr_data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(quant_idx);
        body.push(quant_idx);
        body.push(quant_idx);
        body.push(0); // reserved
        body.extend_from_slice(&0_u16.to_le_bytes()); // xIdx
        body.extend_from_slice(&0_u16.to_le_bytes()); // yIdx
        body.extend_from_slice(&(u16::try_from(y_data.len()).unwrap()).to_le_bytes());
        body.extend_from_slice(&(u16::try_from(cb_data.len()).unwrap()).to_le_bytes());
        body.extend_from_slice(&(u16::try_from(cr_data.len()).unwrap()).to_le_bytes());
        body.extend_from_slice(&0_u16.to_le_bytes()); // tailLen
        body.extend_from_slice(y_data);
        body.extend_from_slice(cb_data);
        body.extend_from_slice(cr_data);
        body
    }

    fn region_body(quant_tables: &[[u8; 5]], tiles: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(64); // tile size
        body.extend_from_slice(&0_u16.to_le_bytes()); // num_rects
        body.push(u8::try_from(quant_tables.len()).unwrap());
        for table in quant_tables {
            body.extend_from_slice(table);
        }
        body.push(0); // num_prog_quant
        for tile in tiles {
            body.extend_from_slice(tile);
        }
        body
    }

    #[test]
    fn region_honors_the_tiles_own_quant_table_index() {
        let mut decoder = ProgressiveDecoder::new();

        let zero_coeffs = [0_i16; 4096];
        let mut encoded = vec![0_u8; 8192];
        let len = rlgr::encode(EntropyAlgorithm::Rlgr1, &zero_coeffs, &mut encoded).unwrap();
        let data = &encoded[..len];

        let tile = block(
            BLOCK_TILE_SIMPLE,
            &simple_tile_body(1, data, data, data),
        );
        let region = region_body(&[[0x11, 0x11, 0x11, 0x11, 0x11], [0x99, 0x99, 0x99, 0x99, 0x99]], &[tile]);

        let mut frame = block(BLOCK_FRAME_BEGIN, &1_u32.to_le_bytes());
        frame.extend_from_slice(&block(BLOCK_REGION, &region));
        frame.extend_from_slice(&block(BLOCK_FRAME_END, &[]));

        let result = decoder.decode_frame(&frame).unwrap();
        assert_eq!(result.updated_tiles, vec![TileKey { x_idx: 0, y_idx: 0 }]);

        let tile = decoder.tile(TileKey { x_idx: 0, y_idx: 0 }).unwrap();
        assert!(tile.valid);
        // All-zero coefficients decode to neutral gray regardless of which quant table is picked.
        assert!(tile.pixels.chunks(4).all(|p| p == [128, 128, 128, 255]));
    }

    #[test]
    fn tile_quant_index_out_of_range_is_rejected() {
        let mut decoder = ProgressiveDecoder::new();

        let zero_coeffs = [0_i16; 4096];
        let mut encoded = vec![0_u8; 8192];
        let len = rlgr::encode(EntropyAlgorithm::Rlgr1, &zero_coeffs, &mut encoded).unwrap();
        let data = &encoded[..len];

        let tile = block(BLOCK_TILE_SIMPLE, &simple_tile_body(5, data, data, data));
        let region = region_body(&[[0x11, 0x11, 0x11, 0x11, 0x11]], &[tile]);

        let mut frame = block(BLOCK_FRAME_BEGIN, &1_u32.to_le_bytes());
        frame.extend_from_slice(&block(BLOCK_REGION, &region));
        frame.extend_from_slice(&block(BLOCK_FRAME_END, &[]));

        assert!(matches!(decoder.decode_frame(&frame), Err(ProgressiveError::InvalidQuantIndex)));
    }
}
