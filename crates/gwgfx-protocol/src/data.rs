//! Binary data messages: 4-byte ASCII magic tag, little-endian integers (§6).
//!
//! Layouts for `OPUS`/`AUDI`/`H264`/`DELS` are exact per the spec's table.
//! `SURF`/`STFR`/`ENFR`/`SFIL`/`S2SF`/`C2SF`/`TILE` are marked "fixed"/"var"
//! in the table without a byte-for-byte layout; the layouts below are this
//! gateway's concrete choice, each mirroring the corresponding GFX operation
//! field-for-field (see `DESIGN.md`).

use ironrdp_core::{ReadCursor, WriteCursor};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataMessageError {
    #[error("message too short for a 4-byte tag")]
    Truncated,
    #[error("unknown tag {0:?}")]
    UnknownTag([u8; 4]),
    #[error("message body too short for tag {tag:?}")]
    TruncatedBody { tag: &'static str },
}

fn tag_bytes(tag: &str) -> [u8; 4] {
    let bytes = tag.as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMessage<'a> {
    Opus {
        rate: u32,
        channels: u16,
        opus: &'a [u8],
    },
    Audi {
        rate: u32,
        channels: u16,
        bits: u16,
        pcm: &'a [u8],
    },
    H264 {
        frame_id: u32,
        surface_id: u16,
        codec: u16,
        frame_type: u8,
        x: i16,
        y: i16,
        w: u16,
        h: u16,
        nal: &'a [u8],
        chroma: &'a [u8],
    },
    Delt {
        rects: Vec<DeltaRect>,
        tiles: &'a [u8],
    },
    WebP(&'a [u8]),
    Jpeg(&'a [u8]),
    Surf {
        surface_id: u16,
        width: u32,
        height: u32,
    },
    Dels {
        surface_id: u16,
    },
    Stfr {
        frame_id: u32,
    },
    Enfr {
        frame_id: u32,
    },
    Prog(&'a [u8]),
    Tile {
        surface_id: u16,
        left: u16,
        top: u16,
        right: u16,
        bottom: u16,
        pixels: &'a [u8],
    },
    Sfil {
        surface_id: u16,
        left: u16,
        top: u16,
        right: u16,
        bottom: u16,
        b: u8,
        g: u8,
        r: u8,
        a: u8,
    },
    S2sf {
        src_surface_id: u16,
        dst_surface_id: u16,
        src_left: u16,
        src_top: u16,
        src_right: u16,
        src_bottom: u16,
        dst_x: u16,
        dst_y: u16,
    },
    C2sf {
        cache_slot: u16,
        surface_id: u16,
        dst_x: u16,
        dst_y: u16,
    },
}

impl<'a> DataMessage<'a> {
    /// Decodes a tagged message from `data`, which must begin with the
    /// 4-byte ASCII magic tag.
    pub fn decode(data: &'a [u8]) -> Result<Self, DataMessageError> {
        if data.len() < 4 {
            return Err(DataMessageError::Truncated);
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&data[0..4]);
        let mut src = ReadCursor::new(&data[4..]);

        match &tag {
            b"OPUS" => {
                if src.remaining().len() < 8 {
                    return Err(DataMessageError::TruncatedBody { tag: "OPUS" });
                }
                let rate = src.read_u32();
                let channels = src.read_u16();
                let size = usize::from(src.read_u16());
                if src.remaining().len() < size {
                    return Err(DataMessageError::TruncatedBody { tag: "OPUS" });
                }
                Ok(Self::Opus {
                    rate,
                    channels,
                    opus: src.read_slice(size),
                })
            }
            b"AUDI" => {
                if src.remaining().len() < 8 {
                    return Err(DataMessageError::TruncatedBody { tag: "AUDI" });
                }
                let rate = src.read_u32();
                let channels = src.read_u16();
                let bits = src.read_u16();
                Ok(Self::Audi {
                    rate,
                    channels,
                    bits,
                    pcm: src.read_remaining(),
                })
            }
            b"H264" => {
                if src.remaining().len() < 25 {
                    return Err(DataMessageError::TruncatedBody { tag: "H264" });
                }
                let frame_id = src.read_u32();
                let surface_id = src.read_u16();
                let codec = src.read_u16();
                let frame_type = src.read_u8();
                let x = src.read_i16();
                let y = src.read_i16();
                let w = src.read_u16();
                let h = src.read_u16();
                let nal_size = usize::from_u32_checked(src.read_u32())?;
                let chroma_size = usize::from_u32_checked(src.read_u32())?;
                if src.remaining().len() < nal_size + chroma_size {
                    return Err(DataMessageError::TruncatedBody { tag: "H264" });
                }
                let nal = src.read_slice(nal_size);
                let chroma = src.read_slice(chroma_size);
                Ok(Self::H264 {
                    frame_id,
                    surface_id,
                    codec,
                    frame_type,
                    x,
                    y,
                    w,
                    h,
                    nal,
                    chroma,
                })
            }
            b"DELT" => {
                if src.remaining().len() < 4 {
                    return Err(DataMessageError::TruncatedBody { tag: "DELT" });
                }
                let json_len = usize::from_u32_checked(src.read_u32())?;
                if src.remaining().len() < json_len {
                    return Err(DataMessageError::TruncatedBody { tag: "DELT" });
                }
                let json_bytes = src.read_slice(json_len);
                let rects: Vec<DeltaRect> = serde_json::from_slice::<DeltaMeta>(json_bytes)
                    .map(|meta| meta.rects)
                    .map_err(|_| DataMessageError::TruncatedBody { tag: "DELT" })?;
                Ok(Self::Delt {
                    rects,
                    tiles: src.read_remaining(),
                })
            }
            b"WebP" => Ok(Self::WebP(src.read_remaining())),
            b"JPEG" => Ok(Self::Jpeg(src.read_remaining())),
            b"SURF" => {
                if src.remaining().len() < 10 {
                    return Err(DataMessageError::TruncatedBody { tag: "SURF" });
                }
                Ok(Self::Surf {
                    surface_id: src.read_u16(),
                    width: src.read_u32(),
                    height: src.read_u32(),
                })
            }
            b"DELS" => {
                if src.remaining().len() < 2 {
                    return Err(DataMessageError::TruncatedBody { tag: "DELS" });
                }
                Ok(Self::Dels {
                    surface_id: src.read_u16(),
                })
            }
            b"STFR" => {
                if src.remaining().len() < 4 {
                    return Err(DataMessageError::TruncatedBody { tag: "STFR" });
                }
                Ok(Self::Stfr { frame_id: src.read_u32() })
            }
            b"ENFR" => {
                if src.remaining().len() < 4 {
                    return Err(DataMessageError::TruncatedBody { tag: "ENFR" });
                }
                Ok(Self::Enfr { frame_id: src.read_u32() })
            }
            b"PROG" => Ok(Self::Prog(src.read_remaining())),
            b"TILE" => {
                if src.remaining().len() < 10 {
                    return Err(DataMessageError::TruncatedBody { tag: "TILE" });
                }
                Ok(Self::Tile {
                    surface_id: src.read_u16(),
                    left: src.read_u16(),
                    top: src.read_u16(),
                    right: src.read_u16(),
                    bottom: src.read_u16(),
                    pixels: src.read_remaining(),
                })
            }
            b"SFIL" => {
                if src.remaining().len() < 13 {
                    return Err(DataMessageError::TruncatedBody { tag: "SFIL" });
                }
                Ok(Self::Sfil {
                    surface_id: src.read_u16(),
                    left: src.read_u16(),
                    top: src.read_u16(),
                    right: src.read_u16(),
                    bottom: src.read_u16(),
                    b: src.read_u8(),
                    g: src.read_u8(),
                    r: src.read_u8(),
                    a: src.read_u8(),
                })
            }
            b"S2SF" => {
                if src.remaining().len() < 16 {
                    return Err(DataMessageError::TruncatedBody { tag: "S2SF" });
                }
                Ok(Self::S2sf {
                    src_surface_id: src.read_u16(),
                    dst_surface_id: src.read_u16(),
                    src_left: src.read_u16(),
                    src_top: src.read_u16(),
                    src_right: src.read_u16(),
                    src_bottom: src.read_u16(),
                    dst_x: src.read_u16(),
                    dst_y: src.read_u16(),
                })
            }
            b"C2SF" => {
                if src.remaining().len() < 8 {
                    return Err(DataMessageError::TruncatedBody { tag: "C2SF" });
                }
                Ok(Self::C2sf {
                    cache_slot: src.read_u16(),
                    surface_id: src.read_u16(),
                    dst_x: src.read_u16(),
                    dst_y: src.read_u16(),
                })
            }
            other => Err(DataMessageError::UnknownTag(*other)),
        }
    }

    /// Encodes this message, prefixed with its 4-byte tag.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Opus { rate, channels, opus } => {
                buf.extend_from_slice(&tag_bytes("OPUS"));
                let mut body = vec![0u8; 8];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u32(*rate);
                dst.write_u16(*channels);
                #[expect(clippy::cast_possible_truncation, reason = "payload size bounded by caller")]
                dst.write_u16(opus.len() as u16);
                buf.extend_from_slice(&body);
                buf.extend_from_slice(opus);
            }
            Self::Audi { rate, channels, bits, pcm } => {
                buf.extend_from_slice(&tag_bytes("AUDI"));
                let mut body = vec![0u8; 8];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u32(*rate);
                dst.write_u16(*channels);
                dst.write_u16(*bits);
                buf.extend_from_slice(&body);
                buf.extend_from_slice(pcm);
            }
            Self::H264 {
                frame_id,
                surface_id,
                codec,
                frame_type,
                x,
                y,
                w,
                h,
                nal,
                chroma,
            } => {
                buf.extend_from_slice(&tag_bytes("H264"));
                let mut body = vec![0u8; 25];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u32(*frame_id);
                dst.write_u16(*surface_id);
                dst.write_u16(*codec);
                dst.write_u8(*frame_type);
                dst.write_i16(*x);
                dst.write_i16(*y);
                dst.write_u16(*w);
                dst.write_u16(*h);
                #[expect(clippy::cast_possible_truncation, reason = "NAL size bounded by MAX_FRAME_BYTES")]
                dst.write_u32(nal.len() as u32);
                #[expect(clippy::cast_possible_truncation, reason = "chroma size bounded by MAX_FRAME_BYTES")]
                dst.write_u32(chroma.len() as u32);
                buf.extend_from_slice(&body);
                buf.extend_from_slice(nal);
                buf.extend_from_slice(chroma);
            }
            Self::Delt { rects, tiles } => {
                buf.extend_from_slice(&tag_bytes("DELT"));
                #[expect(clippy::unwrap_used, reason = "DeltaMeta serializes infallibly")]
                let json = serde_json::to_vec(&DeltaMeta { rects: rects.clone() }).unwrap();
                let mut len_bytes = [0u8; 4];
                let mut dst = WriteCursor::new(&mut len_bytes);
                #[expect(clippy::cast_possible_truncation, reason = "json metadata bounded by practical limits")]
                dst.write_u32(json.len() as u32);
                buf.extend_from_slice(&len_bytes);
                buf.extend_from_slice(&json);
                buf.extend_from_slice(tiles);
            }
            Self::WebP(data) => {
                buf.extend_from_slice(&tag_bytes("WebP"));
                buf.extend_from_slice(data);
            }
            Self::Jpeg(data) => {
                buf.extend_from_slice(&tag_bytes("JPEG"));
                buf.extend_from_slice(data);
            }
            Self::Surf { surface_id, width, height } => {
                buf.extend_from_slice(&tag_bytes("SURF"));
                let mut body = vec![0u8; 10];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u16(*surface_id);
                dst.write_u32(*width);
                dst.write_u32(*height);
                buf.extend_from_slice(&body);
            }
            Self::Dels { surface_id } => {
                buf.extend_from_slice(&tag_bytes("DELS"));
                let mut body = vec![0u8; 2];
                WriteCursor::new(&mut body).write_u16(*surface_id);
                buf.extend_from_slice(&body);
            }
            Self::Stfr { frame_id } => {
                buf.extend_from_slice(&tag_bytes("STFR"));
                let mut body = vec![0u8; 4];
                WriteCursor::new(&mut body).write_u32(*frame_id);
                buf.extend_from_slice(&body);
            }
            Self::Enfr { frame_id } => {
                buf.extend_from_slice(&tag_bytes("ENFR"));
                let mut body = vec![0u8; 4];
                WriteCursor::new(&mut body).write_u32(*frame_id);
                buf.extend_from_slice(&body);
            }
            Self::Prog(data) => {
                buf.extend_from_slice(&tag_bytes("PROG"));
                buf.extend_from_slice(data);
            }
            Self::Tile {
                surface_id,
                left,
                top,
                right,
                bottom,
                pixels,
            } => {
                buf.extend_from_slice(&tag_bytes("TILE"));
                let mut body = vec![0u8; 10];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u16(*surface_id);
                dst.write_u16(*left);
                dst.write_u16(*top);
                dst.write_u16(*right);
                dst.write_u16(*bottom);
                buf.extend_from_slice(&body);
                buf.extend_from_slice(pixels);
            }
            Self::Sfil {
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
                buf.extend_from_slice(&tag_bytes("SFIL"));
                let mut body = vec![0u8; 13];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u16(*surface_id);
                dst.write_u16(*left);
                dst.write_u16(*top);
                dst.write_u16(*right);
                dst.write_u16(*bottom);
                dst.write_u8(*b);
                dst.write_u8(*g);
                dst.write_u8(*r);
                dst.write_u8(*a);
                buf.extend_from_slice(&body);
            }
            Self::S2sf {
                src_surface_id,
                dst_surface_id,
                src_left,
                src_top,
                src_right,
                src_bottom,
                dst_x,
                dst_y,
            } => {
                buf.extend_from_slice(&tag_bytes("S2SF"));
                let mut body = vec![0u8; 16];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u16(*src_surface_id);
                dst.write_u16(*dst_surface_id);
                dst.write_u16(*src_left);
                dst.write_u16(*src_top);
                dst.write_u16(*src_right);
                dst.write_u16(*src_bottom);
                dst.write_u16(*dst_x);
                dst.write_u16(*dst_y);
                buf.extend_from_slice(&body);
            }
            Self::C2sf {
                cache_slot,
                surface_id,
                dst_x,
                dst_y,
            } => {
                buf.extend_from_slice(&tag_bytes("C2SF"));
                let mut body = vec![0u8; 8];
                let mut dst = WriteCursor::new(&mut body);
                dst.write_u16(*cache_slot);
                dst.write_u16(*surface_id);
                dst.write_u16(*dst_x);
                dst.write_u16(*dst_y);
                buf.extend_from_slice(&body);
            }
        }
        buf
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct DeltaMeta {
    rects: Vec<DeltaRect>,
}

impl serde::Serialize for DeltaRect {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("DeltaRect", 5)?;
        s.serialize_field("x", &self.x)?;
        s.serialize_field("y", &self.y)?;
        s.serialize_field("w", &self.w)?;
        s.serialize_field("h", &self.h)?;
        s.serialize_field("size", &self.size)?;
        s.end()
    }
}

impl<'de> serde::Deserialize<'de> for DeltaRect {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct Raw {
            x: u32,
            y: u32,
            w: u32,
            h: u32,
            size: u32,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            x: raw.x,
            y: raw.y,
            w: raw.w,
            h: raw.h,
            size: raw.size,
        })
    }
}

trait UsizeFromU32Checked: Sized {
    fn from_u32_checked(value: u32) -> Result<Self, DataMessageError>;
}

impl UsizeFromU32Checked for usize {
    fn from_u32_checked(value: u32) -> Result<Self, DataMessageError> {
        usize::try_from(value).map_err(|_| DataMessageError::TruncatedBody { tag: "H264" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_round_trips() {
        let msg = DataMessage::H264 {
            frame_id: 7,
            surface_id: 1,
            codec: 0,
            frame_type: 1,
            x: -5,
            y: 10,
            w: 64,
            h: 64,
            nal: &[1, 2, 3],
            chroma: &[4, 5],
        };
        let encoded = msg.encode();
        let decoded = DataMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn sfil_round_trips() {
        let msg = DataMessage::Sfil {
            surface_id: 3,
            left: 0,
            top: 0,
            right: 9,
            bottom: 9,
            b: 1,
            g: 2,
            r: 3,
            a: 4,
        };
        let decoded = DataMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn dels_round_trips_at_6_bytes() {
        let msg = DataMessage::Dels { surface_id: 42 };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), 6);
        assert_eq!(DataMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn delt_round_trips_with_tiles() {
        let msg = DataMessage::Delt {
            rects: vec![DeltaRect { x: 0, y: 0, w: 10, h: 10, size: 100 }],
            tiles: &[9u8; 100],
        };
        let decoded = DataMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = DataMessage::decode(b"XXXX").unwrap_err();
        assert!(matches!(err, DataMessageError::UnknownTag(_)));
    }

    #[test]
    fn truncated_message_is_rejected() {
        let err = DataMessage::decode(b"H2").unwrap_err();
        assert!(matches!(err, DataMessageError::Truncated));
    }

    #[test]
    fn webp_passes_bitstream_through_unchanged() {
        let data = b"RIFF....WEBPVP8 ...";
        let mut buf = tag_bytes("WebP").to_vec();
        buf.extend_from_slice(data);
        let decoded = DataMessage::decode(&buf).unwrap();
        assert_eq!(decoded, DataMessage::WebP(data));
    }
}
