//! JPEG marker-level reading and writing for Ultra HDR containers.
//!
//! An Ultra HDR file is a primary JPEG followed by a second JPEG (the gain
//! map), tied together by a Multi-Picture Format index in the primary's APP2
//! segment and an XMP container directory in its APP1 segment.
//!
//! This module never touches entropy-coded data. It walks the marker
//! segments ahead of SOS, hands the structured ones to their parsers and
//! splices segments into freshly encoded JPEGs:
//!
//! | Segment | Read with | Written with |
//! |---|---|---|
//! | APP1 `Exif` | `kamadak-exif` | source bytes, orientation patched in place |
//! | APP1 XMP | `ultrahdr-core` `parse_xmp` | `create_xmp_app1_marker` |
//! | APP2 ISO 21496-1 | `ultrahdr-core` `deserialize_iso21496` | `create_iso_app2_marker` |
//! | APP2 `ICC_PROFILE` | chunk reassembly | chunking |
//! | APP2 `MPF` | `kamadak-exif` (TIFF IFD) | [`mpf_segment`] |
//! | other APPn | opaque | opaque, in source order |

use super::backend::BackendError;
use exif::experimental::Writer;
use exif::{Context, Field, In, Reader, Tag, Value};
use std::io::Cursor;
use std::ops::Range;
use ultrahdr_core::metadata::iso21496::{create_iso_app2_marker, deserialize_iso21496};
use ultrahdr_core::metadata::mpf::{MPF_IDENTIFIER, MPF_VERSION, MpImageType};
use ultrahdr_core::metadata::xmp::{
    CONTAINER_NAMESPACE, HDRGM_NAMESPACE, ITEM_NAMESPACE, create_xmp_app1_marker, parse_xmp,
};

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const APP2: u8 = 0xE2;
const APP14: u8 = 0xEE;
const APP15: u8 = 0xEF;

pub const EXIF_IDENTIFIER: &[u8] = b"Exif\0\0";
pub const XMP_IDENTIFIER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
pub const ICC_IDENTIFIER: &[u8] = b"ICC_PROFILE\0";
pub const ISO_IDENTIFIER: &[u8] = b"urn:iso:std:iso:ts:21496:-1\0";
/// APP14 Adobe carries the encoder's colour transform and must not outlive it.
const ADOBE_IDENTIFIER: &[u8] = b"Adobe";

const GAIN_MAP_ITEM: &str = r#"Item:Semantic="GainMap""#;
const ITEM_LENGTH: &str = r#"Item:Length=""#;

/// Largest payload a single marker segment can carry (length field minus itself).
const MAX_SEGMENT_PAYLOAD: usize = 0xFFFF - 2;
/// ICC chunk header: identifier + sequence number + chunk count.
const ICC_HEADER_LEN: usize = 14;
/// MP entries are 16 bytes: attribute, size, offset, two dependent-image slots.
const MP_ENTRY_LEN: usize = 16;

const MP_ENTRY: Tag = Tag(Context::Tiff, 0xB002);

const MPF_TAG_VERSION: u16 = 0xB000;
const MPF_TAG_NUMBER_OF_IMAGES: u16 = 0xB001;
const MPF_TAG_MP_ENTRY: u16 = 0xB002;
const TIFF_TYPE_SHORT: u16 = 3;
const TIFF_TYPE_LONG: u16 = 4;
const TIFF_TYPE_UNDEFINED: u16 = 7;
const TIFF_TAG_ORIENTATION: u16 = 0x0112;

/// Full size of the APP2 MPF segment written for two images: marker (2) +
/// length (2) + identifier (4) + TIFF header (8) + entry count (2) +
/// 3 IFD entries (36) + next-IFD offset (4) + 2 MP entries (32).
pub const MPF_SEGMENT_LEN: usize = 90;

fn malformed(msg: impl Into<String>) -> BackendError {
    BackendError::ProcessingFailed(msg.into())
}

// ---------------------------------------------------------------------------
// Segment scanning
// ---------------------------------------------------------------------------

/// One marker segment ahead of the scan data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub marker: u8,
    /// Offset of the `0xFF` that opens the segment.
    pub start: usize,
    /// Payload bytes, after the two-byte length field.
    pub payload: Range<usize>,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.payload.end
    }
}

/// Walk the marker segments from SOI up to (not including) SOS.
pub fn scan_segments(data: &[u8]) -> Result<Vec<Segment>, BackendError> {
    if data.get(..2) != Some(&[0xFF, SOI]) {
        return Err(malformed("not a JPEG stream (missing SOI)"));
    }

    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        let Some(&lead) = data.get(pos) else {
            return Err(malformed("JPEG stream ends before scan data"));
        };
        if lead != 0xFF {
            return Err(malformed(format!("expected marker at offset {pos}")));
        }
        // Fill bytes
        let Some(&marker) = data.get(pos + 1) else {
            return Err(malformed("JPEG stream ends inside a marker"));
        };
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == SOS || marker == EOI {
            return Ok(segments);
        }
        // Markers without length field
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            pos += 2;
            continue;
        }

        let len = read_be_u16(data, pos + 2)
            .ok_or_else(|| malformed("JPEG stream ends inside a segment length"))?
            as usize;
        let end = pos + 2 + len;
        if len < 2 || end > data.len() {
            return Err(malformed(format!(
                "segment 0x{marker:02X} at offset {pos} overruns the stream"
            )));
        }
        segments.push(Segment {
            marker,
            start: pos,
            payload: pos + 4..end,
        });
        pos = end;
    }
}

// ---------------------------------------------------------------------------
// Header reading
// ---------------------------------------------------------------------------

/// One image listed in an MPF index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpEntry {
    pub attribute: u32,
    pub size: u32,
    /// Absolute offset of the image in the file (0 for the primary).
    pub offset: usize,
}

/// An APPn segment kept as-is: marker plus payload, identifier included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSegment {
    pub marker: u8,
    pub payload: Vec<u8>,
}

/// Metadata segments found ahead of a JPEG's scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JpegHeader {
    /// TIFF structure from the EXIF APP1, identifier stripped.
    pub exif: Option<Vec<u8>>,
    /// XMP packet from the standard XMP APP1, identifier stripped.
    pub xmp: Option<Vec<u8>>,
    /// ISO 21496-1 block, identifier stripped.
    pub iso: Option<Vec<u8>>,
    /// ICC profile reassembled from its chunks.
    pub icc: Option<Vec<u8>>,
    pub mp_entries: Vec<MpEntry>,
    /// APPn segments with no dedicated field, in file order. JFIF/JFXX
    /// APP0 and Adobe APP14 are left out: the encoder writes its own.
    pub other_segments: Vec<AppSegment>,
}

impl JpegHeader {
    pub fn xmp_str(&self) -> Option<&str> {
        self.xmp.as_deref().and_then(|x| std::str::from_utf8(x).ok())
    }

    /// Whether the header carries gain-map rendering parameters: hdrgm
    /// values in the XMP or a complete ISO 21496-1 block.
    pub fn has_gain_map_metadata(&self) -> bool {
        self.xmp_str().is_some_and(is_gain_map_xmp)
            || self.iso.as_deref().is_some_and(is_gain_map_iso)
    }

    /// Whether the XMP container directory lists a `GainMap` item.
    pub fn lists_gain_map(&self) -> bool {
        self.xmp_str().is_some_and(|x| x.contains(GAIN_MAP_ITEM))
    }

    /// `Item:Length` of the directory's `GainMap` item.
    pub fn gain_map_length(&self) -> Option<usize> {
        let xmp = self.xmp_str()?;
        let item = &xmp[gain_map_item(xmp)?];
        item[item_length(item)?].parse().ok()
    }
}

/// XMP with hdrgm rendering parameters (not just the version marker).
pub fn is_gain_map_xmp(xmp: &str) -> bool {
    xmp.contains("hdrgm:GainMapMax") && parse_xmp(xmp).is_ok()
}

/// ISO 21496-1 block complete enough to render with (not version-only).
pub fn is_gain_map_iso(block: &[u8]) -> bool {
    deserialize_iso21496(block).is_ok()
}

/// Collect the metadata segments of a JPEG's header.
pub fn read_header(data: &[u8]) -> Result<JpegHeader, BackendError> {
    let mut header = JpegHeader::default();
    let mut icc_chunks: Vec<(u8, &[u8])> = Vec::new();
    let mut mpf_seen = false;

    for segment in scan_segments(data)? {
        let payload = &data[segment.payload.clone()];
        match segment.marker {
            APP0 => {}
            APP1 if payload.starts_with(EXIF_IDENTIFIER) && header.exif.is_none() => {
                header.exif = Some(payload[EXIF_IDENTIFIER.len()..].to_vec());
            }
            APP1 if payload.starts_with(XMP_IDENTIFIER) && header.xmp.is_none() => {
                header.xmp = Some(payload[XMP_IDENTIFIER.len()..].to_vec());
            }
            APP2 if payload.starts_with(ICC_IDENTIFIER) && payload.len() >= ICC_HEADER_LEN => {
                icc_chunks.push((payload[12], &payload[ICC_HEADER_LEN..]));
            }
            APP2 if payload.starts_with(ISO_IDENTIFIER) && header.iso.is_none() => {
                header.iso = Some(payload[ISO_IDENTIFIER.len()..].to_vec());
            }
            APP2 if payload.starts_with(MPF_IDENTIFIER) && !mpf_seen => {
                mpf_seen = true;
                // Secondary offsets are relative to the MPF TIFF header.
                let tiff_base = segment.payload.start + MPF_IDENTIFIER.len();
                header.mp_entries = read_mp_entries(&payload[MPF_IDENTIFIER.len()..], tiff_base)?;
            }
            APP14 if payload.starts_with(ADOBE_IDENTIFIER) => {}
            marker @ APP1..=APP15 => header.other_segments.push(AppSegment {
                marker,
                payload: payload.to_vec(),
            }),
            _ => {}
        }
    }

    if !icc_chunks.is_empty() {
        icc_chunks.sort_by_key(|(seq, _)| *seq);
        header.icc = Some(icc_chunks.iter().flat_map(|(_, c)| c.iter().copied()).collect());
    }
    Ok(header)
}

/// Read the MP entry table from an MPF TIFF structure.
///
/// Entries come from the bytes the IFD actually points at, so the declared
/// counts never size an allocation.
fn read_mp_entries(tiff: &[u8], tiff_base: usize) -> Result<Vec<MpEntry>, BackendError> {
    let index = Reader::new()
        .read_raw(tiff.to_vec())
        .map_err(|e| malformed(format!("MPF index is unreadable: {e}")))?;
    let field = index
        .get_field(MP_ENTRY, In::PRIMARY)
        .ok_or_else(|| malformed("MPF index has no MP entry tag"))?;
    let Value::Undefined(table, _) = &field.value else {
        return Err(malformed("MP entry tag is not an undefined-type array"));
    };

    let little_endian = index.little_endian();
    let word = |bytes: &[u8]| {
        let b = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        }
    };
    Ok(table
        .chunks_exact(MP_ENTRY_LEN)
        .enumerate()
        .map(|(i, entry)| MpEntry {
            attribute: word(&entry[0..4]),
            size: word(&entry[4..8]),
            offset: if i == 0 {
                0
            } else {
                tiff_base + word(&entry[8..12]) as usize
            },
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Image location
// ---------------------------------------------------------------------------

/// The primary codestream: the first MP entry, or the whole file.
pub fn primary_image<'a>(data: &'a [u8], header: &JpegHeader) -> &'a [u8] {
    match header.mp_entries.first() {
        Some(e) if e.size > 0 && (e.size as usize) <= data.len() => &data[..e.size as usize],
        _ => data,
    }
}

/// A secondary image from the MPF index.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryImage<'a> {
    pub data: &'a [u8],
    /// `None` when the image has no readable JPEG header.
    pub header: Option<JpegHeader>,
}

impl SecondaryImage<'_> {
    pub fn has_gain_map_metadata(&self) -> bool {
        self.header
            .as_ref()
            .is_some_and(JpegHeader::has_gain_map_metadata)
    }
}

/// Every non-empty secondary image listed in the MPF index.
pub fn secondary_images<'a>(
    data: &'a [u8],
    header: &JpegHeader,
) -> Result<Vec<SecondaryImage<'a>>, BackendError> {
    header
        .mp_entries
        .iter()
        .skip(1)
        .filter(|e| e.size > 0)
        .map(|e| {
            let image = data
                .get(e.offset..e.offset.saturating_add(e.size as usize))
                .ok_or_else(|| malformed("MPF entry points outside the file"))?;
            Ok(SecondaryImage {
                data: image,
                header: read_header(image).ok(),
            })
        })
        .collect()
}

/// Pick the gain map among the secondary images.
///
/// A secondary with its own gain-map metadata wins. Otherwise a secondary is
/// only taken when the primary's container directory lists a `GainMap` item;
/// the one whose size matches `Item:Length` is preferred. Anything else
/// (depth maps, MPF thumbnails) is not a gain map.
pub fn find_gain_map<'a>(
    primary: &JpegHeader,
    mut secondaries: Vec<SecondaryImage<'a>>,
) -> Option<SecondaryImage<'a>> {
    if let Some(at) = secondaries
        .iter()
        .position(SecondaryImage::has_gain_map_metadata)
    {
        return Some(secondaries.swap_remove(at));
    }
    if !primary.lists_gain_map() || secondaries.is_empty() {
        return None;
    }
    let at = primary
        .gain_map_length()
        .and_then(|len| secondaries.iter().position(|s| s.data.len() == len))
        .unwrap_or(0);
    Some(secondaries.swap_remove(at))
}

// ---------------------------------------------------------------------------
// EXIF orientation
// ---------------------------------------------------------------------------

/// EXIF orientation (tag 0x0112 in IFD0), if present.
pub fn read_orientation(tiff: &[u8]) -> Option<u16> {
    let exif = Reader::new().read_raw(tiff.to_vec()).ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .and_then(|v| u16::try_from(v).ok())
}

/// Rewrite the orientation tag in place. Returns `false` if the tag is absent.
///
/// Patching keeps every other byte of the source EXIF, maker notes included.
pub fn set_orientation(tiff: &mut [u8], value: u16) -> bool {
    let big_endian = match tiff.get(0..2) {
        Some(b"MM") => true,
        Some(b"II") => false,
        _ => return false,
    };
    let u16_at = |data: &[u8], at: usize| -> Option<u16> {
        let b = [*data.get(at)?, *data.get(at + 1)?];
        Some(if big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    };
    let u32_at = |data: &[u8], at: usize| -> Option<u32> {
        let b: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
        Some(if big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    };

    let Some(ifd) = u32_at(tiff, 4).map(|o| o as usize) else {
        return false;
    };
    let count = u16_at(tiff, ifd).unwrap_or(0) as usize;
    let entry = (0..count).map(|i| ifd + 2 + i * 12).find(|&at| {
        u16_at(tiff, at) == Some(TIFF_TAG_ORIENTATION)
            && u16_at(tiff, at + 2) == Some(TIFF_TYPE_SHORT)
            && u32_at(tiff, at + 4) == Some(1)
    });
    let Some(at) = entry.filter(|at| at + 10 <= tiff.len()) else {
        return false;
    };
    let bytes = if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    };
    tiff[at + 8..at + 10].copy_from_slice(&bytes);
    true
}

/// A big-endian TIFF structure carrying only the orientation tag.
pub fn minimal_exif(orientation: u16) -> Result<Vec<u8>, BackendError> {
    let field = Field {
        tag: Tag::Orientation,
        ifd_num: In::PRIMARY,
        value: Value::Short(vec![orientation]),
    };
    let mut writer = Writer::new();
    writer.push_field(&field);
    let mut out = Cursor::new(Vec::new());
    writer
        .write(&mut out, false)
        .map_err(|e| malformed(format!("cannot write EXIF: {e}")))?;
    Ok(out.into_inner())
}

// ---------------------------------------------------------------------------
// Segment building
// ---------------------------------------------------------------------------

fn check_payload(marker: u8, body: usize) -> Result<(), BackendError> {
    if body > MAX_SEGMENT_PAYLOAD {
        return Err(malformed(format!(
            "APP segment 0x{marker:02X} payload of {body} bytes exceeds {MAX_SEGMENT_PAYLOAD}"
        )));
    }
    Ok(())
}

/// Build an APPn segment: marker, length, identifier, payload.
pub fn app_segment(marker: u8, identifier: &[u8], payload: &[u8]) -> Result<Vec<u8>, BackendError> {
    let body = identifier.len() + payload.len();
    check_payload(marker, body)?;
    let mut seg = Vec::with_capacity(4 + body);
    seg.extend_from_slice(&[0xFF, marker]);
    seg.extend_from_slice(&((body + 2) as u16).to_be_bytes());
    seg.extend_from_slice(identifier);
    seg.extend_from_slice(payload);
    Ok(seg)
}

pub fn exif_segment(tiff: &[u8]) -> Result<Vec<u8>, BackendError> {
    app_segment(APP1, EXIF_IDENTIFIER, tiff)
}

pub fn xmp_segment(packet: &str) -> Result<Vec<u8>, BackendError> {
    check_payload(APP1, XMP_IDENTIFIER.len() + packet.len())?;
    Ok(create_xmp_app1_marker(packet))
}

pub fn iso_segment(block: &[u8]) -> Result<Vec<u8>, BackendError> {
    check_payload(APP2, ISO_IDENTIFIER.len() + block.len())?;
    Ok(create_iso_app2_marker(block))
}

/// Re-emit a kept APPn segment unchanged.
pub fn opaque_segment(marker: u8, payload: &[u8]) -> Result<Vec<u8>, BackendError> {
    app_segment(marker, &[], payload)
}

/// Split an ICC profile across as many APP2 segments as it needs.
pub fn icc_segments(profile: &[u8]) -> Result<Vec<Vec<u8>>, BackendError> {
    let chunk_len = MAX_SEGMENT_PAYLOAD - ICC_HEADER_LEN;
    let chunks: Vec<&[u8]> = profile.chunks(chunk_len).collect();
    let count = u8::try_from(chunks.len())
        .map_err(|_| malformed(format!("ICC profile of {} bytes is too large", profile.len())))?;

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut payload = Vec::with_capacity(2 + chunk.len());
            payload.push(i as u8 + 1);
            payload.push(count);
            payload.extend_from_slice(chunk);
            app_segment(APP2, ICC_IDENTIFIER, &payload)
        })
        .collect()
}

/// Build the APP2 MPF segment for a primary image plus one gain map.
///
/// `gain_map_offset` is relative to the start of the MPF TIFF header, and
/// the MP entry table starts right after the IFD's next-IFD pointer.
pub fn mpf_segment(primary_len: u32, gain_map_len: u32, gain_map_offset: u32) -> Vec<u8> {
    fn ifd_entry(buf: &mut Vec<u8>, tag: u16, typ: u16, count: u32, value: &[u8]) {
        buf.extend_from_slice(&tag.to_be_bytes());
        buf.extend_from_slice(&typ.to_be_bytes());
        buf.extend_from_slice(&count.to_be_bytes());
        buf.extend_from_slice(value);
    }
    fn mp_entry(buf: &mut Vec<u8>, attribute: MpImageType, size: u32, offset: u32) {
        buf.extend_from_slice(&(attribute as u32).to_be_bytes());
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&offset.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0, 0]);
    }

    let mut tiff = Vec::with_capacity(MPF_SEGMENT_LEN - 8);
    tiff.extend_from_slice(b"MM\x00\x2A");
    tiff.extend_from_slice(&8u32.to_be_bytes());
    tiff.extend_from_slice(&3u16.to_be_bytes());
    ifd_entry(&mut tiff, MPF_TAG_VERSION, TIFF_TYPE_UNDEFINED, 4, MPF_VERSION);
    ifd_entry(
        &mut tiff,
        MPF_TAG_NUMBER_OF_IMAGES,
        TIFF_TYPE_LONG,
        1,
        &2u32.to_be_bytes(),
    );
    let entries_at = tiff.len() as u32 + 12 + 4;
    ifd_entry(
        &mut tiff,
        MPF_TAG_MP_ENTRY,
        TIFF_TYPE_UNDEFINED,
        2 * MP_ENTRY_LEN as u32,
        &entries_at.to_be_bytes(),
    );
    tiff.extend_from_slice(&0u32.to_be_bytes());
    mp_entry(&mut tiff, MpImageType::BaselinePrimary, primary_len, 0);
    mp_entry(
        &mut tiff,
        MpImageType::DependentChild,
        gain_map_len,
        gain_map_offset,
    );

    let mut seg = Vec::with_capacity(MPF_SEGMENT_LEN);
    seg.extend_from_slice(&[0xFF, APP2]);
    seg.extend_from_slice(&((2 + MPF_IDENTIFIER.len() + tiff.len()) as u16).to_be_bytes());
    seg.extend_from_slice(MPF_IDENTIFIER);
    seg.extend_from_slice(&tiff);
    seg
}

// ---------------------------------------------------------------------------
// XMP container directory
// ---------------------------------------------------------------------------

/// XMP for a primary image whose source had none: gain-map version plus
/// the container directory. Rendering parameters live with the gain map.
pub fn primary_xmp(gain_map_len: usize) -> String {
    format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="hdr-resize">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:hdrgm="{HDRGM_NAMESPACE}"
        xmlns:Container="{CONTAINER_NAMESPACE}"
        xmlns:Item="{ITEM_NAMESPACE}"
        hdrgm:Version="1.0">
      <Container:Directory>
        <rdf:Seq>
          <rdf:li rdf:parseType="Resource">
            <Container:Item Item:Semantic="Primary" Item:Mime="image/jpeg"/>
          </rdf:li>
          <rdf:li rdf:parseType="Resource">
            <Container:Item Item:Semantic="GainMap" Item:Mime="image/jpeg" Item:Length="{gain_map_len}"/>
          </rdf:li>
        </rdf:Seq>
      </Container:Directory>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>"#
    )
}

/// Byte range of the directory's `GainMap` item element, `<` up to `>`.
fn gain_map_item(xmp: &str) -> Option<Range<usize>> {
    let semantic = xmp.find(GAIN_MAP_ITEM)?;
    let start = xmp[..semantic].rfind('<')?;
    let end = semantic + xmp[semantic..].find('>')?;
    Some(start..end)
}

/// Byte range of the `Item:Length` value inside an item element.
fn item_length(item: &str) -> Option<Range<usize>> {
    let start = item.find(ITEM_LENGTH)? + ITEM_LENGTH.len();
    let end = start + item[start..].find('"')?;
    Some(start..end)
}

/// Set `Item:Length` on the directory's `GainMap` item, keeping the rest of
/// the packet byte for byte. `None` when no attribute-form `GainMap` item
/// exists.
pub fn with_gain_map_length(xmp: &str, gain_map_len: usize) -> Option<String> {
    let range = gain_map_item(xmp)?;
    let item = &xmp[range.clone()];

    let rewritten = match item_length(item) {
        Some(value) => format!("{}{gain_map_len}{}", &item[..value.start], &item[value.end..]),
        None => {
            let body = item.strip_suffix('/').unwrap_or(item);
            let tail = &item[body.len()..];
            format!("{} Item:Length=\"{gain_map_len}\"{tail}", body.trim_end())
        }
    };
    Some(format!("{}{rewritten}{}", &xmp[..range.start], &xmp[range.end..]))
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Offset just past SOI and a leading JFIF APP0, where new segments go.
fn insertion_point(jpeg: &[u8]) -> Result<usize, BackendError> {
    let segments = scan_segments(jpeg)?;
    Ok(match segments.first() {
        Some(s) if s.marker == APP0 && s.start == 2 => s.end(),
        _ => 2,
    })
}

/// Splice `segments` into an encoded JPEG after SOI (and APP0).
pub fn insert_segments(jpeg: &[u8], segments: &[Vec<u8>]) -> Result<Vec<u8>, BackendError> {
    let at = insertion_point(jpeg)?;
    let extra: usize = segments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(jpeg.len() + extra);
    out.extend_from_slice(&jpeg[..at]);
    for seg in segments {
        out.extend_from_slice(seg);
    }
    out.extend_from_slice(&jpeg[at..]);
    Ok(out)
}

/// Build the final multi-picture file.
///
/// `segments` go into the primary ahead of a generated MPF segment; the
/// gain-map JPEG is appended after the primary's EOI.
pub fn assemble(
    primary_jpeg: &[u8],
    segments: &[Vec<u8>],
    gain_map_jpeg: &[u8],
) -> Result<Vec<u8>, BackendError> {
    let at = insertion_point(primary_jpeg)?;
    let extra: usize = segments.iter().map(Vec::len).sum();
    let mpf_start = at + extra;
    let primary_len = primary_jpeg.len() + extra + MPF_SEGMENT_LEN;
    let tiff_header = mpf_start + 4 + MPF_IDENTIFIER.len();

    let too_large = |_| malformed("output exceeds the 4 GiB MPF limit");
    let mpf = mpf_segment(
        u32::try_from(primary_len).map_err(too_large)?,
        u32::try_from(gain_map_jpeg.len()).map_err(too_large)?,
        u32::try_from(primary_len - tiff_header).map_err(too_large)?,
    );

    let mut out = Vec::with_capacity(primary_len + gain_map_jpeg.len());
    out.extend_from_slice(&primary_jpeg[..at]);
    for seg in segments {
        out.extend_from_slice(seg);
    }
    out.extend_from_slice(&mpf);
    out.extend_from_slice(&primary_jpeg[at..]);
    out.extend_from_slice(gain_map_jpeg);
    Ok(out)
}

fn read_be_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_be_bytes(data.get(offset..offset + 2)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::GAIN_MAP_XMP;
    use ultrahdr_core::GainMapMetadata;
    use ultrahdr_core::metadata::iso21496::serialize_iso21496;

    /// SOI, JFIF APP0, a DQT-ish segment, SOS with a few scan bytes, EOI.
    fn fake_jpeg(scan: &[u8]) -> Vec<u8> {
        let mut j = vec![0xFF, SOI];
        j.extend_from_slice(&[0xFF, APP0, 0x00, 0x07, b'J', b'F', b'I', b'F', 0]);
        j.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x04, 0xAA, 0xBB]);
        j.extend_from_slice(&[0xFF, SOS, 0x00, 0x02]);
        j.extend_from_slice(scan);
        j.extend_from_slice(&[0xFF, EOI]);
        j
    }

    fn with_segments(scan: &[u8], segments: &[Vec<u8>]) -> Vec<u8> {
        insert_segments(&fake_jpeg(scan), segments).unwrap()
    }

    /// A two-image MPF file; the primary carries `primary_segments`.
    fn multi_picture(primary_segments: &[Vec<u8>], secondary: &[u8]) -> Vec<u8> {
        assemble(&fake_jpeg(&[1, 2, 3]), primary_segments, secondary).unwrap()
    }

    // =========================================================================
    // scan_segments
    // =========================================================================

    #[test]
    fn scan_stops_at_sos() {
        let j = fake_jpeg(&[1, 2, 3]);
        let segs = scan_segments(&j).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].marker, APP0);
        assert_eq!(segs[0].start, 2);
        assert_eq!(&j[segs[0].payload.clone()], b"JFIF\0");
        assert_eq!(segs[1].marker, 0xDB);
    }

    #[test]
    fn scan_rejects_non_jpeg() {
        assert!(scan_segments(b"\x89PNG\r\n").is_err());
        assert!(scan_segments(&[]).is_err());
    }

    #[test]
    fn scan_rejects_overrunning_segment() {
        let j = vec![0xFF, SOI, 0xFF, APP1, 0x01, 0x00, 0x00];
        assert!(scan_segments(&j).is_err());
    }

    #[test]
    fn scan_rejects_stream_without_scan() {
        let j = vec![0xFF, SOI, 0xFF, APP1, 0x00, 0x02];
        assert!(scan_segments(&j).is_err());
    }

    // =========================================================================
    // read_header
    // =========================================================================

    #[test]
    fn unknown_app_segments_are_kept_in_order() {
        let iptc = app_segment(0xED, b"Photoshop 3.0\0", b"8BIM-data").unwrap();
        let ducky = app_segment(0xEC, b"Ducky", &[0, 1, 0, 4]).unwrap();
        let adobe = app_segment(APP14, ADOBE_IDENTIFIER, &[0, 100, 0, 0, 0, 0, 1]).unwrap();
        let j = with_segments(&[0], &[iptc, adobe, ducky]);

        let header = read_header(&j).unwrap();
        assert_eq!(
            header.other_segments,
            vec![
                AppSegment {
                    marker: 0xED,
                    payload: b"Photoshop 3.0\x008BIM-data".to_vec(),
                },
                AppSegment {
                    marker: 0xEC,
                    payload: b"Ducky\x00\x01\x00\x04".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn opaque_segment_reproduces_source_bytes() {
        let iptc = app_segment(0xED, b"Photoshop 3.0\0", b"8BIM").unwrap();
        let header = read_header(&with_segments(&[0], std::slice::from_ref(&iptc))).unwrap();
        let kept = &header.other_segments[0];
        assert_eq!(opaque_segment(kept.marker, &kept.payload).unwrap(), iptc);
    }

    #[test]
    fn iso_block_is_separated_from_other_segments() {
        let block = serialize_iso21496(&GainMapMetadata::new());
        let j = with_segments(&[0], &[iso_segment(&block).unwrap()]);
        let header = read_header(&j).unwrap();
        assert_eq!(header.iso, Some(block));
        assert!(header.other_segments.is_empty());
        assert!(header.has_gain_map_metadata());
    }

    #[test]
    fn version_only_iso_block_is_not_gain_map_metadata() {
        let j = with_segments(&[0], &[iso_segment(&[0, 0, 0, 0]).unwrap()]);
        assert!(!read_header(&j).unwrap().has_gain_map_metadata());
    }

    #[test]
    fn hdrgm_parameters_are_gain_map_metadata() {
        let j = with_segments(&[0], &[xmp_segment(GAIN_MAP_XMP).unwrap()]);
        assert!(read_header(&j).unwrap().has_gain_map_metadata());
    }

    #[test]
    fn directory_xmp_is_not_gain_map_metadata() {
        let j = with_segments(&[0], &[xmp_segment(&primary_xmp(10)).unwrap()]);
        let header = read_header(&j).unwrap();
        assert!(!header.has_gain_map_metadata());
        assert!(header.lists_gain_map());
        assert_eq!(header.gain_map_length(), Some(10));
    }

    // =========================================================================
    // MPF index
    // =========================================================================

    #[test]
    fn mpf_segment_has_fixed_size() {
        let seg = mpf_segment(1000, 200, 900);
        assert_eq!(seg.len(), MPF_SEGMENT_LEN);
        assert_eq!(&seg[4..8], MPF_IDENTIFIER);
    }

    #[test]
    fn mpf_entries_read_back() {
        let seg = mpf_segment(1000, 200, 900);
        let entries = read_mp_entries(&seg[8..], 100).unwrap();
        assert_eq!(
            entries,
            vec![
                MpEntry {
                    attribute: MpImageType::BaselinePrimary as u32,
                    size: 1000,
                    offset: 0,
                },
                MpEntry {
                    attribute: MpImageType::DependentChild as u32,
                    size: 200,
                    offset: 1000,
                },
            ]
        );
    }

    #[test]
    fn mpf_with_huge_declared_counts_is_rejected_without_allocating() {
        let mut seg = mpf_segment(1000, 200, 900);
        // Number of images (value field of the second IFD entry).
        seg[8 + 10 + 12 + 8..8 + 10 + 12 + 12].copy_from_slice(&u32::MAX.to_be_bytes());
        // MP entry byte count (count field of the third IFD entry).
        seg[8 + 10 + 24 + 4..8 + 10 + 24 + 8].copy_from_slice(&0xFFFF_FFF0u32.to_be_bytes());
        assert!(read_mp_entries(&seg[8..], 0).is_err());
    }

    #[test]
    fn mpf_without_entry_tag_is_rejected() {
        let tiff = b"MM\x00\x2A\x00\x00\x00\x08\x00\x00\x00\x00\x00\x00";
        assert!(read_mp_entries(tiff, 0).is_err());
    }

    // =========================================================================
    // Gain-map classification
    // =========================================================================

    #[test]
    fn secondary_with_hdrgm_is_the_gain_map() {
        let gain_map = with_segments(&[9], &[xmp_segment(GAIN_MAP_XMP).unwrap()]);
        let file = multi_picture(&[], &gain_map);
        let header = read_header(&file).unwrap();

        let found = find_gain_map(&header, secondary_images(&file, &header).unwrap()).unwrap();
        assert_eq!(found.data, gain_map.as_slice());
        assert!(found.has_gain_map_metadata());
    }

    #[test]
    fn secondary_without_gain_map_metadata_is_ignored() {
        let depth_map = fake_jpeg(&[9, 9]);
        let file = multi_picture(&[], &depth_map);
        let header = read_header(&file).unwrap();

        let secondaries = secondary_images(&file, &header).unwrap();
        assert_eq!(secondaries.len(), 1);
        assert_eq!(find_gain_map(&header, secondaries), None);
    }

    #[test]
    fn directory_listing_selects_secondary_by_length() {
        let thumbnail = fake_jpeg(&[1]);
        let gain_map = fake_jpeg(&[2, 2, 2, 2]);
        let mut tail = thumbnail.clone();
        tail.extend_from_slice(&gain_map);
        let file = multi_picture(&[xmp_segment(&primary_xmp(gain_map.len())).unwrap()], &tail);

        // Index both images that follow the primary.
        let mut header = read_header(&file).unwrap();
        let first = header.mp_entries[1];
        header.mp_entries[1].size = thumbnail.len() as u32;
        header.mp_entries.push(MpEntry {
            attribute: MpImageType::DependentChild as u32,
            size: gain_map.len() as u32,
            offset: first.offset + thumbnail.len(),
        });

        let found = find_gain_map(&header, secondary_images(&file, &header).unwrap()).unwrap();
        assert_eq!(found.data, gain_map.as_slice());
        assert!(!found.has_gain_map_metadata());
    }

    #[test]
    fn plain_jpeg_has_no_secondaries() {
        let j = fake_jpeg(&[1]);
        let header = read_header(&j).unwrap();
        assert_eq!(primary_image(&j, &header), j.as_slice());
        assert!(secondary_images(&j, &header).unwrap().is_empty());
    }

    #[test]
    fn entry_outside_file_is_an_error() {
        let header = JpegHeader {
            mp_entries: vec![
                MpEntry {
                    attribute: MpImageType::BaselinePrimary as u32,
                    size: 4,
                    offset: 0,
                },
                MpEntry {
                    attribute: MpImageType::DependentChild as u32,
                    size: 100,
                    offset: 4,
                },
            ],
            ..JpegHeader::default()
        };
        assert!(secondary_images(&[0u8; 10], &header).is_err());
    }

    // =========================================================================
    // EXIF orientation
    // =========================================================================

    #[test]
    fn minimal_exif_carries_orientation() {
        let tiff = minimal_exif(6).unwrap();
        assert_eq!(&tiff[..2], b"MM");
        assert_eq!(read_orientation(&tiff), Some(6));
    }

    #[test]
    fn set_orientation_rewrites_in_place() {
        let mut tiff = minimal_exif(1).unwrap();
        assert!(set_orientation(&mut tiff, 8));
        assert_eq!(read_orientation(&tiff), Some(8));
    }

    #[test]
    fn orientation_little_endian() {
        let mut tiff = vec![b'I', b'I', 0x2A, 0x00, 0x08, 0, 0, 0];
        tiff.extend_from_slice(&[1, 0]);
        tiff.extend_from_slice(&[0x12, 0x01, 0x03, 0x00, 0x01, 0, 0, 0, 0x03, 0x00, 0, 0]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(read_orientation(&tiff), Some(3));
        assert!(set_orientation(&mut tiff, 5));
        assert_eq!(read_orientation(&tiff), Some(5));
    }

    #[test]
    fn orientation_absent() {
        let mut tiff = b"MM\x00\x2A\x00\x00\x00\x08\x00\x00\x00\x00\x00\x00".to_vec();
        assert_eq!(read_orientation(&tiff), None);
        assert!(!set_orientation(&mut tiff, 6));
        assert_eq!(read_orientation(b"garbage"), None);
    }

    // =========================================================================
    // Segment building
    // =========================================================================

    #[test]
    fn app_segment_length_counts_itself() {
        let seg = app_segment(APP1, b"ID\0", b"abc").unwrap();
        assert_eq!(&seg[..4], &[0xFF, APP1, 0x00, 8]);
        assert_eq!(&seg[4..], b"ID\0abc");
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let payload = vec![0u8; MAX_SEGMENT_PAYLOAD];
        assert!(app_segment(APP1, b"x", &payload).is_err());
        assert!(iso_segment(&payload).is_err());
        assert!(xmp_segment(&"x".repeat(MAX_SEGMENT_PAYLOAD)).is_err());
    }

    #[test]
    fn icc_profile_is_chunked() {
        let profile: Vec<u8> = (0..150_000u32).map(|i| i as u8).collect();
        let segs = icc_segments(&profile).unwrap();
        assert_eq!(segs.len(), 3);
        for (i, seg) in segs.iter().enumerate() {
            assert_eq!(&seg[4..16], ICC_IDENTIFIER);
            assert_eq!(seg[16], i as u8 + 1);
            assert_eq!(seg[17], 3);
        }

        let j = insert_segments(&fake_jpeg(&[0]), &segs).unwrap();
        assert_eq!(read_header(&j).unwrap().icc, Some(profile));
    }

    // =========================================================================
    // XMP container directory
    // =========================================================================

    #[test]
    fn primary_xmp_lists_gain_map_length() {
        let xmp = primary_xmp(12345);
        assert!(xmp.contains(r#"hdrgm:Version="1.0""#));
        assert!(xmp.contains(GAIN_MAP_ITEM));
        assert!(xmp.contains(r#"Item:Length="12345""#));
        assert!(!is_gain_map_xmp(&xmp));
    }

    #[test]
    fn gain_map_length_is_replaced() {
        let xmp = primary_xmp(12345);
        let updated = with_gain_map_length(&xmp, 678).unwrap();
        assert!(updated.contains(r#"Item:Length="678""#));
        assert!(!updated.contains("12345"));
        assert_eq!(updated.len(), xmp.len() - 2);
    }

    #[test]
    fn gain_map_length_is_added_when_absent() {
        let xmp = r#"<rdf:li><Container:Item Item:Semantic="GainMap" Item:Mime="image/jpeg"/></rdf:li>"#;
        assert_eq!(
            with_gain_map_length(xmp, 42).unwrap(),
            r#"<rdf:li><Container:Item Item:Semantic="GainMap" Item:Mime="image/jpeg" Item:Length="42"/></rdf:li>"#
        );
    }

    #[test]
    fn primary_item_length_is_untouched() {
        let xmp = r#"<Container:Item Item:Semantic="Primary" Item:Length="0"/><Container:Item Item:Semantic="GainMap" Item:Length="5"/>"#;
        let header = JpegHeader {
            xmp: Some(xmp.as_bytes().to_vec()),
            ..JpegHeader::default()
        };
        assert_eq!(header.gain_map_length(), Some(5));
        assert_eq!(
            with_gain_map_length(xmp, 7).unwrap(),
            r#"<Container:Item Item:Semantic="Primary" Item:Length="0"/><Container:Item Item:Semantic="GainMap" Item:Length="7"/>"#
        );
    }

    #[test]
    fn xmp_without_directory_is_left_alone() {
        assert_eq!(with_gain_map_length(GAIN_MAP_XMP, 7), None);
    }

    // =========================================================================
    // Assembly
    // =========================================================================

    #[test]
    fn insert_goes_after_app0() {
        let j = fake_jpeg(&[7]);
        let seg = exif_segment(&minimal_exif(6).unwrap()).unwrap();
        let out = insert_segments(&j, std::slice::from_ref(&seg)).unwrap();
        assert_eq!(&out[11..11 + seg.len()], seg.as_slice());
        let header = read_header(&out).unwrap();
        assert_eq!(header.exif.as_deref().and_then(read_orientation), Some(6));
    }

    #[test]
    fn assembled_file_points_at_gain_map() {
        let primary = fake_jpeg(&[1, 2, 3, 4]);
        let gain_map = with_segments(&[9, 9], &[xmp_segment(GAIN_MAP_XMP).unwrap()]);
        let segments = vec![
            exif_segment(&minimal_exif(1).unwrap()).unwrap(),
            xmp_segment(&primary_xmp(gain_map.len())).unwrap(),
        ];
        let out = assemble(&primary, &segments, &gain_map).unwrap();

        let header = read_header(&out).unwrap();
        assert_eq!(header.mp_entries.len(), 2);
        assert_eq!(header.gain_map_length(), Some(gain_map.len()));

        let p = primary_image(&out, &header);
        assert_eq!(p.len(), out.len() - gain_map.len());
        assert_eq!(&p[p.len() - 2..], &[0xFF, EOI]);
        let found = find_gain_map(&header, secondary_images(&out, &header).unwrap()).unwrap();
        assert_eq!(found.data, gain_map.as_slice());
    }
}
