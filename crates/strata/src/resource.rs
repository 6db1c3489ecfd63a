//! # Resources
//!
//! The decoded form of a loaded payload, as handed to callers and memory
//! tiers. Pixel decoding is out of scope; a resource carries the payload
//! together with whatever the decoder could learn from its header.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Container format recognised from the leading bytes of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MediaType {
    Png,
    Jpeg,
    Gif,
    Webp,
    Heic,
    Tiff,
    Bmp,
    Ico,
    Svg,
    Pdf,
    #[default]
    Unknown,
}

impl MediaType {
    /// Detect the container format from magic bytes.
    pub fn sniff(data: &[u8]) -> Self {
        match data {
            [0x89, b'P', b'N', b'G', ..] => MediaType::Png,
            [0xFF, 0xD8, 0xFF, ..] => MediaType::Jpeg,
            [b'G', b'I', b'F', b'8', ..] => MediaType::Gif,
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => MediaType::Tiff,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => MediaType::Webp,
            [_, _, _, _, b'f', b't', b'y', b'p', brand @ ..] if brand.len() >= 4 => {
                match &brand[..4] {
                    b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" | b"msf1" => MediaType::Heic,
                    _ => MediaType::Unknown,
                }
            }
            [0x00, 0x00, 0x01, 0x00, ..] => MediaType::Ico,
            [b'B', b'M', ..] => MediaType::Bmp,
            [b'%', b'P', b'D', b'F', ..] => MediaType::Pdf,
            _ if looks_like_svg(data) => MediaType::Svg,
            _ => MediaType::Unknown,
        }
    }

    /// MIME type for the format
    pub fn mime(&self) -> Option<&'static str> {
        match self {
            MediaType::Png => Some("image/png"),
            MediaType::Jpeg => Some("image/jpeg"),
            MediaType::Gif => Some("image/gif"),
            MediaType::Webp => Some("image/webp"),
            MediaType::Heic => Some("image/heic"),
            MediaType::Tiff => Some("image/tiff"),
            MediaType::Bmp => Some("image/bmp"),
            MediaType::Ico => Some("image/x-icon"),
            MediaType::Svg => Some("image/svg+xml"),
            MediaType::Pdf => Some("application/pdf"),
            MediaType::Unknown => None,
        }
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
            MediaType::Gif => "gif",
            MediaType::Webp => "webp",
            MediaType::Heic => "heic",
            MediaType::Tiff => "tiff",
            MediaType::Bmp => "bmp",
            MediaType::Ico => "ico",
            MediaType::Svg => "svg",
            MediaType::Pdf => "pdf",
            MediaType::Unknown => "bin",
        }
    }
}

fn looks_like_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(256)];
    head.windows(4).any(|w| w.eq_ignore_ascii_case(b"<svg"))
}

/// A loaded resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    payload: Bytes,
    media_type: MediaType,
    pixel_size: Option<PixelSize>,
    transform_key: Option<String>,
    partial: bool,
    decoded: bool,
}

impl Resource {
    /// Wrap a payload without decoding it. The media type is still sniffed.
    pub fn raw(payload: Bytes) -> Self {
        Self {
            media_type: MediaType::sniff(&payload),
            payload,
            pixel_size: None,
            transform_key: None,
            partial: false,
            decoded: false,
        }
    }

    /// Build a decoded resource
    pub fn decoded(payload: Bytes, media_type: MediaType, pixel_size: Option<PixelSize>) -> Self {
        Self {
            payload,
            media_type,
            pixel_size,
            transform_key: None,
            partial: false,
            decoded: true,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn pixel_size(&self) -> Option<PixelSize> {
        self.pixel_size
    }

    /// Key of the transformer that produced this resource, if any
    pub fn transform_key(&self) -> Option<&str> {
        self.transform_key.as_deref()
    }

    /// Whether this is a progressive, not yet complete, rendition
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    /// Size in bytes of the payload
    pub fn byte_size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Replace the payload, keeping the remaining attributes
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_pixel_size(mut self, pixel_size: Option<PixelSize>) -> Self {
        self.pixel_size = pixel_size;
        self
    }

    /// Tag the resource as the product of the given transformer
    pub fn with_transform_key(mut self, key: impl Into<String>) -> Self {
        self.transform_key = Some(key.into());
        self
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(MediaType::sniff(b"\x89PNG\r\n\x1a\n"), MediaType::Png);
        assert_eq!(MediaType::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), MediaType::Jpeg);
        assert_eq!(MediaType::sniff(b"GIF89a"), MediaType::Gif);
        assert_eq!(MediaType::sniff(b"RIFF\0\0\0\0WEBPVP8 "), MediaType::Webp);
        assert_eq!(MediaType::sniff(b"\0\0\0\x18ftypheic"), MediaType::Heic);
        assert_eq!(MediaType::sniff(b"%PDF-1.7"), MediaType::Pdf);
        assert_eq!(
            MediaType::sniff(b"<?xml version=\"1.0\"?><svg xmlns=\"\"/>"),
            MediaType::Svg
        );
        assert_eq!(MediaType::sniff(b"PNGDATA"), MediaType::Unknown);
        assert_eq!(MediaType::sniff(b""), MediaType::Unknown);
    }

    #[test]
    fn test_raw_resource_is_not_decoded() {
        let resource = Resource::raw(Bytes::from_static(b"GIF89a"));
        assert!(!resource.is_decoded());
        assert_eq!(resource.media_type(), MediaType::Gif);
        assert_eq!(resource.transform_key(), None);
        assert_eq!(resource.byte_size(), 6);
    }
}
