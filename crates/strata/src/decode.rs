//! # Decoder
//!
//! Turns downloaded or cached bytes into a [`Resource`]. The default decoder
//! does not touch pixels: it recognises the container and reads header
//! dimensions where the format makes that trivial.

use bytes::Bytes;

use crate::context::RequestContext;
use crate::error::DecodeError;
use crate::options::RequestOptions;
use crate::resource::{MediaType, PixelSize, Resource};

pub trait ResourceDecoder: Send + Sync {
    /// Decode a complete payload
    fn decode(
        &self,
        data: &Bytes,
        options: RequestOptions,
        context: &RequestContext,
    ) -> Result<Resource, DecodeError>;

    /// Decode an incomplete payload received so far. `None` when nothing
    /// presentable can be produced yet.
    fn decode_partial(
        &self,
        data: &Bytes,
        options: RequestOptions,
        context: &RequestContext,
    ) -> Option<Resource>;
}

/// Header-sniffing decoder
#[derive(Debug, Clone, Default)]
pub struct DefaultDecoder {
    /// Reject payloads whose container cannot be recognised
    pub strict: bool,
}

impl DefaultDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }
}

impl ResourceDecoder for DefaultDecoder {
    fn decode(
        &self,
        data: &Bytes,
        _options: RequestOptions,
        _context: &RequestContext,
    ) -> Result<Resource, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let media_type = MediaType::sniff(data);
        if self.strict && media_type == MediaType::Unknown {
            return Err(DecodeError::Unsupported("unrecognised container".to_string()));
        }

        let pixel_size = header_dimensions(media_type, data)?;
        Ok(Resource::decoded(data.clone(), media_type, pixel_size))
    }

    fn decode_partial(
        &self,
        data: &Bytes,
        options: RequestOptions,
        context: &RequestContext,
    ) -> Option<Resource> {
        // A partial rendition needs at least a recognisable header
        let resource = self.decode(data, options, context).ok()?;
        if resource.media_type() == MediaType::Unknown {
            return None;
        }
        Some(resource.with_partial(true))
    }
}

fn header_dimensions(media_type: MediaType, data: &[u8]) -> Result<Option<PixelSize>, DecodeError> {
    match media_type {
        MediaType::Png => {
            if data.len() < 24 {
                return Ok(None);
            }
            if &data[12..16] != b"IHDR" {
                return Err(DecodeError::Malformed("PNG without IHDR chunk".to_string()));
            }
            let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
            let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            Ok(Some(PixelSize::new(width, height)))
        }
        MediaType::Gif => {
            if data.len() < 10 {
                return Ok(None);
            }
            let width = u16::from_le_bytes([data[6], data[7]]) as u32;
            let height = u16::from_le_bytes([data[8], data[9]]) as u32;
            Ok(Some(PixelSize::new(width, height)))
        }
        _ => Ok(None),
    }
}
