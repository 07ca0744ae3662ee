//! VNC encoding implementations.
//!
//! This module provides the rectangle encoders for framebuffer
//! transmission: Raw, CopyRect, RRE and Hextile. Each encoder is a pure
//! function from a BGRA sub-rectangle to the encoded payload; the
//! per-rectangle header (`x, y, w, h, encoding`) is written by the
//! session.

use bytes::BytesMut;

use crate::protocol::{PixelFormat, ENCODING_HEXTILE, ENCODING_RAW, ENCODING_RRE};

pub mod common;
pub mod copyrect;
pub mod hextile;
pub mod raw;
pub mod rre;

// Re-export encoding implementations
pub use copyrect::encode_copy_rect;
pub use hextile::HextileEncoding;
pub use raw::RawEncoding;
pub use rre::RreEncoding;

/// A trait defining the interface for VNC encoding implementations.
///
/// Implementations transform a BGRA sub-rectangle into the encoded payload
/// bytes for one `FramebufferUpdate` rectangle, serializing pixels under
/// the pixel format the client negotiated.
pub trait Encoding: Send {
    /// Encodes a BGRA sub-rectangle into a VNC-compatible byte stream.
    ///
    /// # Arguments
    ///
    /// * `data` - The sub-rectangle's pixel data (BGRA, 4 bytes per pixel,
    ///   row-major).
    /// * `width` - The width of the sub-rectangle.
    /// * `height` - The height of the sub-rectangle.
    /// * `format` - The pixel format negotiated with the client.
    ///
    /// # Returns
    ///
    /// A `BytesMut` containing the encoded payload.
    fn encode(&self, data: &[u8], width: u16, height: u16, format: &PixelFormat) -> BytesMut;
}

/// Creates an encoder instance for the specified encoding type.
///
/// This factory function returns a boxed trait object implementing the
/// `Encoding` trait for the requested encoding type. CopyRect is not a
/// pixel encoder (the caller supplies source coordinates, see
/// [`encode_copy_rect`]) and pseudo-encodings carry no pixel data, so
/// neither appears here.
///
/// # Arguments
///
/// * `encoding_type` - The RFB encoding type constant.
///
/// # Returns
///
/// `Some(Box<dyn Encoding>)` if the encoding type is supported, `None` otherwise.
#[must_use]
pub fn get_encoder(encoding_type: i32) -> Option<Box<dyn Encoding>> {
    match encoding_type {
        ENCODING_RAW => Some(Box::new(RawEncoding)),
        ENCODING_RRE => Some(Box::new(RreEncoding)),
        ENCODING_HEXTILE => Some(Box::new(HextileEncoding)),
        _ => None,
    }
}
