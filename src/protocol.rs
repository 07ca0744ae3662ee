// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! VNC Remote Framebuffer (RFB) protocol constants and structures.
//!
//! This module provides the fundamental building blocks for VNC protocol
//! communication, including protocol version negotiation, message types,
//! security handshakes, encodings, and pixel format definitions. It
//! implements the RFB protocol as specified in RFC 6143.
//!
//! # Protocol Overview
//!
//! The VNC RFB protocol operates in the following phases:
//! 1. **Protocol Version** - Server and client agree on protocol version
//! 2. **Security Handshake** - Authentication method selection and execution
//! 3. **Initialization** - Exchange of framebuffer parameters and capabilities
//! 4. **Normal Operation** - Ongoing message exchange for input events and screen updates

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VncError};

/// The RFB protocol version string advertised by the server.
///
/// This server implements RFB protocol version 3.8 and downgrades to 3.7 or
/// 3.3 based on the client's reply. The version string must be exactly 12
/// bytes including the newline character as specified by the RFB protocol.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

// Client-to-Server Message Types

/// Message type: Client requests to change the pixel format.
///
/// This message allows the client to specify its preferred pixel format
/// for receiving framebuffer updates.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;

/// Message type: Client specifies supported encodings.
///
/// The client sends a list of encoding types it supports, ordered by
/// preference. The server will use the first mutually supported encoding.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;

/// Message type: Client requests a framebuffer update.
///
/// The client can request either an incremental update (changes only) or
/// a full refresh of a specified rectangular region.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;

/// Message type: Client sends a keyboard event.
///
/// Contains information about a key press or release event, including
/// the key symbol and the press/release state.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;

/// Message type: Client sends a pointer (mouse) event.
///
/// Contains the current pointer position and button state.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;

/// Message type: Client sends cut text (clipboard data).
///
/// Allows the client to transfer clipboard contents to the server.
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

/// Message type: Client requests a framebuffer resize.
///
/// Part of the `ExtendedDesktopSize` extension. This server never honors
/// client-initiated resizes; the payload is consumed and the request is
/// refused with a non-zero status rectangle when the client advertised
/// the extension.
pub const CLIENT_MSG_SET_DESKTOP_SIZE: u8 = 251;

// Server-to-Client Message Types

/// Message type: Server sends a framebuffer update.
///
/// Contains one or more rectangles of pixel data representing screen
/// changes. This is the primary message for transmitting visual updates.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Message type: Server sends a bell (beep) notification.
///
/// Signals the client to produce an audible or visual alert.
pub const SERVER_MSG_BELL: u8 = 2;

/// Message type: Server sends cut text (clipboard data).
///
/// Allows the server to transfer clipboard contents to the client.
pub const SERVER_MSG_SERVER_CUT_TEXT: u8 = 3;

// Encoding Types

/// Encoding type: Raw pixel data.
///
/// The simplest encoding that sends uncompressed pixel data directly.
/// High bandwidth but universally supported.
pub const ENCODING_RAW: i32 = 0;

/// Encoding type: Copy Rectangle.
///
/// Instructs the client to copy a rectangular region from one location
/// to another on the screen. Highly efficient for scrolling operations.
/// This is a server-side operation, not a data encoding format.
pub const ENCODING_COPYRECT: i32 = 1;

/// Encoding type: Rise-and-Run-length Encoding.
///
/// A simple compression scheme for rectangular regions.
pub const ENCODING_RRE: i32 = 2;

/// Encoding type: Hextile.
///
/// Divides rectangles into 16x16 tiles for efficient encoding.
pub const ENCODING_HEXTILE: i32 = 5;

/// Pseudo-encoding: Rich Cursor.
///
/// Allows the server to send cursor shape and hotspot information.
/// Recognized in client encoding lists but never emitted by this server.
pub const ENCODING_CURSOR: i32 = -239;

/// Pseudo-encoding: Desktop Size.
///
/// Notifies the client of framebuffer dimension changes.
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

/// Pseudo-encoding: Extended Desktop Size.
///
/// Richer replacement for `DesktopSize`: carries a status code and screen
/// layout. Sent only to clients that advertised it, either to refuse a
/// client-initiated resize or to announce a server-initiated one.
pub const ENCODING_EXTENDED_DESKTOP_SIZE: i32 = -308;

// Hextile subencoding flags

/// Hextile: Raw pixel data for this tile.
pub const HEXTILE_RAW: u8 = 1 << 0;

/// Hextile: Background color is specified.
pub const HEXTILE_BACKGROUND_SPECIFIED: u8 = 1 << 1;

/// Hextile: Foreground color is specified.
pub const HEXTILE_FOREGROUND_SPECIFIED: u8 = 1 << 2;

/// Hextile: Tile contains subrectangles.
pub const HEXTILE_ANY_SUBRECTS: u8 = 1 << 3;

/// Hextile: Subrectangles are colored (not monochrome).
pub const HEXTILE_SUBRECTS_COLOURED: u8 = 1 << 4;

// Security Types

/// Security type: Invalid/Unknown.
///
/// Indicates an error or unsupported security mechanism.
#[allow(dead_code)]
pub const SECURITY_TYPE_INVALID: u8 = 0;

/// Security type: None (no authentication).
///
/// No authentication is required. The connection proceeds directly
/// to the initialization phase.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type: VNC Authentication.
///
/// Standard VNC authentication using DES-encrypted challenge-response.
/// The server sends a 16-byte challenge, which the client encrypts with
/// the password and returns.
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

// Security Results

/// Security result: Authentication successful.
///
/// Sent by the server to indicate that authentication (if any) succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;

/// Security result: Authentication failed.
///
/// Sent by the server to indicate that authentication failed.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// Negotiated RFB protocol version.
///
/// The server advertises 3.8 and downgrades according to the client's
/// 12-byte `ProtocolVersion` reply. Replies that parse structurally but
/// name an unknown minor version are treated as 3.3, the baseline every
/// RFB client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// RFB 3.3: the server dictates the security type as a single u32.
    V33,
    /// RFB 3.7: security type list, no `SecurityResult` reason strings.
    V37,
    /// RFB 3.8: security type list plus reason strings on failure.
    V38,
}

impl ProtocolVersion {
    /// Parses the client's 12-byte `ProtocolVersion` reply.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::Protocol`] if the reply is not of the form
    /// `RFB ddd.ddd\n`.
    pub fn from_client_reply(reply: &[u8; 12]) -> Result<Self> {
        let structurally_valid = reply.starts_with(b"RFB ")
            && reply[7] == b'.'
            && reply[11] == b'\n'
            && reply[4..7].iter().all(u8::is_ascii_digit)
            && reply[8..11].iter().all(u8::is_ascii_digit);

        if !structurally_valid {
            return Err(VncError::Protocol(format!(
                "Malformed protocol version reply: {:?}",
                String::from_utf8_lossy(reply)
            )));
        }

        Ok(match &reply[8..11] {
            b"008" => Self::V38,
            b"007" => Self::V37,
            _ => Self::V33,
        })
    }

    /// Whether this version negotiates security via a type list
    /// (3.7 and 3.8) rather than a server-dictated u32 (3.3).
    #[must_use]
    pub fn uses_security_type_list(self) -> bool {
        !matches!(self, Self::V33)
    }

    /// Whether failure results carry a length-prefixed reason string.
    #[must_use]
    pub fn sends_failure_reason(self) -> bool {
        matches!(self, Self::V38)
    }
}

/// Represents the pixel format of the VNC framebuffer.
///
/// This struct defines how pixel data is interpreted, including color depth,
/// endianness, and RGB component details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel.
    pub bits_per_pixel: u8,
    /// Depth of the pixel in bits.
    pub depth: u8,
    /// Flag indicating if the pixel data is big-endian (1) or little-endian (0).
    pub big_endian_flag: u8,
    /// Flag indicating if the pixel format is true-colour (1) or colormapped (0).
    pub true_colour_flag: u8,
    /// Maximum red color value.
    pub red_max: u16,
    /// Maximum green color value.
    pub green_max: u16,
    /// Maximum blue color value.
    pub blue_max: u16,
    /// Number of shifts to apply to get the red color component.
    pub red_shift: u8,
    /// Number of shifts to apply to get the green color component.
    pub green_shift: u8,
    /// Number of shifts to apply to get the blue color component.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Creates the server's native 32-bit BGRA pixel format.
    ///
    /// With little-endian byte order and shifts R=16, G=8, B=0, a pixel
    /// leaves the wire as the four bytes B, G, R, 0: the BGRA layout of
    /// captured frames with the alpha byte zeroed.
    ///
    /// # Returns
    ///
    /// A `PixelFormat` instance configured for 32-bit BGRA.
    #[must_use]
    pub fn bgra32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Creates a 16-bit RGB565 pixel format.
    ///
    /// RGB565 uses 5 bits for red, 6 bits for green, and 5 bits for blue.
    /// This is a common format for bandwidth-constrained clients.
    ///
    /// # Returns
    ///
    /// A `PixelFormat` instance configured for 16-bit RGB565.
    #[must_use]
    pub fn rgb565() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 31,   // 5 bits
            green_max: 63, // 6 bits
            blue_max: 31,  // 5 bits
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        }
    }

    /// Validates that this pixel format is supported by the server.
    ///
    /// Checks that the format uses valid bits-per-pixel values, that the
    /// per-channel maxima fit within the declared depth, and that the
    /// channel shifts stay within the pixel.
    ///
    /// # Returns
    ///
    /// `true` if the format is valid and supported, `false` otherwise.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.bits_per_pixel != 8 && self.bits_per_pixel != 16 && self.bits_per_pixel != 32 {
            return false;
        }

        if self.depth == 0 || self.depth > self.bits_per_pixel {
            return false;
        }

        // Only true-color clients are served; colormapped formats would
        // require SetColourMapEntries support.
        if self.true_colour_flag == 0 {
            return false;
        }

        #[allow(clippy::cast_possible_truncation)]
        // leading_zeros() returns max 32, result always fits in u8
        let bits_needed = |max: u16| -> u8 {
            if max == 0 {
                0
            } else {
                (16 - max.leading_zeros()) as u8
            }
        };

        let red_bits = bits_needed(self.red_max);
        let green_bits = bits_needed(self.green_max);
        let blue_bits = bits_needed(self.blue_max);

        if red_bits + green_bits + blue_bits > self.depth {
            return false;
        }

        u32::from(self.red_shift) + u32::from(red_bits) <= u32::from(self.bits_per_pixel)
            && u32::from(self.green_shift) + u32::from(green_bits) <= u32::from(self.bits_per_pixel)
            && u32::from(self.blue_shift) + u32::from(blue_bits) <= u32::from(self.bits_per_pixel)
    }

    /// Writes the pixel format data into a `BytesMut` buffer.
    ///
    /// This function serializes the `PixelFormat` into the 16-byte RFB
    /// protocol representation, including the three trailing padding bytes.
    ///
    /// # Arguments
    ///
    /// * `buf` - A mutable reference to the `BytesMut` buffer to write into.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Reads and deserializes a `PixelFormat` from a 16-byte buffer.
    ///
    /// # Arguments
    ///
    /// * `bytes` - The 16 bytes of the wire representation.
    ///
    /// # Returns
    ///
    /// The parsed `PixelFormat`. The three trailing padding bytes are
    /// consumed and ignored.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let mut buf = &bytes[..];
        Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian_flag: buf.get_u8(),
            true_colour_flag: buf.get_u8(),
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::bgra32()
    }
}

/// A client's `FramebufferUpdateRequest`.
///
/// Full (non-incremental) requests force the next emission to cover at
/// least the requested rectangle with no diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    /// If true, only send changes since the last update; if false, send a
    /// full refresh.
    pub incremental: bool,
    /// X coordinate of the requested region.
    pub x: u16,
    /// Y coordinate of the requested region.
    pub y: u16,
    /// Width of the requested region.
    pub width: u16,
    /// Height of the requested region.
    pub height: u16,
}

/// Represents the `ServerInit` message sent during VNC initialization.
///
/// This message is sent by the server after security negotiation is
/// complete. It provides the client with framebuffer dimensions, pixel
/// format, and the desktop name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// The width of the framebuffer in pixels.
    pub framebuffer_width: u16,
    /// The height of the framebuffer in pixels.
    pub framebuffer_height: u16,
    /// The pixel format used by the framebuffer.
    pub pixel_format: PixelFormat,
    /// The name of the desktop.
    pub name: String,
}

impl ServerInit {
    /// Serializes the `ServerInit` message into a byte buffer.
    ///
    /// The format follows the RFB protocol specification:
    /// - 2 bytes: framebuffer width
    /// - 2 bytes: framebuffer height
    /// - 16 bytes: pixel format
    /// - 4 bytes: name length
    /// - N bytes: name string (UTF-8)
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the serialized message into.
    #[allow(clippy::cast_possible_truncation)] // Desktop name length limited to u32 per VNC protocol
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);

        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }
}

/// Represents a rectangle header in a framebuffer update message.
///
/// Each framebuffer update can contain multiple rectangles, each with its
/// own encoding type. The rectangle header specifies the position,
/// dimensions, and encoding of the pixel data that follows.
#[derive(Debug)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width of the rectangle in pixels.
    pub width: u16,
    /// Height of the rectangle in pixels.
    pub height: u16,
    /// The encoding type used for this rectangle's pixel data.
    pub encoding: i32,
}

impl Rectangle {
    /// Writes the rectangle header to a byte buffer.
    ///
    /// The header format is:
    /// - 2 bytes: x position
    /// - 2 bytes: y position
    /// - 2 bytes: width
    /// - 2 bytes: height
    /// - 4 bytes: encoding type (signed 32-bit integer)
    ///
    /// # Arguments
    ///
    /// * `buf` - The buffer to write the header into.
    pub fn write_header(&self, buf: &mut BytesMut) {
        // VNC protocol requires big-endian (network byte order) for all multi-byte integers
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_negotiation() {
        assert_eq!(
            ProtocolVersion::from_client_reply(b"RFB 003.008\n").unwrap(),
            ProtocolVersion::V38
        );
        assert_eq!(
            ProtocolVersion::from_client_reply(b"RFB 003.007\n").unwrap(),
            ProtocolVersion::V37
        );
        assert_eq!(
            ProtocolVersion::from_client_reply(b"RFB 003.003\n").unwrap(),
            ProtocolVersion::V33
        );
        // Unknown minor versions fall back to the 3.3 baseline.
        assert_eq!(
            ProtocolVersion::from_client_reply(b"RFB 003.005\n").unwrap(),
            ProtocolVersion::V33
        );
    }

    #[test]
    fn version_garbage_rejected() {
        assert!(ProtocolVersion::from_client_reply(b"HTTP/1.1 200").is_err());
        assert!(ProtocolVersion::from_client_reply(b"RFB 003.008 ").is_err());
        assert!(ProtocolVersion::from_client_reply(b"RFB xxx.yyy\n").is_err());
    }

    #[test]
    fn default_pixel_format_wire_bytes() {
        let mut buf = BytesMut::new();
        PixelFormat::bgra32().write_to(&mut buf);
        assert_eq!(
            &buf[..],
            &[
                0x20, 0x18, 0x00, 0x01, // bpp 32, depth 24, LE, true-color
                0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, // channel maxima
                0x10, 0x08, 0x00, // shifts R=16 G=8 B=0
                0x00, 0x00, 0x00, // padding
            ]
        );
    }

    #[test]
    fn pixel_format_round_trip() {
        let fmt = PixelFormat::rgb565();
        let mut buf = BytesMut::new();
        fmt.write_to(&mut buf);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&buf[..]);
        assert_eq!(PixelFormat::from_bytes(&bytes), fmt);
    }

    #[test]
    fn pixel_format_validation() {
        assert!(PixelFormat::bgra32().is_valid());
        assert!(PixelFormat::rgb565().is_valid());

        let mut bad = PixelFormat::bgra32();
        bad.bits_per_pixel = 12;
        assert!(!bad.is_valid());

        let mut bad = PixelFormat::bgra32();
        bad.depth = 40;
        assert!(!bad.is_valid());

        // Channel maxima wider than the declared depth.
        let mut bad = PixelFormat::rgb565();
        bad.depth = 8;
        assert!(!bad.is_valid());

        // Shift pushes the channel outside the pixel.
        let mut bad = PixelFormat::bgra32();
        bad.red_shift = 28;
        assert!(!bad.is_valid());
    }

    #[test]
    fn server_init_wire_bytes() {
        // 2x1 framebuffer named "x".
        let init = ServerInit {
            framebuffer_width: 2,
            framebuffer_height: 1,
            pixel_format: PixelFormat::bgra32(),
            name: "x".to_string(),
        };
        let mut buf = BytesMut::new();
        init.write_to(&mut buf);
        assert_eq!(
            &buf[..],
            &[
                0x00, 0x02, 0x00, 0x01, // dimensions
                0x20, 0x18, 0x00, 0x01, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x10, 0x08, 0x00,
                0x00, 0x00, 0x00, // pixel format
                0x00, 0x00, 0x00, 0x01, // name length
                0x78, // "x"
            ]
        );
    }

    #[test]
    fn rectangle_header_is_big_endian() {
        let rect = Rectangle {
            x: 0x0102,
            y: 0x0304,
            width: 0x0506,
            height: 0x0708,
            encoding: ENCODING_EXTENDED_DESKTOP_SIZE,
        };
        let mut buf = BytesMut::new();
        rect.write_header(&mut buf);
        assert_eq!(
            &buf[..],
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xFF, 0xFF, 0xFE, 0xCC]
        );
    }
}
