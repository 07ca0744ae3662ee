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


//! VNC Raw encoding implementation.
//!
//! The simplest encoding that sends pixel data directly without compression.
//! High bandwidth but universally supported.

use bytes::BytesMut;

use super::Encoding;
use crate::protocol::PixelFormat;
use crate::wire;

/// Implements the VNC "Raw" encoding, which sends pixel data directly
/// without compression.
///
/// Pixels are emitted row by row, each serialized under the client's
/// negotiated pixel format. The payload length is exactly
/// `width * height * bytes_per_pixel`.
pub struct RawEncoding;

impl Encoding for RawEncoding {
    fn encode(&self, data: &[u8], width: u16, height: u16, format: &PixelFormat) -> BytesMut {
        let capacity = usize::from(width) * usize::from(height) * wire::bytes_per_pixel(format);
        let mut buf = BytesMut::with_capacity(capacity);
        for chunk in data.chunks_exact(4) {
            let pixel = (u32::from(chunk[2]) << 16) | (u32::from(chunk[1]) << 8) | u32::from(chunk[0]);
            wire::put_pixel(&mut buf, pixel, format);
        }
        buf
    }
}
