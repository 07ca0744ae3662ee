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

//! VNC RRE (Rise-and-Run-length Encoding) implementation.
//!
//! RRE encodes a rectangle as a background color plus a list of
//! subrectangles with their own colors. Effective for large solid regions.

use bytes::{BufMut, BytesMut};

use super::common::{background_color, bgra_to_pixels, find_subrects};
use super::Encoding;
use crate::protocol::PixelFormat;
use crate::wire;

/// Sub-rectangle count above which RRE is never worth sending.
const MAX_EFFICIENT_SUBRECTS: usize = 50;

/// Implements the VNC "RRE" (Rise-and-Run-length Encoding).
///
/// Format: `[nSubrects(u32)][bgPixel][subrect1]...[subrectN]`, where each
/// subrect is `[pixel][x(u16)][y(u16)][w(u16)][h(u16)]` with coordinates
/// relative to the rectangle origin.
pub struct RreEncoding;

impl Encoding for RreEncoding {
    #[allow(clippy::cast_possible_truncation)] // Subrectangle count limited to image size per VNC protocol
    fn encode(&self, data: &[u8], width: u16, height: u16, format: &PixelFormat) -> BytesMut {
        let pixels = bgra_to_pixels(data);

        // Background is the most common pixel.
        let bg_color = background_color(&pixels);
        let subrects = find_subrects(&pixels, usize::from(width), usize::from(height), bg_color);

        let bpp = wire::bytes_per_pixel(format);
        let mut buf = BytesMut::with_capacity(4 + bpp + subrects.len() * (bpp + 8));

        buf.put_u32(subrects.len() as u32);
        wire::put_pixel(&mut buf, bg_color, format);

        for subrect in subrects {
            wire::put_pixel(&mut buf, subrect.color, format);
            buf.put_u16(subrect.x);
            buf.put_u16(subrect.y);
            buf.put_u16(subrect.w);
            buf.put_u16(subrect.h);
        }

        buf
    }
}

/// Whether an RRE encoding is worth sending instead of Raw.
///
/// True iff the rectangle decomposed into at most 50 sub-rectangles *and*
/// the encoded payload is less than half the Raw payload. The runtime
/// never selects RRE on its own; this predicate is the policy surface for
/// callers that opt in.
#[must_use]
pub fn is_efficient(num_subrects: usize, encoded_size: usize, raw_size: usize) -> bool {
    num_subrects <= MAX_EFFICIENT_SUBRECTS && encoded_size * 2 < raw_size
}
