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

//! VNC Hextile encoding implementation.
//!
//! Hextile divides the rectangle into 16x16 tiles and encodes each
//! independently. Each tile can be: raw, solid, monochrome with subrects,
//! or colored with subrects. Every tile carries its own background pixel;
//! tiles are self-contained and decodable in isolation.

use bytes::{BufMut, BytesMut};

use super::common::{background_color, bgra_to_pixels, extract_tile, find_subrects};
use super::Encoding;
use crate::protocol::{
    PixelFormat, HEXTILE_ANY_SUBRECTS, HEXTILE_BACKGROUND_SPECIFIED, HEXTILE_FOREGROUND_SPECIFIED,
    HEXTILE_RAW, HEXTILE_SUBRECTS_COLOURED,
};
use crate::wire;

/// Tile edge length mandated by the Hextile wire format.
const TILE: usize = 16;

/// Implements the VNC "Hextile" encoding.
///
/// The rectangle is processed as 16x16 tiles in row-major order; trailing
/// tiles on the right/bottom edges may be smaller. Each tile is preceded
/// by one subencoding-mask byte.
pub struct HextileEncoding;

impl Encoding for HextileEncoding {
    #[allow(clippy::cast_possible_truncation)] // Hextile packs coordinates into u8 nibbles (tiles are at most 16x16)
    fn encode(&self, data: &[u8], width: u16, height: u16, format: &PixelFormat) -> BytesMut {
        let pixels = bgra_to_pixels(data);
        let width = usize::from(width);
        let height = usize::from(height);

        let mut buf = BytesMut::new();

        for tile_y in (0..height).step_by(TILE) {
            for tile_x in (0..width).step_by(TILE) {
                let tile_w = TILE.min(width - tile_x);
                let tile_h = TILE.min(height - tile_y);

                let tile_pixels = extract_tile(&pixels, width, tile_x, tile_y, tile_w, tile_h);
                encode_tile(&mut buf, &tile_pixels, tile_w, tile_h, format);
            }
        }

        buf
    }
}

/// Encodes a single tile: mask byte followed by the tile payload.
#[allow(clippy::cast_possible_truncation)] // coordinates within a tile fit in a nibble
fn encode_tile(
    buf: &mut BytesMut,
    tile_pixels: &[u32],
    tile_w: usize,
    tile_h: usize,
    format: &PixelFormat,
) {
    let bg = background_color(tile_pixels);
    let subrects = find_subrects(tile_pixels, tile_w, tile_h, bg);

    // Solid tile.
    if subrects.is_empty() {
        buf.put_u8(HEXTILE_BACKGROUND_SPECIFIED);
        wire::put_pixel(buf, bg, format);
        return;
    }

    // Too fragmented: raw pixels beat the subrect list.
    if subrects.len() > tile_w * tile_h / 4 {
        buf.put_u8(HEXTILE_RAW);
        for &pixel in tile_pixels {
            wire::put_pixel(buf, pixel, format);
        }
        return;
    }

    let fg = subrects[0].color;
    let monochrome = subrects.iter().all(|sr| sr.color == fg);

    if monochrome {
        buf.put_u8(HEXTILE_BACKGROUND_SPECIFIED | HEXTILE_FOREGROUND_SPECIFIED | HEXTILE_ANY_SUBRECTS);
        wire::put_pixel(buf, bg, format);
        wire::put_pixel(buf, fg, format);
        buf.put_u8(subrects.len() as u8);
        for sr in subrects {
            buf.put_u8(((sr.x as u8) << 4) | (sr.y as u8));
            buf.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8));
        }
    } else {
        buf.put_u8(HEXTILE_BACKGROUND_SPECIFIED | HEXTILE_ANY_SUBRECTS | HEXTILE_SUBRECTS_COLOURED);
        wire::put_pixel(buf, bg, format);
        buf.put_u8(subrects.len() as u8);
        for sr in subrects {
            wire::put_pixel(buf, sr.color, format);
            buf.put_u8(((sr.x as u8) << 4) | (sr.y as u8));
            buf.put_u8((((sr.w - 1) as u8) << 4) | ((sr.h - 1) as u8));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test-only Hextile decoder for the native 32bpp little-endian format.
    fn decode(encoded: &[u8], width: usize, height: usize) -> Vec<u32> {
        let read_px = |b: &[u8]| u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let mut out = vec![0u32; width * height];
        let mut off = 0;

        for tile_y in (0..height).step_by(TILE) {
            for tile_x in (0..width).step_by(TILE) {
                let tile_w = TILE.min(width - tile_x);
                let tile_h = TILE.min(height - tile_y);

                let mask = encoded[off];
                off += 1;

                if mask & HEXTILE_RAW != 0 {
                    for dy in 0..tile_h {
                        for dx in 0..tile_w {
                            out[(tile_y + dy) * width + tile_x + dx] = read_px(&encoded[off..]);
                            off += 4;
                        }
                    }
                    continue;
                }

                assert!(mask & HEXTILE_BACKGROUND_SPECIFIED != 0, "tiles are self-contained");
                let bg = read_px(&encoded[off..]);
                off += 4;
                for dy in 0..tile_h {
                    for dx in 0..tile_w {
                        out[(tile_y + dy) * width + tile_x + dx] = bg;
                    }
                }

                let fg = if mask & HEXTILE_FOREGROUND_SPECIFIED != 0 {
                    let fg = read_px(&encoded[off..]);
                    off += 4;
                    Some(fg)
                } else {
                    None
                };

                if mask & HEXTILE_ANY_SUBRECTS == 0 {
                    continue;
                }
                let count = encoded[off] as usize;
                off += 1;

                for _ in 0..count {
                    let color = if mask & HEXTILE_SUBRECTS_COLOURED != 0 {
                        let c = read_px(&encoded[off..]);
                        off += 4;
                        c
                    } else {
                        fg.expect("monochrome subrects require a foreground")
                    };
                    let xy = encoded[off] as usize;
                    let wh = encoded[off + 1] as usize;
                    off += 2;
                    let (x, y) = (xy >> 4, xy & 0x0F);
                    let (w, h) = ((wh >> 4) + 1, (wh & 0x0F) + 1);
                    for dy in 0..h {
                        for dx in 0..w {
                            out[(tile_y + y + dy) * width + tile_x + x + dx] = color;
                        }
                    }
                }
            }
        }
        assert_eq!(off, encoded.len());
        out
    }

    fn solid_bgra(width: usize, height: usize, bgra: [u8; 4]) -> Vec<u8> {
        bgra.iter()
            .copied()
            .cycle()
            .take(width * height * 4)
            .collect()
    }

    #[test]
    fn solid_red_tile() {
        // A 16x16 tile of pure red emits one mask byte and one pixel.
        let data = solid_bgra(16, 16, [0x00, 0x00, 0xFF, 0xFF]);
        let encoded = HextileEncoding.encode(&data, 16, 16, &PixelFormat::bgra32());
        assert_eq!(&encoded[..], &[0x02, 0x00, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn full_screen_solid_color_size() {
        // Every tile of a solid screen is BackgroundSpecified: one mask
        // byte plus one pixel per tile.
        let data = solid_bgra(64, 48, [0x40, 0x41, 0x42, 0xFF]);
        let encoded = HextileEncoding.encode(&data, 64, 48, &PixelFormat::bgra32());
        let num_tiles = (64 / 16) * (48 / 16);
        assert_eq!(encoded.len(), num_tiles * (1 + 4));
        assert_eq!(decode(&encoded, 64, 48), bgra_to_pixels(&data));
    }

    #[test]
    fn monochrome_tile_packs_two_byte_subrects() {
        // Background plus a single 4x2 block of one foreground color.
        let mut data = solid_bgra(16, 16, [0, 0, 0, 0xFF]);
        for y in 3..5 {
            for x in 2..6 {
                let off = (y * 16 + x) * 4;
                data[off..off + 4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
            }
        }
        let encoded = HextileEncoding.encode(&data, 16, 16, &PixelFormat::bgra32());
        assert_eq!(
            encoded[0],
            HEXTILE_BACKGROUND_SPECIFIED | HEXTILE_FOREGROUND_SPECIFIED | HEXTILE_ANY_SUBRECTS
        );
        // mask + bg + fg + count + one packed subrect
        assert_eq!(encoded.len(), 1 + 4 + 4 + 1 + 2);
        assert_eq!(encoded[9], 1); // count
        assert_eq!(encoded[10], (2 << 4) | 3); // x=2, y=3
        assert_eq!(encoded[11], (3 << 4) | 1); // w-1=3, h-1=1
        assert_eq!(decode(&encoded, 16, 16), bgra_to_pixels(&data));
    }

    #[test]
    fn multicolor_tile_carries_subrect_pixels() {
        let mut data = solid_bgra(16, 16, [0, 0, 0, 0xFF]);
        // Two blocks in different colors.
        for x in 0..4 {
            let off = x * 4;
            data[off..off + 4].copy_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);
        }
        for x in 8..12 {
            let off = (5 * 16 + x) * 4;
            data[off..off + 4].copy_from_slice(&[0xFF, 0x00, 0x00, 0xFF]);
        }
        let encoded = HextileEncoding.encode(&data, 16, 16, &PixelFormat::bgra32());
        assert_eq!(
            encoded[0],
            HEXTILE_BACKGROUND_SPECIFIED | HEXTILE_ANY_SUBRECTS | HEXTILE_SUBRECTS_COLOURED
        );
        assert_eq!(decode(&encoded, 16, 16), bgra_to_pixels(&data));
    }

    #[test]
    fn noisy_tile_falls_back_to_raw() {
        // A checkerboard has one subrect per foreground pixel, far more
        // than a quarter of the tile area.
        let mut data = Vec::with_capacity(16 * 16 * 4);
        for i in 0..256usize {
            if ((i % 2) ^ ((i / 16) % 2)) == 0 {
                data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
            } else {
                data.extend_from_slice(&[0x00, 0x00, 0x00, 0xFF]);
            }
        }
        let encoded = HextileEncoding.encode(&data, 16, 16, &PixelFormat::bgra32());
        assert_eq!(encoded[0], HEXTILE_RAW);
        assert_eq!(encoded.len(), 1 + 16 * 16 * 4);
        assert_eq!(decode(&encoded, 16, 16), bgra_to_pixels(&data));
    }

    #[test]
    fn trailing_tiles_decode_correctly() {
        // 20x18: tiles of 16x16, 4x16, 16x2 and 4x2, with a color block
        // straddling the tile boundary.
        let mut data = solid_bgra(20, 18, [0x10, 0x10, 0x10, 0xFF]);
        for y in 14..18 {
            for x in 14..20 {
                let off = (y * 20 + x) * 4;
                data[off..off + 4].copy_from_slice(&[0x00, 0xCC, 0x00, 0xFF]);
            }
        }
        let encoded = HextileEncoding.encode(&data, 20, 18, &PixelFormat::bgra32());
        assert_eq!(decode(&encoded, 20, 18), bgra_to_pixels(&data));
    }
}
