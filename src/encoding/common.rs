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


//! Common helper functions shared across multiple VNC encodings.

use std::collections::HashMap;

/// Represents a subrectangle in RRE/Hextile encoding.
#[derive(Debug)]
pub struct Subrect {
    /// The color value of this subrectangle as canonical `0x00RRGGBB`.
    pub color: u32,
    /// The X coordinate of the subrectangle's top-left corner, relative to
    /// the enclosing rectangle.
    pub x: u16,
    /// The Y coordinate of the subrectangle's top-left corner, relative to
    /// the enclosing rectangle.
    pub y: u16,
    /// The width of the subrectangle in pixels.
    pub w: u16,
    /// The height of the subrectangle in pixels.
    pub h: u16,
}

/// Converts BGRA bytes (4 per pixel) to canonical `0x00RRGGBB` pixel values.
///
/// The alpha byte is discarded; it is never transported on the wire.
#[must_use]
pub fn bgra_to_pixels(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|chunk| {
            (u32::from(chunk[2]) << 16) // R
                | (u32::from(chunk[1]) << 8) // G
                | u32::from(chunk[0]) // B
        })
        .collect()
}

/// Finds the most common color in the pixel array.
#[must_use]
pub fn background_color(pixels: &[u32]) -> u32 {
    if pixels.is_empty() {
        return 0;
    }

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &pixel in pixels {
        *counts.entry(pixel).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map_or(pixels[0], |(color, _)| color)
}

/// Finds solid subrectangles of non-background pixels.
///
/// Scans in row-major order. Each unprocessed non-background pixel seeds a
/// rectangle of its exact color: the run is first extended rightward while
/// the color matches, then downward row by row while every cell of the
/// strip matches. Covered cells are marked so the scan never revisits them.
#[must_use]
pub fn find_subrects(pixels: &[u32], width: usize, height: usize, bg_color: u32) -> Vec<Subrect> {
    let mut subrects = Vec::new();
    let mut marked = vec![false; pixels.len()];

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if marked[idx] || pixels[idx] == bg_color {
                continue;
            }

            let color = pixels[idx];

            // Extend right while the color matches.
            let mut w = 1;
            for test_x in (x + 1)..width {
                let test_idx = y * width + test_x;
                if marked[test_idx] || pixels[test_idx] != color {
                    break;
                }
                w = test_x - x + 1;
            }

            // Extend down while the whole strip matches.
            let mut h = 1;
            'rows: for test_y in (y + 1)..height {
                for test_x in x..(x + w) {
                    let test_idx = test_y * width + test_x;
                    if marked[test_idx] || pixels[test_idx] != color {
                        break 'rows;
                    }
                }
                h = test_y - y + 1;
            }

            for dy in 0..h {
                for dx in 0..w {
                    marked[(y + dy) * width + (x + dx)] = true;
                }
            }

            #[allow(clippy::cast_possible_truncation)] // rectangle dimensions bounded by u16 framebuffer
            subrects.push(Subrect {
                color,
                x: x as u16,
                y: y as u16,
                w: w as u16,
                h: h as u16,
            });
        }
    }

    subrects
}

/// Extracts a tile from the pixel array.
#[must_use]
pub fn extract_tile(
    pixels: &[u32],
    width: usize,
    x: usize,
    y: usize,
    tw: usize,
    th: usize,
) -> Vec<u32> {
    let mut tile = Vec::with_capacity(tw * th);
    for dy in 0..th {
        for dx in 0..tw {
            tile.push(pixels[(y + dy) * width + (x + dx)]);
        }
    }
    tile
}
