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

//! Per-session dirty-region detection.
//!
//! Each client session keeps its own snapshot of the last frame it was
//! shown. On every update request the current frame is compared against
//! that snapshot on a fixed tile grid, and the tight bounding box of the
//! changed tiles is returned in framebuffer pixel coordinates. Sessions
//! diff independently: a slow viewer and a fast viewer each see exactly
//! the pixels that changed since *their* last update.

use crate::framebuffer::DirtyRegion;

/// Edge length of the comparison grid, in pixels.
///
/// The trailing column/row of tiles may be narrower/shorter when the
/// framebuffer dimensions are not multiples of this.
pub const TILE_SIZE: u16 = 64;

/// Tracks what a single session has already been shown.
///
/// Holds the previous BGRA snapshot, or nothing before first use, after
/// [`DirtyTracker::force_full_update`], or after a dimension change.
#[derive(Default)]
pub struct DirtyTracker {
    previous: Option<Vec<u8>>,
}

impl DirtyTracker {
    /// Creates a tracker with no previous snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `current` against the previous snapshot.
    ///
    /// With no usable previous snapshot (first use, forced refresh, or a
    /// length mismatch after a resize) the current frame is stored and the
    /// full-screen rectangle is returned. Otherwise the frame is scanned
    /// tile by tile in row-major order; if any byte of a tile differs the
    /// tile is dirty.
    ///
    /// # Returns
    ///
    /// `Some(bounding box of all dirty tiles)` clamped to the framebuffer,
    /// or `None` when the frames are identical. The snapshot is updated
    /// whenever a region is returned.
    pub fn update(&mut self, current: &[u8], width: u16, height: u16) -> Option<DirtyRegion> {
        let Some(previous) = self.previous.as_ref() else {
            self.previous = Some(current.to_vec());
            return Some(DirtyRegion::new(0, 0, width, height));
        };
        if previous.len() != current.len() {
            self.previous = Some(current.to_vec());
            return Some(DirtyRegion::new(0, 0, width, height));
        }

        let mut bounds: Option<(u16, u16, u16, u16)> = None; // x1, y1, x2, y2 in pixels

        let stride = usize::from(width) * 4;
        let mut tile_y = 0u16;
        while tile_y < height {
            let tile_h = TILE_SIZE.min(height - tile_y);
            let mut tile_x = 0u16;
            while tile_x < width {
                let tile_w = TILE_SIZE.min(width - tile_x);

                if tile_differs(previous, current, stride, tile_x, tile_y, tile_w, tile_h) {
                    let (x1, y1, x2, y2) = bounds.unwrap_or((u16::MAX, u16::MAX, 0, 0));
                    bounds = Some((
                        x1.min(tile_x),
                        y1.min(tile_y),
                        x2.max(tile_x + tile_w),
                        y2.max(tile_y + tile_h),
                    ));
                }
                tile_x += TILE_SIZE;
            }
            tile_y += TILE_SIZE;
        }

        let (x1, y1, x2, y2) = bounds?;
        self.previous = Some(current.to_vec());
        Some(DirtyRegion::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// Discards the previous snapshot, guaranteeing the next
    /// [`DirtyTracker::update`] returns a full-screen region.
    pub fn force_full_update(&mut self) {
        self.previous = None;
    }
}

/// Byte-exact comparison of one tile between two frames.
fn tile_differs(
    previous: &[u8],
    current: &[u8],
    stride: usize,
    tile_x: u16,
    tile_y: u16,
    tile_w: u16,
    tile_h: u16,
) -> bool {
    let row_bytes = usize::from(tile_w) * 4;
    for row in 0..usize::from(tile_h) {
        let off = (usize::from(tile_y) + row) * stride + usize::from(tile_x) * 4;
        if previous[off..off + row_bytes] != current[off..off + row_bytes] {
            return true;
        }
    }
    false
}
