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

//! Shared framebuffer: the server's authoritative pixel image.
//!
//! The pixel store is `width * height * 4` bytes in BGRA order, protected
//! by a single lock. Readers take a short-lived copy under the lock and
//! release it before encoding; writers (the capture task, `set_frame`,
//! `resize`) take it exclusively. No component holds the lock across
//! network I/O.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Result, VncError};

/// An axis-aligned rectangle in framebuffer coordinates.
///
/// Used both for dirty-region results and for update-request geometry.
/// A region with zero width or height is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRegion {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

impl DirtyRegion {
    /// Creates a new region.
    #[must_use]
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the region covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersects two regions.
    ///
    /// # Returns
    ///
    /// `Some(intersection)` if the regions overlap, `None` otherwise.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x1 < x2 && y1 < y2 {
            Some(Self::new(x1, y1, x2 - x1, y2 - y1))
        } else {
            None
        }
    }
}

/// Interior of the framebuffer lock: dimensions plus the BGRA pixel store.
struct FrameStore {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

/// The shared framebuffer, representing the remote desktop screen.
///
/// Cheap to clone; all clones refer to the same pixel store.
#[derive(Clone)]
pub struct Framebuffer {
    inner: Arc<RwLock<FrameStore>>,
}

impl Framebuffer {
    /// Creates a zeroed framebuffer with the given dimensions.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            inner: Arc::new(RwLock::new(FrameStore {
                width,
                height,
                data: vec![0u8; buffer_len(width, height)],
            })),
        }
    }

    /// Returns the current `(width, height)` pair.
    pub async fn dimensions(&self) -> (u16, u16) {
        let store = self.inner.read().await;
        (store.width, store.height)
    }

    /// Takes a copy of the current frame under the lock.
    ///
    /// # Returns
    ///
    /// `(width, height, pixels)`; the pixel copy is `width * height * 4`
    /// BGRA bytes.
    pub async fn snapshot(&self) -> (u16, u16, Vec<u8>) {
        let store = self.inner.read().await;
        (store.width, store.height, store.data.clone())
    }

    /// Replaces the entire frame contents atomically.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::InvalidOperation`] if `frame` does not match the
    /// current `width * height * 4` length.
    pub async fn set_frame(&self, frame: &[u8]) -> Result<()> {
        let mut store = self.inner.write().await;
        let expected = buffer_len(store.width, store.height);
        if frame.len() != expected {
            return Err(VncError::InvalidOperation(format!(
                "Frame length {} does not match framebuffer length {}",
                frame.len(),
                expected
            )));
        }
        store.data.copy_from_slice(frame);
        Ok(())
    }

    /// Replaces the framebuffer dimensions and pixel store.
    ///
    /// The new store is zeroed; the next captured frame fills it.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::InvalidOperation`] if the dimensions are
    /// unchanged or zero.
    pub async fn resize(&self, width: u16, height: u16) -> Result<()> {
        let mut store = self.inner.write().await;
        if width == 0 || height == 0 {
            return Err(VncError::InvalidOperation(
                "Framebuffer dimensions must be non-zero".to_string(),
            ));
        }
        if store.width == width && store.height == height {
            return Err(VncError::InvalidOperation(format!(
                "Framebuffer is already {width}x{height}"
            )));
        }
        store.width = width;
        store.height = height;
        store.data = vec![0u8; buffer_len(width, height)];
        Ok(())
    }

    /// Copies a rectangle within the framebuffer from `(src_x, src_y)` to
    /// `(dst_x, dst_y)`.
    ///
    /// Overlap-safe: the source rows are copied out before the destination
    /// is written.
    ///
    /// # Errors
    ///
    /// Returns [`VncError::InvalidOperation`] if either rectangle falls
    /// outside the framebuffer.
    pub async fn copy_region(
        &self,
        dst_x: u16,
        dst_y: u16,
        width: u16,
        height: u16,
        src_x: u16,
        src_y: u16,
    ) -> Result<()> {
        let mut store = self.inner.write().await;

        let in_bounds = |x: u16, y: u16| {
            u32::from(x) + u32::from(width) <= u32::from(store.width)
                && u32::from(y) + u32::from(height) <= u32::from(store.height)
        };
        if !in_bounds(src_x, src_y) || !in_bounds(dst_x, dst_y) {
            return Err(VncError::InvalidOperation(format!(
                "Copy rectangle {width}x{height} from ({src_x},{src_y}) to ({dst_x},{dst_y}) exceeds framebuffer bounds"
            )));
        }

        let source = extract_rect(&store.data, store.width, src_x, src_y, width, height);

        let row_bytes = usize::from(width) * 4;
        let stride = usize::from(store.width) * 4;
        for row in 0..usize::from(height) {
            let dst_off = (usize::from(dst_y) + row) * stride + usize::from(dst_x) * 4;
            store.data[dst_off..dst_off + row_bytes]
                .copy_from_slice(&source[row * row_bytes..(row + 1) * row_bytes]);
        }
        Ok(())
    }
}

/// Extracts a sub-rectangle from a BGRA frame as contiguous rows.
///
/// The caller guarantees the rectangle lies within the frame; sessions
/// obtain their rectangles from clamped regions, so this holds by
/// construction.
#[must_use]
pub fn extract_rect(frame: &[u8], frame_width: u16, x: u16, y: u16, w: u16, h: u16) -> Vec<u8> {
    let row_bytes = usize::from(w) * 4;
    let stride = usize::from(frame_width) * 4;
    let mut out = Vec::with_capacity(row_bytes * usize::from(h));
    for row in 0..usize::from(h) {
        let off = (usize::from(y) + row) * stride + usize::from(x) * 4;
        out.extend_from_slice(&frame[off..off + row_bytes]);
    }
    out
}

fn buffer_len(width: u16, height: u16) -> usize {
    usize::from(width) * usize::from(height) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_intersection() {
        let a = DirtyRegion::new(0, 0, 100, 100);
        let b = DirtyRegion::new(50, 50, 100, 100);
        assert_eq!(a.intersect(&b), Some(DirtyRegion::new(50, 50, 50, 50)));

        let c = DirtyRegion::new(200, 200, 10, 10);
        assert_eq!(a.intersect(&c), None);

        // Touching edges do not overlap.
        let d = DirtyRegion::new(100, 0, 10, 10);
        assert_eq!(a.intersect(&d), None);
    }

    #[tokio::test]
    async fn buffer_length_invariant() {
        let fb = Framebuffer::new(3, 2);
        let (w, h, data) = fb.snapshot().await;
        assert_eq!((w, h), (3, 2));
        assert_eq!(data.len(), 3 * 2 * 4);

        assert!(fb.set_frame(&[0u8; 7]).await.is_err());
        assert!(fb.set_frame(&vec![1u8; 24]).await.is_ok());
        let (_, _, data) = fb.snapshot().await;
        assert!(data.iter().all(|&b| b == 1));
    }

    #[tokio::test]
    async fn resize_rejects_same_dimensions() {
        let fb = Framebuffer::new(4, 4);
        assert!(fb.resize(4, 4).await.is_err());
        assert!(fb.resize(8, 2).await.is_ok());
        assert_eq!(fb.dimensions().await, (8, 2));
        let (_, _, data) = fb.snapshot().await;
        assert_eq!(data.len(), 8 * 2 * 4);
    }

    #[test]
    fn extract_rect_rows() {
        // 3x2 frame, pixels numbered 0..6 in the blue channel.
        let mut frame = vec![0u8; 3 * 2 * 4];
        for (i, px) in frame.chunks_exact_mut(4).enumerate() {
            px[0] = i as u8;
        }
        let rect = extract_rect(&frame, 3, 1, 0, 2, 2);
        let blues: Vec<u8> = rect.chunks_exact(4).map(|px| px[0]).collect();
        assert_eq!(blues, vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn copy_region_moves_pixels() {
        let fb = Framebuffer::new(4, 1);
        let mut frame = vec![0u8; 4 * 4];
        frame[0..4].copy_from_slice(&[9, 9, 9, 9]);
        fb.set_frame(&frame).await.unwrap();

        fb.copy_region(2, 0, 1, 1, 0, 0).await.unwrap();
        let (_, _, data) = fb.snapshot().await;
        assert_eq!(&data[8..12], &[9, 9, 9, 9]);

        // Out-of-bounds source rejected.
        assert!(fb.copy_region(0, 0, 2, 1, 3, 0).await.is_err());
    }
}
