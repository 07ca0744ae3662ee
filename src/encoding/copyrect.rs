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


//! VNC CopyRect encoding implementation.
//!
//! CopyRect carries no pixel data: the payload instructs the client to
//! copy the rectangle from `(src_x, src_y)` in its *own* current
//! framebuffer to the destination named in the rectangle header. Highly
//! efficient for scrolling and window moves.

use bytes::{BufMut, BytesMut};

/// Encodes a CopyRect payload.
///
/// The payload is exactly 4 bytes: `src_x` and `src_y` as big-endian u16.
/// No motion search happens here; the caller supplies the source
/// coordinates explicitly.
#[must_use]
pub fn encode_copy_rect(src_x: u16, src_y: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(src_x);
    buf.put_u16(src_y);
    buf
}
