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

//! Byte-level codec for the RFB wire format.
//!
//! All multi-byte integers on the wire are network byte order (big-endian).
//! Reads are length-complete: a helper returns only once the requested
//! count of bytes has arrived, or fails with a connection-closed or timeout
//! error. Every stream operation is bounded by [`IO_TIMEOUT`].
//!
//! The codec also owns pixel serialization: a canonical `0x00RRGGBB` pixel
//! value is packed under whatever [`PixelFormat`] the client negotiated,
//! so the byte-swapping and channel-scaling logic lives in exactly one
//! place.

use std::io::ErrorKind;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Result, VncError};
use crate::protocol::PixelFormat;

/// Deadline for any single stream read or write.
///
/// A session that makes no progress within this window is terminated.
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads exactly `buf.len()` bytes from the stream.
///
/// Loops internally until the requested count is obtained (via
/// `read_exact`), the stream ends, or the I/O deadline passes.
///
/// # Errors
///
/// [`VncError::ConnectionClosed`] on EOF, [`VncError::Timeout`] on
/// deadline, [`VncError::Io`] on any other stream error.
pub async fn read_exact<S>(stream: &mut S, buf: &mut [u8]) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    match timeout(IO_TIMEOUT, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => Err(VncError::ConnectionClosed),
        Ok(Err(e)) => Err(VncError::Io(e)),
        Err(_) => Err(VncError::Timeout),
    }
}

/// Reads a single byte.
///
/// # Errors
///
/// See [`read_exact`].
pub async fn read_u8<S>(stream: &mut S) -> Result<u8>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1];
    read_exact(stream, &mut buf).await?;
    Ok(buf[0])
}

/// Reads a big-endian u16.
///
/// # Errors
///
/// See [`read_exact`].
pub async fn read_u16<S>(stream: &mut S) -> Result<u16>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    read_exact(stream, &mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

/// Reads a big-endian u32.
///
/// # Errors
///
/// See [`read_exact`].
pub async fn read_u32<S>(stream: &mut S) -> Result<u32>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    read_exact(stream, &mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

/// Reads a big-endian i32.
///
/// # Errors
///
/// See [`read_exact`].
pub async fn read_i32<S>(stream: &mut S) -> Result<i32>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    read_exact(stream, &mut buf).await?;
    Ok(i32::from_be_bytes(buf))
}

/// Discards exactly `count` bytes from the stream (padding, ignored payloads).
///
/// # Errors
///
/// See [`read_exact`].
pub async fn skip<S>(stream: &mut S, count: usize) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    // Padding runs are small; consume them through a fixed scratch buffer.
    let mut scratch = [0u8; 64];
    let mut remaining = count;
    while remaining > 0 {
        let chunk = remaining.min(scratch.len());
        read_exact(stream, &mut scratch[..chunk]).await?;
        remaining -= chunk;
    }
    Ok(())
}

/// Writes all bytes to the stream and flushes, under the I/O deadline.
///
/// # Errors
///
/// [`VncError::Timeout`] on deadline, [`VncError::Io`] on stream error.
pub async fn write_all<S>(stream: &mut S, bytes: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let io = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };
    match timeout(IO_TIMEOUT, io).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(VncError::Io(e)),
        Err(_) => Err(VncError::Timeout),
    }
}

/// Returns the number of bytes one pixel occupies under the given format.
#[must_use]
pub fn bytes_per_pixel(format: &PixelFormat) -> usize {
    (format.bits_per_pixel / 8) as usize
}

/// Serializes one canonical `0x00RRGGBB` pixel under a negotiated format.
///
/// Channel values are rescaled to the format's per-channel maxima, shifted
/// into place and written at the format's width and endianness. For the
/// server-native format (32 bpp little-endian, shifts R=16 G=8 B=0) this
/// emits the four bytes B, G, R, 0.
#[allow(clippy::cast_possible_truncation)] // packed value masked to the format's bpp
pub fn put_pixel(buf: &mut BytesMut, pixel: u32, format: &PixelFormat) {
    let r = ((pixel >> 16) & 0xFF) as u8;
    let g = ((pixel >> 8) & 0xFF) as u8;
    let b = (pixel & 0xFF) as u8;

    let value = (u32::from(downscale_component(r, format.red_max)) << format.red_shift)
        | (u32::from(downscale_component(g, format.green_max)) << format.green_shift)
        | (u32::from(downscale_component(b, format.blue_max)) << format.blue_shift);

    match format.bits_per_pixel {
        8 => buf.put_u8(value as u8),
        16 => {
            if format.big_endian_flag != 0 {
                buf.put_u16(value as u16);
            } else {
                buf.put_u16_le(value as u16);
            }
        }
        _ => {
            if format.big_endian_flag != 0 {
                buf.put_u32(value);
            } else {
                buf.put_u32_le(value);
            }
        }
    }
}

/// Downscales a color component from 8-bit (0-255) to the format-specific range.
///
/// # Arguments
///
/// * `value` - The component value in 0-255 range
/// * `max` - The maximum value for this component in the destination format
///
/// # Returns
///
/// The downscaled value in 0..max range.
#[inline]
#[allow(clippy::cast_possible_truncation)] // result bounded by `max`
fn downscale_component(value: u8, max: u16) -> u16 {
    if max == 0 {
        return 0;
    }
    if max == 255 {
        return u16::from(value);
    }

    // Downscale: value * max / 255
    // Use 32-bit to avoid overflow
    ((u32::from(value) * u32::from(max)) / 255) as u16
}
