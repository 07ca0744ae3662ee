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

//! Capture and input boundary.
//!
//! The server core consumes captured BGRA frames and emits synthetic input
//! events, but implements neither. These traits are the plug-in points:
//! the application provides a [`FrameSource`] that owns the display device
//! and an [`InputSink`] that owns keysym-to-platform translation and
//! injection. The helpers here run the capture task and drain server
//! events into a sink, so wiring a platform backend is two function calls.

use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::events::ServerEvent;
use crate::server::VncServer;

/// A source of captured frames.
///
/// The source decides capture cadence and owns the display device.
pub trait FrameSource: Send {
    /// Returns the latest captured frame as BGRA bytes of length
    /// `4 * width * height`, or `None` when no new frame is available,
    /// in which case the previously delivered frame stays current.
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// A sink for synthetic input events coming from viewers.
///
/// Implementations are responsible for any keysym-to-platform-keycode
/// translation. The button mask follows the RFB convention: bit 0 left,
/// 1 middle, 2 right, 3 wheel-up, 4 wheel-down.
pub trait InputSink: Send {
    /// A key went down (`down == true`) or up.
    fn key_event(&self, down: bool, keysym: u32);

    /// The pointer moved or a button changed.
    fn pointer_event(&self, buttons: u8, x: u16, y: u16);
}

/// Runs the capture task: polls the source at the given cadence and
/// broadcasts each new frame to every session.
///
/// A `None` from the source means the previous frame is still current and
/// nothing is broadcast. A frame of the wrong length is dropped with a
/// warning rather than killing the capture loop. Returns when the server
/// is stopped.
pub async fn run_capture<F>(server: VncServer, mut source: F, cadence: Duration)
where
    F: FrameSource,
{
    let mut ticker = tokio::time::interval(cadence);
    loop {
        ticker.tick().await;
        if server.is_stopped() {
            info!("Capture task exiting");
            return;
        }
        if let Some(frame) = source.next_frame() {
            if let Err(e) = server.broadcast_update(&frame).await {
                warn!("Dropping captured frame: {e}");
            }
        }
    }
}

/// Drains server events into an input sink.
///
/// Key and pointer events are forwarded to the sink; session lifecycle
/// events are logged; clipboard text is dropped here (relaying it to the
/// host is out of the core's scope). Returns when the server's event
/// channel closes.
pub async fn run_input_pump<K>(mut events: mpsc::UnboundedReceiver<ServerEvent>, sink: K)
where
    K: InputSink,
{
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::KeyEvent { down, keysym, .. } => sink.key_event(down, keysym),
            ServerEvent::PointerEvent { x, y, buttons, .. } => sink.pointer_event(buttons, x, y),
            ServerEvent::ClientConnected { client_id, address } => {
                info!("Client {client_id} connected from {address}");
            }
            ServerEvent::ClientDisconnected { client_id } => {
                info!("Client {client_id} disconnected");
            }
            ServerEvent::CutText { client_id, text } => {
                info!("Client {client_id} sent {} bytes of cut text", text.len());
            }
        }
    }
}
