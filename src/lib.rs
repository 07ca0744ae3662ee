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


//! # rfbserver
//!
//! A pure Rust implementation of an RFB (Remote Framebuffer / VNC) server.
//!
//! This library implements the server side of the RFB protocol as specified
//! in RFC 6143, speaking protocol versions 3.3, 3.7 and 3.8 with the Raw,
//! CopyRect, RRE and Hextile encodings. The server owns a shared BGRA
//! framebuffer; each connected viewer diffs against its own snapshot of that
//! framebuffer and pulls rectangle updates at its own pace.
//!
//! ## Features
//!
//! - **Protocol negotiation**: RFB 3.8 with graceful downgrade to 3.7 and 3.3
//! - **VNC Authentication**: DES challenge-response (security type 2)
//! - **Encodings**: Raw, CopyRect, RRE, Hextile
//! - **Per-client diffing**: tile-based dirty-region tracking per session
//! - **Async I/O**: built on Tokio for efficient concurrent client handling
//!
//! ## Quick Start
//!
//! ```no_run
//! use rfbserver::{VncServer, ServerEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a VNC server with a 1280x720 framebuffer
//!     let (server, mut events) = VncServer::new(1280, 720, "my desktop".to_string(), None);
//!
//!     // Start listening on port 5900
//!     let listener = server.clone();
//!     tokio::spawn(async move { listener.listen(5900).await });
//!
//!     // Push frames as they are captured
//!     // server.broadcast_update(&pixels).await?;
//!
//!     // Receive input events from viewers
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ServerEvent::KeyEvent { keysym, down, .. } => { /* inject key */ }
//!             ServerEvent::PointerEvent { x, y, buttons, .. } => { /* inject pointer */ }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Your Application              │
//! │                                         │
//! │  • FrameSource: captured BGRA frames    │
//! │  • InputSink: key/pointer injection     │
//! └──────────────────┬──────────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │           VncServer (Public)            │
//! │                                         │
//! │  • TCP listener, session registry       │
//! │  • Shared framebuffer                   │
//! │  • Event distribution                   │
//! └──────────────────┬──────────────────────┘
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   ┌────────┐ ┌────────┐ ┌────────┐
//!   │Client 1│ │Client 2│ │Client N│   each with its own
//!   └────────┘ └────────┘ └────────┘   dirty-region tracker
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod events;
pub mod framebuffer;
pub mod protocol;
pub mod server;
pub mod source;
pub mod tracker;

// Internal modules
mod auth;
mod client;
pub mod encoding;
pub mod wire;

// Re-exports
pub use client::{ClientEvent, SessionState, VncClient};
pub use encoding::Encoding;
pub use error::{Result, VncError};
pub use events::ServerEvent;
pub use framebuffer::{DirtyRegion, Framebuffer};
pub use protocol::{PixelFormat, ProtocolVersion, UpdateRequest};
pub use server::VncServer;
pub use source::{FrameSource, InputSink};
pub use tracker::DirtyTracker;

/// VNC protocol version advertised by the server.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
