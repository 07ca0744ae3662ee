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

//! VNC client connection handling and protocol implementation.
//!
//! This module manages individual VNC client sessions, handling:
//! - RFB protocol handshake and negotiation (3.3 / 3.7 / 3.8)
//! - Client message processing (input events, encoding requests, etc.)
//! - Framebuffer update transmission with per-session dirty diffing
//! - Client-specific state management (pixel format, encodings, snapshot)
//!
//! # Protocol Flow
//!
//! 1. **Handshake**: Protocol version exchange and security negotiation
//! 2. **Initialization**: Send framebuffer dimensions and pixel format
//! 3. **Message Loop**: Handle incoming client messages and send framebuffer updates
//!
//! # Update model
//!
//! Updates are strictly pull-driven: a rectangle is only written in
//! response to a `FramebufferUpdateRequest`. A request that finds no dirty
//! pixels is parked; when the server broadcasts a new frame the session is
//! woken and the parked request is serviced against it. Nothing is queued
//! for slow clients; the next request always pulls the latest frame.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};

use crate::auth::VncAuth;
use crate::encoding;
use crate::error::{Result, VncError};
use crate::framebuffer::{self, DirtyRegion, Framebuffer};
use crate::protocol::{
    PixelFormat, ProtocolVersion, Rectangle, ServerInit, UpdateRequest,
    CLIENT_MSG_CLIENT_CUT_TEXT, CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST, CLIENT_MSG_KEY_EVENT,
    CLIENT_MSG_POINTER_EVENT, CLIENT_MSG_SET_DESKTOP_SIZE, CLIENT_MSG_SET_ENCODINGS,
    CLIENT_MSG_SET_PIXEL_FORMAT, ENCODING_COPYRECT, ENCODING_EXTENDED_DESKTOP_SIZE,
    ENCODING_HEXTILE, ENCODING_RAW, PROTOCOL_VERSION, SECURITY_RESULT_FAILED, SECURITY_RESULT_OK,
    SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH, SERVER_MSG_BELL, SERVER_MSG_FRAMEBUFFER_UPDATE,
    SERVER_MSG_SERVER_CUT_TEXT,
};
use crate::wire;

/// Limit on inbound clipboard payloads, to bound memory per session.
const MAX_CUT_TEXT: usize = 10 * 1024 * 1024;

/// ExtendedDesktopSize status: the server refuses client-initiated resizes.
const DESKTOP_SIZE_STATUS_PROHIBITED: u16 = 1;

/// Represents various events that a VNC client can send to the server.
/// These events typically correspond to user interactions like keyboard
/// input, pointer movements, or clipboard updates.
pub enum ClientEvent {
    /// A key press or release event.
    /// - `down`: `true` if the key is pressed, `false` if released.
    /// - `key`: The X Window System keysym of the key.
    KeyPress {
        /// Whether the key went down.
        down: bool,
        /// The X11 keysym.
        key: u32,
    },
    /// A pointer (mouse) movement or button event.
    PointerMove {
        /// The X-coordinate of the pointer.
        x: u16,
        /// The Y-coordinate of the pointer.
        y: u16,
        /// A bitmask indicating which mouse buttons are pressed
        /// (bit 0 left, 1 middle, 2 right, 3 wheel-up, 4 wheel-down).
        button_mask: u8,
    },
    /// A client-side clipboard (cut text) update.
    CutText {
        /// The textual content from the client's clipboard.
        text: String,
    },
    /// Notification that the client has disconnected.
    Disconnected,
}

/// Session state shared between the message-loop task and the server.
///
/// Everything the server needs to reach into a live session (waking it
/// for a broadcast, pushing cut text, announcing a resize) goes through
/// this handle; the read half of the connection stays exclusive to the
/// session task inside [`VncClient`].
pub struct SessionState {
    client_id: usize,
    remote_host: String,
    version: ProtocolVersion,
    /// The write half of the connection. Held only while one complete
    /// message is written.
    write_stream: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
    /// Serializes whole messages so the bytes of one `FramebufferUpdate`
    /// never interleave with another writer.
    send_mutex: Mutex<()>,
    /// The pixel format requested by the client. Written by the message
    /// handler, read by the encoder.
    pixel_format: RwLock<PixelFormat>,
    /// The encodings advertised by the client, including pseudo-encodings.
    encodings: RwLock<Vec<i32>>,
    /// This session's view of what the client has been shown.
    tracker: Mutex<crate::tracker::DirtyTracker>,
    /// An update request that found nothing dirty, awaiting new pixels.
    pending: RwLock<Option<UpdateRequest>>,
    /// Woken by the server when the shared framebuffer changes.
    update_notify: Notify,
}

impl SessionState {
    /// Returns the unique client ID assigned by the server.
    #[must_use]
    pub fn client_id(&self) -> usize {
        self.client_id
    }

    /// Returns the remote peer address of the connected client.
    #[must_use]
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Returns the protocol version negotiated with this client.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Whether the client advertised the given encoding or pseudo-encoding.
    pub async fn supports_encoding(&self, encoding_type: i32) -> bool {
        self.encodings.read().await.contains(&encoding_type)
    }

    /// Encoding used for pixel rectangles: Hextile if the client advertised
    /// it, Raw otherwise. CopyRect is only used when the caller supplies an
    /// explicit source, and RRE selection stays opt-in policy.
    pub async fn preferred_encoding(&self) -> i32 {
        if self.supports_encoding(ENCODING_HEXTILE).await {
            ENCODING_HEXTILE
        } else {
            ENCODING_RAW
        }
    }

    /// Forces the next serviced update to cover the full screen.
    pub async fn force_full_update(&self) {
        self.tracker.lock().await.force_full_update();
    }

    /// Wakes the session task so a parked update request is re-serviced
    /// against the current framebuffer.
    pub fn wake(&self) {
        self.update_notify.notify_one();
    }

    /// Writes one complete message under the session's send mutex.
    async fn send_message(&self, bytes: &[u8]) -> Result<()> {
        let _guard = self.send_mutex.lock().await;
        let mut stream = self.write_stream.lock().await;
        wire::write_all(&mut *stream, bytes).await
    }

    /// Sends a `ServerCutText` message to the client, updating its clipboard.
    ///
    /// # Errors
    ///
    /// Fails if the stream write fails or times out.
    #[allow(clippy::cast_possible_truncation)] // Clipboard text length limited to u32 per VNC protocol
    pub async fn send_cut_text(&self, text: &str) -> Result<()> {
        let mut msg = BytesMut::with_capacity(8 + text.len());
        msg.put_u8(SERVER_MSG_SERVER_CUT_TEXT);
        msg.put_bytes(0, 3); // padding
        msg.put_u32(text.len() as u32);
        msg.put_slice(text.as_bytes());
        self.send_message(&msg).await
    }

    /// Sends a Bell message, asking the client for an audible alert.
    ///
    /// # Errors
    ///
    /// Fails if the stream write fails or times out.
    pub async fn send_bell(&self) -> Result<()> {
        self.send_message(&[SERVER_MSG_BELL]).await
    }

    /// Sends one CopyRect rectangle moving `region` from `(src_x, src_y)`
    /// in the client's own framebuffer.
    ///
    /// The caller is responsible for only invoking this on sessions that
    /// advertised CopyRect and for supplying a source inside the screen.
    ///
    /// # Errors
    ///
    /// Fails if the stream write fails or times out.
    pub async fn send_copy_rect(&self, region: DirtyRegion, src_x: u16, src_y: u16) -> Result<()> {
        let mut msg = BytesMut::with_capacity(20);
        msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        msg.put_u8(0); // padding
        msg.put_u16(1); // number of rectangles
        Rectangle {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            encoding: ENCODING_COPYRECT,
        }
        .write_header(&mut msg);
        msg.extend_from_slice(&encoding::encode_copy_rect(src_x, src_y));
        self.send_message(&msg).await
    }

    /// Sends an ExtendedDesktopSize rectangle.
    ///
    /// Used both to announce a server-initiated resize (`status == 0`) and
    /// to refuse a client-initiated one (`status != 0`). The status rides
    /// in the rectangle's y field; one screen covering the framebuffer is
    /// reported.
    ///
    /// # Errors
    ///
    /// Fails if the stream write fails or times out.
    pub async fn send_desktop_size(&self, status: u16, width: u16, height: u16) -> Result<()> {
        let mut msg = BytesMut::with_capacity(36);
        msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        msg.put_u8(0); // padding
        msg.put_u16(1); // number of rectangles
        Rectangle {
            x: 0,
            y: status,
            width,
            height,
            encoding: ENCODING_EXTENDED_DESKTOP_SIZE,
        }
        .write_header(&mut msg);
        msg.put_u8(1); // number of screens
        msg.put_bytes(0, 3); // padding
        msg.put_u32(1); // screen id
        msg.put_u16(0); // screen x
        msg.put_u16(0); // screen y
        msg.put_u16(width);
        msg.put_u16(height);
        msg.put_u32(0); // screen flags
        self.send_message(&msg).await
    }

    /// Closes the write half of the connection, unwinding the session task.
    pub async fn shutdown(&self) {
        let mut stream = self.write_stream.lock().await;
        let _ = stream.shutdown().await;
    }
}

/// Manages a single VNC client connection, handling communication,
/// framebuffer updates, and client input events.
///
/// Constructed by [`VncClient::new`], which performs the entire RFB
/// handshake before returning. The connection's read half is owned here
/// and driven by [`VncClient::handle_messages`]; everything the server
/// needs to reach is in the shared [`SessionState`].
pub struct VncClient {
    read_stream: Box<dyn AsyncRead + Unpin + Send + Sync>,
    state: Arc<SessionState>,
    framebuffer: Framebuffer,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
}

impl VncClient {
    /// Creates a new `VncClient`, performing the VNC handshake with the
    /// connected client.
    ///
    /// Runs the full handshake sequence: version exchange with downgrade
    /// detection, security negotiation (the offered list is exactly
    /// `{VncAuth}` when a password is configured, `{None}` otherwise),
    /// optional challenge-response authentication, `ClientInit`, and
    /// `ServerInit`.
    ///
    /// # Arguments
    ///
    /// * `client_id` - The unique client ID assigned by the server.
    /// * `stream` - The established connection to the VNC client. Any
    ///   bidirectional byte stream works; the server passes TCP streams
    ///   and tests drive in-memory pipes.
    /// * `remote_host` - Peer address, for logging and introspection.
    /// * `framebuffer` - The shared framebuffer this client is shown.
    /// * `desktop_name` - Name sent in `ServerInit`.
    /// * `password` - Password snapshot taken at accept time; `Some` offers
    ///   VNC authentication, `None` offers the None security type.
    /// * `event_tx` - Channel for input events generated by this client.
    ///
    /// # Errors
    ///
    /// Any handshake failure (stream error, malformed version, security
    /// mismatch, failed authentication) aborts the session.
    pub async fn new<S>(
        client_id: usize,
        mut stream: S,
        remote_host: String,
        framebuffer: Framebuffer,
        desktop_name: String,
        password: Option<String>,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        // H0: advertise our best version.
        wire::write_all(&mut stream, PROTOCOL_VERSION.as_bytes()).await?;

        // H1: detect what the client actually speaks.
        let mut version_buf = [0u8; 12];
        wire::read_exact(&mut stream, &mut version_buf).await?;
        let version = ProtocolVersion::from_client_reply(&version_buf)?;
        debug!("Client {client_id} negotiated {version:?}");

        // H2/H3: security negotiation and authentication.
        let offered = if password.is_some() {
            SECURITY_TYPE_VNC_AUTH
        } else {
            SECURITY_TYPE_NONE
        };

        if version.uses_security_type_list() {
            wire::write_all(&mut stream, &[1, offered]).await?;
            let chosen = wire::read_u8(&mut stream).await?;
            if chosen != offered {
                security_failure(&mut stream, version, "Security type not offered").await?;
                return Err(VncError::AuthenticationFailed);
            }
        } else {
            // 3.3: the server dictates the type as a single u32.
            let mut buf = BytesMut::with_capacity(4);
            buf.put_u32(u32::from(offered));
            wire::write_all(&mut stream, &buf).await?;
        }

        if offered == SECURITY_TYPE_VNC_AUTH {
            let auth = VncAuth::new(password);
            let challenge = auth.generate_challenge();
            wire::write_all(&mut stream, &challenge).await?;

            let mut response = [0u8; 16];
            wire::read_exact(&mut stream, &mut response).await?;

            if !auth.verify_response(&response, &challenge) {
                warn!("Client {client_id} ({remote_host}) failed VNC authentication");
                security_failure(&mut stream, version, "Authentication failed").await?;
                return Err(VncError::AuthenticationFailed);
            }
        }

        // SecurityResult OK is written for every version, including 3.7 and
        // 3.3 with the None type, for interoperability.
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(SECURITY_RESULT_OK);
        wire::write_all(&mut stream, &buf).await?;

        // H4: ClientInit. The shared flag is read and ignored; every client
        // shares the one framebuffer.
        let _shared = wire::read_u8(&mut stream).await?;

        // H5: ServerInit.
        let (width, height) = framebuffer.dimensions().await;
        let server_init = ServerInit {
            framebuffer_width: width,
            framebuffer_height: height,
            pixel_format: PixelFormat::bgra32(),
            name: desktop_name,
        };
        let mut init_buf = BytesMut::new();
        server_init.write_to(&mut init_buf);
        wire::write_all(&mut stream, &init_buf).await?;

        info!("Client {client_id} ({remote_host}) handshake completed");

        let (read_half, write_half) = tokio::io::split(stream);

        let state = Arc::new(SessionState {
            client_id,
            remote_host,
            version,
            write_stream: Mutex::new(Box::new(write_half)),
            send_mutex: Mutex::new(()),
            pixel_format: RwLock::new(PixelFormat::bgra32()),
            encodings: RwLock::new(vec![ENCODING_RAW]),
            tracker: Mutex::new(crate::tracker::DirtyTracker::new()),
            pending: RwLock::new(None),
            update_notify: Notify::new(),
        });

        Ok(Self {
            read_stream: Box::new(read_half),
            state,
            framebuffer,
            event_tx,
        })
    }

    /// Returns the shared session state for this client.
    #[must_use]
    pub fn state(&self) -> Arc<SessionState> {
        self.state.clone()
    }

    /// Runs the session's message loop until disconnect or protocol error.
    ///
    /// Reads one message-type byte at a time and dispatches on it; between
    /// messages the loop also wakes when the server signals that the shared
    /// framebuffer changed, so a parked update request is serviced promptly.
    ///
    /// # Errors
    ///
    /// A clean disconnect returns `Ok(())`. Protocol violations, timeouts
    /// and stream errors return the corresponding [`VncError`] after the
    /// `Disconnected` event has been emitted.
    pub async fn handle_messages(&mut self) -> Result<()> {
        let result = self.message_loop().await;
        let _ = self.event_tx.send(ClientEvent::Disconnected);
        match result {
            Err(e) if e.is_disconnect() => Ok(()),
            other => other,
        }
    }

    async fn message_loop(&mut self) -> Result<()> {
        let state = self.state.clone();
        loop {
            let msg_type = tokio::select! {
                r = wire::read_u8(&mut self.read_stream) => Some(r?),
                () = state.update_notify.notified() => None,
            };
            match msg_type {
                Some(t) => self.dispatch_message(t).await?,
                None => self.service_pending().await?,
            }
        }
    }

    /// Handles one client message, the type byte already consumed.
    async fn dispatch_message(&mut self, msg_type: u8) -> Result<()> {
        match msg_type {
            CLIENT_MSG_SET_PIXEL_FORMAT => {
                wire::skip(&mut self.read_stream, 3).await?;
                let mut format_buf = [0u8; 16];
                wire::read_exact(&mut self.read_stream, &mut format_buf).await?;
                let requested = PixelFormat::from_bytes(&format_buf);

                if !requested.is_valid() {
                    warn!(
                        "Client {} requested unsupported pixel format: {requested:?}",
                        self.state.client_id
                    );
                    return Err(VncError::InvalidPixelFormat);
                }

                debug!(
                    "Client {} set pixel format: {}bpp depth={} bigEndian={}",
                    self.state.client_id,
                    requested.bits_per_pixel,
                    requested.depth,
                    requested.big_endian_flag
                );
                *self.state.pixel_format.write().await = requested;
            }
            CLIENT_MSG_SET_ENCODINGS => {
                wire::skip(&mut self.read_stream, 1).await?;
                let count = wire::read_u16(&mut self.read_stream).await?;
                let mut encodings_list = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    encodings_list.push(wire::read_i32(&mut self.read_stream).await?);
                }
                debug!(
                    "Client {} set {count} encodings: {encodings_list:?}",
                    self.state.client_id
                );
                *self.state.encodings.write().await = encodings_list;
            }
            CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
                let incremental = wire::read_u8(&mut self.read_stream).await? != 0;
                let x = wire::read_u16(&mut self.read_stream).await?;
                let y = wire::read_u16(&mut self.read_stream).await?;
                let width = wire::read_u16(&mut self.read_stream).await?;
                let height = wire::read_u16(&mut self.read_stream).await?;
                self.service_update(UpdateRequest {
                    incremental,
                    x,
                    y,
                    width,
                    height,
                })
                .await?;
            }
            CLIENT_MSG_KEY_EVENT => {
                let down = wire::read_u8(&mut self.read_stream).await? != 0;
                wire::skip(&mut self.read_stream, 2).await?;
                let key = wire::read_u32(&mut self.read_stream).await?;
                let _ = self.event_tx.send(ClientEvent::KeyPress { down, key });
            }
            CLIENT_MSG_POINTER_EVENT => {
                let button_mask = wire::read_u8(&mut self.read_stream).await?;
                let x = wire::read_u16(&mut self.read_stream).await?;
                let y = wire::read_u16(&mut self.read_stream).await?;
                let _ = self
                    .event_tx
                    .send(ClientEvent::PointerMove { x, y, button_mask });
            }
            CLIENT_MSG_CLIENT_CUT_TEXT => {
                wire::skip(&mut self.read_stream, 3).await?;
                let length = wire::read_u32(&mut self.read_stream).await? as usize;
                if length > MAX_CUT_TEXT {
                    return Err(VncError::Protocol(format!(
                        "Cut text too large: {length} bytes (max {MAX_CUT_TEXT})"
                    )));
                }
                let mut text_bytes = vec![0u8; length];
                wire::read_exact(&mut self.read_stream, &mut text_bytes).await?;
                if let Ok(text) = String::from_utf8(text_bytes) {
                    let _ = self.event_tx.send(ClientEvent::CutText { text });
                }
            }
            CLIENT_MSG_SET_DESKTOP_SIZE => {
                // Consume the requested layout, then refuse: the framebuffer
                // dimensions are fixed for the lifetime of a session.
                wire::skip(&mut self.read_stream, 1).await?;
                let req_width = wire::read_u16(&mut self.read_stream).await?;
                let req_height = wire::read_u16(&mut self.read_stream).await?;
                let num_screens = wire::read_u8(&mut self.read_stream).await?;
                wire::skip(&mut self.read_stream, 1).await?;
                wire::skip(&mut self.read_stream, usize::from(num_screens) * 16).await?;

                if self
                    .state
                    .supports_encoding(ENCODING_EXTENDED_DESKTOP_SIZE)
                    .await
                {
                    info!(
                        "Client {} requested resize to {req_width}x{req_height}, refusing",
                        self.state.client_id
                    );
                    self.state
                        .send_desktop_size(DESKTOP_SIZE_STATUS_PROHIBITED, req_width, req_height)
                        .await?;
                }
            }
            unknown => {
                return Err(VncError::Protocol(format!(
                    "Unknown message type: {unknown}"
                )));
            }
        }
        Ok(())
    }

    /// Services one `FramebufferUpdateRequest`.
    ///
    /// Snapshots the framebuffer, diffs it against this session's previous
    /// snapshot (skipping the diff entirely for non-incremental requests),
    /// and writes one `FramebufferUpdate` rectangle. A request that finds
    /// nothing dirty is parked until the server signals new pixels.
    async fn service_update(&self, req: UpdateRequest) -> Result<()> {
        let (fb_width, fb_height, frame) = self.framebuffer.snapshot().await;

        let dirty = {
            let mut tracker = self.state.tracker.lock().await;
            if !req.incremental {
                tracker.force_full_update();
            }
            tracker.update(&frame, fb_width, fb_height)
        };

        let bounds = DirtyRegion::new(0, 0, fb_width, fb_height);
        let region = dirty.and_then(|r| r.intersect(&bounds)).and_then(|r| {
            if req.incremental {
                r.intersect(&DirtyRegion::new(req.x, req.y, req.width, req.height))
            } else {
                Some(r)
            }
        });

        let Some(region) = region else {
            *self.state.pending.write().await = Some(req);
            return Ok(());
        };

        let format = self.state.pixel_format.read().await.clone();
        let encoding_type = self.state.preferred_encoding().await;
        let encoder = encoding::get_encoder(encoding_type)
            .ok_or_else(|| VncError::Encoding(format!("No encoder for type {encoding_type}")))?;

        let rect_data = framebuffer::extract_rect(
            &frame,
            fb_width,
            region.x,
            region.y,
            region.width,
            region.height,
        );
        let payload = encoder.encode(&rect_data, region.width, region.height, &format);

        let mut msg = BytesMut::with_capacity(16 + payload.len());
        msg.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        msg.put_u8(0); // padding
        msg.put_u16(1); // number of rectangles
        Rectangle {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            encoding: encoding_type,
        }
        .write_header(&mut msg);
        msg.extend_from_slice(&payload);

        *self.state.pending.write().await = None;
        self.state.send_message(&msg).await
    }

    /// Re-services a parked update request after a framebuffer change.
    async fn service_pending(&self) -> Result<()> {
        let parked = self.state.pending.write().await.take();
        match parked {
            Some(req) => self.service_update(req).await,
            None => Ok(()),
        }
    }
}

/// Writes a SecurityResult failure, with a reason string where the
/// negotiated version carries one.
async fn security_failure<S>(stream: &mut S, version: ProtocolVersion, reason: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 + reason.len());
    buf.put_u32(SECURITY_RESULT_FAILED);
    if version.sends_failure_reason() {
        #[allow(clippy::cast_possible_truncation)] // reason strings are short constants
        buf.put_u32(reason.len() as u32);
        buf.put_slice(reason.as_bytes());
    }
    wire::write_all(stream, &buf).await
}
