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

//! VNC server implementation for managing client connections and
//! framebuffer distribution.
//!
//! This module provides the main VNC server functionality, including:
//! - TCP listener for incoming client connections
//! - Client session management
//! - Event routing between clients and the application layer
//! - Frame broadcast with per-session dirty diffing
//!
//! # Architecture
//!
//! The server uses an event-driven architecture where:
//! - Each client runs in its own asynchronous task
//! - Client events (keyboard, mouse, clipboard) are forwarded to the application via channels
//! - A frame broadcast wakes every session; each diffs against its own snapshot
//! - Server events (connect/disconnect) are emitted for the application to handle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{error, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify, RwLock};

use crate::client::{ClientEvent, SessionState, VncClient};
use crate::error::{Result, VncError};
use crate::events::ServerEvent;
use crate::framebuffer::{DirtyRegion, Framebuffer};
use crate::protocol::{ENCODING_COPYRECT, ENCODING_EXTENDED_DESKTOP_SIZE};

/// Global atomic counter for assigning unique client IDs.
///
/// Incremented for each new client connection so every client has a unique
/// identifier throughout the server's lifetime.
static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Represents a VNC server instance.
///
/// This struct manages the shared framebuffer, connected clients, and
/// server-wide events. It is cheap to clone; all clones share the same
/// state.
#[derive(Clone)]
pub struct VncServer {
    /// The VNC framebuffer, representing the remote desktop screen.
    framebuffer: Framebuffer,
    /// The name of the desktop, displayed to connected clients.
    desktop_name: String,
    /// Password for client authentication, mutable at runtime. A snapshot
    /// is taken at accept time: changing the password never affects
    /// already-connected sessions.
    password: Arc<RwLock<Option<String>>>,
    /// Live sessions, protected by a lock. Iteration copies the handles
    /// out before performing I/O on any of them.
    sessions: Arc<RwLock<Vec<Arc<SessionState>>>>,
    /// Task handles for client tasks, aborted on shutdown.
    session_tasks: Arc<RwLock<Vec<tokio::task::JoinHandle<()>>>>,
    /// Sender for server-wide events.
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    /// Signals the accept loop to exit.
    shutdown: Arc<Notify>,
    /// Set once `stop()` has run; makes shutdown idempotent.
    stopped: Arc<AtomicBool>,
}

impl VncServer {
    /// Creates a new `VncServer` instance.
    ///
    /// # Arguments
    ///
    /// * `width` - The width of the VNC framebuffer.
    /// * `height` - The height of the VNC framebuffer.
    /// * `desktop_name` - The name of the desktop advertised to clients.
    /// * `password` - An optional password for client authentication.
    ///
    /// # Returns
    ///
    /// A tuple containing:
    /// * The `VncServer` instance itself.
    /// * An `mpsc::UnboundedReceiver<ServerEvent>` to receive events generated by the server.
    #[must_use]
    pub fn new(
        width: u16,
        height: u16,
        desktop_name: String,
        password: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let server = Self {
            framebuffer: Framebuffer::new(width, height),
            desktop_name,
            password: Arc::new(RwLock::new(password)),
            sessions: Arc::new(RwLock::new(Vec::new())),
            session_tasks: Arc::new(RwLock::new(Vec::new())),
            event_tx,
            shutdown: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        };

        (server, event_rx)
    }

    /// Returns a reference to the server's `Framebuffer`.
    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Whether `stop()` has been invoked.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Replaces the authentication password for future connections.
    ///
    /// Sessions already connected keep the password they were accepted
    /// with.
    pub async fn set_password(&self, password: Option<String>) {
        *self.password.write().await = password;
    }

    /// Starts the VNC server, listening for incoming client connections on
    /// the specified port.
    ///
    /// Accepts connections until [`VncServer::stop`] is invoked, spawning
    /// an asynchronous task per client. Session errors are contained to
    /// their session; only a failure to bind propagates out.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the port cannot be bound.
    pub async fn listen(&self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        info!("VNC server listening on port {port}");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                error!("Failed to set TCP_NODELAY for {addr}: {e}");
                            }
                            self.spawn_session(stream, addr.to_string()).await;
                        }
                        Err(e) => {
                            error!("Error accepting connection: {e}");
                        }
                    }
                }
                () = self.shutdown.notified() => {
                    info!("VNC server listener shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Accepts a VNC client on an already-established stream.
    ///
    /// Anything that reads and writes bytes works: TCP, a UNIX socket, a
    /// WebSocket bridge, or an in-memory pipe in tests.
    ///
    /// # Arguments
    ///
    /// * `stream` - The established bidirectional stream.
    /// * `remote_host` - Peer description used for logging and events.
    pub async fn from_socket<S>(&self, stream: S, remote_host: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        self.spawn_session(stream, remote_host).await;
    }

    /// Spawns the per-connection task: handshake, registration, message
    /// loop, event forwarding, cleanup.
    async fn spawn_session<S>(&self, stream: S, remote_host: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);

        // The password is bound to the session at accept time.
        let password = self.password.read().await.clone();

        let framebuffer = self.framebuffer.clone();
        let desktop_name = self.desktop_name.clone();
        let sessions = self.sessions.clone();
        let session_tasks = self.session_tasks.clone();
        let server_event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let (client_event_tx, mut client_event_rx) = mpsc::unbounded_channel();

            let mut client = match VncClient::new(
                client_id,
                stream,
                remote_host.clone(),
                framebuffer,
                desktop_name,
                password,
                client_event_tx,
            )
            .await
            {
                Ok(client) => client,
                Err(e) => {
                    error!("Client {client_id} ({remote_host}) handshake failed: {e}");
                    return;
                }
            };

            let state = client.state();
            sessions.write().await.push(state.clone());
            let _ = server_event_tx.send(ServerEvent::ClientConnected {
                client_id,
                address: remote_host,
            });

            // Drive the message loop in its own task so this one can keep
            // draining input events.
            let msg_handle = tokio::spawn(async move {
                if let Err(e) = client.handle_messages().await {
                    Self::log_session_error(client_id, &e);
                }
            });
            session_tasks.write().await.push(msg_handle);

            while let Some(event) = client_event_rx.recv().await {
                match event {
                    ClientEvent::KeyPress { down, key } => {
                        let _ = server_event_tx.send(ServerEvent::KeyEvent {
                            client_id,
                            down,
                            keysym: key,
                        });
                    }
                    ClientEvent::PointerMove { x, y, button_mask } => {
                        let _ = server_event_tx.send(ServerEvent::PointerEvent {
                            client_id,
                            x,
                            y,
                            buttons: button_mask,
                        });
                    }
                    ClientEvent::CutText { text } => {
                        let _ = server_event_tx.send(ServerEvent::CutText { client_id, text });
                    }
                    ClientEvent::Disconnected => break,
                }
            }

            sessions
                .write()
                .await
                .retain(|s| !Arc::ptr_eq(s, &state));
            let _ = server_event_tx.send(ServerEvent::ClientDisconnected { client_id });
            info!("Client {client_id} disconnected");
        });

        self.session_tasks.write().await.push(handle);
    }

    /// Copies the current session handles out under the lock.
    async fn session_snapshot(&self) -> Vec<Arc<SessionState>> {
        self.sessions.read().await.clone()
    }

    /// Number of currently connected sessions.
    pub async fn client_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns handles to the currently connected sessions.
    ///
    /// Useful for operator surfaces (listing clients, disconnecting one).
    pub async fn clients(&self) -> Vec<Arc<SessionState>> {
        self.session_snapshot().await
    }

    /// Replaces the shared framebuffer contents without waking sessions.
    ///
    /// # Errors
    ///
    /// Fails if `frame` does not match the framebuffer length.
    pub async fn set_frame(&self, frame: &[u8]) -> Result<()> {
        self.framebuffer.set_frame(frame).await
    }

    /// Replaces the shared framebuffer contents and wakes every session.
    ///
    /// Each session diffs the new frame against its own previous snapshot
    /// when it services its outstanding update request; sessions with no
    /// request outstanding simply see the newest frame whenever they next
    /// ask. Frames pushed while no request is pending are overwritten, not
    /// queued.
    ///
    /// # Errors
    ///
    /// Fails if `frame` does not match the framebuffer length.
    pub async fn broadcast_update(&self, frame: &[u8]) -> Result<()> {
        self.framebuffer.set_frame(frame).await?;
        for session in self.session_snapshot().await {
            session.wake();
        }
        Ok(())
    }

    /// Forces every session to emit a full-screen rectangle on its next
    /// serviced request.
    pub async fn broadcast_full(&self) {
        for session in self.session_snapshot().await {
            session.force_full_update().await;
            session.wake();
        }
    }

    /// Resizes the framebuffer and notifies capable clients.
    ///
    /// Client-initiated resizes are always refused at the session layer;
    /// this is the server-initiated path. Every session's tracker is reset
    /// and sessions that advertised ExtendedDesktopSize receive the new
    /// geometry.
    ///
    /// # Errors
    ///
    /// Fails if `(width, height)` equals the current dimensions or is zero.
    pub async fn resize(&self, width: u16, height: u16) -> Result<()> {
        self.framebuffer.resize(width, height).await?;
        info!("Framebuffer resized to {width}x{height}");

        for session in self.session_snapshot().await {
            session.force_full_update().await;
            if session
                .supports_encoding(ENCODING_EXTENDED_DESKTOP_SIZE)
                .await
            {
                if let Err(e) = session.send_desktop_size(0, width, height).await {
                    error!(
                        "Client {} resize notification failed: {e}",
                        session.client_id()
                    );
                }
            }
            session.wake();
        }
        Ok(())
    }

    /// Moves a rectangle within the framebuffer and tells capable clients
    /// to do the same.
    ///
    /// The source location is supplied by the caller; the server never
    /// auto-detects motion. Sessions that advertised CopyRect receive a
    /// CopyRect rectangle; everyone else picks the change up through their
    /// normal diff.
    ///
    /// # Errors
    ///
    /// Fails if either rectangle falls outside the framebuffer.
    pub async fn copy_rect(
        &self,
        dst_x: u16,
        dst_y: u16,
        width: u16,
        height: u16,
        src_x: u16,
        src_y: u16,
    ) -> Result<()> {
        self.framebuffer
            .copy_region(dst_x, dst_y, width, height, src_x, src_y)
            .await?;

        let region = DirtyRegion::new(dst_x, dst_y, width, height);
        for session in self.session_snapshot().await {
            if session.supports_encoding(ENCODING_COPYRECT).await {
                if let Err(e) = session.send_copy_rect(region, src_x, src_y).await {
                    error!("Client {} CopyRect failed: {e}", session.client_id());
                }
            } else {
                session.wake();
            }
        }
        Ok(())
    }

    /// Sends the provided cut text (clipboard) to all connected clients.
    pub async fn send_cut_text_to_all(&self, text: &str) {
        for session in self.session_snapshot().await {
            if let Err(e) = session.send_cut_text(text).await {
                error!("Client {} cut text failed: {e}", session.client_id());
            }
        }
    }

    /// Rings the bell on all connected clients.
    pub async fn ring_bell(&self) {
        for session in self.session_snapshot().await {
            if let Err(e) = session.send_bell().await {
                error!("Client {} bell failed: {e}", session.client_id());
            }
        }
    }

    /// Disconnects one client by ID.
    ///
    /// # Returns
    ///
    /// `true` if a session with that ID was found and shut down.
    pub async fn disconnect_client(&self, client_id: usize) -> bool {
        let sessions = self.session_snapshot().await;
        for session in sessions {
            if session.client_id() == client_id {
                session.shutdown().await;
                return true;
            }
        }
        false
    }

    /// Stops the server: closes the listener, disconnects every session.
    ///
    /// Idempotent; later calls are no-ops. In-flight session tasks observe
    /// their closed streams and unwind.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("VNC server stopping");
        self.shutdown.notify_waiters();

        // Close write halves so message loops fail out of their reads,
        // then stop whatever is still running.
        let sessions = {
            let mut guard = self.sessions.write().await;
            std::mem::take(&mut *guard)
        };
        for session in sessions {
            session.shutdown().await;
        }

        let tasks = {
            let mut guard = self.session_tasks.write().await;
            std::mem::take(&mut *guard)
        };
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Maps a [`VncError`] to the policy in the error table: disconnects
    /// are silent, everything else is logged with the session that caused
    /// it. Never affects other sessions.
    pub(crate) fn log_session_error(client_id: usize, error: &VncError) {
        if !error.is_disconnect() {
            error!("Client {client_id}: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (server, _events) = VncServer::new(16, 16, "test".to_string(), None);
        assert!(!server.is_stopped());
        server.stop().await;
        assert!(server.is_stopped());
        server.stop().await;
        assert!(server.is_stopped());
    }

    #[tokio::test]
    async fn password_snapshot_semantics() {
        let (server, _events) = VncServer::new(16, 16, "test".to_string(), None);
        server.set_password(Some("secret".to_string())).await;
        assert_eq!(
            server.password.read().await.as_deref(),
            Some("secret")
        );
        server.set_password(None).await;
        assert!(server.password.read().await.is_none());
    }

    #[tokio::test]
    async fn resize_rejects_current_dimensions() {
        let (server, _events) = VncServer::new(32, 32, "test".to_string(), None);
        assert!(server.resize(32, 32).await.is_err());
        assert!(server.resize(64, 64).await.is_ok());
        assert_eq!(server.framebuffer().dimensions().await, (64, 64));
    }
}
