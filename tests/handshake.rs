//! End-to-end protocol tests over in-memory streams.
//!
//! Each test plays the viewer side of a connection byte for byte: the
//! session under test runs against one half of a duplex pipe while the
//! test drives the other half through the handshake and message loop.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use rfbserver::{ClientEvent, Framebuffer, VncClient};

const VERSION_38: &[u8] = b"RFB 003.008\n";

async fn read_bytes(stream: &mut DuplexStream, count: usize) -> Vec<u8> {
    let mut buf = vec![0u8; count];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

/// Starts a session handshake against the far end of a fresh pipe.
fn start_session(
    width: u16,
    height: u16,
    name: &str,
    password: Option<&str>,
) -> (
    DuplexStream,
    Framebuffer,
    mpsc::UnboundedReceiver<ClientEvent>,
    tokio::task::JoinHandle<rfbserver::Result<VncClient>>,
) {
    let (server_side, viewer_side) = tokio::io::duplex(64 * 1024);
    let framebuffer = Framebuffer::new(width, height);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let fb = framebuffer.clone();
    let name = name.to_string();
    let password = password.map(str::to_string);
    let task = tokio::spawn(async move {
        VncClient::new(
            1,
            server_side,
            "test-peer".to_string(),
            fb,
            name,
            password,
            event_tx,
        )
        .await
    });

    (viewer_side, framebuffer, event_rx, task)
}

/// Runs the viewer side of a passwordless 3.8 handshake to completion and
/// returns the ServerInit bytes (without the name).
async fn complete_plain_handshake(viewer: &mut DuplexStream) -> Vec<u8> {
    assert_eq!(read_bytes(viewer, 12).await, VERSION_38);
    viewer.write_all(VERSION_38).await.unwrap();

    // One security type on offer: None.
    assert_eq!(read_bytes(viewer, 2).await, [0x01, 0x01]);
    viewer.write_all(&[0x01]).await.unwrap();

    // SecurityResult OK.
    assert_eq!(read_bytes(viewer, 4).await, [0, 0, 0, 0]);

    // ClientInit: shared flag.
    viewer.write_all(&[0x00]).await.unwrap();

    // ServerInit: dimensions + pixel format + name length.
    read_bytes(viewer, 24).await
}

fn vnc_response(challenge: &[u8], password: &str) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (i, &b) in password.as_bytes().iter().take(8).enumerate() {
        key[i] = b.reverse_bits();
    }
    let cipher = Des::new_from_slice(&key).unwrap();

    let mut response = [0u8; 16];
    for half in 0..2 {
        let mut block = [0u8; 8];
        block.copy_from_slice(&challenge[half * 8..half * 8 + 8]);
        let mut block = block.into();
        cipher.encrypt_block(&mut block);
        response[half * 8..half * 8 + 8].copy_from_slice(&block);
    }
    response
}

#[tokio::test]
async fn bare_handshake_without_auth() {
    let (mut viewer, _fb, _events, task) = start_session(2, 1, "x", None);

    let init = complete_plain_handshake(&mut viewer).await;
    assert_eq!(
        init,
        vec![
            0x00, 0x02, 0x00, 0x01, // 2x1 framebuffer
            0x20, 0x18, 0x00, 0x01, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x10, 0x08, 0x00, 0x00,
            0x00, 0x00, // pixel format
            0x00, 0x00, 0x00, 0x01, // name length
        ]
    );
    assert_eq!(read_bytes(&mut viewer, 1).await, b"x");

    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn vnc_auth_success() {
    let (mut viewer, _fb, _events, task) = start_session(4, 4, "auth", Some("pass"));

    assert_eq!(read_bytes(&mut viewer, 12).await, VERSION_38);
    viewer.write_all(VERSION_38).await.unwrap();

    // One security type on offer: VNC Authentication.
    assert_eq!(read_bytes(&mut viewer, 2).await, [0x01, 0x02]);
    viewer.write_all(&[0x02]).await.unwrap();

    let challenge = read_bytes(&mut viewer, 16).await;
    let response = vnc_response(&challenge, "pass");
    viewer.write_all(&response).await.unwrap();

    assert_eq!(read_bytes(&mut viewer, 4).await, [0, 0, 0, 0]);

    viewer.write_all(&[0x00]).await.unwrap();
    let _server_init = read_bytes(&mut viewer, 24 + 4).await;

    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn vnc_auth_failure_carries_reason() {
    let (mut viewer, _fb, _events, task) = start_session(4, 4, "auth", Some("pass"));

    assert_eq!(read_bytes(&mut viewer, 12).await, VERSION_38);
    viewer.write_all(VERSION_38).await.unwrap();
    assert_eq!(read_bytes(&mut viewer, 2).await, [0x01, 0x02]);
    viewer.write_all(&[0x02]).await.unwrap();

    let _challenge = read_bytes(&mut viewer, 16).await;
    viewer.write_all(&[0u8; 16]).await.unwrap();

    // SecurityResult failed, with a 3.8 reason string.
    assert_eq!(read_bytes(&mut viewer, 4).await, [0, 0, 0, 1]);
    let reason_len = u32::from_be_bytes(read_bytes(&mut viewer, 4).await.try_into().unwrap());
    let reason = read_bytes(&mut viewer, reason_len as usize).await;
    assert_eq!(reason, b"Authentication failed");

    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn mismatched_security_choice_is_refused() {
    let (mut viewer, _fb, _events, task) = start_session(4, 4, "sec", None);

    assert_eq!(read_bytes(&mut viewer, 12).await, VERSION_38);
    viewer.write_all(VERSION_38).await.unwrap();
    assert_eq!(read_bytes(&mut viewer, 2).await, [0x01, 0x01]);

    // Pick VNC auth even though only None was offered.
    viewer.write_all(&[0x02]).await.unwrap();

    assert_eq!(read_bytes(&mut viewer, 4).await, [0, 0, 0, 1]);
    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn protocol_33_receives_security_as_u32() {
    let (mut viewer, _fb, _events, task) = start_session(4, 4, "legacy", None);

    assert_eq!(read_bytes(&mut viewer, 12).await, VERSION_38);
    viewer.write_all(b"RFB 003.003\n").await.unwrap();

    // 3.3: the security type arrives as one big-endian u32, no list and
    // no client choice.
    assert_eq!(read_bytes(&mut viewer, 4).await, [0, 0, 0, 1]);
    // SecurityResult OK is still sent for interoperability.
    assert_eq!(read_bytes(&mut viewer, 4).await, [0, 0, 0, 0]);

    viewer.write_all(&[0x00]).await.unwrap();
    let _server_init = read_bytes(&mut viewer, 24 + 6).await;

    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn malformed_version_aborts() {
    let (mut viewer, _fb, _events, task) = start_session(4, 4, "bad", None);

    assert_eq!(read_bytes(&mut viewer, 12).await, VERSION_38);
    viewer.write_all(b"GET / HTTP/1").await.unwrap();

    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn raw_rectangle_update() {
    let (mut viewer, fb, _events, task) = start_session(2, 2, "raw", None);

    // Known BGRA content before the request arrives.
    #[rustfmt::skip]
    let frame = [
        0xB0, 0x90, 0x80, 0xA0,  0xB1, 0x91, 0x81, 0xA1,
        0xB2, 0x92, 0x82, 0xA2,  0xB3, 0x93, 0x83, 0xA3,
    ];
    fb.set_frame(&frame).await.unwrap();

    complete_plain_handshake(&mut viewer).await;
    read_bytes(&mut viewer, 3).await; // name "raw"

    let mut client = task.await.unwrap().unwrap();
    let session = tokio::spawn(async move { client.handle_messages().await });

    // Non-incremental request for the full screen.
    viewer
        .write_all(&[3, 0, 0, 0, 0, 0, 0, 2, 0, 2])
        .await
        .unwrap();

    let msg = read_bytes(&mut viewer, 4 + 12 + 16).await;
    #[rustfmt::skip]
    assert_eq!(
        msg,
        vec![
            0x00, 0x00, 0x00, 0x01, // FramebufferUpdate, 1 rectangle
            0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, // header, Raw
            0xB0, 0x90, 0x80, 0x00,  0xB1, 0x91, 0x81, 0x00,
            0xB2, 0x92, 0x82, 0x00,  0xB3, 0x93, 0x83, 0x00,
        ]
    );

    drop(viewer);
    let _ = session.await.unwrap();
}

#[tokio::test]
async fn hextile_selected_when_advertised() {
    let (mut viewer, fb, _events, task) = start_session(16, 16, "hex", None);

    // Solid red screen.
    let frame: Vec<u8> = [0x00, 0x00, 0xFF, 0xFF]
        .iter()
        .copied()
        .cycle()
        .take(16 * 16 * 4)
        .collect();
    fb.set_frame(&frame).await.unwrap();

    complete_plain_handshake(&mut viewer).await;
    read_bytes(&mut viewer, 3).await; // name "hex"

    let mut client = task.await.unwrap().unwrap();
    let session = tokio::spawn(async move { client.handle_messages().await });

    // SetEncodings: Hextile then Raw.
    viewer
        .write_all(&[2, 0, 0, 2, 0, 0, 0, 5, 0, 0, 0, 0])
        .await
        .unwrap();
    // Non-incremental full-screen request.
    viewer
        .write_all(&[3, 0, 0, 0, 0, 0, 0, 16, 0, 16])
        .await
        .unwrap();

    let msg = read_bytes(&mut viewer, 4 + 12 + 5).await;
    assert_eq!(&msg[0..4], &[0x00, 0x00, 0x00, 0x01]);
    // Rectangle header: full screen, encoding 5.
    assert_eq!(
        &msg[4..16],
        &[0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x05]
    );
    // One solid tile: BackgroundSpecified + red pixel.
    assert_eq!(&msg[16..21], &[0x02, 0x00, 0x00, 0xFF, 0x00]);

    drop(viewer);
    let _ = session.await.unwrap();
}

#[tokio::test]
async fn incremental_request_parks_until_frame_changes() {
    let (mut viewer, fb, _events, task) = start_session(128, 128, "inc", None);

    complete_plain_handshake(&mut viewer).await;
    read_bytes(&mut viewer, 3).await; // name "inc"

    let mut client = task.await.unwrap().unwrap();
    let state = client.state();
    let session = tokio::spawn(async move { client.handle_messages().await });

    // Full update primes the session's snapshot.
    viewer
        .write_all(&[3, 0, 0, 0, 0, 0, 0, 128, 0, 128])
        .await
        .unwrap();
    read_bytes(&mut viewer, 4 + 12 + 128 * 128 * 4).await;

    // Incremental request with nothing changed: no bytes may arrive.
    viewer
        .write_all(&[3, 1, 0, 0, 0, 0, 0, 128, 0, 128])
        .await
        .unwrap();
    let mut probe = [0u8; 1];
    assert!(
        timeout(Duration::from_millis(200), viewer.read_exact(&mut probe))
            .await
            .is_err(),
        "unchanged frame must not produce an update"
    );

    // Change one pixel at (70, 70) and wake the session: the parked
    // request is serviced with the dirty 64x64 tile.
    let mut frame = vec![0u8; 128 * 128 * 4];
    frame[(70 * 128 + 70) * 4] = 0xFF;
    fb.set_frame(&frame).await.unwrap();
    state.wake();

    let msg = read_bytes(&mut viewer, 4 + 12).await;
    assert_eq!(&msg[0..4], &[0x00, 0x00, 0x00, 0x01]);
    assert_eq!(
        &msg[4..12],
        &[0x00, 0x40, 0x00, 0x40, 0x00, 0x40, 0x00, 0x40], // x=64 y=64 64x64
    );
    read_bytes(&mut viewer, 4 + 64 * 64 * 4).await; // encoding + Raw payload

    drop(viewer);
    let _ = session.await.unwrap();
}

#[tokio::test]
async fn desktop_size_request_is_refused() {
    let (mut viewer, _fb, _events, task) = start_session(32, 32, "nsz", None);

    complete_plain_handshake(&mut viewer).await;
    read_bytes(&mut viewer, 3).await; // name "nsz"

    let mut client = task.await.unwrap().unwrap();
    let session = tokio::spawn(async move { client.handle_messages().await });

    // Advertise ExtendedDesktopSize (-308) alongside Raw.
    let mut set_encodings = vec![2, 0, 0, 2];
    set_encodings.extend_from_slice(&0i32.to_be_bytes());
    set_encodings.extend_from_slice(&(-308i32).to_be_bytes());
    viewer.write_all(&set_encodings).await.unwrap();

    // SetDesktopSize asking for 64x64 with one screen.
    let mut msg = vec![251, 0, 0, 64, 0, 64, 1, 0];
    msg.extend_from_slice(&[0u8; 16]); // screen entry
    viewer.write_all(&msg).await.unwrap();

    // ExtendedDesktopSize rectangle with a non-zero status in y.
    let reply = read_bytes(&mut viewer, 4 + 12 + 4 + 16).await;
    assert_eq!(&reply[0..4], &[0x00, 0x00, 0x00, 0x01]);
    assert_eq!(&reply[4..8], &[0x00, 0x00, 0x00, 0x01]); // x=0, y=status=1
    assert_eq!(&reply[8..12], &[0x00, 0x40, 0x00, 0x40]); // refused geometry
    assert_eq!(&reply[12..16], &[0xFF, 0xFF, 0xFE, 0xCC]); // encoding -308

    drop(viewer);
    let _ = session.await.unwrap();
}

#[tokio::test]
async fn unknown_message_type_terminates_session() {
    let (mut viewer, _fb, mut events, task) = start_session(8, 8, "bye", None);

    complete_plain_handshake(&mut viewer).await;
    read_bytes(&mut viewer, 3).await; // name "bye"

    let mut client = task.await.unwrap().unwrap();
    let session = tokio::spawn(async move { client.handle_messages().await });

    viewer.write_all(&[0xAA]).await.unwrap();

    let result = timeout(Duration::from_secs(5), session)
        .await
        .expect("session must terminate")
        .unwrap();
    assert!(result.is_err());

    // The Disconnected event fires on the way out.
    let mut saw_disconnect = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ClientEvent::Disconnected) {
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect);
}

#[tokio::test]
async fn input_events_are_forwarded() {
    let (mut viewer, _fb, mut events, task) = start_session(8, 8, "inp", None);

    complete_plain_handshake(&mut viewer).await;
    read_bytes(&mut viewer, 3).await; // name "inp"

    let mut client = task.await.unwrap().unwrap();
    let session = tokio::spawn(async move { client.handle_messages().await });

    // KeyEvent: Return pressed.
    viewer
        .write_all(&[4, 1, 0, 0, 0x00, 0x00, 0xFF, 0x0D])
        .await
        .unwrap();
    // PointerEvent: left button at (5, 6).
    viewer.write_all(&[5, 0b001, 0, 5, 0, 6]).await.unwrap();
    // ClientCutText: "hi".
    viewer
        .write_all(&[6, 0, 0, 0, 0, 0, 0, 2, b'h', b'i'])
        .await
        .unwrap();

    let key = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        key,
        ClientEvent::KeyPress {
            down: true,
            key: 0xFF0D
        }
    ));

    let pointer = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        pointer,
        ClientEvent::PointerMove {
            x: 5,
            y: 6,
            button_mask: 0b001
        }
    ));

    let cut = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match cut {
        ClientEvent::CutText { text } => assert_eq!(text, "hi"),
        _ => panic!("expected cut text"),
    }

    drop(viewer);
    let _ = session.await.unwrap();
}
