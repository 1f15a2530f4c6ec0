//! Integration tests for rfb-client.
//!
//! Each test plays the server over an in-memory duplex pipe: it reads the
//! client's requests and writes hand-built server messages, then checks the
//! events and the published framebuffer.

use flate2::{Compress, Compression, FlushCompress};
use pretty_assertions::assert_eq;
use rfb_client::{Client, ClientBuilder, ClientCommand, ClientHandle, Config, RfbClientError, ServerEvent};
use rfb_common::Rect;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

const RAW: i32 = 0;
const COPYRECT: i32 = 1;
const HEXTILE: i32 = 5;
const TIGHT: i32 = 7;
const ZRLE: i32 = 16;
const LAST_RECT: i32 = -224;
const NEW_FB_SIZE: i32 = -223;

struct TestServer {
    io: DuplexStream,
}

impl TestServer {
    async fn send(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.unwrap();
    }

    async fn read(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        timeout(WAIT, self.io.read_exact(&mut buf))
            .await
            .expect("timed out waiting for client")
            .unwrap();
        buf
    }

    /// SetPixelFormat; returns bits-per-pixel.
    async fn expect_pixel_format(&mut self) -> u8 {
        let msg = self.read(20).await;
        assert_eq!(msg[0], 0, "expected SetPixelFormat");
        msg[4]
    }

    async fn expect_encodings(&mut self) -> Vec<i32> {
        let head = self.read(4).await;
        assert_eq!(head[0], 2, "expected SetEncodings");
        let count = u16::from_be_bytes([head[2], head[3]]) as usize;
        self.read(count * 4)
            .await
            .chunks_exact(4)
            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// FramebufferUpdateRequest as (incremental, x, y, w, h).
    async fn expect_request(&mut self) -> (bool, u16, u16, u16, u16) {
        let msg = self.read(10).await;
        assert_eq!(msg[0], 3, "expected FramebufferUpdateRequest");
        let word = |i: usize| u16::from_be_bytes([msg[i], msg[i + 1]]);
        (msg[1] == 1, word(2), word(4), word(6), word(8))
    }

    /// Consume everything the client sends on attach.
    async fn expect_attach(&mut self) {
        self.expect_pixel_format().await;
        self.expect_encodings().await;
        let (incremental, ..) = self.expect_request().await;
        assert!(!incremental);
    }
}

fn attach(config: Config, width: u16, height: u16) -> (Client, ClientHandle, TestServer) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(client_io);
    let client = ClientBuilder::new(config)
        .attach(reader, writer, width, height, "test desktop")
        .unwrap();
    let handle = client.handle();
    (client, handle, TestServer { io: server_io })
}

fn depth(bits: u8) -> Config {
    Config::builder().pixel_depth(bits).build().unwrap()
}

async fn next_event(handle: &ClientHandle) -> ServerEvent {
    timeout(WAIT, handle.events().recv_async())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

/// Skip to the first event that is not `Connected`.
async fn next_update_event(handle: &ClientHandle) -> ServerEvent {
    loop {
        match next_event(handle).await {
            ServerEvent::Connected { .. } => continue,
            other => return other,
        }
    }
}

fn fbu(rect_count: u16) -> Vec<u8> {
    let mut out = vec![0, 0];
    out.extend_from_slice(&rect_count.to_be_bytes());
    out
}

fn rect(out: &mut Vec<u8>, x: u16, y: u16, w: u16, h: u16, encoding: i32) {
    for v in [x, y, w, h] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&encoding.to_be_bytes());
}

fn compact(len: usize) -> Vec<u8> {
    let mut out = vec![(len & 0x7F) as u8];
    if len > 0x7F {
        out[0] |= 0x80;
        out.push(((len >> 7) & 0x7F) as u8);
        if len > 0x3FFF {
            out[1] |= 0x80;
            out.push((len >> 14) as u8);
        }
    }
    out
}

/// One server-side deflate stream, sync-flushed per rectangle.
struct Deflater(Compress);

impl Deflater {
    fn new() -> Self {
        Self(Compress::new(Compression::default(), true))
    }

    fn compress(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 1024);
        let start = self.0.total_in();
        loop {
            let consumed = (self.0.total_in() - start) as usize;
            if out.capacity() - out.len() < 64 {
                out.reserve(1024);
            }
            self.0
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Sync)
                .unwrap();
            let consumed = (self.0.total_in() - start) as usize;
            if consumed == data.len() && out.capacity() > out.len() {
                break;
            }
        }
        out
    }
}

#[tokio::test]
async fn test_attach_sends_format_encodings_and_full_request() {
    let config = Config::builder()
        .pixel_depth(8)
        .jpeg_quality(6)
        .build()
        .unwrap();
    let expected = config.effective_encodings();
    let (_client, handle, mut server) = attach(config, 640, 480);

    assert_eq!(server.expect_pixel_format().await, 8);
    assert_eq!(server.expect_encodings().await, expected);
    assert_eq!(server.expect_request().await, (false, 0, 0, 640, 480));

    match next_event(&handle).await {
        ServerEvent::Connected {
            width,
            height,
            name,
            pixel_format,
        } => {
            assert_eq!((width, height), (640, 480));
            assert_eq!(name, "test desktop");
            assert_eq!(pixel_format.bits_per_pixel, 8);
        }
        other => panic!("expected Connected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_raw_update_on_palette_framebuffer() {
    let (_client, handle, mut server) = attach(depth(8), 4, 4);
    server.expect_attach().await;

    let mut msg = fbu(1);
    rect(&mut msg, 0, 0, 4, 4, RAW);
    msg.extend(0u8..16);
    server.send(&msg).await;

    match next_update_event(&handle).await {
        ServerEvent::FramebufferUpdated { damage, repaint } => {
            assert_eq!(damage, vec![Rect::new(0, 0, 4, 4)]);
            assert_eq!(repaint, damage);
        }
        other => panic!("expected FramebufferUpdated, got {:?}", other),
    }
    let expected: Vec<u8> = (0u8..16).collect();
    assert_eq!(handle.framebuffer().lock().data(), expected.as_slice());
    assert_eq!(server.expect_request().await, (true, 0, 0, 4, 4));

    let stats = handle.stats();
    assert_eq!(stats.updates, 1);
    assert_eq!(stats.encodings.raw, 1);
}

#[tokio::test]
async fn test_copyrect_overlapping_shift() {
    let (_client, handle, mut server) = attach(depth(8), 4, 1);
    server.expect_attach().await;

    let mut msg = fbu(2);
    rect(&mut msg, 0, 0, 4, 1, RAW);
    msg.extend([1, 2, 3, 4]);
    rect(&mut msg, 1, 0, 3, 1, COPYRECT);
    msg.extend([0, 0, 0, 0]);
    server.send(&msg).await;

    assert!(matches!(
        next_update_event(&handle).await,
        ServerEvent::FramebufferUpdated { .. }
    ));
    assert_eq!(handle.framebuffer().lock().data(), &[1, 1, 2, 3]);
}

#[tokio::test]
async fn test_hextile_background_fill() {
    let (_client, handle, mut server) = attach(depth(32), 2, 2);
    server.expect_attach().await;

    let mut msg = fbu(1);
    rect(&mut msg, 0, 0, 2, 2, HEXTILE);
    msg.push(0x02); // BackgroundSpecified
    msg.extend([0x33, 0x22, 0x11, 0x00]);
    server.send(&msg).await;

    next_update_event(&handle).await;
    assert_eq!(handle.framebuffer().lock().to_argb(), vec![0xFF11_2233; 4]);
}

#[tokio::test]
async fn test_zrle_single_colour_tile() {
    let (_client, handle, mut server) = attach(depth(32), 3, 2);
    server.expect_attach().await;

    // Palette of one CPIXEL (3 bytes, B,G,R) fills the whole tile.
    let zdata = Deflater::new().compress(&[0x01, 0x33, 0x22, 0x11]);
    let mut msg = fbu(1);
    rect(&mut msg, 0, 0, 3, 2, ZRLE);
    msg.extend_from_slice(&(zdata.len() as u32).to_be_bytes());
    msg.extend(zdata);
    server.send(&msg).await;

    next_update_event(&handle).await;
    assert_eq!(handle.framebuffer().lock().to_argb(), vec![0xFF11_2233; 6]);
    assert_eq!(handle.stats().encodings.zrle, 1);
}

#[tokio::test]
async fn test_tight_fill_consumes_only_its_pixel() {
    let (_client, handle, mut server) = attach(depth(32), 2, 2);
    server.expect_attach().await;

    let mut msg = fbu(2);
    rect(&mut msg, 0, 0, 2, 2, TIGHT);
    msg.extend([0x80, 0x11, 0x22, 0x33]);
    // Immediately followed by another rectangle.
    rect(&mut msg, 1, 1, 1, 1, RAW);
    msg.extend([0xFF, 0x00, 0x00, 0x00]);
    server.send(&msg).await;

    next_update_event(&handle).await;
    assert_eq!(
        handle.framebuffer().lock().to_argb(),
        vec![0xFF11_2233, 0xFF11_2233, 0xFF11_2233, 0xFF00_00FF]
    );
}

#[tokio::test]
async fn test_tight_stream_persists_across_updates() {
    let (_client, handle, mut server) = attach(depth(32), 4, 4);
    server.expect_attach().await;

    let mut deflater = Deflater::new();
    for seed in [1u8, 7] {
        let rgb: Vec<u8> = (0..16 * 3).map(|i| (i as u8).wrapping_mul(seed)).collect();
        let zdata = deflater.compress(&rgb);
        let mut msg = fbu(1);
        rect(&mut msg, 0, 0, 4, 4, TIGHT);
        msg.push(0x00); // basic, stream 0, copy filter
        msg.extend(compact(zdata.len()));
        msg.extend(zdata);
        server.send(&msg).await;

        next_update_event(&handle).await;
        server.expect_request().await;
    }

    let pixel = handle.framebuffer().lock().to_argb()[1];
    assert_eq!(pixel, 0xFF00_0000 | (21 << 16) | (28 << 8) | 35);
}

#[tokio::test]
async fn test_last_rect_ends_unbounded_update() {
    let (_client, handle, mut server) = attach(depth(8), 2, 1);
    server.expect_attach().await;

    let mut msg = fbu(0xFFFF);
    rect(&mut msg, 0, 0, 2, 1, RAW);
    msg.extend([5, 6]);
    rect(&mut msg, 0, 0, 0, 0, LAST_RECT);
    msg.push(2); // Bell
    server.send(&msg).await;

    assert!(matches!(
        next_update_event(&handle).await,
        ServerEvent::FramebufferUpdated { .. }
    ));
    assert!(matches!(next_event(&handle).await, ServerEvent::Bell));
    assert_eq!(handle.framebuffer().lock().data(), &[5, 6]);
}

#[tokio::test]
async fn test_new_fb_size_resizes_and_requests_full_update() {
    let (_client, handle, mut server) = attach(depth(8), 4, 4);
    server.expect_attach().await;

    let mut msg = fbu(2);
    rect(&mut msg, 0, 0, 8, 2, NEW_FB_SIZE);
    rect(&mut msg, 6, 1, 2, 1, 0);
    msg.extend([5, 6]);
    msg.push(2); // Bell
    server.send(&msg).await;

    assert!(matches!(
        next_update_event(&handle).await,
        ServerEvent::DesktopResized { width: 8, height: 2 }
    ));
    match next_event(&handle).await {
        ServerEvent::FramebufferUpdated { damage, .. } => {
            assert_eq!(damage, vec![Rect::new(6, 1, 2, 1)]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(server.expect_request().await, (false, 0, 0, 8, 2));
    assert!(matches!(next_event(&handle).await, ServerEvent::Bell));
    let fb = handle.framebuffer();
    let fb = fb.lock();
    assert_eq!((fb.width(), fb.height()), (8, 2));
    assert_eq!(&fb.data()[14..16], &[5, 6]);
}

#[tokio::test]
async fn test_server_cut_text_event() {
    let (_client, handle, mut server) = attach(depth(8), 4, 4);
    server.expect_attach().await;

    let mut msg = vec![3, 0, 0, 0, 0, 0, 0, 5];
    msg.extend_from_slice(b"hello");
    server.send(&msg).await;

    match next_update_event(&handle).await {
        ServerEvent::ServerCutText { text } => assert_eq!(text, "hello"),
        other => panic!("expected ServerCutText, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_encoding_is_fatal() {
    let (client, handle, mut server) = attach(depth(8), 4, 4);
    server.expect_attach().await;

    let mut msg = fbu(1);
    rect(&mut msg, 0, 0, 1, 1, 99);
    server.send(&msg).await;

    match next_update_event(&handle).await {
        ServerEvent::Error { message } => assert!(message.contains("99"), "{message}"),
        other => panic!("expected Error, got {:?}", other),
    }
    assert!(matches!(next_event(&handle).await, ServerEvent::ConnectionClosed));
    assert!(matches!(
        client.join().await,
        Err(RfbClientError::UnsupportedEncoding(99))
    ));
}

#[tokio::test]
async fn test_colour_map_entries_is_fatal() {
    let (client, handle, mut server) = attach(depth(8), 4, 4);
    server.expect_attach().await;

    server.send(&[1]).await;

    assert!(matches!(
        next_update_event(&handle).await,
        ServerEvent::Error { .. }
    ));
    assert!(matches!(next_event(&handle).await, ServerEvent::ConnectionClosed));
    assert!(matches!(
        client.join().await,
        Err(RfbClientError::UnsupportedMessage(1))
    ));
}

#[tokio::test]
async fn test_close_mid_update_publishes_nothing() {
    let (client, handle, mut server) = attach(depth(8), 4, 4);
    server.expect_attach().await;

    // Header plus half of the Raw payload; the rest never arrives.
    let mut msg = fbu(1);
    rect(&mut msg, 0, 0, 4, 4, RAW);
    msg.extend([9u8; 8]);
    server.send(&msg).await;

    assert!(matches!(next_event(&handle).await, ServerEvent::Connected { .. }));
    handle.close();

    assert!(matches!(next_event(&handle).await, ServerEvent::ConnectionClosed));
    assert!(client.join().await.is_ok());
    assert!(handle.framebuffer().lock().data().iter().all(|&b| b == 0));
}

#[tokio::test]
async fn test_pixel_depth_switch_at_update_boundary() {
    let (_client, handle, mut server) = attach(depth(32), 1, 1);
    server.expect_attach().await;

    handle.send(ClientCommand::SetPixelDepth(8)).unwrap();

    let mut msg = fbu(1);
    rect(&mut msg, 0, 0, 1, 1, RAW);
    msg.extend([0x33, 0x22, 0x11, 0x00]);
    server.send(&msg).await;
    next_update_event(&handle).await;

    assert_eq!(server.expect_pixel_format().await, 8);
    assert_eq!(server.expect_request().await, (false, 0, 0, 1, 1));
    assert_eq!(handle.framebuffer().lock().format().bits_per_pixel, 8);

    let mut msg = fbu(1);
    rect(&mut msg, 0, 0, 1, 1, RAW);
    msg.push(0xFF);
    server.send(&msg).await;
    next_update_event(&handle).await;
    assert_eq!(handle.framebuffer().lock().to_argb(), vec![0xFFFF_FFFF]);
}

#[tokio::test]
async fn test_explicit_request_command() {
    let (_client, handle, mut server) = attach(depth(8), 100, 50);
    server.expect_attach().await;

    handle
        .send(ClientCommand::RequestUpdate {
            incremental: true,
            rect: Some(Rect::new(10, 10, 200, 5)),
        })
        .unwrap();
    assert_eq!(server.expect_request().await, (true, 10, 10, 90, 5));
}

#[tokio::test]
async fn test_server_eof_closes_cleanly() {
    let (client, handle, mut server) = attach(depth(8), 4, 4);
    server.expect_attach().await;
    drop(server);

    assert!(matches!(next_event(&handle).await, ServerEvent::Connected { .. }));
    assert!(matches!(next_event(&handle).await, ServerEvent::ConnectionClosed));
    assert!(client.join().await.is_ok());
}
