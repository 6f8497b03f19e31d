//! Fake modem for integration tests
#![allow(dead_code)]

use rilink::protocol::ParcelReader;
use rilink::transport::FrameCodec;
use rilink::{Endpoint, Link, LinkConfig, LinkState, RawCodec};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};

pub const WAIT: Duration = Duration::from_secs(5);

/// Config with short timers so tests never sit in a retry sleep.
pub fn test_config() -> LinkConfig {
    LinkConfig {
        retry_interval_ms: 50,
        blocking_response_timeout_ms: 200,
        ..LinkConfig::default()
    }
}

pub fn socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("rilink-{}.sock", uuid::Uuid::new_v4()))
}

pub struct FakeModem {
    listener: UnixListener,
    path: PathBuf,
}

impl FakeModem {
    pub fn bind() -> Self {
        Self::bind_at(socket_path())
    }

    pub fn bind_at(path: PathBuf) -> Self {
        let listener = UnixListener::bind(&path).unwrap();
        Self { listener, path }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::Path(self.path.clone())
    }

    pub async fn accept(&self) -> ModemConn {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("link never connected")
            .unwrap();
        ModemConn {
            stream,
            frames: FrameCodec::default(),
        }
    }

    /// Spawn a link pointed at this modem and wait for the connection.
    pub async fn link(&self, config: LinkConfig) -> (Link<RawCodec>, ModemConn) {
        let link = Link::builder(config, RawCodec)
            .endpoint(self.endpoint())
            .spawn();
        let conn = self.accept().await;
        wait_state(&link, LinkState::Connected).await;
        (link, conn)
    }
}

impl Drop for FakeModem {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A request as the modem sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub kind: i32,
    pub serial: i32,
    pub payload: Vec<u8>,
}

pub struct ModemConn {
    stream: UnixStream,
    frames: FrameCodec,
}

fn words(words: &[i32], tail: &[u8]) -> Vec<u8> {
    let mut body: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    body.extend_from_slice(tail);
    body
}

impl ModemConn {
    pub async fn read_frame(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(WAIT, self.frames.read_frame(&mut self.stream))
            .await
            .expect("no frame from link")
            .unwrap()
    }

    pub async fn read_request(&mut self) -> SeenRequest {
        let body = self.read_frame().await.expect("link closed the socket");
        let mut parcel = ParcelReader::new(&body);
        let kind = parcel.read_i32().unwrap();
        let serial = parcel.read_i32().unwrap();
        SeenRequest {
            kind,
            serial,
            payload: parcel.remaining().to_vec(),
        }
    }

    pub async fn send_raw(&mut self, body: &[u8]) {
        self.frames.write_frame(&mut self.stream, body).await.unwrap();
    }

    pub async fn send_solicited(&mut self, serial: i32, error: i32, payload: &[u8]) {
        self.send_raw(&words(&[0, serial, error], payload)).await;
    }

    pub async fn send_solicited_ack_exp(&mut self, serial: i32, error: i32, payload: &[u8]) {
        self.send_raw(&words(&[3, serial, error], payload)).await;
    }

    pub async fn send_ack(&mut self, serial: i32) {
        self.send_raw(&words(&[2, serial], &[])).await;
    }

    pub async fn send_unsolicited(&mut self, event: i32, payload: &[u8]) {
        self.send_raw(&words(&[1, event], payload)).await;
    }

    pub async fn send_unsolicited_ack_exp(&mut self, event: i32, payload: &[u8]) {
        self.send_raw(&words(&[4, event], payload)).await;
    }
}

pub async fn wait_state(link: &Link<RawCodec>, state: LinkState) {
    let mut states = link.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|current| *current == state))
        .await
        .expect("link never reached state")
        .unwrap();
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
