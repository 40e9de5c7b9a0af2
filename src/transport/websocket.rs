//! WebSocket binding of the cloud transport
//!
//! Messages travel as JSON text frames over a (mutually) TLS-authenticated
//! WebSocket. Writes are serialized behind a mutex on the sink half, which
//! is what makes [`TransportAdapter::send`] safe for the outbound and
//! heartbeat pumps to call concurrently.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{TransportAdapter, TransportError};
use crate::config::HubConfig;
use crate::message::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport adapter
pub struct WebSocketTransport {
    url: String,
    cert_file: PathBuf,
    key_file: PathBuf,
    handshake_timeout: Duration,
    write_deadline: Duration,
    sink: Mutex<Option<SplitSink<WsStream, WsFrame>>>,
    source: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketTransport {
    /// Create an adapter for one session against `url`
    pub fn new(url: &str, config: &HubConfig) -> Self {
        Self {
            url: url.to_string(),
            cert_file: config.cert_file.clone(),
            key_file: config.key_file.clone(),
            handshake_timeout: config.handshake_timeout,
            write_deadline: config.write_deadline,
            sink: Mutex::new(None),
            source: Mutex::new(None),
        }
    }

    fn tls_connector(&self) -> Result<Option<Connector>, TransportError> {
        if self.cert_file.as_os_str().is_empty() {
            // No client credentials configured; the library's default TLS
            // stack handles plain wss:// (and ws:// needs none at all).
            return Ok(None);
        }

        let certs = load_certs(&self.cert_file)?;
        let key = load_key(&self.key_file)?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| TransportError::Connect(format!("client cert rejected: {e}")))?;

        Ok(Some(Connector::Rustls(Arc::new(config))))
    }
}

#[async_trait]
impl TransportAdapter for WebSocketTransport {
    async fn init(&self) -> Result<(), TransportError> {
        let connector = self.tls_connector()?;

        let handshake =
            connect_async_tls_with_config(self.url.as_str(), None, false, connector);
        let (stream, _response) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| TransportError::Connect("handshake timeout".to_string()))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(url = %self.url, "websocket session established");

        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);
        *self.source.lock().await = Some(source);
        Ok(())
    }

    async fn uninit(&self) {
        // Taking the halves makes a second uninit a no-op.
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "close frame not delivered");
            }
        }
        self.source.lock().await.take();
    }

    async fn send(&self, msg: Message) -> Result<(), TransportError> {
        let frame = encode_frame(&msg)?;
        send_frame(&self.sink, frame, self.write_deadline).await
    }

    async fn receive(&self) -> Result<Message, TransportError> {
        let mut guard = self.source.lock().await;
        let source = guard.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match source.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                Some(Ok(frame)) => match decode_frame(frame)? {
                    Some(msg) => return Ok(msg),
                    // Control frame or undecodable payload; the session
                    // stays up and we wait for the next frame.
                    None => continue,
                },
            }
        }
    }
}

/// Write one frame through the shared sink slot.
///
/// The mutex is held across the whole write, which is what serializes
/// concurrent senders (outbound pump and heartbeat pump) so frames never
/// interleave on the wire. Generic over the sink so the guarantee is
/// testable without a socket.
async fn send_frame<S>(
    slot: &Mutex<Option<S>>,
    frame: WsFrame,
    deadline: Duration,
) -> Result<(), TransportError>
where
    S: futures::Sink<WsFrame> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut guard = slot.lock().await;
    let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;

    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
        Err(_) => Err(TransportError::WriteDeadline),
    }
}

fn encode_frame(msg: &Message) -> Result<WsFrame, TransportError> {
    let text = serde_json::to_string(msg).map_err(|e| TransportError::Frame(e.to_string()))?;
    Ok(WsFrame::Text(text.into()))
}

/// Decode one inbound frame.
///
/// `Ok(None)` means the frame carried no message (control frame, or a
/// payload that failed to decode and was dropped with a warning). Close
/// frames surface as [`TransportError::Closed`].
fn decode_frame(frame: WsFrame) -> Result<Option<Message>, TransportError> {
    match frame {
        WsFrame::Text(text) => match serde_json::from_str(&text) {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => {
                warn!(error = %e, "undecodable text frame, dropping");
                Ok(None)
            }
        },
        WsFrame::Binary(bytes) => match serde_json::from_slice(&bytes) {
            Ok(msg) => Ok(Some(msg)),
            Err(e) => {
                warn!(error = %e, "undecodable binary frame, dropping");
                Ok(None)
            }
        },
        WsFrame::Close(_) => Err(TransportError::Closed),
        // Ping/pong are handled by the library; nothing to surface.
        _ => Ok(None),
    }
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::Connect(format!("cert file {}: {e}", path.display())))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Connect(format!("cert file {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::Connect(format!("key file {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TransportError::Connect(format!("key file {}: {e}", path.display())))?
        .ok_or_else(|| TransportError::Connect(format!("no private key in {}", path.display())))
}
