//! Carries requests and replies between processes over TCP.
//!
//! Every frame is a little-endian `u64` length followed by that many bytes of
//! JSON. The server starts each connection with an `advertise` frame listing
//! the services it answers; after that the client sends `request` frames and
//! the server answers each with a `reply` frame carrying the same id.
//!
//! Frames longer than [`MAX_FRAME_LEN`] are never written. An oversized
//! request fails its own call with [`Error::FrameTooLarge`]; an oversized
//! response is replaced by a failure reply. The connection stays up in both
//! cases.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{Envelope, Error, Reply, ResponderEndpoint, Transport};

/// Largest JSON body a frame may carry, in bytes.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;
const WRITE_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Frame {
    Advertise {
        node: String,
        services: Vec<String>,
    },
    Request {
        id: u64,
        service: String,
        payload: Value,
    },
    Reply {
        id: u64,
        result: Result<Value, String>,
    },
}

/// Length prefix and body, ready to be written.
fn encode_frame(frame: &Frame) -> Result<Vec<u8>, Error> {
    let body = serde_json::to_vec(frame)?;
    let len = body.len() as u64;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len,
            limit: MAX_FRAME_LEN,
        });
    }
    let mut bytes = Vec::with_capacity(8 + body.len());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Encodes a reply, falling back to a failure reply when the response does
/// not fit in a frame.
fn encode_reply(id: u64, result: Result<Value, String>) -> Result<Vec<u8>, Error> {
    match encode_frame(&Frame::Reply { id, result }) {
        Err(Error::FrameTooLarge { len, limit }) => {
            warn!(id, len, "response too large for a frame, sending a failure instead");
            encode_frame(&Frame::Reply {
                id,
                result: Err(format!(
                    "response of {len} bytes exceeds the frame limit of {limit}"
                )),
            })
        }
        encoded => encoded,
    }
}

/// Returns `None` when the peer closed the stream between frames.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Frame>> {
    let len = {
        let mut raw = [0; 8];
        match reader.read_exact(&mut raw).await {
            Ok(_) => u64::from_le_bytes(raw),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    };
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the limit of {MAX_FRAME_LEN}"),
        ));
    }
    let mut buf = vec![0; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

async fn write_bytes<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Writes already encoded frames in the order they are queued.
fn spawn_writer<W>(mut writer: W) -> (mpsc::Sender<Vec<u8>>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (frames, mut outgoing) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
    let handle = tokio::spawn(async move {
        while let Some(bytes) = outgoing.recv().await {
            if let Err(e) = write_bytes(&mut writer, &bytes).await {
                debug!("writing frame failed with: '{}'", e);
                break;
            }
        }
    });
    (frames, handle)
}

/// Accepts requester connections and feeds their requests into the
/// responder behind `endpoint` until `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    endpoint: ResponderEndpoint,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, node = %endpoint.node, "requester connected");
                        tokio::spawn(serve_connection(stream, endpoint.clone()));
                    }
                    Err(e) => warn!("accepting a connection failed with: '{}'", e),
                }
            }
        }
    }
    info!(node = %endpoint.node, "stopped accepting connections");
}

async fn serve_connection(stream: TcpStream, endpoint: ResponderEndpoint) {
    let (mut reader, writer) = stream.into_split();
    let (frames, _writer) = spawn_writer(writer);
    // Services registered later are only seen by later connections.
    let advertise = encode_frame(&Frame::Advertise {
        node: endpoint.node.clone(),
        services: endpoint.services(),
    });
    let advertise = match advertise {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(node = %endpoint.node, "encoding advertisement failed with: '{}'", e);
            return;
        }
    };
    if frames.send(advertise).await.is_err() {
        return;
    }

    loop {
        let read = tokio::select! {
            read = read_frame(&mut reader) => read,
            () = endpoint.queue.closed() => {
                info!(node = %endpoint.node, "responder stopped, closing connection");
                break;
            }
        };
        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(node = %endpoint.node, "reading from requester failed with: '{}'", e);
                break;
            }
        };
        let (id, service, payload) = match frame {
            Frame::Request {
                id,
                service,
                payload,
            } => (id, service, payload),
            other => {
                warn!(frame = ?other, "unexpected frame from requester");
                continue;
            }
        };

        let (reply, response) = oneshot::channel();
        let envelope = Envelope {
            id,
            service,
            payload,
            reply,
        };
        if endpoint.queue.send(envelope).await.is_err() {
            info!(node = %endpoint.node, "responder stopped, closing connection");
            break;
        }
        let frames = frames.clone();
        tokio::spawn(async move {
            // Nothing to send when the responder dropped the request; the
            // requester sees the call cancelled once the connection closes.
            if let Ok(Reply { id, result }) = response.await {
                match encode_reply(id, result) {
                    Ok(bytes) => {
                        let _ = frames.send(bytes).await;
                    }
                    Err(e) => warn!(id, "encoding reply failed with: '{}'", e),
                }
            }
        });
    }
    debug!(node = %endpoint.node, "requester disconnected");
}

#[derive(Default)]
struct LinkState {
    outgoing: Option<mpsc::Sender<Vec<u8>>>,
    node: Option<String>,
    services: HashSet<String>,
    pending: HashMap<u64, oneshot::Sender<Reply>>,
}

/// Requester side of the TCP transport.
///
/// Keeps reconnecting to the server in the background. Replies are matched to
/// pending calls by id; when the connection drops, every pending call is
/// cancelled. Must be created inside a tokio runtime.
pub struct TcpLink {
    state: Arc<Mutex<LinkState>>,
    supervisor: JoinHandle<()>,
}

impl TcpLink {
    pub fn connect(addr: SocketAddr, reconnect_interval: Duration) -> Self {
        let state = Arc::new(Mutex::new(LinkState::default()));
        let supervisor = tokio::spawn(supervise(addr, reconnect_interval, state.clone()));
        Self { state, supervisor }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().outgoing.is_some()
    }

    /// Node name the connected server advertised.
    pub fn remote_node(&self) -> Option<String> {
        self.state.lock().node.clone()
    }

    /// Calls waiting for a reply. Abandoned calls are counted until the next
    /// dispatch or reply.
    pub fn pending_calls(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl Transport for TcpLink {
    fn is_available(&self, service: &str) -> bool {
        let state = self.state.lock();
        state.outgoing.is_some() && state.services.contains(service)
    }

    fn dispatch(&self, envelope: Envelope) -> Result<(), Error> {
        let Envelope {
            id,
            service,
            payload,
            reply,
        } = envelope;
        let request = encode_frame(&Frame::Request {
            id,
            service: service.clone(),
            payload,
        })?;
        let mut state = self.state.lock();
        let outgoing = match &state.outgoing {
            Some(outgoing) if state.services.contains(&service) => outgoing.clone(),
            _ => {
                return Err(Error::Unavailable {
                    service,
                    waited: Duration::ZERO,
                })
            }
        };
        // Calls whose handle was dropped or cancelled no longer need a slot.
        state.pending.retain(|_, waiting| !waiting.is_closed());
        state.pending.insert(id, reply);
        match outgoing.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                state.pending.remove(&id);
                Err(Error::QueueFull { service })
            }
            Err(TrySendError::Closed(_)) => {
                state.pending.remove(&id);
                Err(Error::Unavailable {
                    service,
                    waited: Duration::ZERO,
                })
            }
        }
    }
}

async fn supervise(addr: SocketAddr, reconnect_interval: Duration, state: Arc<Mutex<LinkState>>) {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(%addr, "connected to responder");
                run_link(stream, &state).await;
                warn!(%addr, "connection to responder lost");
            }
            Err(e) => debug!(%addr, "connecting failed with: '{}'", e),
        }
        tokio::time::sleep(reconnect_interval).await;
    }
}

async fn run_link(stream: TcpStream, state: &Mutex<LinkState>) {
    let (mut reader, writer) = stream.into_split();
    let (frames, writer) = spawn_writer(writer);
    state.lock().outgoing = Some(frames);

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(Frame::Advertise { node, services })) => {
                debug!(%node, ?services, "responder advertised");
                let mut state = state.lock();
                state.node = Some(node);
                state.services = services.into_iter().collect();
            }
            Ok(Some(Frame::Reply { id, result })) => {
                let waiting = state.lock().pending.remove(&id);
                match waiting {
                    Some(reply) => {
                        if reply.send(Reply { id, result }).is_err() {
                            debug!(id, "requester stopped waiting before the response");
                        }
                    }
                    None => warn!(id, "dropping response that matches no pending call"),
                }
            }
            Ok(Some(frame)) => warn!(?frame, "unexpected frame from responder"),
            Ok(None) => break,
            Err(e) => {
                warn!("reading from responder failed with: '{}'", e);
                break;
            }
        }
    }

    let cancelled = {
        let mut state = state.lock();
        state.outgoing = None;
        state.node = None;
        state.services.clear();
        let cancelled = state.pending.len();
        state.pending.clear();
        cancelled
    };
    if cancelled > 0 {
        warn!(cancelled, "pending calls cancelled by lost connection");
    }
    writer.abort();
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = Frame::Reply {
            id: 3,
            result: Err("no such service".to_string()),
        };
        write_bytes(&mut client, &encode_frame(&frame).unwrap())
            .await
            .unwrap();
        drop(client);
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(frame));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[test]
    fn test_frame_layout() {
        let frame = Frame::Request {
            id: 1,
            service: "add_two_ints".to_string(),
            payload: json!({"a": 41, "b": 1}),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "kind": "request",
                "id": 1,
                "service": "add_two_ints",
                "payload": {"a": 41, "b": 1},
            })
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_FRAME_LEN + 1).to_le_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_oversized_frame_not_encoded() {
        let frame = Frame::Request {
            id: 1,
            service: "echo".to_string(),
            payload: Value::String("x".repeat(MAX_FRAME_LEN as usize)),
        };
        let err = encode_frame(&frame).unwrap_err();
        assert!(
            matches!(err, Error::FrameTooLarge { len, limit } if len > limit && limit == MAX_FRAME_LEN)
        );
    }

    #[tokio::test]
    async fn test_oversized_response_becomes_failure_reply() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let huge = Value::String("x".repeat(MAX_FRAME_LEN as usize));
        let bytes = encode_reply(12, Ok(huge)).unwrap();
        assert!(bytes.len() < 1024);
        write_bytes(&mut client, &bytes).await.unwrap();
        match read_frame(&mut server).await.unwrap() {
            Some(Frame::Reply {
                id: 12,
                result: Err(message),
            }) => assert!(message.contains("exceeds the frame limit")),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u64.to_le_bytes()).await.unwrap();
        client.write_all(b"{}").await.unwrap();
        drop(client);
        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_unconnected_link_is_unavailable() {
        // Nothing listens on port 9 of localhost in the test environment.
        let link = TcpLink::connect("127.0.0.1:9".parse().unwrap(), Duration::from_secs(60));
        assert!(!link.is_available("add_two_ints"));
        let err = link
            .dispatch(Envelope {
                id: 1,
                service: "add_two_ints".to_string(),
                payload: Value::Null,
                reply: oneshot::channel().0,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        assert_eq!(link.pending_calls(), 0);
    }
}
