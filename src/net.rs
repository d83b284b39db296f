//! Reference tokio host.
//!
//! The manager core owns no sockets; this module supplies the missing
//! half for hosts that just want TCP. [`TokioHost`] implements
//! [`HostIo`] with one writer task per transport, feeds inbound bytes
//! to [`DownloadManager::dispatch_from_buffer`], and
//! [`run_ticker`] drives [`DownloadManager::periodic`].
//!
//! The manager sits behind a mutex because dispatch runs on socket
//! tasks while the ticker runs on its own; the lock is what serializes
//! them.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::manager::{DownloadManager, HostIo, NetHandle, TorrentStats};

/// The manager as shared between socket tasks and the ticker.
pub type SharedManager = Arc<Mutex<DownloadManager>>;

/// TCP transport provider for a [`DownloadManager`].
///
/// Create the host first, build the manager over it, then
/// [`attach`](Self::attach) the manager so socket tasks can reach it.
pub struct TokioHost {
    self_ref: Weak<TokioHost>,
    next_handle: AtomicU64,
    writers: Mutex<HashMap<NetHandle, mpsc::UnboundedSender<Bytes>>>,
    manager: OnceLock<Weak<Mutex<DownloadManager>>>,
}

impl TokioHost {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            self_ref: me.clone(),
            next_handle: AtomicU64::new(0),
            writers: Mutex::new(HashMap::new()),
            manager: OnceLock::new(),
        })
    }

    /// Wires the manager in. Must be called before any socket comes up.
    pub fn attach(&self, manager: &SharedManager) {
        let _ = self.manager.set(Arc::downgrade(manager));
    }

    fn manager(&self) -> Option<SharedManager> {
        self.manager.get()?.upgrade()
    }

    fn mint(&self) -> NetHandle {
        NetHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Pumps one socket: a writer task drains the send channel while
    /// this task feeds inbound bytes to the manager.
    async fn run_socket(
        self: Arc<Self>,
        stream: TcpStream,
        net: NetHandle,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
    ) {
        let (mut read_half, mut write_half) = stream.into_split();

        let writer = tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if write_half.write_all(&data).await.is_err() {
                    break;
                }
            }
        });

        let mut buf = vec![0u8; 32 * 1024];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let Some(manager) = self.manager() else { break };
                    manager
                        .lock()
                        .dispatch_from_buffer(net, &buf[..n], Instant::now());
                }
            }
        }

        writer.abort();
        self.writers.lock().remove(&net);
        if let Some(manager) = self.manager() {
            manager.lock().transport_closed(net);
        }
    }
}

impl HostIo for TokioHost {
    fn peer_connect(&self, addr: SocketAddr) -> io::Result<NetHandle> {
        let host = self
            .self_ref
            .upgrade()
            .ok_or_else(|| io::Error::other("host shut down"))?;
        let net = self.mint();
        let (tx, rx) = mpsc::unbounded_channel();
        self.writers.lock().insert(net, tx);

        tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Some(manager) = host.manager() {
                        manager.lock().peer_connected(net, addr, Instant::now());
                    }
                    host.run_socket(stream, net, rx).await;
                }
                Err(err) => {
                    debug!(%addr, %err, "connect failed");
                    host.writers.lock().remove(&net);
                    if let Some(manager) = host.manager() {
                        manager.lock().peer_connect_failed(net);
                    }
                }
            }
        });

        Ok(net)
    }

    fn peer_send(&self, net: NetHandle, data: &[u8]) -> io::Result<()> {
        let writers = self.writers.lock();
        let tx = writers
            .get(&net)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "unknown transport"))?;
        tx.send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task gone"))
    }
}

/// Accepts inbound peers and hands each socket to the manager.
pub async fn serve(host: Arc<TokioHost>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let net = host.mint();
                let (tx, rx) = mpsc::unbounded_channel();
                host.writers.lock().insert(net, tx);

                let accepted = host
                    .manager()
                    .map(|m| m.lock().peer_connected(net, addr, Instant::now()))
                    .unwrap_or(false);
                if !accepted {
                    host.writers.lock().remove(&net);
                    continue;
                }
                tokio::spawn(Arc::clone(&host).run_socket(stream, net, rx));
            }
            Err(err) => warn!(%err, "accept failed"),
        }
    }
}

/// Ticks the manager at `period`, reusing one stats buffer.
pub async fn run_ticker(manager: SharedManager, period: Duration) {
    let mut stats = TorrentStats::new();
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        manager.lock().periodic(Instant::now(), Some(&mut stats));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PeerId};
    use crate::peer::{Handshake, HANDSHAKE_LEN};
    use tokio::net::TcpListener;

    const INFO_HASH: [u8; 20] = [7u8; 20];

    fn shared_manager(host: Arc<TokioHost>) -> SharedManager {
        let config = Config {
            info_hash: INFO_HASH,
            peer_id: Some(PeerId::generate()),
            npieces: 4,
            piece_length: 16384,
            ..Config::default()
        };
        let manager = Arc::new(Mutex::new(
            DownloadManager::new(config, host.clone()).unwrap(),
        ));
        host.attach(&manager);
        manager
    }

    #[tokio::test]
    async fn test_inbound_socket_walks_through_handshake() {
        let host = TokioHost::new();
        let manager = shared_manager(host.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        tokio::spawn(serve(host.clone(), listener));

        let mut remote = TcpStream::connect(local).await.unwrap();
        remote
            .write_all(&Handshake::new(INFO_HASH, [3u8; 20]).encode())
            .await
            .unwrap();

        // Our handshake leads, then the bitfield for four empty pieces.
        let mut reply = vec![0u8; HANDSHAKE_LEN];
        remote.read_exact(&mut reply).await.unwrap();
        let ours = Handshake::decode(&reply).unwrap();
        assert_eq!(ours.info_hash, INFO_HASH);

        let mut frame = [0u8; 6];
        remote.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0, 0, 0, 2, 5, 0]);

        assert_eq!(manager.lock().num_peers(), 1);
    }

    #[tokio::test]
    async fn test_closed_socket_removes_peer() {
        let host = TokioHost::new();
        let manager = shared_manager(host.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        tokio::spawn(serve(host.clone(), listener));

        let mut remote = TcpStream::connect(local).await.unwrap();
        remote
            .write_all(&Handshake::new(INFO_HASH, [3u8; 20]).encode())
            .await
            .unwrap();
        let mut reply = vec![0u8; HANDSHAKE_LEN];
        remote.read_exact(&mut reply).await.unwrap();
        drop(remote);

        // The read loop observes the close and tells the manager.
        for _ in 0..50 {
            if manager.lock().num_peers() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("peer not removed after socket close");
    }
}
