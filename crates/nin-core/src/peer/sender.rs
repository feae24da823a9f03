//! The sending side: serves one manifest and its pieces to many receivers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::discovery::{self, Broadcaster, DiscoverySettings, IpVersion};
use crate::error::{Error, Result};
use crate::file::{Manifest, VirtualFile};
use crate::protocol::{self, Message, MessageCode, PieceBlock};

use super::{blocking, PeerId, PeerState};

/// Options for [`Sender::bind`].
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// File or directory to share
    pub path: PathBuf,
    /// Zip a directory into a single archive before sharing it
    pub zip: bool,
    /// Directory the archive is written to
    pub archive_dir: PathBuf,
    /// Delete the archive on shutdown
    pub delete_archive: bool,
    /// Receivers admitted at once (0 selects the default)
    pub listener_limit: usize,
    /// Shut down once no receiver is connected for this long (zero selects the default)
    pub idle_shutdown: Duration,
    /// Local address to bind
    pub bind_addr: IpAddr,
    /// Local port (0 lets the OS choose)
    pub port: u16,
    /// Advertise presence via multicast while serving
    pub advertise: bool,
    /// Multicast parameters for advertising
    pub discovery: DiscoverySettings,
    /// Piece length used for the manifest
    pub piece_length: u32,
    /// Deadline for each reply; a receiver that stops reading is dropped
    pub write_timeout: Duration,
}

impl SenderOptions {
    /// Default options for sharing `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            zip: false,
            archive_dir: std::env::temp_dir().join("nin"),
            delete_archive: true,
            listener_limit: crate::DEFAULT_LISTENER_LIMIT,
            idle_shutdown: Duration::from_secs(crate::DEFAULT_IDLE_SHUTDOWN_SECS),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            advertise: true,
            discovery: DiscoverySettings::default(),
            piece_length: crate::PIECE_LENGTH,
            write_timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS),
        }
    }
}

struct Shared {
    id: PeerId,
    span: tracing::Span,
    manifest: Manifest,
    metadata: Message,
    vfile: RwLock<Option<VirtualFile>>,
    archive: Option<PathBuf>,
    delete_archive: bool,
    listener_limit: usize,
    idle_shutdown: Duration,
    write_timeout: Duration,
    advertise: bool,
    discovery: DiscoverySettings,
    local_addr: SocketAddr,
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    /// Connections that completed the handshake.
    listeners: Mutex<Vec<u64>>,
    next_connection: AtomicU64,
    finished: AtomicUsize,
    state: watch::Sender<PeerState>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    /// Set once teardown has completed.
    teardown: tokio::sync::Mutex<bool>,
}

/// A sender peer.
///
/// Cloning yields another handle to the same peer.
#[derive(Clone)]
pub struct Sender {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("id", &self.shared.id)
            .field("name", &self.shared.manifest.name)
            .field("local_addr", &self.shared.local_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Sender {
    /// Prepare a sender: optionally archive the source, build its manifest,
    /// and bind the listening socket.
    ///
    /// Nothing is served until [`serve`](Self::serve) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing or empty, archiving fails,
    /// or the socket cannot be bound.
    pub async fn bind(options: SenderOptions) -> Result<Self> {
        let id = PeerId::new(PeerState::Sender);
        let span = tracing::info_span!("sender", id = %id);
        Self::prepare(options, id, span.clone()).instrument(span).await
    }

    async fn prepare(options: SenderOptions, id: PeerId, span: tracing::Span) -> Result<Self> {
        if !options.path.exists() {
            return Err(Error::FileNotFound(options.path.display().to_string()));
        }

        let archive = if options.zip && options.path.is_dir() {
            Some(pack(&options).await?)
        } else {
            None
        };
        let source = archive.clone().unwrap_or_else(|| options.path.clone());

        let piece_length = options.piece_length;
        let generated =
            blocking(move || Manifest::generate_with_piece_length(&source, piece_length)).await;
        let (manifest, vfile) = match generated {
            Ok(generated) => generated,
            Err(e) => {
                if let Some(archive) = &archive {
                    if let Err(cleanup) = std::fs::remove_file(archive) {
                        tracing::warn!(
                            "Failed to remove archive {}: {}",
                            archive.display(),
                            cleanup
                        );
                    }
                }
                return Err(e);
            }
        };

        let listener = TcpListener::bind((options.bind_addr, options.port)).await?;
        let local_addr = listener.local_addr()?;

        let listener_limit = match options.listener_limit {
            0 => crate::DEFAULT_LISTENER_LIMIT,
            n => n,
        };
        let idle_shutdown = if options.idle_shutdown.is_zero() {
            Duration::from_secs(crate::DEFAULT_IDLE_SHUTDOWN_SECS)
        } else {
            options.idle_shutdown
        };

        tracing::info!(
            name = %manifest.name,
            pieces = manifest.piece_count(),
            size = manifest.total_length,
            %local_addr,
            "sender ready"
        );

        let (state, _) = watch::channel(PeerState::Sender);
        let metadata = manifest.to_message();

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                span,
                manifest,
                metadata,
                vfile: RwLock::new(Some(vfile)),
                archive,
                delete_archive: options.delete_archive,
                listener_limit,
                idle_shutdown,
                write_timeout: options.write_timeout,
                advertise: options.advertise,
                discovery: options.discovery,
                local_addr,
                listener: tokio::sync::Mutex::new(Some(listener)),
                listeners: Mutex::new(Vec::new()),
                next_connection: AtomicU64::new(0),
                finished: AtomicUsize::new(0),
                state,
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                teardown: tokio::sync::Mutex::new(false),
            }),
        })
    }

    /// Peer identifier.
    pub fn id(&self) -> &PeerId {
        &self.shared.id
    }

    /// The manifest being served.
    pub fn manifest(&self) -> &Manifest {
        &self.shared.manifest
    }

    /// Address the sender accepts connections on.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Receivers admitted at once, after defaults are applied.
    pub fn listener_limit(&self) -> usize {
        self.shared.listener_limit
    }

    /// Idle delay before shutdown, after defaults are applied.
    pub fn idle_shutdown(&self) -> Duration {
        self.shared.idle_shutdown
    }

    /// Archive created for this sender, if the source was zipped.
    pub fn archive_path(&self) -> Option<&PathBuf> {
        self.shared.archive.as_ref()
    }

    /// Current state.
    pub fn state(&self) -> PeerState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<PeerState> {
        self.shared.state.subscribe()
    }

    /// Wait until the sender is dead.
    pub async fn closed(&self) {
        let mut state = self.subscribe_state();
        let _ = state.wait_for(|s| *s == PeerState::Dead).await;
    }

    /// Number of receivers that completed the handshake and are still connected.
    pub fn active_listeners(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Number of receivers that reported a completed download.
    pub fn finished_count(&self) -> usize {
        self.shared.finished.load(Ordering::Relaxed)
    }

    /// Accept and serve receivers until shutdown.
    ///
    /// Also advertises the sender on the local network (when enabled) and
    /// runs the idle monitor. Returns once shutdown has completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyServing`] if another call is serving, or
    /// [`Error::PeerDead`] after shutdown.
    pub async fn serve(&self) -> Result<()> {
        let span = self.shared.span.clone();
        self.accept_loop().instrument(span).await
    }

    async fn accept_loop(&self) -> Result<()> {
        let Some(listener) = self.shared.listener.lock().await.take() else {
            return Err(if self.state() == PeerState::Dead {
                Error::PeerDead
            } else {
                Error::AlreadyServing
            });
        };

        tokio::spawn(
            self.clone()
                .idle_monitor()
                .instrument(self.shared.span.clone()),
        );

        let broadcasters = if self.shared.advertise {
            self.start_advertising().await
        } else {
            Vec::new()
        };

        tracing::info!(addr = %self.shared.local_addr, "serving");

        loop {
            tokio::select! {
                () = self.shared.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        let sender = self.clone();
                        self.shared.tasks.spawn(
                            sender
                                .handle_connection(stream, peer)
                                .instrument(self.shared.span.clone()),
                        );
                    }
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                },
            }
        }

        drop(listener);
        for broadcaster in &broadcasters {
            broadcaster.stop().await;
        }

        self.shutdown().await
    }

    async fn start_advertising(&self) -> Vec<Broadcaster> {
        let payload = discovery::advertisement(self.shared.local_addr.port());
        let mut broadcasters = Vec::new();

        for version in [IpVersion::V4, IpVersion::V6] {
            match Broadcaster::new(&self.shared.discovery, version) {
                Ok(broadcaster) => {
                    broadcaster
                        .start(payload.clone(), self.shared.discovery.interval)
                        .await;
                    broadcasters.push(broadcaster);
                }
                Err(e) => {
                    let e = Error::BroadcastFailed(e.to_string());
                    tracing::warn!(?version, "{}", e);
                }
            }
        }

        broadcasters
    }

    /// Shut down once an idle interval passes with no registered listener.
    async fn idle_monitor(self) {
        let interval = self.shared.idle_shutdown;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                () = self.shared.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let active = self.active_listeners();
            tracing::debug!(active, "idle check");
            if active == 0 {
                tracing::info!(
                    "no listeners for {}s, shutting down",
                    interval.as_secs_f64()
                );
                if let Err(e) = self.shutdown().await {
                    tracing::warn!("Shutdown after idle timeout failed: {}", e);
                }
                return;
            }
        }
    }

    /// Stop serving and release every resource.
    ///
    /// Idempotent: concurrent callers wait for the first one to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing the virtual file fails.
    pub async fn shutdown(&self) -> Result<()> {
        let mut done = self.shared.teardown.lock().await;
        if *done {
            return Ok(());
        }

        tracing::info!(parent: &self.shared.span, "shutting down");
        self.shared.cancel.cancel();
        self.shared.listener.lock().await.take();

        self.shared.tasks.close();
        self.shared.tasks.wait().await;

        let closed = self
            .shared
            .vfile
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map_or(Ok(()), |mut vfile| vfile.close());

        if self.shared.delete_archive {
            if let Some(archive) = &self.shared.archive {
                match std::fs::remove_file(archive) {
                    Ok(()) => tracing::debug!(parent: &self.shared.span, archive = %archive.display(), "archive removed"),
                    Err(e) => tracing::warn!(parent: &self.shared.span, "Failed to remove archive {}: {}", archive.display(), e),
                }
            }
        }

        self.shared.state.send_replace(PeerState::Dead);
        *done = true;

        tracing::info!(
            parent: &self.shared.span,
            finished = self.finished_count(),
            "sender stopped"
        );
        closed
    }

    async fn handle_connection(self, stream: TcpStream, peer: SocketAddr) {
        let connection = self.shared.next_connection.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }
        let (mut reader, mut writer) = stream.into_split();

        let result = self
            .serve_connection(connection, &mut reader, &mut writer)
            .await;
        self.unregister(connection);

        match result {
            Ok(()) | Err(Error::ConnectionClosed) => {
                tracing::debug!(%peer, "connection closed");
            }
            Err(e) => tracing::warn!(%peer, "Dropping connection: {}", e),
        }
    }

    async fn serve_connection(
        &self,
        connection: u64,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                () = self.shared.cancel.cancelled() => return Ok(()),
                message = protocol::read_message(reader) => message?,
            };
            let Some(message) = message else {
                continue;
            };

            tracing::debug!(code = %message.code, len = message.payload.len(), "received");

            match message.code {
                MessageCode::ListenerSenderHandshake => {
                    if self.register(connection) {
                        let ack = Message::empty(MessageCode::ListenerAcknowledgement);
                        self.reply(writer, &ack).await?;
                    } else {
                        tracing::warn!(
                            limit = self.shared.listener_limit,
                            "listener limit reached, ignoring handshake"
                        );
                    }
                }
                MessageCode::Ping => {
                    self.reply(writer, &Message::empty(MessageCode::Pong)).await?;
                }
                MessageCode::RequestMetadata => {
                    self.reply(writer, &self.shared.metadata).await?;
                }
                MessageCode::RequestPiece => {
                    let index = protocol::decode_piece_request(&message.payload)?;
                    let block = self.read_piece(index).await?;
                    self.reply(writer, &block.to_message()).await?;
                }
                MessageCode::PieceAcknowledgement => {
                    let finished = self.shared.finished.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::info!(finished, "listener finished downloading");
                }
                other => {
                    return Err(Error::ProtocolError(format!(
                        "receiver sent {other}, which only a sender may send"
                    )));
                }
            }
        }
    }

    async fn reply(&self, writer: &mut OwnedWriteHalf, message: &Message) -> Result<()> {
        protocol::write_message_with_timeout(writer, message, self.shared.write_timeout).await
    }

    async fn read_piece(&self, index: u32) -> Result<PieceBlock> {
        let manifest = &self.shared.manifest;
        if index as usize >= manifest.piece_count() {
            return Err(Error::ProtocolError(format!(
                "piece {index} requested, manifest has {}",
                manifest.piece_count()
            )));
        }

        let shared = Arc::clone(&self.shared);
        let data = blocking(move || {
            let guard = shared.vfile.read().unwrap_or_else(PoisonError::into_inner);
            let vfile = guard.as_ref().ok_or(Error::PeerDead)?;
            vfile.read_piece(index, shared.manifest.piece_length)
        })
        .await?;

        #[allow(clippy::cast_possible_truncation)]
        let offset = manifest.piece_offset(index) as u32;
        Ok(PieceBlock {
            index,
            offset,
            data,
        })
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<u64>> {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a connection unless the limit is reached. A connection that
    /// repeats its handshake stays admitted without counting twice.
    fn register(&self, connection: u64) -> bool {
        let mut listeners = self.lock_listeners();
        if listeners.contains(&connection) {
            return true;
        }
        if listeners.len() >= self.shared.listener_limit {
            return false;
        }
        listeners.push(connection);
        tracing::info!(active = listeners.len(), "listener registered");
        true
    }

    fn unregister(&self, connection: u64) {
        let mut listeners = self.lock_listeners();
        if let Some(pos) = listeners.iter().position(|c| *c == connection) {
            listeners.swap_remove(pos);
            tracing::info!(active = listeners.len(), "listener left");
        }
    }
}

#[cfg(feature = "archive")]
async fn pack(options: &SenderOptions) -> Result<PathBuf> {
    crate::archive::zip_folder_async(options.archive_dir.clone(), options.path.clone()).await
}

#[cfg(not(feature = "archive"))]
async fn pack(_options: &SenderOptions) -> Result<PathBuf> {
    Err(Error::InvalidInput(
        "archive support is not compiled in (enable the `archive` feature)".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(path: PathBuf) -> SenderOptions {
        SenderOptions {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            advertise: false,
            ..SenderOptions::new(path)
        }
    }

    #[tokio::test]
    async fn test_bind_missing_source() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let result = Sender::bind(options(temp_dir.path().join("missing"))).await;
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_bind_empty_directory() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let result = Sender::bind(options(temp_dir.path().to_path_buf())).await;
        assert!(matches!(result, Err(Error::EmptySource(_))));
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("notes.txt");
        std::fs::write(&path, b"some notes").expect("write");

        let sender = Sender::bind(options(path)).await.expect("bind");
        assert_eq!(sender.state(), PeerState::Sender);
        assert!(sender.id().as_str().starts_with("sender_"));
        assert_eq!(sender.manifest().total_length, 10);
        assert_ne!(sender.local_addr().port(), 0);

        sender.shutdown().await.expect("shutdown");
        sender.shutdown().await.expect("second shutdown is a no-op");
        assert_eq!(sender.state(), PeerState::Dead);
        assert!(matches!(sender.serve().await, Err(Error::PeerDead)));
    }

    #[tokio::test]
    async fn test_zero_limits_select_defaults() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("a.bin");
        std::fs::write(&path, [1u8; 32]).expect("write");

        let sender = Sender::bind(SenderOptions {
            listener_limit: 0,
            idle_shutdown: Duration::ZERO,
            ..options(path)
        })
        .await
        .expect("bind");

        assert_eq!(sender.listener_limit(), crate::DEFAULT_LISTENER_LIMIT);
        assert_eq!(
            sender.idle_shutdown(),
            Duration::from_secs(crate::DEFAULT_IDLE_SHUTDOWN_SECS)
        );
        sender.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_register_respects_limit() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().join("a.bin");
        std::fs::write(&path, [1u8; 32]).expect("write");

        let sender = Sender::bind(SenderOptions {
            listener_limit: 2,
            ..options(path)
        })
        .await
        .expect("bind");

        assert!(sender.register(1));
        assert!(sender.register(1));
        assert!(sender.register(2));
        assert!(!sender.register(3));
        assert_eq!(sender.active_listeners(), 2);

        sender.unregister(1);
        assert!(sender.register(3));
        sender.shutdown().await.expect("shutdown");
    }

    #[cfg(feature = "archive")]
    #[tokio::test]
    async fn test_zip_source_is_deleted_on_shutdown() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let source = temp_dir.path().join("folder");
        std::fs::create_dir_all(&source).expect("mkdir");
        std::fs::write(source.join("one.txt"), b"one").expect("write");

        let sender = Sender::bind(SenderOptions {
            zip: true,
            archive_dir: temp_dir.path().join("archives"),
            ..options(source)
        })
        .await
        .expect("bind");

        let archive = sender.archive_path().cloned().expect("archive path");
        assert!(archive.exists());
        assert_eq!(sender.manifest().name, "folder.zip");
        assert!(sender.manifest().single);

        sender.shutdown().await.expect("shutdown");
        assert!(!archive.exists());
    }
}
