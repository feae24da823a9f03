//! The receiving side: downloads one manifest's pieces from a sender.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::connection;
use crate::crypto;
use crate::discovery::{self, DiscoverySettings};
use crate::error::{Error, Result};
use crate::file::{Manifest, VirtualFile};
use crate::protocol::{self, Message, MessageCode, PieceBlock};

use super::{blocking, PeerId, PeerState};

/// Options for a [`Receiver`].
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Sender to connect to; discovered on the local network when `None`
    pub sender: Option<SocketAddr>,
    /// Piece re-requests allowed over the whole transfer (0 disables retries)
    pub max_retries: u32,
    /// Directory the download is written under
    pub download_dir: PathBuf,
    /// Recompute the whole-stream checksum after the last piece
    pub verify_checksum: bool,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Deadline for the acknowledgement and the manifest
    pub handshake_timeout: Duration,
    /// Deadline for each piece round trip
    pub piece_timeout: Duration,
    /// Discovery parameters
    pub discovery: DiscoverySettings,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        let timeout = Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS);
        Self {
            sender: None,
            max_retries: crate::DEFAULT_MAX_RETRIES,
            download_dir: PathBuf::from("."),
            verify_checksum: true,
            connect_timeout: timeout,
            handshake_timeout: timeout,
            piece_timeout: timeout,
            discovery: DiscoverySettings::default(),
        }
    }
}

/// Progress of a download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes verified and written
    pub completed_bytes: u64,
    /// Length of the logical stream
    pub total_bytes: u64,
    /// Pieces verified and written
    pub pieces_completed: usize,
    /// Pieces in the manifest
    pub total_pieces: usize,
    /// Re-requests spent so far
    pub retries_used: u32,
}

impl TransferProgress {
    /// Completion percentage (0.0 - 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.completed_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    /// Whether every byte has landed.
    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.completed_bytes >= self.total_bytes
    }
}

/// Outcome of a successful download.
#[derive(Debug, Clone)]
pub struct ReceiveSummary {
    /// Sender the download came from
    pub sender: SocketAddr,
    /// Manifest received from the sender
    pub manifest: Manifest,
    /// Top-level path written: the file, or the root of the tree
    pub output_path: PathBuf,
    /// Bytes written
    pub bytes: u64,
    /// Re-requests spent
    pub retries_used: u32,
    /// Whether the whole-stream checksum was recomputed and matched
    pub checksum_verified: bool,
}

/// A receiver peer.
///
/// [`listen`](Self::listen) consumes it; a receiver downloads exactly once.
#[derive(Debug)]
pub struct Receiver {
    id: PeerId,
    span: tracing::Span,
    options: ReceiverOptions,
    progress: watch::Sender<TransferProgress>,
    retries: Arc<Mutex<u32>>,
}

impl Receiver {
    /// Create a receiver.
    pub fn new(options: ReceiverOptions) -> Self {
        let id = PeerId::new(PeerState::Receiver);
        let span = tracing::info_span!("receiver", id = %id);
        let (progress, _) = watch::channel(TransferProgress::default());
        let retries = Arc::new(Mutex::new(options.max_retries));

        Self {
            id,
            span,
            options,
            progress,
            retries,
        }
    }

    /// Peer identifier.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Watch download progress.
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    /// Find or connect to the sender, download everything, and report back.
    ///
    /// # Errors
    ///
    /// Fails on discovery, connect, handshake or manifest errors, on a
    /// piece that exhausts the retry budget, on a checksum mismatch, and on
    /// local I/O errors. Only piece fetches are retried.
    pub async fn listen(self) -> Result<ReceiveSummary> {
        let span = self.span.clone();
        self.run().instrument(span).await
    }

    async fn run(self) -> Result<ReceiveSummary> {
        let sender = match self.options.sender {
            Some(addr) => addr,
            None => {
                tracing::info!("searching for a sender");
                discovery::find_sender(&self.options.discovery).await?
            }
        };

        let mut stream = connection::connect(sender, self.options.connect_timeout).await?;
        if let Err(e) = connection::configure_tcp_keepalive(&stream) {
            tracing::debug!("Failed to enable keep-alive: {}", e);
        }
        tracing::info!(%sender, "connected");

        self.handshake(&mut stream).await?;
        let manifest = Arc::new(self.fetch_manifest(&mut stream).await?);

        let download_dir = self.options.download_dir.clone();
        let for_destination = Arc::clone(&manifest);
        let vfile = blocking(move || {
            std::fs::create_dir_all(&download_dir)?;
            VirtualFile::for_destination(&for_destination, &download_dir)
        })
        .await?;
        let output_path = vfile
            .output_path()
            .ok_or_else(|| Error::Internal("destination view has no output path".to_string()))?;

        self.progress.send_replace(TransferProgress {
            total_bytes: manifest.total_length,
            total_pieces: manifest.piece_count(),
            ..TransferProgress::default()
        });

        let (mut stream, mut vfile) = self.download(stream, Arc::clone(&manifest), vfile).await?;

        let checksum_verified = if self.options.verify_checksum && manifest.has_checksum() {
            let (checked, checksum) = blocking(move || {
                let checksum = vfile.checksum()?;
                Ok((vfile, checksum))
            })
            .await?;
            vfile = checked;

            if !crypto::constant_time_eq(&checksum, &manifest.checksum) {
                return Err(Error::ChecksumMismatch(manifest.name.clone()));
            }
            tracing::debug!(checksum = %crypto::to_hex(&checksum), "checksum verified");
            true
        } else {
            false
        };

        blocking(move || vfile.close()).await?;

        let finished = Message::empty(MessageCode::LISTENER_FINISHED_ACKNOWLEDGEMENT);
        protocol::write_message(&mut stream, &finished).await?;
        let _ = stream.shutdown().await;

        let retries_used = self.retries_used();
        tracing::info!(
            name = %manifest.name,
            bytes = manifest.total_length,
            retries_used,
            path = %output_path.display(),
            "download complete"
        );

        let manifest = Arc::unwrap_or_clone(manifest);
        Ok(ReceiveSummary {
            sender,
            bytes: manifest.total_length,
            manifest,
            output_path,
            retries_used,
            checksum_verified,
        })
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<()> {
        protocol::write_message(stream, &Message::empty(MessageCode::ListenerSenderHandshake))
            .await?;
        protocol::expect_message(
            stream,
            MessageCode::ListenerAcknowledgement,
            self.options.handshake_timeout,
        )
        .await?;
        tracing::debug!("handshake acknowledged");
        Ok(())
    }

    async fn fetch_manifest(&self, stream: &mut TcpStream) -> Result<Manifest> {
        protocol::write_message(stream, &Message::empty(MessageCode::RequestMetadata)).await?;
        let message =
            protocol::expect_message(stream, MessageCode::Metadata, self.options.handshake_timeout)
                .await?;

        let manifest = Manifest::decode(&message.payload)?;
        manifest.validate()?;

        tracing::info!(
            name = %manifest.name,
            mime = %manifest.mime_type,
            files = manifest.members.len(),
            pieces = manifest.piece_count(),
            size = manifest.total_length,
            "received manifest"
        );
        Ok(manifest)
    }

    /// Run the piece fetcher and write whatever it verifies until the whole
    /// stream has landed. Returns the connection for the closing message.
    async fn download(
        &self,
        stream: TcpStream,
        manifest: Arc<Manifest>,
        vfile: VirtualFile,
    ) -> Result<(TcpStream, VirtualFile)> {
        let total_pieces = manifest.piece_count();
        let (queue_tx, queue_rx) = mpsc::channel(total_pieces.max(1));
        for index in 0..total_pieces {
            let index = u32::try_from(index)
                .map_err(|_| Error::ProtocolError("too many pieces".to_string()))?;
            queue_tx
                .try_send(index)
                .map_err(|e| Error::Internal(format!("work queue: {e}")))?;
        }

        let (results_tx, mut results_rx) = mpsc::channel(1);
        let fetcher = PieceFetcher {
            manifest: Arc::clone(&manifest),
            queue_tx,
            queue_rx,
            results: results_tx,
            retries: Arc::clone(&self.retries),
            max_retries: self.options.max_retries,
            piece_timeout: self.options.piece_timeout,
        };
        let task = tokio::spawn(fetcher.run(stream).instrument(self.span.clone()));

        match self.store_pieces(&manifest, &mut results_rx, vfile).await {
            Ok(vfile) => {
                let stream = task
                    .await
                    .map_err(|e| Error::Internal(format!("piece fetcher failed: {e}")))?;
                Ok((stream, vfile))
            }
            Err(e) => {
                task.abort();
                Err(e)
            }
        }
    }

    async fn store_pieces(
        &self,
        manifest: &Manifest,
        results: &mut mpsc::Receiver<Result<(u32, Vec<u8>)>>,
        mut vfile: VirtualFile,
    ) -> Result<VirtualFile> {
        let mut progress = *self.progress.borrow();

        while progress.completed_bytes < manifest.total_length {
            let Some(result) = results.recv().await else {
                return Err(Error::Internal("piece fetcher stopped early".to_string()));
            };
            let (index, data) = result?;

            let offset = manifest.piece_offset(index);
            let length = data.len() as u64;
            vfile = blocking(move || {
                vfile.write_at(offset, &data)?;
                Ok(vfile)
            })
            .await?;

            progress.completed_bytes += length;
            progress.pieces_completed += 1;
            progress.retries_used = self.retries_used();
            self.progress.send_replace(progress);

            tracing::debug!(
                index,
                completed = progress.completed_bytes,
                total = progress.total_bytes,
                "piece stored"
            );
        }

        Ok(vfile)
    }

    fn retries_used(&self) -> u32 {
        let remaining = *self.retries.lock().unwrap_or_else(PoisonError::into_inner);
        self.options.max_retries.saturating_sub(remaining)
    }
}

/// Pulls piece indices from the work queue, one request in flight.
struct PieceFetcher {
    manifest: Arc<Manifest>,
    queue_tx: mpsc::Sender<u32>,
    queue_rx: mpsc::Receiver<u32>,
    results: mpsc::Sender<Result<(u32, Vec<u8>)>>,
    retries: Arc<Mutex<u32>>,
    max_retries: u32,
    piece_timeout: Duration,
}

impl PieceFetcher {
    async fn run(mut self, mut stream: TcpStream) -> TcpStream {
        // The fetcher holds its own queue sender, so an empty queue means done.
        while let Ok(index) = self.queue_rx.try_recv() {
            match self.fetch_verified(&mut stream, index).await {
                Ok(Some(data)) => {
                    if self.results.send(Ok((index, data))).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = self.results.send(Err(e)).await;
                    break;
                }
            }
        }
        stream
    }

    /// Fetch one piece; `None` means it failed verification and was re-queued.
    async fn fetch_verified(&self, stream: &mut TcpStream, index: u32) -> Result<Option<Vec<u8>>> {
        protocol::write_message(stream, &protocol::request_piece(index)).await?;
        let message = protocol::expect_message(stream, MessageCode::Piece, self.piece_timeout).await?;
        let block = PieceBlock::decode(&message.payload)?;

        if block.index != index {
            return Err(Error::ProtocolError(format!(
                "requested piece {index}, received piece {}",
                block.index
            )));
        }

        if self.manifest.verify_piece(index, &block.data) {
            return Ok(Some(block.data));
        }

        self.spend_retry(index)?;
        self.queue_tx
            .try_send(index)
            .map_err(|e| Error::Internal(format!("work queue: {e}")))?;
        Ok(None)
    }

    fn spend_retry(&self, index: u32) -> Result<()> {
        let mut budget = self.retries.lock().unwrap_or_else(PoisonError::into_inner);
        if *budget == 0 {
            return Err(Error::RetriesExhausted {
                index,
                max_retries: self.max_retries,
            });
        }
        *budget -= 1;
        tracing::warn!(remaining = *budget, "{}, re-requesting", Error::PieceMismatch { index });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_progress_percentage() {
        let mut progress = TransferProgress {
            total_bytes: 200,
            ..TransferProgress::default()
        };
        assert!((progress.percentage() - 0.0).abs() < f64::EPSILON);
        assert!(!progress.is_complete());

        progress.completed_bytes = 50;
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);

        progress.completed_bytes = 200;
        assert!(progress.is_complete());
    }

    #[test]
    fn test_receiver_options_default() {
        let options = ReceiverOptions::default();
        assert!(options.sender.is_none());
        assert_eq!(options.max_retries, 4);
        assert_eq!(options.download_dir, PathBuf::from("."));
        assert!(options.verify_checksum);
    }

    #[test]
    fn test_receiver_id() {
        let receiver = Receiver::new(ReceiverOptions::default());
        assert!(receiver.id().as_str().starts_with("receiver_"));
        assert_eq!(*receiver.progress().borrow(), TransferProgress::default());
    }

    #[tokio::test]
    async fn test_listen_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let receiver = Receiver::new(ReceiverOptions {
            sender: Some(addr),
            connect_timeout: Duration::from_secs(2),
            ..ReceiverOptions::default()
        });

        assert!(matches!(receiver.listen().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_handshake_silence_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let _silent = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let _ = protocol::read_message(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let receiver = Receiver::new(ReceiverOptions {
            sender: Some(addr),
            handshake_timeout: Duration::from_millis(200),
            ..ReceiverOptions::default()
        });

        assert!(matches!(receiver.listen().await, Err(Error::Timeout(_))));
    }
}
