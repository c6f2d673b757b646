use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::core::{Error, FileError, PeerId, Result};
use crate::protocol::{Message, SystemAction};
use crate::util::{numbered_file_name, sanitize_file_name};

/// A progress notice is reported every this many blocks
pub const PROGRESS_EVERY: u32 = 89;

/// Numbered variants tried when a download name is taken
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Receiving side key: the sender's address plus its transfer ID
pub type TransferKey = (SocketAddr, u32);

/// A file being pulled from a peer, one block at a time
#[derive(Debug)]
pub struct InboundTransfer {
    pub source: SocketAddr,
    pub transfer_id: u32,
    pub total_blocks: u32,
    /// Also the index of the next block we expect
    pub blocks_received: u32,
    /// Re-requests for the current block
    pub retry_count: u32,
    pub last_block_at: Instant,
    pub file_name: String,
    pub path: PathBuf,
    output: BufWriter<File>,
}

impl InboundTransfer {
    /// Request for the next expected block
    pub fn next_request(&self, local: PeerId) -> Message {
        Message::BlockRequest {
            transfer_id: self.transfer_id,
            block_index: self.blocks_received,
            peer_id: local,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.blocks_received >= self.total_blocks
    }

    fn finish(mut self) -> io::Result<PathBuf> {
        self.output.flush()?;
        Ok(self.path)
    }

    /// Closes the output and deletes the partial file
    pub fn abort(self) {
        let InboundTransfer { output, path, .. } = self;
        drop(output);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove partial download");
        }
    }
}

/// What happened to a transfer announce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Already receiving this transfer; nothing was created
    Duplicate { file_name: String },
    /// File created; `request` asks for block 0
    Started {
        file_name: String,
        path: PathBuf,
        request: Message,
    },
    /// Empty file, created and already complete
    Completed {
        file_name: String,
        path: PathBuf,
        done: Message,
    },
}

/// What happened to an accepted data block
#[derive(Debug)]
pub enum BlockOutcome {
    /// More blocks to go; `request` asks for the next one
    Next {
        request: Message,
        /// Set every `PROGRESS_EVERY` blocks
        progress: Option<(u32, u32)>,
    },
    /// Last block written; `done` tells the sender
    Completed {
        file_name: String,
        path: PathBuf,
        done: Message,
    },
    /// Writing failed; the transfer is gone and the partial file deleted
    Failed { file_name: String, error: io::Error },
}

/// Transfers this node is receiving
#[derive(Debug)]
pub struct InboundTransfers {
    download_dir: PathBuf,
    transfers: HashMap<TransferKey, InboundTransfer>,
}

impl InboundTransfers {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        InboundTransfers {
            download_dir: download_dir.into(),
            transfers: HashMap::new(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Accepts a file offer: creates the output file and asks for block 0.
    pub fn on_transfer_announce(
        &mut self,
        transfer_id: u32,
        total_blocks: u32,
        file_name: &str,
        source: SocketAddr,
        local: PeerId,
        now: Instant,
    ) -> std::result::Result<OfferOutcome, FileError> {
        let key = (source, transfer_id);
        if let Some(existing) = self.transfers.get(&key) {
            debug!(%source, transfer_id, "duplicate transfer announce");
            return Ok(OfferOutcome::Duplicate {
                file_name: existing.file_name.clone(),
            });
        }

        let file_name =
            sanitize_file_name(file_name).unwrap_or_else(|| format!("download-{}", transfer_id));
        let (file_name, path, file) = create_unique(&self.download_dir, &file_name)?;

        info!(%source, transfer_id, total_blocks, file = %file_name, "receiving file");
        let transfer = InboundTransfer {
            source,
            transfer_id,
            total_blocks,
            blocks_received: 0,
            retry_count: 0,
            last_block_at: now,
            file_name: file_name.clone(),
            path: path.clone(),
            output: BufWriter::new(file),
        };

        if transfer.is_complete() {
            return Ok(OfferOutcome::Completed {
                file_name,
                path,
                done: completion(transfer_id, local),
            });
        }

        let request = transfer.next_request(local);
        self.transfers.insert(key, transfer);
        Ok(OfferOutcome::Started {
            file_name,
            path,
            request,
        })
    }

    /// Accepts the next block in sequence. Anything else is a protocol
    /// violation and leaves the transfer untouched.
    pub fn on_data_block(
        &mut self,
        transfer_id: u32,
        block_index: u32,
        payload: &[u8],
        source: SocketAddr,
        local: PeerId,
        now: Instant,
    ) -> Result<BlockOutcome> {
        let key = (source, transfer_id);
        let transfer = self.transfers.get_mut(&key).ok_or_else(|| {
            Error::protocol(format!("block for unknown transfer {} from {}", transfer_id, source))
        })?;
        if block_index != transfer.blocks_received {
            return Err(Error::protocol(format!(
                "block {} for transfer {} while expecting {}",
                block_index, transfer_id, transfer.blocks_received
            )));
        }

        if let Err(error) = transfer.output.write_all(payload) {
            let file_name = transfer.file_name.clone();
            if let Some(transfer) = self.transfers.remove(&key) {
                transfer.abort();
            }
            return Ok(BlockOutcome::Failed { file_name, error });
        }
        transfer.blocks_received += 1;
        transfer.retry_count = 0;
        transfer.last_block_at = now;

        if !transfer.is_complete() {
            let received = transfer.blocks_received;
            let progress = (received % PROGRESS_EVERY == 0).then_some((received, transfer.total_blocks));
            return Ok(BlockOutcome::Next {
                request: transfer.next_request(local),
                progress,
            });
        }

        let Some(transfer) = self.transfers.remove(&key) else {
            return Err(Error::protocol(format!("transfer {} vanished", transfer_id)));
        };
        let file_name = transfer.file_name.clone();
        let path = transfer.path.clone();
        match transfer.finish() {
            Ok(path) => Ok(BlockOutcome::Completed {
                file_name,
                path,
                done: completion(transfer_id, local),
            }),
            Err(error) => {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove partial download");
                }
                Ok(BlockOutcome::Failed { file_name, error })
            }
        }
    }

    pub fn get(&self, key: &TransferKey) -> Option<&InboundTransfer> {
        self.transfers.get(key)
    }

    pub fn remove(&mut self, key: &TransferKey) -> Option<InboundTransfer> {
        self.transfers.remove(key)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut InboundTransfer> {
        self.transfers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Creates a new file for `name` in `dir`. Existing files are never opened;
/// a taken name is retried as `name (1)`, `name (2)` and so on.
fn create_unique(dir: &Path, name: &str) -> std::result::Result<(String, PathBuf, File), FileError> {
    let mut candidate = name.to_string();
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let path = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((candidate, path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "download name taken");
                candidate = numbered_file_name(name, attempt);
            }
            Err(source) => return Err(FileError::Create { path, source }),
        }
    }
    Err(FileError::Create {
        path: dir.join(name),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free file name left"),
    })
}

fn completion(transfer_id: u32, local: PeerId) -> Message {
    Message::System {
        peer_id: local,
        action: SystemAction::TransferComplete(transfer_id),
    }
}
