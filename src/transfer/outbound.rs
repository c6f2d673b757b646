use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::core::{Error, FileError, PeerId, Result};
use crate::protocol::Message;
use crate::util::block_count;

/// A file we are offering to one peer
#[derive(Debug, Clone)]
pub struct OutboundTransfer {
    pub transfer_id: u32,
    /// Only this address may pull blocks
    pub destination: SocketAddr,
    /// Local file, re-opened for every block
    pub path: PathBuf,
    /// Name sent in the announce
    pub file_name: String,
    pub total_blocks: u32,
    /// The receiver has asked for block 0, so the announce got through
    pub first_block_acked: bool,
    /// When the announce was last sent
    pub announced_at: Instant,
    /// Re-announces so far
    pub retry_count: u32,
    /// When the receiver last asked for a block
    pub last_request_at: Instant,
}

impl OutboundTransfer {
    /// The announce that offers this transfer
    pub fn announce(&self, local: PeerId) -> Message {
        Message::TransferAnnounce {
            transfer_id: self.transfer_id,
            total_blocks: self.total_blocks,
            file_name: self.file_name.clone(),
            peer_id: local,
        }
    }
}

/// Transfers this node is serving, keyed by transfer ID
#[derive(Debug)]
pub struct OutboundTransfers {
    block_size: u32,
    next_id: u32,
    transfers: HashMap<u32, OutboundTransfer>,
}

impl OutboundTransfers {
    pub fn new(block_size: u32) -> Self {
        OutboundTransfers {
            block_size: block_size.max(1),
            // a restarted sender should not reuse ids a receiver may still hold
            next_id: rand::random(),
            transfers: HashMap::new(),
        }
    }

    /// Registers a file to send and returns its ID with the announce.
    pub fn start_send(
        &mut self,
        path: &Path,
        destination: SocketAddr,
        local: PeerId,
        now: Instant,
    ) -> std::result::Result<(u32, Message), FileError> {
        let not_found = |source| FileError::NotFound {
            path: path.to_path_buf(),
            source,
        };
        let metadata = File::open(path)
            .and_then(|file| file.metadata())
            .map_err(not_found)?;
        if !metadata.is_file() {
            return Err(not_found(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let blocks = block_count(metadata.len(), self.block_size);
        let total_blocks = u32::try_from(blocks).map_err(|_| FileError::TooLarge {
            path: path.to_path_buf(),
            blocks,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let transfer_id = self.allocate_id();
        let transfer = OutboundTransfer {
            transfer_id,
            destination,
            path: path.to_path_buf(),
            file_name,
            total_blocks,
            first_block_acked: false,
            announced_at: now,
            retry_count: 0,
            last_request_at: now,
        };
        let announce = transfer.announce(local);
        info!(
            transfer_id,
            %destination,
            total_blocks,
            file = %transfer.file_name,
            "offering file"
        );
        self.transfers.insert(transfer_id, transfer);
        Ok((transfer_id, announce))
    }

    /// Reads the requested block. Requests for unknown transfers, from the
    /// wrong peer, or past the last block are protocol violations.
    pub fn on_block_request(
        &mut self,
        transfer_id: u32,
        block_index: u32,
        requester: SocketAddr,
        local: PeerId,
        now: Instant,
    ) -> Result<Message> {
        let block_size = self.block_size;
        let transfer = self.transfers.get_mut(&transfer_id).ok_or_else(|| {
            Error::protocol(format!("block request for unknown transfer {}", transfer_id))
        })?;
        if transfer.destination != requester {
            return Err(Error::protocol(format!(
                "{} asked for transfer {} offered to {}",
                requester, transfer_id, transfer.destination
            )));
        }
        if block_index >= transfer.total_blocks {
            return Err(Error::protocol(format!(
                "block {} out of range for transfer {} ({} blocks)",
                block_index, transfer_id, transfer.total_blocks
            )));
        }

        transfer.last_request_at = now;
        if block_index == 0 {
            transfer.first_block_acked = true;
        }

        let payload = read_block(&transfer.path, block_index, block_size)?;
        debug!(transfer_id, block_index, size = payload.len(), "serving block");
        Ok(Message::DataBlock {
            transfer_id,
            block_index,
            payload,
            peer_id: local,
        })
    }

    /// Closes a transfer the receiver reports as complete
    pub fn on_complete(&mut self, transfer_id: u32, source: SocketAddr) -> Option<OutboundTransfer> {
        match self.transfers.get(&transfer_id) {
            Some(transfer) if transfer.destination == source => self.transfers.remove(&transfer_id),
            _ => None,
        }
    }

    pub fn get(&self, transfer_id: u32) -> Option<&OutboundTransfer> {
        self.transfers.get(&transfer_id)
    }

    pub fn remove(&mut self, transfer_id: u32) -> Option<OutboundTransfer> {
        self.transfers.remove(&transfer_id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut OutboundTransfer> {
        self.transfers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    fn allocate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.transfers.contains_key(&id) {
                return id;
            }
        }
    }
}

fn read_block(path: &Path, block_index: u32, block_size: u32) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|source| FileError::NotFound {
        path: path.to_path_buf(),
        source,
    })?;
    file.seek(SeekFrom::Start(u64::from(block_index) * u64::from(block_size)))?;
    let mut payload = Vec::with_capacity(block_size as usize);
    file.take(u64::from(block_size)).read_to_end(&mut payload)?;
    Ok(payload)
}
