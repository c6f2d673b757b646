//! File transfer tables
//!
//! Transfers are receiver-paced: the receiver asks for each block in turn
//! and the sender only ever answers. The sender keeps an
//! [`OutboundTransfers`] table keyed by transfer ID; the receiver keeps an
//! [`InboundTransfers`] table keyed by sender address and transfer ID.
//! Timeouts and retries are driven by the engine's watchdog.

pub mod inbound;
pub mod outbound;

pub use self::inbound::{BlockOutcome, InboundTransfer, InboundTransfers, OfferOutcome, TransferKey};
pub use self::outbound::{OutboundTransfer, OutboundTransfers};
