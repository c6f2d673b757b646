//! Protocol implementation module
//!
//! This module defines the chat protocol messages and their binary
//! encoding. It holds no state.

pub mod codec;
pub mod message;

pub use self::codec::{decode, encode, DecodeError, MessageCodec};
pub use self::message::{Message, SystemAction, UnknownAction};
