//! Protocol definitions for XBee API communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding, with and without escaping
//! - Frame type definitions
//! - AT command names and status codes
//! - Request packets and response parsing

pub mod command;
pub mod frame;
pub mod frame_type;
pub mod packet;
pub mod parser;
pub mod status;

pub use command::AtCommand;
pub use frame::{ApiFrame, FrameDecoder, ParserState, START_DELIMITER};
pub use frame_type::ApiFrameType;
pub use packet::{
    AtCommandRequest, RemoteAtCommandRequest, TransmitRequest, Tx16Request, Tx64Request,
    TxIpv4Request,
};
pub use parser::{AtCommandResponse, RemoteAtCommandResponse, TransmitStatus, TxStatus};
pub use status::{AtCommandStatus, DeliveryStatus, ModemStatus};
