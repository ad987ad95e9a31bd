//! Crate used to interface with SD memory cards through a 4-bit SDIO host
//! peripheral
//!
//! *currently in the alpha phase: works but missing important features.
//! future updates guarentee breaking changes.*
//!
//! The pieces stack up as follows:
//!
//! - [`sdio_regs`] describes the peripheral registers and reaches them
//!   through a [`sdio_regs::RegisterBus`]
//! - [`sdio::Sdio`] owns the peripheral and implements the [`host`] traits:
//!   power and clock control, the command transport and the data path
//! - [`session::SdCard`] runs the SD identification sequence over any
//!   [`host::SdHost`] and tracks the card state
//! - [`transfer`] adds block reads and writes to the session and
//!   [`stream::BlockStream`] turns those into an `embedded-io` byte stream
//! - [`registers`] decodes the card registers (OCR, CID, CSD, RCA, card
//!   status, SCR, SSR)

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod crc;
pub mod errors;
pub mod host;
pub mod pins;
pub mod registers;
pub mod sdio;
pub mod sdio_regs;
pub mod session;
pub mod stream;
pub mod timing;
pub mod transfer;

pub use errors::SdioError;
pub use session::{Config, SdCard, SessionState};
pub use transfer::Block;
