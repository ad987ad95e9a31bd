//! Capabilities a host controller offers the card session.
//!
//! The session only talks to these traits, so the protocol state machine
//! runs unchanged against the SDIO peripheral or a test double.

use fugit::HertzU32;

use crate::command::{RawResponse, SdCmd};
use crate::errors::SdioError;
use crate::timing::{Duration, Timing};

/// Width of the data bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
}

impl BusWidth {
    /// ACMD6 argument selecting this width
    pub fn acmd6_argument(self) -> u32 {
        match self {
            Self::One => 0b00,
            Self::Four => 0b10,
        }
    }
}

/// Direction of a data transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Card to controller
    Read,
    /// Controller to card
    Write,
}

/// Data path settings for one transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataTransfer {
    pub direction: Direction,
    /// Blocks are `2^block_size_exp` bytes
    pub block_size_exp: u8,
    pub blocks: u32,
    /// Data timer in card clock periods
    pub timeout: u32,
}

impl DataTransfer {
    pub fn read(block_size_exp: u8, blocks: u32, timeout: u32) -> Self {
        Self {
            direction: Direction::Read,
            block_size_exp,
            blocks,
            timeout,
        }
    }

    pub fn write(block_size_exp: u8, blocks: u32, timeout: u32) -> Self {
        Self {
            direction: Direction::Write,
            block_size_exp,
            blocks,
            timeout,
        }
    }

    /// Total length in bytes
    pub fn len(&self) -> u32 {
        self.blocks << self.block_size_exp
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    /// Total length in FIFO words
    pub fn words(&self) -> usize {
        (self.len() as usize).div_ceil(4)
    }
}

/// Power, clock and bus configuration
pub trait HostControl {
    type Timer: Timing;

    /// Apply power to the card and enable the card clock
    fn power_on(&mut self) -> Result<(), SdioError>;

    /// Program the card clock as close to `freq` as possible without
    /// exceeding it. Returns the frequency actually set.
    fn set_clock(&mut self, freq: HertzU32) -> HertzU32;

    /// Current card clock
    fn clock(&self) -> HertzU32;

    fn set_bus_width(&mut self, width: BusWidth);

    fn bus_width(&self) -> BusWidth;

    /// Return every controller register to its power-off value
    fn reset(&mut self);

    /// Probe DAT3 for a card. Only allowed while the bus is idle.
    fn card_present(&mut self) -> Result<bool, SdioError>;

    /// Software bounds for the command and data paths
    fn set_deadlines(&mut self, command: Duration, data: Duration);

    /// Time keeping shared with the session
    fn timer(&mut self) -> &mut Self::Timer;
}

/// Issue one command and classify the outcome.
///
/// `Ok` means the command was sent or its response received. Timeouts,
/// CRC failures and index mismatches come back as errors. Nothing is
/// retried here.
pub trait CommandTransport {
    fn send(&mut self, cmd: &SdCmd) -> Result<RawResponse, SdioError>;
}

/// Block data movement
pub trait DataPath {
    /// Program data timer, length and control ahead of the data command
    fn configure_data(&mut self, transfer: &DataTransfer) -> Result<(), SdioError>;

    /// Fill `words` from the card and wait for the end of the transfer
    fn read_data(&mut self, words: &mut [u32]) -> Result<(), SdioError>;

    /// Send `words` to the card and wait for the end of the transfer
    fn write_data(&mut self, words: &[u32]) -> Result<(), SdioError>;

    /// Stop the data path and drop whatever is left in the FIFO
    fn abort_data(&mut self);
}

/// A host controller able to run a whole card session
pub trait SdHost: HostControl + CommandTransport + DataPath {}

impl<T: HostControl + CommandTransport + DataPath> SdHost for T {}
