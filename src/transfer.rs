//! Block transfer engine: single and multiple block reads and writes on a
//! selected card.
//!
//! Addresses are data command addresses. SDSC cards take a byte offset,
//! SDHC and SDXC cards take a block number; use
//! [`SdCard::address_for_block`] to get it right for the card at hand.

use bytemuck::{Pod, Zeroable};

use crate::command::SdCmd;
use crate::errors::SdioError;
use crate::host::{DataTransfer, SdHost};
use crate::registers::BLOCK_LEN;
use crate::session::{CapacityClass, SdCard};

/// log2 of the block length
pub const BLOCK_LEN_EXP: u8 = 9;

/// Words in a block
pub const BLOCK_WORDS: usize = BLOCK_LEN / 4;

/// Most blocks one CMD18/CMD25 moves; DLEN holds 25 bits
pub const MAX_BLOCKS_PER_TRANSFER: usize = 0xFFFF;

/// One 512 byte block, kept as the words the FIFO delivers. The FIFO is
/// little endian, so on a little endian core the byte view is the card's
/// byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Block([u32; BLOCK_WORDS]);

// SAFETY: a transparent wrapper around an array of u32 has no padding and
// every bit pattern is valid.
unsafe impl Zeroable for Block {}
unsafe impl Pod for Block {}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl Block {
    pub const fn new() -> Self {
        Self([0; BLOCK_WORDS])
    }

    pub fn from_bytes(bytes: &[u8; BLOCK_LEN]) -> Self {
        let mut block = Self::new();
        block.as_bytes_mut().copy_from_slice(bytes);
        block
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_LEN] {
        bytemuck::cast_ref(&self.0)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; BLOCK_LEN] {
        bytemuck::cast_mut(&mut self.0)
    }

    pub fn words(&self) -> &[u32; BLOCK_WORDS] {
        &self.0
    }

    pub fn words_mut(&mut self) -> &mut [u32; BLOCK_WORDS] {
        &mut self.0
    }
}

/// A DMA channel wired to the SDIO FIFO.
///
/// # Safety
///
/// Between `start_*` and `stop` the channel owns the buffer it was given.
/// Implementations must not touch the buffer after `stop` returns, and
/// `stop` must wait for any in-flight beat to land.
pub unsafe trait DmaChannel {
    /// Move words from the FIFO into `words`
    fn start_read(&mut self, words: &mut [u32]);

    /// Move `words` into the FIFO
    fn start_write(&mut self, words: &[u32]);

    /// True once every word has been moved
    fn is_complete(&mut self) -> bool;

    fn stop(&mut self);
}

/// Placeholder channel for controllers that poll the FIFO
pub enum NoDma {}

unsafe impl DmaChannel for NoDma {
    fn start_read(&mut self, _words: &mut [u32]) {
        match *self {}
    }

    fn start_write(&mut self, _words: &[u32]) {
        match *self {}
    }

    fn is_complete(&mut self) -> bool {
        match *self {}
    }

    fn stop(&mut self) {
        match *self {}
    }
}

/// Bytes of a register read through the FIFO, in wire order
pub(crate) fn fifo_bytes<const W: usize, const B: usize>(words: &[u32; W]) -> [u8; B] {
    let mut bytes = [0u8; B];

    for (chunk, word) in bytes.chunks_mut(4).zip(words.iter()) {
        let len = chunk.len();
        chunk.copy_from_slice(&word.to_le_bytes()[..len]);
    }

    bytes
}

impl<H: SdHost> SdCard<H> {
    /// CMD17: read the block at `address` into `block`. On failure `block`
    /// is left as it was.
    pub fn read_block(&mut self, address: u32, block: &mut Block) -> Result<(), SdioError> {
        self.prepare_transfer()?;

        let mut scratch = Block::new();
        let transfer = DataTransfer::read(BLOCK_LEN_EXP, 1, self.config().data_timeout);
        let result = self.receive(
            &SdCmd::ReadSingleBlock(address),
            &transfer,
            scratch.words_mut(),
        );
        self.track(result)?;

        *block = scratch;
        Ok(())
    }

    /// CMD24: write `block` at `address` and wait for the card to finish
    /// programming it
    pub fn write_block(&mut self, address: u32, block: &Block) -> Result<(), SdioError> {
        self.prepare_transfer()?;

        let transfer = DataTransfer::write(BLOCK_LEN_EXP, 1, self.config().data_timeout);
        let result = self
            .transmit(&SdCmd::WriteBlock(address), &transfer, block.words())
            .and_then(|_| self.wait_ready());

        self.track(result)
    }

    /// CMD18: read consecutive blocks starting at `address`. Each run of up
    /// to [`MAX_BLOCKS_PER_TRANSFER`] blocks is ended with CMD12. If a data
    /// error interrupts a run, `blocks` may be partly overwritten; call
    /// [`SdCard::stop`] before the next transfer.
    pub fn read_blocks(&mut self, address: u32, blocks: &mut [Block]) -> Result<(), SdioError> {
        self.prepare_transfer()?;

        let mut address = address;
        for chunk in blocks.chunks_mut(MAX_BLOCKS_PER_TRANSFER) {
            let count = chunk.len() as u32;
            let transfer = DataTransfer::read(BLOCK_LEN_EXP, count, self.config().data_timeout);

            let result = self.receive(
                &SdCmd::ReadMultipleBlock(address),
                &transfer,
                bytemuck::cast_slice_mut(chunk),
            );
            self.track(result)?;
            self.stop()?;

            address = self.advance(address, count)?;
        }

        Ok(())
    }

    /// CMD25: write consecutive blocks starting at `address`, waiting for
    /// the card to finish programming after each run
    pub fn write_blocks(&mut self, address: u32, blocks: &[Block]) -> Result<(), SdioError> {
        self.prepare_transfer()?;

        let mut address = address;
        for chunk in blocks.chunks(MAX_BLOCKS_PER_TRANSFER) {
            let count = chunk.len() as u32;
            let transfer = DataTransfer::write(BLOCK_LEN_EXP, count, self.config().data_timeout);

            let result = self.transmit(
                &SdCmd::WriteMultipleBlock(address),
                &transfer,
                bytemuck::cast_slice(chunk),
            );
            self.track(result)?;
            self.stop()?;

            let result = self.wait_ready();
            self.track(result)?;

            address = self.advance(address, count)?;
        }

        Ok(())
    }

    fn advance(&self, address: u32, count: u32) -> Result<u32, SdioError> {
        let step = match self.capacity_class() {
            Some(CapacityClass::High) => Some(count),
            _ => count.checked_mul(BLOCK_LEN as u32),
        };

        step.and_then(|step| address.checked_add(step))
            .ok_or(SdioError::OutOfRange {})
    }
}
