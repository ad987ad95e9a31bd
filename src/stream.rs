//! Byte stream over the card

use embedded_io::blocking::{Read, Seek, Write};
use embedded_io::{Io, SeekFrom};

use crate::errors::SdioError;
use crate::host::SdHost;
use crate::registers::BLOCK_LEN;
use crate::session::SdCard;
use crate::transfer::Block;

/// Reads and writes arbitrary byte ranges of the card through one cached
/// working block.
///
/// Writes only touch the cached block. It is written back when the stream
/// moves to another block and on [`Write::flush`], so flush before dropping
/// the stream or the last changes are lost.
pub struct BlockStream<'c, H> {
    card: &'c mut SdCard<H>,
    position: u64,
    len: u64,
    working: Block,
    working_index: Option<u32>,
    dirty: bool,
}

impl<'c, H: SdHost> BlockStream<'c, H> {
    /// Stream over an initialized card, starting at byte 0
    pub fn new(card: &'c mut SdCard<H>) -> Result<Self, SdioError> {
        let len = match card.csd() {
            Some(csd) => csd.capacity_bytes(),
            None => return Err(SdioError::NotReady { state: card.state() }),
        };

        Ok(Self {
            card,
            position: 0,
            len,
            working: Block::new(),
            working_index: None,
            dirty: false,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Card size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flush and hand the card back
    pub fn finish(mut self) -> Result<&'c mut SdCard<H>, SdioError> {
        self.flush()?;
        Ok(self.card)
    }

    /// Make block `index` the working block, writing back the old one first
    fn load(&mut self, index: u32) -> Result<(), SdioError> {
        if self.working_index == Some(index) {
            return Ok(());
        }

        self.flush()?;

        let address = self.card.address_for_block(index)?;
        self.working_index = None;
        self.card.read_block(address, &mut self.working)?;
        self.working_index = Some(index);

        Ok(())
    }

    /// Working block index and offset for the current position, and how
    /// many bytes of `wanted` fit before the block or card ends
    fn span(&self, wanted: usize) -> (u32, usize, usize) {
        let index = (self.position / BLOCK_LEN as u64) as u32;
        let offset = (self.position % BLOCK_LEN as u64) as usize;
        let left = (self.len - self.position).min((BLOCK_LEN - offset) as u64) as usize;

        (index, offset, wanted.min(left))
    }
}

impl<H: SdHost> Io for BlockStream<'_, H> {
    type Error = SdioError;
}

impl<H: SdHost> Read for BlockStream<'_, H> {
    /// Stops at the end of the working block, so a read may return fewer
    /// bytes than asked for. Returns 0 at the end of the card.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, SdioError> {
        if buffer.is_empty() || self.position >= self.len {
            return Ok(0);
        }

        let (index, offset, count) = self.span(buffer.len());
        self.load(index)?;

        buffer[..count].copy_from_slice(&self.working.as_bytes()[offset..offset + count]);
        self.position += count as u64;

        Ok(count)
    }
}

impl<H: SdHost> Write for BlockStream<'_, H> {
    /// Stops at the end of the working block like [`Read::read`]
    fn write(&mut self, buffer: &[u8]) -> Result<usize, SdioError> {
        if buffer.is_empty() || self.position >= self.len {
            return Ok(0);
        }

        let (index, offset, count) = self.span(buffer.len());

        // A whole block is overwritten, no need to read it first
        if offset == 0 && count == BLOCK_LEN && self.working_index != Some(index) {
            self.flush()?;
            self.working_index = Some(index);
        } else {
            self.load(index)?;
        }

        self.working.as_bytes_mut()[offset..offset + count].copy_from_slice(&buffer[..count]);
        self.dirty = true;
        self.position += count as u64;

        Ok(count)
    }

    fn flush(&mut self) -> Result<(), SdioError> {
        let index = match (self.dirty, self.working_index) {
            (true, Some(index)) => index,
            _ => return Ok(()),
        };

        let address = self.card.address_for_block(index)?;
        self.card.write_block(address, &self.working)?;
        self.dirty = false;

        Ok(())
    }
}

impl<H: SdHost> Seek for BlockStream<'_, H> {
    /// Positions past the end of the card are refused
    fn seek(&mut self, position: SeekFrom) -> Result<u64, SdioError> {
        let target = match position {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };

        match target {
            Some(target) if target <= self.len => {
                self.position = target;
                Ok(target)
            }
            _ => Err(SdioError::SeekOutOfRange {}),
        }
    }
}
