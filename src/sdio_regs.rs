//! SDIO host peripheral register map.
//!
//! Offsets and bit positions follow the STM32F1/F2/F4 SDIO block. Every
//! write goes through [`Registers`], which drops hardware-reserved bits
//! before they reach the bus.
//!
//! Two timing rules are the caller's job, not this module's:
//! - at least seven bus clock cycles between consecutive writes to
//!   [`Reg::Power`] or [`Reg::ClockControl`]
//! - [`Reg::Argument`] is written before [`Reg::Command`] with `CPSMEN`

use bitflags::bitflags;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

/// Base address of the SDIO block on STM32F1 (APB2/AHB)
pub const SDIO_BASE: usize = 0x4001_8000;

/// Depth of the data FIFO in words
pub const FIFO_WORDS: usize = 32;

/// Registers of the SDIO block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg {
    Power,
    ClockControl,
    Argument,
    Command,
    RespCmd,
    Resp1,
    Resp2,
    Resp3,
    Resp4,
    DataTimer,
    DataLength,
    DataControl,
    DataCounter,
    Status,
    InterruptClear,
    Mask,
    FifoCounter,
    Fifo,
}

impl Reg {
    /// Byte offset from the peripheral base
    pub const fn offset(self) -> usize {
        match self {
            Reg::Power => 0x00,
            Reg::ClockControl => 0x04,
            Reg::Argument => 0x08,
            Reg::Command => 0x0C,
            Reg::RespCmd => 0x10,
            Reg::Resp1 => 0x14,
            Reg::Resp2 => 0x18,
            Reg::Resp3 => 0x1C,
            Reg::Resp4 => 0x20,
            Reg::DataTimer => 0x24,
            Reg::DataLength => 0x28,
            Reg::DataControl => 0x2C,
            Reg::DataCounter => 0x30,
            Reg::Status => 0x34,
            Reg::InterruptClear => 0x38,
            Reg::Mask => 0x3C,
            Reg::FifoCounter => 0x48,
            Reg::Fifo => 0x80,
        }
    }

    /// Bits software may set. Read-only registers have an empty mask.
    pub const fn writable_mask(self) -> u32 {
        match self {
            Reg::Power => power::PWRCTRL_MASK,
            Reg::ClockControl => clkcr::WRITABLE,
            Reg::Argument | Reg::DataTimer | Reg::Fifo => 0xFFFF_FFFF,
            Reg::Command => cmd::WRITABLE,
            Reg::DataLength => dlen::DATALENGTH_MASK,
            Reg::DataControl => dctrl::WRITABLE,
            Reg::InterruptClear => Status::STATIC.bits(),
            Reg::Mask => Status::all().bits(),
            Reg::RespCmd
            | Reg::Resp1
            | Reg::Resp2
            | Reg::Resp3
            | Reg::Resp4
            | Reg::DataCounter
            | Reg::Status
            | Reg::FifoCounter => 0,
        }
    }

    /// Response register `n` (0-3), most significant word first
    pub const fn response(n: usize) -> Reg {
        match n {
            0 => Reg::Resp1,
            1 => Reg::Resp2,
            2 => Reg::Resp3,
            _ => Reg::Resp4,
        }
    }
}

/// POWER register
pub mod power {
    pub const PWRCTRL_MASK: u32 = 0b11;
    pub const PWRCTRL_OFF: u32 = 0b00;
    pub const PWRCTRL_ON: u32 = 0b11;
}

/// CLKCR register
pub mod clkcr {
    pub const CLKDIV_MASK: u32 = 0xFF;
    pub const CLKEN: u32 = 1 << 8;
    pub const PWRSAV: u32 = 1 << 9;
    pub const BYPASS: u32 = 1 << 10;
    pub const WIDBUS_SHIFT: u32 = 11;
    pub const WIDBUS_MASK: u32 = 0b11 << WIDBUS_SHIFT;
    pub const WIDBUS_1BIT: u32 = 0b00 << WIDBUS_SHIFT;
    pub const WIDBUS_4BIT: u32 = 0b01 << WIDBUS_SHIFT;
    pub const WIDBUS_8BIT: u32 = 0b10 << WIDBUS_SHIFT;
    pub const NEGEDGE: u32 = 1 << 13;
    pub const HWFC_EN: u32 = 1 << 14;
    pub const WRITABLE: u32 = 0x7FFF;

    /// Clock divider field for `SDIO_CK = SDIOCLK / (CLKDIV + 2)`
    #[inline]
    pub const fn clkdiv(div: u8) -> u32 {
        div as u32 & CLKDIV_MASK
    }
}

/// CMD register
pub mod cmd {
    pub const CMDINDEX_MASK: u32 = 0x3F;
    pub const WAITRESP_SHIFT: u32 = 6;
    pub const WAITRESP_NONE: u32 = 0b00 << WAITRESP_SHIFT;
    pub const WAITRESP_SHORT: u32 = 0b01 << WAITRESP_SHIFT;
    pub const WAITRESP_LONG: u32 = 0b11 << WAITRESP_SHIFT;
    pub const WAITINT: u32 = 1 << 8;
    pub const WAITPEND: u32 = 1 << 9;
    pub const CPSMEN: u32 = 1 << 10;
    pub const SDIOSUSPEND: u32 = 1 << 11;
    pub const WRITABLE: u32 = 0x7FFF;

    /// Index reported in RESPCMD for responses without an index field
    pub const SENTINEL_INDEX: u8 = 0x3F;

    /// Command register value for `index` waiting for `waitresp`
    #[inline]
    pub const fn make(index: u8, waitresp: u32) -> u32 {
        (index as u32 & CMDINDEX_MASK) | waitresp | CPSMEN
    }
}

/// DLEN register
pub mod dlen {
    pub const DATALENGTH_MASK: u32 = 0x01FF_FFFF;
}

/// DCTRL register
pub mod dctrl {
    pub const DTEN: u32 = 1 << 0;
    /// Set for card to controller
    pub const DTDIR: u32 = 1 << 1;
    /// Set for stream, clear for block mode
    pub const DTMODE: u32 = 1 << 2;
    pub const DMAEN: u32 = 1 << 3;
    pub const DBLOCKSIZE_SHIFT: u32 = 4;
    pub const DBLOCKSIZE_MASK: u32 = 0xF << DBLOCKSIZE_SHIFT;
    pub const RWSTART: u32 = 1 << 8;
    pub const RWSTOP: u32 = 1 << 9;
    pub const RWMOD: u32 = 1 << 10;
    pub const SDIOEN: u32 = 1 << 11;
    pub const WRITABLE: u32 = 0x0FFF;

    /// Block size field for blocks of `2^exponent` bytes
    #[inline]
    pub const fn block_size(exponent: u8) -> u32 {
        ((exponent as u32) << DBLOCKSIZE_SHIFT) & DBLOCKSIZE_MASK
    }
}

bitflags! {
    /// STA, ICR and MASK share this layout
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u32 {
        const CCRCFAIL = 1 << 0;
        const DCRCFAIL = 1 << 1;
        const CTIMEOUT = 1 << 2;
        const DTIMEOUT = 1 << 3;
        const TXUNDERR = 1 << 4;
        const RXOVERR = 1 << 5;
        const CMDREND = 1 << 6;
        const CMDSENT = 1 << 7;
        const DATAEND = 1 << 8;
        const STBITERR = 1 << 9;
        const DBCKEND = 1 << 10;
        const CMDACT = 1 << 11;
        const TXACT = 1 << 12;
        const RXACT = 1 << 13;
        const TXFIFOHE = 1 << 14;
        const RXFIFOHF = 1 << 15;
        const TXFIFOF = 1 << 16;
        const RXFIFOF = 1 << 17;
        const TXFIFOE = 1 << 18;
        const RXFIFOE = 1 << 19;
        const TXDAVL = 1 << 20;
        const RXDAVL = 1 << 21;
        const SDIOIT = 1 << 22;
        const CEATAEND = 1 << 23;

        /// Flags that latch until cleared through ICR
        const STATIC = Self::CCRCFAIL.bits()
            | Self::DCRCFAIL.bits()
            | Self::CTIMEOUT.bits()
            | Self::DTIMEOUT.bits()
            | Self::TXUNDERR.bits()
            | Self::RXOVERR.bits()
            | Self::CMDREND.bits()
            | Self::CMDSENT.bits()
            | Self::DATAEND.bits()
            | Self::STBITERR.bits()
            | Self::DBCKEND.bits()
            | Self::SDIOIT.bits()
            | Self::CEATAEND.bits();

        /// Terminal conditions of the command path
        const CMD_FLAGS = Self::CCRCFAIL.bits()
            | Self::CTIMEOUT.bits()
            | Self::CMDREND.bits()
            | Self::CMDSENT.bits();

        /// Sentinel set enabled in MASK while a command is in flight
        const CMD_SENTINELS = Self::CMD_FLAGS.bits() | Self::CMDACT.bits();

        /// Terminal conditions of the data path
        const DATA_FLAGS = Self::DCRCFAIL.bits()
            | Self::DTIMEOUT.bits()
            | Self::TXUNDERR.bits()
            | Self::RXOVERR.bits()
            | Self::DATAEND.bits()
            | Self::STBITERR.bits()
            | Self::DBCKEND.bits();

        /// Data path failures
        const DATA_ERRORS = Self::DCRCFAIL.bits()
            | Self::DTIMEOUT.bits()
            | Self::TXUNDERR.bits()
            | Self::RXOVERR.bits()
            | Self::STBITERR.bits();

        /// Either state machine still running
        const ACTIVE = Self::CMDACT.bits() | Self::TXACT.bits() | Self::RXACT.bits();
    }
}

/// Raw access to the register block
pub trait RegisterBus {
    fn read(&mut self, reg: Reg) -> u32;
    fn write(&mut self, reg: Reg, value: u32);
}

impl<B: RegisterBus + ?Sized> RegisterBus for &mut B {
    fn read(&mut self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }
}

/// Register surface with reserved-bit masking
pub struct Registers<B> {
    bus: B,
}

impl<B: RegisterBus> Registers<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    #[inline]
    pub fn read(&mut self, reg: Reg) -> u32 {
        self.bus.read(reg)
    }

    /// Write `value` with reserved bits cleared
    #[inline]
    pub fn write(&mut self, reg: Reg, value: u32) {
        self.bus.write(reg, value & reg.writable_mask());
    }

    /// Read, transform, write back
    #[inline]
    pub fn modify(&mut self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.bus.read(reg);
        self.write(reg, f(value));
    }

    #[inline]
    pub fn status(&mut self) -> Status {
        Status::from_bits_truncate(self.read(Reg::Status))
    }

    #[inline]
    pub fn clear(&mut self, flags: Status) {
        self.write(Reg::InterruptClear, flags.bits());
    }

    #[inline]
    pub fn set_mask(&mut self, flags: Status) {
        self.write(Reg::Mask, flags.bits());
    }

    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn free(self) -> B {
        self.bus
    }
}

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Volatile access to the memory mapped SDIO block
pub struct Mmio {
    base: *mut u32,
}

// The register block is only reachable through the unique Mmio handle
unsafe impl Send for Mmio {}

impl Mmio {
    /// Claim the SDIO block at [`SDIO_BASE`]. Returns `None` once claimed.
    pub fn take() -> Option<Self> {
        critical_section::with(|_| {
            if TAKEN.load(Ordering::Relaxed) {
                None
            } else {
                TAKEN.store(true, Ordering::Relaxed);
                // SAFETY: guarded by TAKEN, so this is the only handle
                Some(unsafe { Self::new(SDIO_BASE) })
            }
        })
    }

    /// # Safety
    /// `base` must be the address of an SDIO block and no other handle to
    /// it may exist.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base: base as *mut u32,
        }
    }
}

impl RegisterBus for Mmio {
    #[inline]
    fn read(&mut self, reg: Reg) -> u32 {
        // SAFETY: base points to the register block, offsets are in range
        unsafe { ptr::read_volatile(self.base.add(reg.offset() / 4)) }
    }

    #[inline]
    fn write(&mut self, reg: Reg, value: u32) {
        // SAFETY: as above
        unsafe { ptr::write_volatile(self.base.add(reg.offset() / 4), value) }
    }
}
