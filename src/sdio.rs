//! SDIO host controller driver.
//!
//! [`Sdio`] owns the register block and implements the host capability
//! traits: power and clock control, the command path and the data path.
//! Everything is polled; the controller interrupt line is never armed and
//! MASK only selects which flags the command path watches.

use fugit::HertzU32;

use crate::command::{RawResponse, ResponseWidth, SdCmd};
use crate::errors::SdioError;
use crate::host::{BusWidth, CommandTransport, DataPath, DataTransfer, Direction, HostControl};
use crate::pins::{BusPins, PinMode};
use crate::sdio_regs::{
    FIFO_WORDS, Reg, RegisterBus, Registers, Status, clkcr, cmd, dctrl, power,
};
use crate::timing::{Deadline, Duration, Timing};
use crate::transfer::{DmaChannel, NoDma};

/// How long the POWER register gets to latch
pub const POWER_LATCH: Duration = Duration::millis(1);

/// Software bound on a single command, well above the 64 card clocks the
/// hardware waits for a response
pub const CMD_DEADLINE: Duration = Duration::millis(100);

/// Software bound on a data transfer making no progress, on top of the
/// data timer. A DMA transfer gets this much per block.
pub const DATA_DEADLINE: Duration = Duration::millis(1_000);

/// Settle time for DAT3 after switching it to the pull-down probe
pub const CARD_DETECT_SETTLE_US: u32 = 100;

/// Spacing after a POWER or CLKCR write. Seven PCLK2 periods are well
/// under a microsecond for any supported bus clock.
const REG_WRITE_SPACING_US: u32 = 1;

/// Words moved per FIFO half-full/half-empty event
const FIFO_BURST: usize = 8;

/// CLKCR bits for the fastest clock not above `freq`, and the resulting
/// card clock. `SDIO_CK = SDIOCLK / (CLKDIV + 2)`.
pub fn clock_setting(sdioclk: HertzU32, freq: HertzU32) -> (u32, HertzU32) {
    let source = sdioclk.raw();
    let wanted = freq.raw().max(1);

    if wanted >= source {
        return (clkcr::BYPASS, sdioclk);
    }

    let divider = source.div_ceil(wanted).clamp(2, clkcr::CLKDIV_MASK + 2);

    (
        clkcr::clkdiv((divider - 2) as u8),
        HertzU32::from_raw(source / divider),
    )
}

/// The data path failure flagged in `status`, if any
pub fn data_error(status: Status) -> Option<SdioError> {
    if status.contains(Status::DCRCFAIL) {
        Some(SdioError::DataCrcFail {})
    } else if status.contains(Status::DTIMEOUT) {
        Some(SdioError::DataTimeout {})
    } else if status.contains(Status::STBITERR) {
        Some(SdioError::StartBitError {})
    } else if status.contains(Status::RXOVERR) {
        Some(SdioError::RxOverrun {})
    } else if status.contains(Status::TXUNDERR) {
        Some(SdioError::TxUnderrun {})
    } else {
        None
    }
}

/// Handle for one SDIO controller
pub struct Sdio<B, T, P, D = NoDma> {
    regs: Registers<B>,
    timing: T,
    pins: P,
    dma: Option<D>,
    /// SDIOCLK, the adapter clock the divider works from
    sdioclk: HertzU32,
    /// Card clock currently programmed
    clock: HertzU32,
    width: BusWidth,
    flow_control: bool,
    cmd_deadline: Duration,
    data_deadline: Duration,
    /// Bound on waiting for DATAEND, scaled to the configured transfer
    transfer_deadline: Duration,
}

impl<B: RegisterBus, T: Timing, P: BusPins> Sdio<B, T, P, NoDma> {
    /// Controller without DMA; the data path polls the FIFO
    pub fn new(bus: B, timing: T, pins: P, sdioclk: HertzU32) -> Self {
        Self::build(bus, timing, pins, None, sdioclk)
    }
}

impl<B: RegisterBus, T: Timing, P: BusPins, D: DmaChannel> Sdio<B, T, P, D> {
    /// Controller moving data blocks through `dma`
    pub fn with_dma(bus: B, timing: T, pins: P, dma: D, sdioclk: HertzU32) -> Self {
        Self::build(bus, timing, pins, Some(dma), sdioclk)
    }

    fn build(bus: B, timing: T, pins: P, dma: Option<D>, sdioclk: HertzU32) -> Self {
        Self {
            regs: Registers::new(bus),
            timing,
            pins,
            dma,
            sdioclk,
            clock: HertzU32::from_raw(0),
            width: BusWidth::One,
            flow_control: true,
            cmd_deadline: CMD_DEADLINE,
            data_deadline: DATA_DEADLINE,
            transfer_deadline: DATA_DEADLINE,
        }
    }

    /// Stop the card clock while the FIFO is full or empty instead of
    /// overrunning. On by default.
    pub fn set_flow_control(&mut self, enabled: bool) {
        self.flow_control = enabled;
        self.modify_spaced(Reg::ClockControl, |v| {
            if enabled {
                v | clkcr::HWFC_EN
            } else {
                v & !clkcr::HWFC_EN
            }
        });
    }

    /// The underlying register bus
    pub fn bus(&mut self) -> &mut B {
        self.regs.bus()
    }

    /// Give back the parts the controller was built from
    pub fn free(self) -> (B, T, P, Option<D>) {
        (self.regs.free(), self.timing, self.pins, self.dma)
    }

    /// POWER and CLKCR need a gap before the next write
    fn write_spaced(&mut self, reg: Reg, value: u32) {
        self.regs.write(reg, value);
        self.timing.delay_us(REG_WRITE_SPACING_US);
    }

    fn modify_spaced(&mut self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        self.regs.modify(reg, f);
        self.timing.delay_us(REG_WRITE_SPACING_US);
    }

    fn pin_mode(&self) -> PinMode {
        match self.width {
            BusWidth::One => PinMode::Sdio1Bit,
            BusWidth::Four => PinMode::Sdio4Bit,
        }
    }

    fn wait_command(&mut self, command: &SdCmd) -> Result<RawResponse, SdioError> {
        let index = command.index();
        let deadline = Deadline::after(&mut self.timing, self.cmd_deadline);

        let status = loop {
            let status = self.regs.status();
            if status.intersects(Status::CMD_FLAGS) {
                break status;
            }

            if deadline.expired(&mut self.timing) {
                log::error!("SDIO: CMD{} stuck, status {:#010x}", index, status.bits());
                return Err(SdioError::CmdDeadline { cmd: index });
            }
        };

        if status.contains(Status::CTIMEOUT) {
            log::debug!("SDIO: CMD{} timeout", index);
            return Err(SdioError::CmdTimeout { cmd: index });
        }

        if status.contains(Status::CCRCFAIL) {
            if !command.crc_exempt() {
                log::debug!("SDIO: CMD{} CRC error", index);
                return Err(SdioError::CmdCrcFail { cmd: index });
            }
            log::trace!("SDIO: CMD{} has no CRC, ignoring CCRCFAIL", index);
        }

        let width = command.response().width();
        if width == ResponseWidth::None {
            return Ok(RawResponse::None);
        }

        if !command.reports_sentinel_index() {
            let responded = (self.regs.read(Reg::RespCmd) & cmd::CMDINDEX_MASK) as u8;
            if responded != index {
                log::debug!("SDIO: CMD{} answered as CMD{}", index, responded);
                return Err(SdioError::WrongCmd {
                    good_cmd: index,
                    bad_cmd: responded,
                });
            }
        }

        let response = match width {
            ResponseWidth::Long => RawResponse::Long([
                self.regs.read(Reg::response(0)),
                self.regs.read(Reg::response(1)),
                self.regs.read(Reg::response(2)),
                self.regs.read(Reg::response(3)),
            ]),
            _ => RawResponse::Short(self.regs.read(Reg::Resp1)),
        };

        log::debug!("SDIO: CMD{} -> {:x?}", index, response);

        Ok(response)
    }

    /// Poll for DATAEND, failing on any data path error
    fn wait_data_end(&mut self) -> Result<(), SdioError> {
        let deadline = Deadline::after(&mut self.timing, self.transfer_deadline);

        loop {
            let status = self.regs.status();
            if let Some(e) = data_error(status) {
                return Err(e);
            }

            if status.contains(Status::DATAEND) {
                return Ok(());
            }

            if deadline.expired(&mut self.timing) {
                return Err(SdioError::DataDeadline {});
            }
        }
    }

    /// Drain the FIFO into `words`. The deadline restarts whenever a word
    /// arrives, so it bounds a stall rather than the whole transfer.
    fn read_fifo(&mut self, words: &mut [u32]) -> Result<(), SdioError> {
        let mut deadline = Deadline::after(&mut self.timing, self.data_deadline);
        let mut filled = 0;

        loop {
            let status = self.regs.status();
            if let Some(e) = data_error(status) {
                return Err(e);
            }

            if status.contains(Status::RXFIFOHF) && words.len() - filled >= FIFO_BURST {
                for word in &mut words[filled..filled + FIFO_BURST] {
                    *word = self.regs.read(Reg::Fifo);
                }
                filled += FIFO_BURST;
                deadline = Deadline::after(&mut self.timing, self.data_deadline);
            } else if status.contains(Status::RXDAVL) {
                let word = self.regs.read(Reg::Fifo);
                // Anything past the requested length is dropped
                if let Some(slot) = words.get_mut(filled) {
                    *slot = word;
                    filled += 1;
                }
                deadline = Deadline::after(&mut self.timing, self.data_deadline);
            } else if status.contains(Status::DATAEND) && filled == words.len() {
                return Ok(());
            }

            if deadline.expired(&mut self.timing) {
                return Err(SdioError::DataDeadline {});
            }
        }
    }

    /// Feed `words` to the FIFO, restarting the deadline on every word
    /// taken
    fn write_fifo(&mut self, words: &[u32]) -> Result<(), SdioError> {
        let mut deadline = Deadline::after(&mut self.timing, self.data_deadline);
        let mut sent = 0;

        loop {
            let status = self.regs.status();
            if let Some(e) = data_error(status) {
                return Err(e);
            }

            if sent < words.len() {
                if status.contains(Status::TXFIFOHE) && words.len() - sent >= FIFO_BURST {
                    for word in &words[sent..sent + FIFO_BURST] {
                        self.regs.write(Reg::Fifo, *word);
                    }
                    sent += FIFO_BURST;
                    deadline = Deadline::after(&mut self.timing, self.data_deadline);
                } else if !status.contains(Status::TXFIFOF) {
                    self.regs.write(Reg::Fifo, words[sent]);
                    sent += 1;
                    deadline = Deadline::after(&mut self.timing, self.data_deadline);
                }
            } else if status.contains(Status::DATAEND) {
                return Ok(());
            }

            if deadline.expired(&mut self.timing) {
                return Err(SdioError::DataDeadline {});
            }
        }
    }

    fn read_dma(&mut self, dma: &mut D, words: &mut [u32]) -> Result<(), SdioError> {
        dma.start_read(words);
        let result = self.wait_data_end();
        let complete = dma.is_complete();
        dma.stop();

        result?;
        if !complete {
            return Err(SdioError::DmaFailed {});
        }

        Ok(())
    }

    fn write_dma(&mut self, dma: &mut D, words: &[u32]) -> Result<(), SdioError> {
        dma.start_write(words);
        let result = self.wait_data_end();
        let complete = dma.is_complete();
        dma.stop();

        result?;
        if !complete {
            return Err(SdioError::DmaFailed {});
        }

        Ok(())
    }

    fn finish_data(&mut self, result: Result<(), SdioError>) -> Result<(), SdioError> {
        match result {
            Ok(()) => self.regs.clear(Status::DATA_FLAGS),
            Err(ref e) => {
                log::debug!("SDIO: data transfer failed: {}", e);
                self.abort_data();
            }
        }

        result
    }
}

impl<B: RegisterBus, T: Timing, P: BusPins, D: DmaChannel> HostControl for Sdio<B, T, P, D> {
    type Timer = T;

    fn power_on(&mut self) -> Result<(), SdioError> {
        self.pins.set_mode(self.pin_mode());
        self.write_spaced(Reg::Power, power::PWRCTRL_ON);

        let deadline = Deadline::after(&mut self.timing, POWER_LATCH);
        while self.regs.read(Reg::Power) & power::PWRCTRL_MASK != power::PWRCTRL_ON {
            if deadline.expired(&mut self.timing) {
                log::error!("SDIO: power never latched");
                return Err(SdioError::PowerOnFailed {});
            }
        }

        let hwfc = if self.flow_control { clkcr::HWFC_EN } else { 0 };
        self.modify_spaced(Reg::ClockControl, |v| v | clkcr::CLKEN | hwfc);

        Ok(())
    }

    fn set_clock(&mut self, freq: HertzU32) -> HertzU32 {
        let (bits, actual) = clock_setting(self.sdioclk, freq);

        self.modify_spaced(Reg::ClockControl, |v| {
            (v & !(clkcr::CLKDIV_MASK | clkcr::BYPASS)) | bits
        });
        self.clock = actual;

        log::debug!("SDIO: card clock {} Hz (asked {} Hz)", actual.raw(), freq.raw());

        actual
    }

    fn clock(&self) -> HertzU32 {
        self.clock
    }

    fn set_bus_width(&mut self, width: BusWidth) {
        let bits = match width {
            BusWidth::One => clkcr::WIDBUS_1BIT,
            BusWidth::Four => clkcr::WIDBUS_4BIT,
        };

        self.modify_spaced(Reg::ClockControl, |v| (v & !clkcr::WIDBUS_MASK) | bits);
        self.width = width;
        self.pins.set_mode(self.pin_mode());

        log::debug!("SDIO: bus width {:?}", width);
    }

    fn bus_width(&self) -> BusWidth {
        self.width
    }

    fn reset(&mut self) {
        if let Some(dma) = self.dma.as_mut() {
            dma.stop();
        }

        self.regs.set_mask(Status::empty());
        self.regs.write(Reg::DataControl, 0);
        self.regs.write(Reg::DataLength, 0);
        self.regs.write(Reg::DataTimer, 0);
        self.regs.write(Reg::Command, 0);
        self.regs.write(Reg::Argument, 0);
        self.regs.clear(Status::STATIC);
        self.write_spaced(Reg::ClockControl, 0);
        self.write_spaced(Reg::Power, power::PWRCTRL_OFF);

        self.clock = HertzU32::from_raw(0);
        self.width = BusWidth::One;
        self.pins.set_mode(PinMode::Sdio1Bit);
    }

    fn card_present(&mut self) -> Result<bool, SdioError> {
        if self.regs.status().intersects(Status::ACTIVE) {
            return Err(SdioError::BusBusy {});
        }

        self.pins.set_mode(PinMode::Dat3Probe);
        self.timing.delay_us(CARD_DETECT_SETTLE_US);
        let present = self.pins.dat3_is_high();
        self.pins.set_mode(self.pin_mode());

        Ok(present)
    }

    fn set_deadlines(&mut self, command: Duration, data: Duration) {
        self.cmd_deadline = command;
        self.data_deadline = data;
    }

    fn timer(&mut self) -> &mut T {
        &mut self.timing
    }
}

impl<B: RegisterBus, T: Timing, P: BusPins, D: DmaChannel> CommandTransport
    for Sdio<B, T, P, D>
{
    fn send(&mut self, command: &SdCmd) -> Result<RawResponse, SdioError> {
        if self.regs.status().contains(Status::CMDACT) {
            return Err(SdioError::BusBusy {});
        }

        let argument = command.argument();
        log::debug!("SDIO: CMD{} arg {:#010x}", command.index(), argument);

        self.regs.set_mask(Status::CMD_SENTINELS);
        self.regs.clear(Status::STATIC);
        // Argument must be in place before CPSMEN is set
        self.regs.write(Reg::Argument, argument);
        self.regs.write(Reg::Command, command.command_word());

        let result = self.wait_command(command);

        self.regs.clear(Status::CMD_FLAGS);
        self.regs.set_mask(Status::empty());

        result
    }
}

impl<B: RegisterBus, T: Timing, P: BusPins, D: DmaChannel> DataPath for Sdio<B, T, P, D> {
    fn configure_data(&mut self, transfer: &DataTransfer) -> Result<(), SdioError> {
        if self
            .regs
            .status()
            .intersects(Status::TXACT | Status::RXACT)
        {
            return Err(SdioError::BusBusy {});
        }

        let mut control = dctrl::DTEN | dctrl::block_size(transfer.block_size_exp);
        if transfer.direction == Direction::Read {
            control |= dctrl::DTDIR;
        }
        if self.dma.is_some() {
            control |= dctrl::DMAEN;
        }

        let blocks = u64::from(transfer.blocks.max(1));
        self.transfer_deadline =
            Duration::from_ticks(self.data_deadline.ticks().saturating_mul(blocks));

        self.regs.clear(Status::DATA_FLAGS);
        self.regs.write(Reg::DataTimer, transfer.timeout);
        self.regs.write(Reg::DataLength, transfer.len());
        self.regs.write(Reg::DataControl, control);

        Ok(())
    }

    fn read_data(&mut self, words: &mut [u32]) -> Result<(), SdioError> {
        let result = match self.dma.take() {
            Some(mut dma) => {
                let result = self.read_dma(&mut dma, words);
                self.dma = Some(dma);
                result
            }
            None => self.read_fifo(words),
        };

        self.finish_data(result)
    }

    fn write_data(&mut self, words: &[u32]) -> Result<(), SdioError> {
        let result = match self.dma.take() {
            Some(mut dma) => {
                let result = self.write_dma(&mut dma, words);
                self.dma = Some(dma);
                result
            }
            None => self.write_fifo(words),
        };

        self.finish_data(result)
    }

    fn abort_data(&mut self) {
        self.regs.write(Reg::DataControl, 0);
        if let Some(dma) = self.dma.as_mut() {
            dma.stop();
        }

        // Whatever is still queued belongs to the aborted transfer
        for _ in 0..FIFO_WORDS {
            if !self.regs.status().contains(Status::RXDAVL) {
                break;
            }
            self.regs.read(Reg::Fifo);
        }

        self.regs.clear(Status::DATA_FLAGS);
    }
}
