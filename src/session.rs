//! Card session: the SD identification sequence and the per-card state the
//! block transfer engine relies on.
//!
//! A session starts in [`SessionState::Uninitialized`], walks through the
//! identification states in [`SdCard::begin`] and ends up in
//! [`SessionState::Transfer`] with the card selected. Any failure during
//! `begin` or a card that stops answering leaves the session
//! [`SessionState::Disconnected`]; only a fresh `begin` leaves that state.

use fugit::HertzU32;

use crate::command::{RawResponse, SdCmd, SdCmdResponse};
use crate::errors::SdioError;
use crate::host::{BusWidth, DataTransfer, SdHost};
use crate::registers::{
    CardStatus, Cid, Csd, CsdStructure, CurrentState, IfCond, OCR_VOLT_RANGE, Ocr, Scr, Ssr,
    crc_matches,
};
use crate::timing::{Deadline, Duration, Timing};
use crate::transfer::fifo_bytes;

/// Clock every card accepts before its CSD has been read
pub const DEFAULT_SPEED: HertzU32 = HertzU32::MHz(25);

/// Where the card session is in its life cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// CMD0 accepted
    Idle,
    /// CMD8 answered or timed out; `version` is the CSD structure to expect
    InterfaceChecked { version: CsdStructure },
    /// ACMD41 reported power up complete
    OperatingConditionNegotiated,
    /// CMD3 published an address
    Identified { rca: u16 },
    Standby,
    /// Selected and idle
    Transfer,
    SendingData,
    ReceivingData,
    Disconnected,
}

/// How data addresses are interpreted by the card
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityClass {
    /// SDSC, byte addressed
    Standard,
    /// SDHC and SDXC, addressed in 512 byte blocks
    High,
}

impl CapacityClass {
    /// Byte offset on the card that a data command `address` refers to
    pub fn byte_offset(self, address: u32) -> u64 {
        match self {
            Self::Standard => address as u64,
            Self::High => address as u64 * 512,
        }
    }

    /// Data command address of the 512 byte block `index`
    pub fn address_of_block(self, index: u32) -> Option<u32> {
        match self {
            Self::Standard => index.checked_mul(512),
            Self::High => Some(index),
        }
    }
}

/// Result of asking the card for a new bus width
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusWidthOutcome {
    Applied,
    /// The card is locked; the controller kept its previous width
    Rejected,
}

/// Session tuning
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Clock used until the card has been identified
    pub init_clock: HertzU32,
    /// Operating clock, capped by the card's TRAN_SPEED
    pub target_clock: HertzU32,
    pub bus_width: BusWidth,
    /// Wait after power on before the first command
    pub power_up_settle: Duration,
    /// Attempts for CMD0, CMD8 and CMD3
    pub retries: u8,
    pub retry_delay: Duration,
    /// CMD8 check pattern
    pub check_pattern: u8,
    /// OCR window offered in ACMD41 and required back
    pub voltage_window: u32,
    /// Total time the card gets to finish powering up
    pub op_cond_budget: Duration,
    /// First pause between ACMD41 polls, doubled every round
    pub op_cond_backoff: Duration,
    pub op_cond_backoff_max: Duration,
    pub command_deadline: Duration,
    /// Longest the data path may go without moving a word; with DMA, the
    /// allowance per block
    pub data_deadline: Duration,
    /// DTIMER value, in card clock periods
    pub data_timeout: u32,
    /// How long a write may keep the card busy
    pub programming_deadline: Duration,
    /// Probe DAT3 for a card before powering up
    pub card_detect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            init_clock: HertzU32::kHz(400),
            target_clock: DEFAULT_SPEED,
            bus_width: BusWidth::Four,
            power_up_settle: Duration::millis(2),
            retries: 3,
            retry_delay: Duration::millis(1),
            check_pattern: 0xAA,
            voltage_window: OCR_VOLT_RANGE,
            op_cond_budget: Duration::millis(1_000),
            op_cond_backoff: Duration::millis(1),
            op_cond_backoff_max: Duration::millis(64),
            command_deadline: Duration::millis(100),
            data_deadline: Duration::millis(1_000),
            data_timeout: 0xFFFF_FFFF,
            programming_deadline: Duration::millis(500),
            card_detect: true,
        }
    }
}

/// An SD memory card behind a host controller
pub struct SdCard<H> {
    host: H,
    config: Config,
    state: SessionState,
    rca: u16,
    ocr: Ocr,
    cid: Option<Cid>,
    csd: Option<Csd>,
    csd_structure: Option<CsdStructure>,
    scr: Option<Scr>,
    ssr: Option<Ssr>,
    card_status: CardStatus,
    capacity: Option<CapacityClass>,
}

impl<H: SdHost> SdCard<H> {
    pub fn new(host: H, config: Config) -> Self {
        Self {
            host,
            config,
            state: SessionState::Uninitialized,
            rca: 0,
            ocr: Ocr::default(),
            cid: None,
            csd: None,
            csd_structure: None,
            scr: None,
            ssr: None,
            card_status: CardStatus::default(),
            capacity: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Relative card address, 0 until CMD3 succeeds
    pub fn rca(&self) -> u16 {
        self.rca
    }

    pub fn ocr(&self) -> Ocr {
        self.ocr
    }

    pub fn cid(&self) -> Option<&Cid> {
        self.cid.as_ref()
    }

    pub fn csd(&self) -> Option<&Csd> {
        self.csd.as_ref()
    }

    /// CSD layout in use, `None` until CMD8 has been answered
    pub fn csd_structure(&self) -> Option<CsdStructure> {
        self.csd_structure
    }

    pub fn scr(&self) -> Option<&Scr> {
        self.scr.as_ref()
    }

    pub fn ssr(&self) -> Option<&Ssr> {
        self.ssr.as_ref()
    }

    /// Card status from the last R1 response
    pub fn card_status(&self) -> CardStatus {
        self.card_status
    }

    pub fn capacity_class(&self) -> Option<CapacityClass> {
        self.capacity
    }

    /// Card size in 512 byte blocks
    pub fn capacity_blocks(&self) -> Option<u32> {
        self.csd.as_ref().map(Csd::capacity_blocks)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn free(self) -> H {
        self.host
    }

    /// Data command address of the 512 byte block `index`
    pub fn address_for_block(&self, index: u32) -> Result<u32, SdioError> {
        let capacity = self.capacity.ok_or(SdioError::NotReady { state: self.state })?;

        capacity
            .address_of_block(index)
            .ok_or(SdioError::OutOfRange {})
    }

    /// Initialize the card at the configured target clock
    pub fn begin(&mut self) -> Result<(), SdioError> {
        self.clear_card();
        self.host
            .set_deadlines(self.config.command_deadline, self.config.data_deadline);

        match self.initialize() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("SDIO: initialization failed in {:?}: {}", self.state, e);
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Initialize the card, running it at no more than `clock`
    pub fn begin_at(&mut self, clock: HertzU32) -> Result<(), SdioError> {
        self.config.target_clock = clock;
        self.begin()
    }

    /// Tear the session down: controller reset, RCA and CSD version cleared.
    /// A disconnected session stays disconnected until the next `begin`.
    pub fn end(&mut self) {
        self.host.reset();
        self.clear_card();
        self.pause(self.config.power_up_settle);

        if self.state != SessionState::Disconnected {
            self.state = SessionState::Uninitialized;
        }

        log::debug!("SDIO: session ended");
    }

    /// Issue `cmd`, framing ACMDs with CMD55. R1 error bits fail the call.
    ///
    /// Commands that change the card's state or start a data phase are
    /// refused with [`SdioError::SessionCommand`]; use [`SdCard::begin`],
    /// [`SdCard::select`], the block transfers and the like instead.
    pub fn command(&mut self, cmd: SdCmd) -> Result<SdCmdResponse, SdioError> {
        self.ensure_connected()?;
        refuse_state_change(&cmd)?;

        let result = if cmd.is_acmd() {
            self.app_prefix().and_then(|_| self.exchange(&cmd))
        } else {
            self.exchange(&cmd)
        };

        self.track(result)
    }

    /// Issue an application command: CMD55 with the card's RCA, then `cmd`.
    /// The same commands as [`SdCard::command`] are refused.
    pub fn app_command(&mut self, cmd: SdCmd) -> Result<SdCmdResponse, SdioError> {
        self.ensure_connected()?;
        refuse_state_change(&cmd)?;

        let result = self.app_prefix().and_then(|_| self.exchange(&cmd));

        self.track(result)
    }

    /// CMD13: fetch and record the card status
    pub fn status(&mut self) -> Result<CardStatus, SdioError> {
        let rca = self.require_addressed()?;

        let result = self.exchange(&SdCmd::SendStatus(rca));
        self.track(result)?;

        Ok(self.card_status)
    }

    /// CMD12: end a multiple block transfer
    pub fn stop(&mut self) -> Result<CardStatus, SdioError> {
        self.ensure_connected()?;

        let result = self.exchange(&SdCmd::StopTransmission);
        self.track(result)?;

        if matches!(
            self.state,
            SessionState::SendingData | SessionState::ReceivingData
        ) {
            self.state = SessionState::Transfer;
        }

        Ok(self.card_status)
    }

    /// CMD7 with the card's RCA: standby to transfer
    pub fn select(&mut self) -> Result<(), SdioError> {
        let rca = self.require_addressed()?;

        let result = self.exchange(&SdCmd::SelectCard(rca));
        self.track(result)?;
        self.state = SessionState::Transfer;

        Ok(())
    }

    /// CMD7 with RCA 0: every card back to standby
    pub fn deselect(&mut self) -> Result<(), SdioError> {
        self.require_addressed()?;

        let result = self.exchange(&SdCmd::DeselectAll);
        self.track(result)?;
        self.state = SessionState::Standby;

        Ok(())
    }

    /// CMD10: fetch the CID of the addressed card. The card must be in
    /// standby.
    pub fn send_cid(&mut self) -> Result<Cid, SdioError> {
        self.require(SessionState::Standby)?;

        let result = self.fetch_register(&SdCmd::SendCid(self.rca));
        let words = self.track(result)?;
        let cid = self.load_cid(&words);

        Ok(cid)
    }

    /// CMD9: fetch the CSD of the addressed card. The card must be in
    /// standby.
    pub fn send_csd(&mut self) -> Result<Csd, SdioError> {
        self.require(SessionState::Standby)?;

        let result = self
            .fetch_register(&SdCmd::SendCsd(self.rca))
            .and_then(|words| self.load_csd(&words));

        self.track(result)
    }

    /// ACMD6: switch the card and controller bus width. A locked card
    /// refuses and the controller keeps its current width.
    pub fn set_bus_width(&mut self, width: BusWidth) -> Result<BusWidthOutcome, SdioError> {
        self.require(SessionState::Transfer)?;

        if width == BusWidth::Four {
            if let Some(scr) = &self.scr {
                if !scr.supports_4bit() {
                    return Err(SdioError::UnsupportedBusWidth {});
                }
            }
        }

        let result = self.apply_bus_width(width);
        self.track(result)
    }

    /// ACMD51: read the SD configuration register
    pub fn read_scr(&mut self) -> Result<Scr, SdioError> {
        self.require(SessionState::Transfer)?;

        let mut words = [0u32; 2];
        let result = self.read_app_data(SdCmd::SendScr, 3, &mut words);
        self.track(result)?;

        let scr = Scr::decode(&fifo_bytes(&words));
        self.scr = Some(scr);

        Ok(scr)
    }

    /// ACMD13: read the SD status register
    pub fn read_sd_status(&mut self) -> Result<Ssr, SdioError> {
        self.require(SessionState::Transfer)?;

        let mut words = [0u32; 16];
        let result = self.read_app_data(SdCmd::SdStatus, 6, &mut words);
        self.track(result)?;

        let ssr = Ssr::decode(&fifo_bytes(&words));
        self.ssr = Some(ssr);

        Ok(ssr)
    }

    fn initialize(&mut self) -> Result<(), SdioError> {
        self.host.set_bus_width(BusWidth::One);
        self.host.set_clock(self.config.init_clock);

        if self.config.card_detect && !self.host.card_present()? {
            return Err(SdioError::NoCard {});
        }

        self.host.power_on()?;
        self.pause(self.config.power_up_settle);

        self.go_idle()?;
        self.state = SessionState::Idle;

        let version = self.check_interface()?;
        self.csd_structure = Some(version);
        self.state = SessionState::InterfaceChecked { version };

        let ocr = self.negotiate_op_cond(version == CsdStructure::V1)?;
        self.ocr = ocr;
        self.capacity = Some(if version == CsdStructure::V1 && ocr.ccs {
            CapacityClass::High
        } else {
            CapacityClass::Standard
        });
        self.state = SessionState::OperatingConditionNegotiated;

        let words = self.fetch_register(&SdCmd::AllSendCid)?;
        self.load_cid(&words);

        let rca = self.publish_address()?;
        self.rca = rca;
        self.state = SessionState::Identified { rca };

        let words = self.fetch_register(&SdCmd::SendCsd(rca))?;
        let csd = self.load_csd(&words)?;
        self.state = SessionState::Standby;

        self.exchange(&SdCmd::SelectCard(rca))?;
        self.state = SessionState::Transfer;

        let limit = csd.max_transfer_rate().unwrap_or(DEFAULT_SPEED);
        let clock = self.host.set_clock(self.config.target_clock.min(limit));

        if self.config.bus_width == BusWidth::Four {
            self.widen_bus()?;
        }

        if self.capacity == Some(CapacityClass::Standard) {
            self.exchange(&SdCmd::SetBlockLen(crate::registers::BLOCK_LEN as u32))?;
        }

        if let Some(cid) = &self.cid {
            log::info!(
                "SDIO: card {} rev {}.{} serial {:#010x}, {:02}/{}",
                cid.name().unwrap_or("?"),
                cid.revision().0,
                cid.revision().1,
                cid.serial,
                cid.manufacture_month,
                cid.manufacture_year
            );
        }
        log::info!(
            "SDIO: {:?} capacity, {} blocks, {} Hz, {:?} bus",
            self.capacity,
            csd.capacity_blocks(),
            clock.raw(),
            self.host.bus_width()
        );

        Ok(())
    }

    /// CMD0 until the card takes it
    fn go_idle(&mut self) -> Result<(), SdioError> {
        let mut last = SdioError::NoCard {};

        for attempt in 0..self.config.retries.max(1) {
            match self.host.send(&SdCmd::GoIdleState) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    log::debug!("SDIO: CMD0 attempt {} failed: {}", attempt + 1, e);
                    last = e;
                    self.pause(self.config.retry_delay);
                }
            }
        }

        Err(last)
    }

    /// CMD8. A timeout means a legacy card, not an error.
    fn check_interface(&mut self) -> Result<CsdStructure, SdioError> {
        let request = IfCond::new(self.config.check_pattern);
        let attempts = self.config.retries.max(1);

        for attempt in 1..=attempts {
            match self.exchange(&SdCmd::SendIfCond(request)) {
                Ok(SdCmdResponse::R7(echo)) => {
                    request.verify_echo(&echo)?;
                    log::debug!("SDIO: CMD8 echoed, version 2 card");
                    return Ok(CsdStructure::V1);
                }
                Ok(_) => return Err(SdioError::UnexpectedResponse { cmd: 8 }),
                Err(SdioError::CmdTimeout { .. }) => {
                    log::warn!("SDIO: no answer to CMD8, treating as a version 1 card");
                    return Ok(CsdStructure::V0);
                }
                Err(e @ SdioError::CmdCrcFail { .. }) if attempt < attempts => {
                    log::debug!("SDIO: CMD8 attempt {} failed: {}", attempt, e);
                    self.pause(self.config.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SdioError::CmdCrcFail { cmd: 8 })
    }

    /// ACMD41 until the card leaves busy or the budget runs out
    fn negotiate_op_cond(&mut self, hcs: bool) -> Result<Ocr, SdioError> {
        let command = SdCmd::SdSendOpCond {
            hcs,
            xpc: false,
            s18r: false,
            window: self.config.voltage_window,
        };

        let deadline = Deadline::after(self.host.timer(), self.config.op_cond_budget);
        let mut backoff = self.config.op_cond_backoff;
        let mut polls = 0u32;

        let ocr = loop {
            self.app_prefix()?;
            polls += 1;

            let ocr = match self.exchange(&command)? {
                SdCmdResponse::R3(ocr) => ocr,
                _ => return Err(SdioError::UnexpectedResponse { cmd: 41 }),
            };

            if !ocr.is_busy() {
                break ocr;
            }

            if deadline.expired(self.host.timer()) {
                log::error!("SDIO: card still busy after {} ACMD41 polls", polls);
                return Err(SdioError::OpCondTimeout {});
            }

            self.pause(backoff);
            backoff = (backoff * 2).min(self.config.op_cond_backoff_max);
        };

        log::debug!("SDIO: OCR {:#010x} after {} polls", ocr.encode(), polls);

        if !ocr.supports(self.config.voltage_window) {
            return Err(SdioError::BadVoltRange {
                range: ocr.voltage_window,
            });
        }

        Ok(ocr)
    }

    /// CMD3 until the card publishes an address different from the
    /// current one
    fn publish_address(&mut self) -> Result<u16, SdioError> {
        for attempt in 1..=self.config.retries.max(1) {
            let rca = match self.exchange(&SdCmd::SendRelativeAddr)? {
                SdCmdResponse::R6(rca) => rca,
                _ => return Err(SdioError::UnexpectedResponse { cmd: 3 }),
            };

            rca.check()?;

            if rca.address != self.rca {
                log::debug!("SDIO: RCA {:#06x}", rca.address);
                return Ok(rca.address);
            }

            log::debug!("SDIO: CMD3 attempt {} kept RCA {:#06x}", attempt, rca.address);
        }

        Err(SdioError::RcaUnchanged { rca: self.rca })
    }

    /// Ask for 4-bit mode if the SCR allows it. A locked card refuses
    /// ACMD51 and stays at 1-bit.
    fn widen_bus(&mut self) -> Result<(), SdioError> {
        let scr = match self.read_scr() {
            Ok(scr) => scr,
            Err(SdioError::CardIsLocked {}) => {
                log::warn!("SDIO: card is locked, staying at 1-bit");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !scr.supports_4bit() {
            log::warn!("SDIO: card has no 4-bit mode, staying at 1-bit");
            return Ok(());
        }

        // DAT3 pull-up would fight the bus
        self.app_prefix()?;
        self.exchange(&SdCmd::SetClrCardDetect(false))?;

        self.apply_bus_width(BusWidth::Four)?;

        Ok(())
    }

    fn apply_bus_width(&mut self, width: BusWidth) -> Result<BusWidthOutcome, SdioError> {
        let command = SdCmd::SetBusWidth(width);

        self.app_prefix()?;
        let raw = self.host.send(&command)?;
        let status = SdCmdResponse::decode(&command, raw)?
            .card_status()
            .ok_or(SdioError::UnexpectedResponse { cmd: 6 })?;
        self.card_status = status;

        if status.card_is_locked() {
            log::warn!(
                "SDIO: card is locked, bus width stays {:?}",
                self.host.bus_width()
            );
            return Ok(BusWidthOutcome::Rejected);
        }

        status.first_error()?;
        self.host.set_bus_width(width);

        Ok(BusWidthOutcome::Applied)
    }

    /// ACMD with a single data block read through the data path
    fn read_app_data(
        &mut self,
        command: SdCmd,
        block_size_exp: u8,
        words: &mut [u32],
    ) -> Result<(), SdioError> {
        self.app_prefix()?;

        let transfer = DataTransfer::read(block_size_exp, 1, self.config.data_timeout);
        self.receive(&command, &transfer, words)
    }

    /// Configure the data path, issue `command`, drain the FIFO into `words`
    pub(crate) fn receive(
        &mut self,
        command: &SdCmd,
        transfer: &DataTransfer,
        words: &mut [u32],
    ) -> Result<(), SdioError> {
        self.host.configure_data(transfer)?;
        self.state = SessionState::ReceivingData;

        let result = match self.exchange(command) {
            Ok(_) => self.host.read_data(words),
            Err(e) => {
                self.host.abort_data();
                Err(e)
            }
        };

        self.state = SessionState::Transfer;
        result
    }

    /// Configure the data path, issue `command`, feed `words` to the FIFO
    pub(crate) fn transmit(
        &mut self,
        command: &SdCmd,
        transfer: &DataTransfer,
        words: &[u32],
    ) -> Result<(), SdioError> {
        self.host.configure_data(transfer)?;
        self.state = SessionState::SendingData;

        let result = match self.exchange(command) {
            Ok(_) => self.host.write_data(words),
            Err(e) => {
                self.host.abort_data();
                Err(e)
            }
        };

        self.state = SessionState::Transfer;
        result
    }

    /// Poll CMD13 until the card is back in transfer state and ready for
    /// data
    pub(crate) fn wait_ready(&mut self) -> Result<(), SdioError> {
        let deadline = Deadline::after(self.host.timer(), self.config.programming_deadline);

        loop {
            self.exchange(&SdCmd::SendStatus(self.rca))?;

            if self.card_status.ready_for_data()
                && self.card_status.current_state() == CurrentState::Tran
            {
                return Ok(());
            }

            if deadline.expired(self.host.timer()) {
                return Err(SdioError::ProgrammingTimeout {});
            }
        }
    }

    /// Check the session can start a data transfer, selecting a card left
    /// in standby
    pub(crate) fn prepare_transfer(&mut self) -> Result<(), SdioError> {
        if self.state == SessionState::Standby {
            self.select()?;
        }

        self.require(SessionState::Transfer)
    }

    /// Send one command and decode its response. R1 error bits fail, and
    /// an illegal command on a locked card is reported as
    /// [`SdioError::CardIsLocked`].
    pub(crate) fn exchange(&mut self, command: &SdCmd) -> Result<SdCmdResponse, SdioError> {
        let raw = self.host.send(command)?;
        let response = SdCmdResponse::decode(command, raw)?;

        if let Some(status) = response.card_status() {
            self.card_status = status;
            if status.card_is_locked() && status.illegal_command() {
                return Err(SdioError::CardIsLocked {});
            }
            status.first_error()?;
        }

        Ok(response)
    }

    /// A card that stops answering is gone until the next `begin`
    pub(crate) fn track<T>(&mut self, result: Result<T, SdioError>) -> Result<T, SdioError> {
        if let Err(SdioError::CmdTimeout { cmd } | SdioError::CmdDeadline { cmd }) = &result {
            if self.state != SessionState::Uninitialized {
                log::error!("SDIO: card stopped answering CMD{}, disconnecting", cmd);
                self.state = SessionState::Disconnected;
            }
        }

        result
    }

    /// CMD55 with the current RCA
    fn app_prefix(&mut self) -> Result<(), SdioError> {
        let status = match self.exchange(&SdCmd::AppCmd(self.rca))? {
            SdCmdResponse::R1(status) => status,
            _ => return Err(SdioError::UnexpectedResponse { cmd: 55 }),
        };

        if !status.app_cmd() {
            return Err(SdioError::UnexpectedResponse { cmd: 55 });
        }

        Ok(())
    }

    fn fetch_register(&mut self, command: &SdCmd) -> Result<[u32; 4], SdioError> {
        match self.host.send(command)? {
            RawResponse::Long(words) => Ok(words),
            _ => Err(SdioError::UnexpectedResponse {
                cmd: command.index(),
            }),
        }
    }

    fn load_cid(&mut self, words: &[u32; 4]) -> Cid {
        if !crc_matches(words) {
            log::warn!("SDIO: CID CRC7 mismatch");
        }

        let cid = Cid::decode(words);
        self.cid = Some(cid);
        cid
    }

    fn load_csd(&mut self, words: &[u32; 4]) -> Result<Csd, SdioError> {
        if !crc_matches(words) {
            log::warn!("SDIO: CSD CRC7 mismatch");
        }

        let csd = Csd::decode(words)?;
        if self.csd_structure != Some(csd.structure()) {
            log::warn!(
                "SDIO: CSD reports {:?}, interface check expected {:?}",
                csd.structure(),
                self.csd_structure
            );
        }

        self.csd_structure = Some(csd.structure());
        self.csd = Some(csd);

        Ok(csd)
    }

    fn ensure_connected(&self) -> Result<(), SdioError> {
        match self.state {
            SessionState::Disconnected => Err(SdioError::Disconnected {}),
            _ => Ok(()),
        }
    }

    fn require(&self, wanted: SessionState) -> Result<(), SdioError> {
        self.ensure_connected()?;

        if self.state != wanted {
            return Err(SdioError::NotReady { state: self.state });
        }

        Ok(())
    }

    /// RCA of a card that has been through CMD3
    fn require_addressed(&self) -> Result<u16, SdioError> {
        self.ensure_connected()?;

        match self.state {
            SessionState::Identified { .. } | SessionState::Standby | SessionState::Transfer => {
                Ok(self.rca)
            }
            state => Err(SdioError::NotReady { state }),
        }
    }

    fn clear_card(&mut self) {
        self.rca = 0;
        self.ocr = Ocr::default();
        self.cid = None;
        self.csd = None;
        self.csd_structure = None;
        self.scr = None;
        self.ssr = None;
        self.card_status = CardStatus::default();
        self.capacity = None;
    }

    fn pause(&mut self, duration: Duration) {
        let us = duration.to_micros().min(u32::MAX as u64) as u32;
        self.host.timer().delay_us(us);
    }
}

fn refuse_state_change(cmd: &SdCmd) -> Result<(), SdioError> {
    if cmd.changes_card_state() {
        return Err(SdioError::SessionCommand { cmd: cmd.index() });
    }

    Ok(())
}
