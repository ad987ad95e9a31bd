//! Register-level SD card simulator for driving the whole stack on the host.
//!
//! [`SimCard`] plays both the SDIO peripheral and the card behind it: writes
//! to CMD run the command immediately and latch the matching STA flags, and
//! data commands fill or drain a FIFO the driver polls.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use fugit::HertzU32;
use sdio_card::pins::StaticPins;
use sdio_card::registers::{Cid, Rca};
use sdio_card::sdio::Sdio;
use sdio_card::sdio_regs::{Reg, RegisterBus, Status, cmd, dctrl};
use sdio_card::session::{Config, SdCard};
use sdio_card::timing::{Instant, Timing};

pub const SDIOCLK: HertzU32 = HertzU32::MHz(48);

pub const PUBLISHED_RCA: u16 = 0xB368;

/// 1 GB SDSC card, 1_984_000 blocks
pub const CSD_SDSC: [u32; 4] = [0x0026_0032, 0x5F59_83C8, 0xADDB_CFFF, 0xD240_40A5];

/// 4 GB SDHC card, 7_710_720 blocks
pub const CSD_SDHC: [u32; 4] = [0x400E_0032, 0x5B59_0000, 0x1D69_7F80, 0x0A40_008B];

pub const SDSC_BLOCKS: u32 = 1_984_000;
pub const SDHC_BLOCKS: u32 = 7_710_720;

pub type Host = Sdio<SimCard, SimClock, StaticPins>;

/// Timer that moves a microsecond per reading and jumps on delays
#[derive(Default)]
pub struct SimClock {
    now: u64,
}

impl Timing for SimClock {
    fn now(&mut self) -> Instant {
        self.now += 1;
        Instant::from_ticks(self.now)
    }

    fn delay_us(&mut self, us: u32) {
        self.now += us as u64;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardKind {
    /// Version 1 card, ignores CMD8, byte addressed
    Legacy,
    /// Version 2 high capacity card, block addressed
    HighCapacity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CardState {
    Idle = 0,
    Ready = 1,
    Ident = 2,
    Stby = 3,
    Tran = 4,
    Data = 5,
    Rcv = 6,
    Prg = 7,
}

/// A command as the card saw it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Logged {
    pub index: u8,
    pub app: bool,
    pub arg: u32,
}

enum Reply {
    None,
    Short(u32, u8),
    Long([u32; 4]),
    /// Response without a valid CRC (R3)
    NoCrc(u32),
    Timeout,
}

const OUT_OF_RANGE: u32 = 1 << 31;
const ADDRESS_ERROR: u32 = 1 << 30;
const CARD_IS_LOCKED: u32 = 1 << 25;
const ILLEGAL_COMMAND: u32 = 1 << 22;
const READY_FOR_DATA: u32 = 1 << 8;
const APP_CMD: u32 = 1 << 5;

pub struct SimCard {
    pub kind: CardKind,
    /// Card ignores every command
    pub removed: bool,
    /// Card refuses bus width changes, ACMD51 and data commands
    pub locked: bool,
    /// Controller never finishes sending a command
    pub stalled: bool,
    /// ACMD41 polls answered busy before power up completes
    pub busy_polls: u32,
    /// CMD8 answers with a corrupted response CRC this many times
    pub cmd8_crc_failures: u32,
    /// XORed into the CMD8 check pattern echo
    pub cmd8_pattern_xor: u8,
    /// RCA published by CMD3
    pub publish_rca: u16,
    /// The next data reads fail their CRC
    pub read_crc_failures: u32,
    /// CMD13 polls that report programming after a write
    pub program_polls: u32,
    /// SCR advertises 4-bit mode
    pub supports_four_bit: bool,
    pub four_bit: bool,
    pub log: Vec<Logged>,
    pub storage: HashMap<u64, [u8; 512]>,

    power: u32,
    clkcr: u32,
    arg: u32,
    dtimer: u32,
    dlen: u32,
    dctrl: u32,
    mask: u32,
    latched: u32,
    respcmd: u32,
    resp: [u32; 4],

    state: CardState,
    rca: u16,
    app: bool,
    programming: u32,
    rx: VecDeque<u32>,
    tx: Vec<u32>,
    tx_target: Option<(u64, usize)>,
}

impl SimCard {
    pub fn new(kind: CardKind) -> Self {
        Self {
            kind,
            removed: false,
            locked: false,
            stalled: false,
            busy_polls: 2,
            cmd8_crc_failures: 0,
            cmd8_pattern_xor: 0,
            publish_rca: PUBLISHED_RCA,
            read_crc_failures: 0,
            program_polls: 2,
            supports_four_bit: true,
            four_bit: false,
            log: Vec::new(),
            storage: HashMap::new(),
            power: 0,
            clkcr: 0,
            arg: 0,
            dtimer: 0,
            dlen: 0,
            dctrl: 0,
            mask: 0,
            latched: 0,
            respcmd: 0,
            resp: [0; 4],
            state: CardState::Idle,
            rca: 0,
            app: false,
            programming: 0,
            rx: VecDeque::new(),
            tx: Vec::new(),
            tx_target: None,
        }
    }

    pub fn cid() -> Cid {
        Cid {
            manufacturer_id: 0x03,
            oem_id: *b"SD",
            product_name: *b"SU04G",
            product_revision: 0x80,
            serial: 0x1234_5678,
            manufacture_year: 2013,
            manufacture_month: 7,
            crc: 0,
        }
    }

    /// Contents of a block that was never written
    pub fn pristine(offset: u64) -> [u8; 512] {
        let seed = (offset / 512) as u8;
        let mut block = [0u8; 512];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = seed.wrapping_mul(31).wrapping_add(i as u8);
        }
        block
    }

    pub fn block_at(&self, offset: u64) -> [u8; 512] {
        self.storage
            .get(&offset)
            .copied()
            .unwrap_or_else(|| Self::pristine(offset))
    }

    pub fn clkcr(&self) -> u32 {
        self.clkcr
    }

    pub fn power(&self) -> u32 {
        self.power
    }

    pub fn indices(&self) -> Vec<u8> {
        self.log.iter().map(|logged| logged.index).collect()
    }

    fn capacity_blocks(&self) -> u64 {
        match self.kind {
            CardKind::Legacy => SDSC_BLOCKS as u64,
            CardKind::HighCapacity => SDHC_BLOCKS as u64,
        }
    }

    fn card_status(&self, extra: u32) -> u32 {
        let mut status = (self.state as u32) << 9 | extra;
        if self.locked {
            status |= CARD_IS_LOCKED;
        }
        if matches!(self.state, CardState::Tran) {
            status |= READY_FOR_DATA;
        }
        status
    }

    fn r1(&self, index: u8, extra: u32) -> Reply {
        Reply::Short(self.card_status(extra), index)
    }

    /// Byte offset of a data command argument, or the error bit it raises
    fn data_offset(&self, arg: u32, blocks: u64) -> Result<u64, u32> {
        let offset = match self.kind {
            CardKind::Legacy => arg as u64,
            CardKind::HighCapacity => arg as u64 * 512,
        };

        if offset % 512 != 0 {
            return Err(ADDRESS_ERROR);
        }
        if offset / 512 + blocks > self.capacity_blocks() {
            return Err(OUT_OF_RANGE);
        }

        Ok(offset)
    }

    fn data_armed(&self, read: bool) -> bool {
        self.dctrl & dctrl::DTEN != 0 && (self.dctrl & dctrl::DTDIR != 0) == read
    }

    fn queue_bytes(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.rx.push_back(u32::from_le_bytes(word));
        }
    }

    /// Start a card to host transfer of `data`
    fn send_data(&mut self, data: &[u8]) {
        if !self.data_armed(true) {
            return;
        }

        if self.read_crc_failures > 0 {
            self.read_crc_failures -= 1;
            self.latched |= Status::DCRCFAIL.bits();
            return;
        }

        let len = (self.dlen as usize).min(data.len());
        self.queue_bytes(&data[..len]);
        self.latched |= (Status::DATAEND | Status::DBCKEND).bits();
    }

    fn read_blocks(&mut self, index: u8, arg: u32) -> Reply {
        let blocks = (self.dlen / 512).max(1) as u64;
        let offset = match self.data_offset(arg, blocks) {
            Ok(offset) => offset,
            Err(bit) => return self.r1(index, bit),
        };

        let reply = self.r1(index, 0);
        let mut data = Vec::new();
        for block in 0..blocks {
            data.extend_from_slice(&self.block_at(offset + block * 512));
        }
        self.send_data(&data);
        if index == 18 {
            self.state = CardState::Data;
        }

        reply
    }

    fn write_blocks(&mut self, index: u8, arg: u32) -> Reply {
        let blocks = (self.dlen / 512).max(1) as u64;
        let offset = match self.data_offset(arg, blocks) {
            Ok(offset) => offset,
            Err(bit) => return self.r1(index, bit),
        };

        let reply = self.r1(index, 0);
        if self.data_armed(false) {
            self.tx.clear();
            self.tx_target = Some((offset, self.dlen as usize / 4));
        }
        self.state = CardState::Rcv;

        reply
    }

    fn commit_write(&mut self) {
        let Some((offset, _)) = self.tx_target.take() else {
            return;
        };

        let bytes: Vec<u8> = self.tx.iter().flat_map(|word| word.to_le_bytes()).collect();
        for (n, chunk) in bytes.chunks(512).enumerate() {
            let mut block = [0u8; 512];
            block.copy_from_slice(chunk);
            self.storage.insert(offset + n as u64 * 512, block);
        }

        self.tx.clear();
        self.programming = self.program_polls;
        self.state = if self.programming > 0 {
            CardState::Prg
        } else {
            CardState::Tran
        };
        self.latched |= (Status::DATAEND | Status::DBCKEND).bits();
    }

    fn scr_bytes(&self) -> [u8; 8] {
        let widths = if self.supports_four_bit { 0x05 } else { 0x01 };
        [0x02, 0x30 | widths, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00]
    }

    fn ssr_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        if self.four_bit {
            bytes[0] = 0x80;
        }
        // Class 10, 4 MiB allocation units
        bytes[8] = 0x04;
        bytes[10] = 0x90;
        bytes
    }

    fn execute(&mut self, index: u8, arg: u32) -> Reply {
        let app = std::mem::take(&mut self.app);
        self.log.push(Logged { index, app, arg });

        if self.removed {
            return Reply::Timeout;
        }

        let addressed = (arg >> 16) as u16 == self.rca && self.rca != 0;

        // Locked cards only take the basic and lock class commands
        if self.locked && matches!((app, index), (true, 51) | (false, 17 | 18 | 24 | 25)) {
            return self.r1(index, ILLEGAL_COMMAND);
        }

        match (app, index) {
            (_, 0) => {
                self.state = CardState::Idle;
                self.rca = 0;
                self.four_bit = false;
                Reply::None
            }
            (_, 8) => match self.kind {
                CardKind::Legacy => Reply::Timeout,
                CardKind::HighCapacity => {
                    let echo = (arg & 0xF00) | ((arg & 0xFF) as u8 ^ self.cmd8_pattern_xor) as u32;
                    if self.cmd8_crc_failures > 0 {
                        self.cmd8_crc_failures -= 1;
                        Reply::NoCrc(echo)
                    } else {
                        Reply::Short(echo, 8)
                    }
                }
            },
            (_, 55) => {
                self.app = true;
                self.r1(55, APP_CMD)
            }
            (true, 41) => {
                let mut ocr = 0x00FF_8000;
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                } else {
                    ocr |= 1 << 31;
                    if self.kind == CardKind::HighCapacity && arg & (1 << 30) != 0 {
                        ocr |= 1 << 30;
                    }
                    self.state = CardState::Ready;
                }
                Reply::NoCrc(ocr)
            }
            (_, 2) => {
                self.state = CardState::Ident;
                Reply::Long(Self::cid().encode())
            }
            (_, 3) => {
                self.rca = self.publish_rca;
                self.state = CardState::Stby;
                let rca = Rca {
                    address: self.rca,
                    status: (self.card_status(0) & 0x1FFF) as u16,
                };
                Reply::Short(rca.encode(), 3)
            }
            (_, 9) if addressed => Reply::Long(match self.kind {
                CardKind::Legacy => CSD_SDSC,
                CardKind::HighCapacity => CSD_SDHC,
            }),
            (_, 10) if addressed => Reply::Long(Self::cid().encode()),
            (_, 7) => {
                if addressed {
                    let reply = self.r1(7, 0);
                    self.state = CardState::Tran;
                    reply
                } else {
                    self.state = CardState::Stby;
                    Reply::None
                }
            }
            (true, 13) => {
                let reply = self.r1(13, APP_CMD);
                let ssr = self.ssr_bytes();
                self.send_data(&ssr);
                reply
            }
            (_, 13) if addressed => {
                let reply = self.r1(13, 0);
                if self.state == CardState::Prg {
                    self.programming = self.programming.saturating_sub(1);
                    if self.programming == 0 {
                        self.state = CardState::Tran;
                    }
                }
                reply
            }
            (_, 12) => {
                let reply = self.r1(12, 0);
                if self.state != CardState::Prg {
                    self.state = CardState::Tran;
                }
                reply
            }
            (_, 16) => self.r1(16, 0),
            (false, 17) | (false, 18) => self.read_blocks(index, arg),
            (false, 24) | (false, 25) => self.write_blocks(index, arg),
            (true, 6) => {
                let reply = self.r1(6, APP_CMD);
                if !self.locked {
                    self.four_bit = arg & 0b11 == 0b10;
                }
                reply
            }
            (true, 42) => self.r1(42, APP_CMD),
            (true, 51) => {
                let reply = self.r1(51, APP_CMD);
                let scr = self.scr_bytes();
                self.send_data(&scr);
                reply
            }
            _ => self.r1(index, ILLEGAL_COMMAND),
        }
    }

    fn run_command(&mut self, word: u32) {
        if word & cmd::CPSMEN == 0 {
            return;
        }

        let index = (word & cmd::CMDINDEX_MASK) as u8;
        let waitresp = word & (0b11 << cmd::WAITRESP_SHIFT);

        // Nothing ever gets latched, the driver has to give up on its own
        if self.stalled {
            self.log.push(Logged {
                index,
                app: false,
                arg: self.arg,
            });
            return;
        }
        let reply = self.execute(index, self.arg);

        // Without a response the controller only knows the command left
        let flag = match reply {
            _ if waitresp == cmd::WAITRESP_NONE => Status::CMDSENT,
            Reply::Timeout => Status::CTIMEOUT,
            Reply::None => Status::CTIMEOUT,
            Reply::Short(word, index) => {
                self.respcmd = index as u32;
                self.resp = [word, 0, 0, 0];
                Status::CMDREND
            }
            Reply::Long(words) => {
                self.respcmd = cmd::SENTINEL_INDEX as u32;
                self.resp = words;
                Status::CMDREND
            }
            Reply::NoCrc(word) => {
                self.respcmd = cmd::SENTINEL_INDEX as u32;
                self.resp = [word, 0, 0, 0];
                Status::CCRCFAIL
            }
        };

        self.latched |= flag.bits();
    }

    fn status(&self) -> u32 {
        let mut status = self.latched;
        if !self.rx.is_empty() {
            status |= Status::RXDAVL.bits();
        }
        if self.rx.len() >= 8 {
            status |= Status::RXFIFOHF.bits();
        }
        if self.tx_target.is_some() {
            status |= Status::TXFIFOHE.bits();
        }
        status
    }
}

impl RegisterBus for SimCard {
    fn read(&mut self, reg: Reg) -> u32 {
        match reg {
            Reg::Power => self.power,
            Reg::ClockControl => self.clkcr,
            Reg::Argument => self.arg,
            Reg::RespCmd => self.respcmd,
            Reg::Resp1 => self.resp[0],
            Reg::Resp2 => self.resp[1],
            Reg::Resp3 => self.resp[2],
            Reg::Resp4 => self.resp[3],
            Reg::DataTimer => self.dtimer,
            Reg::DataLength => self.dlen,
            Reg::DataControl => self.dctrl,
            Reg::Status => self.status(),
            Reg::Mask => self.mask,
            Reg::FifoCounter => self.rx.len() as u32,
            Reg::Fifo => self.rx.pop_front().unwrap_or(0),
            Reg::Command | Reg::DataCounter | Reg::InterruptClear => 0,
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        match reg {
            Reg::Power => self.power = value,
            Reg::ClockControl => self.clkcr = value,
            Reg::Argument => self.arg = value,
            Reg::Command => self.run_command(value),
            Reg::DataTimer => self.dtimer = value,
            Reg::DataLength => self.dlen = value,
            Reg::DataControl => {
                self.dctrl = value;
                if value & dctrl::DTEN == 0 {
                    self.rx.clear();
                    self.tx.clear();
                    self.tx_target = None;
                }
            }
            Reg::InterruptClear => self.latched &= !value,
            Reg::Mask => self.mask = value,
            Reg::Fifo => {
                if let Some((_, words)) = self.tx_target {
                    self.tx.push(value);
                    if self.tx.len() == words {
                        self.commit_write();
                    }
                }
            }
            _ => {}
        }
    }
}

/// A session over a simulated card, not yet started
pub fn session(sim: SimCard) -> SdCard<Host> {
    session_with(sim, Config::default())
}

pub fn session_with(sim: SimCard, config: Config) -> SdCard<Host> {
    let host = Sdio::new(sim, SimClock::default(), StaticPins, SDIOCLK);
    SdCard::new(host, config)
}

/// A session that has finished `begin`
pub fn started(kind: CardKind) -> SdCard<Host> {
    let mut card = session(SimCard::new(kind));
    card.begin().expect("simulated card initializes");
    card
}

pub fn sim(card: &mut SdCard<Host>) -> &mut SimCard {
    card.host_mut().bus()
}
