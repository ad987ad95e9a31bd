//! Card registers and their bit layouts.
//!
//! Every record decodes from the raw response words (or data bytes) the
//! controller hands back and encodes to the exact same bit positions, so
//! `decode(encode(r)) == r` for every legal record. Long responses are taken
//! most significant word first, the order RESP1..RESP4 are filled in.

use bit_field::BitField;

use crate::crc::crc7_of_register;
use crate::errors::SdioError;

/// OCR voltage window for 3.2-3.4V
pub const OCR_VOLT_RANGE: u32 = 0b0011_0000__0000_0000_0000_0000;

/// CMD8 voltage supplied field for 2.7-3.6V
pub const IF_COND_2V7_3V6: u8 = 0b0001;

/// Block length every card supports
pub const BLOCK_LEN: usize = 512;

#[inline]
fn words_to_u128(words: &[u32; 4]) -> u128 {
    words
        .iter()
        .fold(0u128, |acc, word| (acc << 32) | *word as u128)
}

#[inline]
fn u128_to_words(value: u128) -> [u32; 4] {
    [
        (value >> 96) as u32,
        (value >> 64) as u32,
        (value >> 32) as u32,
        value as u32,
    ]
}

/// True if the CRC7 carried in bits 7:1 of a CID or CSD matches its contents
pub fn crc_matches(words: &[u32; 4]) -> bool {
    crc7_of_register(words) == (words[3] as u8) & 0xFE
}

/// Operating conditions register, returned by ACMD41
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ocr {
    /// Power up finished. The card is busy while this is clear.
    pub powered_up: bool,
    /// Card capacity status, set for SDHC/SDXC
    pub ccs: bool,
    /// UHS-II card
    pub uhs2: bool,
    /// Over 2TB support
    pub co2t: bool,
    /// Switching to 1.8V accepted
    pub s18a: bool,
    /// Supported voltages, bits 23:0
    pub voltage_window: u32,
}

impl Ocr {
    pub fn decode(raw: u32) -> Self {
        Self {
            powered_up: raw.get_bit(31),
            ccs: raw.get_bit(30),
            uhs2: raw.get_bit(29),
            co2t: raw.get_bit(27),
            s18a: raw.get_bit(24),
            voltage_window: raw.get_bits(0..24),
        }
    }

    pub fn encode(&self) -> u32 {
        let mut raw = 0u32;
        raw.set_bit(31, self.powered_up);
        raw.set_bit(30, self.ccs);
        raw.set_bit(29, self.uhs2);
        raw.set_bit(27, self.co2t);
        raw.set_bit(24, self.s18a);
        raw.set_bits(0..24, self.voltage_window & 0xFF_FFFF);
        raw
    }

    /// Returns true if the card is still powering up
    #[inline]
    pub fn is_busy(&self) -> bool {
        !self.powered_up
    }

    /// Returns true if every voltage in `window` is supported
    #[inline]
    pub fn supports(&self, window: u32) -> bool {
        self.voltage_window & window == window
    }
}

/// Card identification register
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cid {
    pub manufacturer_id: u8,
    pub oem_id: [u8; 2],
    pub product_name: [u8; 5],
    /// BCD major.minor
    pub product_revision: u8,
    pub serial: u32,
    /// 2000-2255
    pub manufacture_year: u16,
    pub manufacture_month: u8,
    pub crc: u8,
}

impl Cid {
    pub fn decode(words: &[u32; 4]) -> Self {
        let raw = words_to_u128(words);
        let name = (raw.get_bits(64..104) as u64).to_be_bytes();
        let oem = (raw.get_bits(104..120) as u16).to_be_bytes();

        Self {
            manufacturer_id: raw.get_bits(120..128) as u8,
            oem_id: oem,
            product_name: [name[3], name[4], name[5], name[6], name[7]],
            product_revision: raw.get_bits(56..64) as u8,
            serial: raw.get_bits(24..56) as u32,
            manufacture_year: 2000 + raw.get_bits(12..20) as u16,
            manufacture_month: raw.get_bits(8..12) as u8,
            crc: raw.get_bits(1..8) as u8,
        }
    }

    pub fn encode(&self) -> [u32; 4] {
        let mut name = [0u8; 8];
        name[3..].copy_from_slice(&self.product_name);

        let mut raw = 0u128;
        raw.set_bits(120..128, self.manufacturer_id as u128);
        raw.set_bits(104..120, u16::from_be_bytes(self.oem_id) as u128);
        raw.set_bits(64..104, u64::from_be_bytes(name) as u128);
        raw.set_bits(56..64, self.product_revision as u128);
        raw.set_bits(24..56, self.serial as u128);
        raw.set_bits(12..20, (self.manufacture_year.wrapping_sub(2000) & 0xFF) as u128);
        raw.set_bits(8..12, (self.manufacture_month & 0xF) as u128);
        raw.set_bits(1..8, (self.crc & 0x7F) as u128);
        raw.set_bit(0, true);

        u128_to_words(raw)
    }

    /// Product name as text, if it is ASCII
    pub fn name(&self) -> Option<&str> {
        core::str::from_utf8(&self.product_name).ok()
    }

    /// OEM id as text, if it is ASCII
    pub fn oem(&self) -> Option<&str> {
        core::str::from_utf8(&self.oem_id).ok()
    }

    /// Product revision as (major, minor)
    pub fn revision(&self) -> (u8, u8) {
        (self.product_revision >> 4, self.product_revision & 0xF)
    }
}

/// CSD_STRUCTURE field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsdStructure {
    /// Standard capacity
    V0,
    /// High and extended capacity
    V1,
}

impl CsdStructure {
    pub fn from_bits(bits: u8) -> Result<Self, SdioError> {
        match bits {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            structure => Err(SdioError::UnsupportedCsd { structure }),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
        }
    }
}

/// Fields whose position depends on the CSD structure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsdLayout {
    V0 {
        /// 12 bits at 73:62
        c_size: u16,
        vdd_r_curr_min: u8,
        vdd_r_curr_max: u8,
        vdd_w_curr_min: u8,
        vdd_w_curr_max: u8,
        c_size_mult: u8,
    },
    V1 {
        /// 22 bits at 69:48
        c_size: u32,
    },
}

/// Card specific data register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Csd {
    pub taac: u8,
    pub nsac: u8,
    pub tran_speed: u8,
    pub ccc: u16,
    pub read_bl_len: u8,
    pub read_bl_partial: bool,
    pub write_blk_misalign: bool,
    pub read_blk_misalign: bool,
    pub dsr_imp: bool,
    pub layout: CsdLayout,
    pub erase_blk_en: bool,
    pub sector_size: u8,
    pub wp_grp_size: u8,
    pub wp_grp_enable: bool,
    pub r2w_factor: u8,
    pub write_bl_len: u8,
    pub write_bl_partial: bool,
    pub file_format_grp: bool,
    pub copy: bool,
    pub perm_write_protect: bool,
    pub tmp_write_protect: bool,
    pub file_format: u8,
    pub crc: u8,
}

/// TRAN_SPEED time units in units of 10kbit/s
const TRAN_UNITS: [u32; 4] = [10, 100, 1_000, 10_000];

/// TRAN_SPEED multipliers, times ten
const TRAN_MULTIPLIERS: [u32; 16] = [0, 10, 12, 13, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 70, 80];

impl Csd {
    /// Decode using the layout named by bits 127:126
    pub fn decode(words: &[u32; 4]) -> Result<Self, SdioError> {
        let structure = CsdStructure::from_bits(words_to_u128(words).get_bits(126..128) as u8)?;

        Ok(Self::decode_with(words, structure))
    }

    /// Decode using `structure`'s layout whatever the register says
    pub fn decode_with(words: &[u32; 4], structure: CsdStructure) -> Self {
        let raw = words_to_u128(words);

        let layout = match structure {
            CsdStructure::V0 => CsdLayout::V0 {
                c_size: raw.get_bits(62..74) as u16,
                vdd_r_curr_min: raw.get_bits(59..62) as u8,
                vdd_r_curr_max: raw.get_bits(56..59) as u8,
                vdd_w_curr_min: raw.get_bits(53..56) as u8,
                vdd_w_curr_max: raw.get_bits(50..53) as u8,
                c_size_mult: raw.get_bits(47..50) as u8,
            },
            CsdStructure::V1 => CsdLayout::V1 {
                c_size: raw.get_bits(48..70) as u32,
            },
        };

        Self {
            taac: raw.get_bits(112..120) as u8,
            nsac: raw.get_bits(104..112) as u8,
            tran_speed: raw.get_bits(96..104) as u8,
            ccc: raw.get_bits(84..96) as u16,
            read_bl_len: raw.get_bits(80..84) as u8,
            read_bl_partial: raw.get_bit(79),
            write_blk_misalign: raw.get_bit(78),
            read_blk_misalign: raw.get_bit(77),
            dsr_imp: raw.get_bit(76),
            layout,
            erase_blk_en: raw.get_bit(46),
            sector_size: raw.get_bits(39..46) as u8,
            wp_grp_size: raw.get_bits(32..39) as u8,
            wp_grp_enable: raw.get_bit(31),
            r2w_factor: raw.get_bits(26..29) as u8,
            write_bl_len: raw.get_bits(22..26) as u8,
            write_bl_partial: raw.get_bit(21),
            file_format_grp: raw.get_bit(15),
            copy: raw.get_bit(14),
            perm_write_protect: raw.get_bit(13),
            tmp_write_protect: raw.get_bit(12),
            file_format: raw.get_bits(10..12) as u8,
            crc: raw.get_bits(1..8) as u8,
        }
    }

    pub fn encode(&self) -> [u32; 4] {
        let mut raw = 0u128;
        raw.set_bits(126..128, self.structure().bits() as u128);
        raw.set_bits(112..120, self.taac as u128);
        raw.set_bits(104..112, self.nsac as u128);
        raw.set_bits(96..104, self.tran_speed as u128);
        raw.set_bits(84..96, (self.ccc & 0xFFF) as u128);
        raw.set_bits(80..84, (self.read_bl_len & 0xF) as u128);
        raw.set_bit(79, self.read_bl_partial);
        raw.set_bit(78, self.write_blk_misalign);
        raw.set_bit(77, self.read_blk_misalign);
        raw.set_bit(76, self.dsr_imp);

        match self.layout {
            CsdLayout::V0 {
                c_size,
                vdd_r_curr_min,
                vdd_r_curr_max,
                vdd_w_curr_min,
                vdd_w_curr_max,
                c_size_mult,
            } => {
                raw.set_bits(62..74, (c_size & 0xFFF) as u128);
                raw.set_bits(59..62, (vdd_r_curr_min & 0x7) as u128);
                raw.set_bits(56..59, (vdd_r_curr_max & 0x7) as u128);
                raw.set_bits(53..56, (vdd_w_curr_min & 0x7) as u128);
                raw.set_bits(50..53, (vdd_w_curr_max & 0x7) as u128);
                raw.set_bits(47..50, (c_size_mult & 0x7) as u128);
            }
            CsdLayout::V1 { c_size } => {
                raw.set_bits(48..70, (c_size & 0x3F_FFFF) as u128);
            }
        }

        raw.set_bit(46, self.erase_blk_en);
        raw.set_bits(39..46, (self.sector_size & 0x7F) as u128);
        raw.set_bits(32..39, (self.wp_grp_size & 0x7F) as u128);
        raw.set_bit(31, self.wp_grp_enable);
        raw.set_bits(26..29, (self.r2w_factor & 0x7) as u128);
        raw.set_bits(22..26, (self.write_bl_len & 0xF) as u128);
        raw.set_bit(21, self.write_bl_partial);
        raw.set_bit(15, self.file_format_grp);
        raw.set_bit(14, self.copy);
        raw.set_bit(13, self.perm_write_protect);
        raw.set_bit(12, self.tmp_write_protect);
        raw.set_bits(10..12, (self.file_format & 0x3) as u128);
        raw.set_bits(1..8, (self.crc & 0x7F) as u128);
        raw.set_bit(0, true);

        u128_to_words(raw)
    }

    pub fn structure(&self) -> CsdStructure {
        match self.layout {
            CsdLayout::V0 { .. } => CsdStructure::V0,
            CsdLayout::V1 { .. } => CsdStructure::V1,
        }
    }

    /// Raw C_SIZE for either layout
    pub fn c_size(&self) -> u32 {
        match self.layout {
            CsdLayout::V0 { c_size, .. } => c_size as u32,
            CsdLayout::V1 { c_size } => c_size,
        }
    }

    /// Card capacity in bytes
    pub fn capacity_bytes(&self) -> u64 {
        match self.layout {
            CsdLayout::V0 {
                c_size,
                c_size_mult,
                ..
            } => (c_size as u64 + 1) << (c_size_mult as u32 + 2 + self.read_bl_len as u32),
            CsdLayout::V1 { c_size } => (c_size as u64 + 1) * 512 * 1024,
        }
    }

    /// Card capacity in 512 byte blocks
    pub fn capacity_blocks(&self) -> u32 {
        (self.capacity_bytes() / BLOCK_LEN as u64) as u32
    }

    /// Fastest clock the card allows, from TRAN_SPEED. `None` for reserved
    /// encodings.
    pub fn max_transfer_rate(&self) -> Option<fugit::HertzU32> {
        let unit = *TRAN_UNITS.get(self.tran_speed.get_bits(0..3) as usize)?;
        let multiplier = TRAN_MULTIPLIERS[self.tran_speed.get_bits(3..7) as usize];

        match multiplier {
            0 => None,
            multiplier => Some(fugit::HertzU32::from_raw(unit * multiplier * 1_000)),
        }
    }
}

/// Response to CMD3: the published RCA and a subset of the card status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rca {
    pub address: u16,
    /// Card status bits 23, 22, 19 and 12:0 squeezed into 16 bits
    pub status: u16,
}

impl Rca {
    pub fn decode(raw: u32) -> Self {
        Self {
            address: raw.get_bits(16..32) as u16,
            status: raw.get_bits(0..16) as u16,
        }
    }

    pub fn encode(&self) -> u32 {
        (self.address as u32) << 16 | self.status as u32
    }

    /// Argument for commands addressed to this card
    #[inline]
    pub fn argument(&self) -> u32 {
        (self.address as u32) << 16
    }

    /// The address an addressed command argument refers to
    #[inline]
    pub fn from_argument(arg: u32) -> Self {
        Self {
            address: arg.get_bits(16..32) as u16,
            status: 0,
        }
    }

    /// Expand the packed status bits to their card status positions
    pub fn card_status(&self) -> CardStatus {
        let mut status = 0u32;
        status.set_bit(23, self.status.get_bit(15));
        status.set_bit(22, self.status.get_bit(14));
        status.set_bit(19, self.status.get_bit(13));
        status.set_bits(0..13, self.status.get_bits(0..13) as u32);
        CardStatus(status)
    }

    /// Fails on COM_CRC_ERROR, ILLEGAL_COMMAND or ERROR
    pub fn check(&self) -> Result<(), SdioError> {
        let status = self.card_status();

        if status.com_crc_error() {
            return Err(SdioError::ComCrcError {});
        }

        if status.illegal_command() {
            return Err(SdioError::IllegalCommand {});
        }

        if status.error() {
            return Err(SdioError::GenericError {});
        }

        Ok(())
    }
}

/// Card status, carried by every R1 response
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CardStatus(pub u32);

impl CardStatus {
    /// Bits that report an error
    pub const ERROR_MASK: u32 = 0b1111_1101_1111_1001__1000_0000_0000_1000;

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Gets the current state of the card
    pub fn current_state(&self) -> CurrentState {
        CurrentState::from_bits(self.0.get_bits(9..13) as u8)
    }

    /// Fails with the most severe error bit that is set
    pub fn first_error(&self) -> Result<(), SdioError> {
        if self.0 & Self::ERROR_MASK == 0 {
            return Ok(());
        }

        let checks: [(bool, SdioError); 16] = [
            (self.cc_error(), SdioError::CcError {}),
            (self.com_crc_error(), SdioError::ComCrcError {}),
            (self.illegal_command(), SdioError::IllegalCommand {}),
            (self.card_ecc_failed(), SdioError::CardEccFailed {}),
            (self.out_of_range(), SdioError::OutOfRange {}),
            (self.address_error(), SdioError::AddressError {}),
            (self.block_len_error(), SdioError::BlockLenError {}),
            (self.erase_seq_error(), SdioError::EraseSeqError {}),
            (self.erase_param(), SdioError::EraseParamError {}),
            (self.wp_violation(), SdioError::WpViolation {}),
            (self.lock_unlock_failed(), SdioError::LockUnlockFailed {}),
            (self.csd_overwrite(), SdioError::CsdOverwrite {}),
            (self.wp_erase_skip(), SdioError::WpEraseSkip {}),
            (self.ake_seq_error(), SdioError::AkeSeqError {}),
            (self.error(), SdioError::GenericError {}),
            (true, SdioError::GenericError {}),
        ];

        match checks.into_iter().find(|(set, _)| *set) {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn out_of_range(&self) -> bool {
        self.0.get_bit(31)
    }
    #[inline]
    pub fn address_error(&self) -> bool {
        self.0.get_bit(30)
    }
    #[inline]
    pub fn block_len_error(&self) -> bool {
        self.0.get_bit(29)
    }
    #[inline]
    pub fn erase_seq_error(&self) -> bool {
        self.0.get_bit(28)
    }
    #[inline]
    pub fn erase_param(&self) -> bool {
        self.0.get_bit(27)
    }
    #[inline]
    pub fn wp_violation(&self) -> bool {
        self.0.get_bit(26)
    }
    #[inline]
    pub fn card_is_locked(&self) -> bool {
        self.0.get_bit(25)
    }
    #[inline]
    pub fn lock_unlock_failed(&self) -> bool {
        self.0.get_bit(24)
    }
    #[inline]
    pub fn com_crc_error(&self) -> bool {
        self.0.get_bit(23)
    }
    #[inline]
    pub fn illegal_command(&self) -> bool {
        self.0.get_bit(22)
    }
    #[inline]
    pub fn card_ecc_failed(&self) -> bool {
        self.0.get_bit(21)
    }
    #[inline]
    pub fn cc_error(&self) -> bool {
        self.0.get_bit(20)
    }
    /// Generic ERROR bit
    #[inline]
    pub fn error(&self) -> bool {
        self.0.get_bit(19)
    }
    #[inline]
    pub fn csd_overwrite(&self) -> bool {
        self.0.get_bit(16)
    }
    #[inline]
    pub fn wp_erase_skip(&self) -> bool {
        self.0.get_bit(15)
    }
    #[inline]
    pub fn card_ecc_disabled(&self) -> bool {
        self.0.get_bit(14)
    }
    #[inline]
    pub fn erase_reset(&self) -> bool {
        self.0.get_bit(13)
    }
    #[inline]
    pub fn ready_for_data(&self) -> bool {
        self.0.get_bit(8)
    }
    #[inline]
    pub fn fx_event(&self) -> bool {
        self.0.get_bit(6)
    }
    #[inline]
    pub fn app_cmd(&self) -> bool {
        self.0.get_bit(5)
    }
    #[inline]
    pub fn ake_seq_error(&self) -> bool {
        self.0.get_bit(3)
    }
}

/// CURRENT_STATE field of the card status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurrentState {
    Idle,
    Ready,
    Ident,
    Stby,
    Tran,
    Data,
    Rcv,
    Prg,
    Dis,
    Reserved(u8),
}

impl CurrentState {
    /// Grabs the state from a nibble
    pub fn from_bits(nibble: u8) -> Self {
        match nibble {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::Ident,
            3 => Self::Stby,
            4 => Self::Tran,
            5 => Self::Data,
            6 => Self::Rcv,
            7 => Self::Prg,
            8 => Self::Dis,
            n => Self::Reserved(n & 0xF),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Ready => 1,
            Self::Ident => 2,
            Self::Stby => 3,
            Self::Tran => 4,
            Self::Data => 5,
            Self::Rcv => 6,
            Self::Prg => 7,
            Self::Dis => 8,
            Self::Reserved(n) => n,
        }
    }
}

/// Physical layer specification version reported in the SCR
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdSpec {
    V1_0,
    V1_10,
    V2_00,
    V3_0x,
    V4_xx,
    /// 5.xx and later, holds the major version
    Vx(u8),
    Unknown,
}

/// SD configuration register, fetched with ACMD51
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Scr {
    pub structure: u8,
    pub sd_spec: u8,
    pub data_stat_after_erase: bool,
    pub security: u8,
    pub bus_widths: u8,
    pub spec3: bool,
    pub ex_security: u8,
    pub spec4: bool,
    pub specx: u8,
    pub cmd_support: u8,
}

impl Scr {
    /// Decode from the 8 bytes in the order they came off the bus
    pub fn decode(bytes: &[u8; 8]) -> Self {
        let raw = u64::from_be_bytes(*bytes);

        Self {
            structure: raw.get_bits(60..64) as u8,
            sd_spec: raw.get_bits(56..60) as u8,
            data_stat_after_erase: raw.get_bit(55),
            security: raw.get_bits(52..55) as u8,
            bus_widths: raw.get_bits(48..52) as u8,
            spec3: raw.get_bit(47),
            ex_security: raw.get_bits(43..47) as u8,
            spec4: raw.get_bit(42),
            specx: raw.get_bits(38..42) as u8,
            cmd_support: raw.get_bits(32..36) as u8,
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut raw = 0u64;
        raw.set_bits(60..64, (self.structure & 0xF) as u64);
        raw.set_bits(56..60, (self.sd_spec & 0xF) as u64);
        raw.set_bit(55, self.data_stat_after_erase);
        raw.set_bits(52..55, (self.security & 0x7) as u64);
        raw.set_bits(48..52, (self.bus_widths & 0xF) as u64);
        raw.set_bit(47, self.spec3);
        raw.set_bits(43..47, (self.ex_security & 0xF) as u64);
        raw.set_bit(42, self.spec4);
        raw.set_bits(38..42, (self.specx & 0xF) as u64);
        raw.set_bits(32..36, (self.cmd_support & 0xF) as u64);
        raw.to_be_bytes()
    }

    #[inline]
    pub fn supports_1bit(&self) -> bool {
        self.bus_widths.get_bit(0)
    }

    #[inline]
    pub fn supports_4bit(&self) -> bool {
        self.bus_widths.get_bit(2)
    }

    /// CMD23 support
    #[inline]
    pub fn supports_set_block_count(&self) -> bool {
        self.cmd_support.get_bit(1)
    }

    pub fn spec_version(&self) -> SdSpec {
        match (self.sd_spec, self.spec3, self.spec4, self.specx) {
            (0, false, false, 0) => SdSpec::V1_0,
            (1, false, false, 0) => SdSpec::V1_10,
            (2, false, false, 0) => SdSpec::V2_00,
            (2, true, false, 0) => SdSpec::V3_0x,
            (2, true, true, 0) => SdSpec::V4_xx,
            (2, true, _, x) if x > 0 => SdSpec::Vx(x + 4),
            _ => SdSpec::Unknown,
        }
    }
}

/// SPEED_CLASS field of the SD status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedClass {
    Class0,
    Class2,
    Class4,
    Class6,
    Class10,
    Reserved(u8),
}

impl SpeedClass {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Class0,
            1 => Self::Class2,
            2 => Self::Class4,
            3 => Self::Class6,
            4 => Self::Class10,
            n => Self::Reserved(n),
        }
    }

    /// Minimum sequential write speed in MB/s
    pub fn mb_per_sec(self) -> Option<u8> {
        match self {
            Self::Class0 => Some(0),
            Self::Class2 => Some(2),
            Self::Class4 => Some(4),
            Self::Class6 => Some(6),
            Self::Class10 => Some(10),
            Self::Reserved(_) => None,
        }
    }
}

/// AU_SIZE encodings in KiB
const AU_SIZES_KIB: [u32; 16] = [
    0, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 12288, 16384, 24576, 32768, 65536,
];

/// SD status register, fetched with ACMD13. Only the first 128 bits carry
/// fields; the rest is reserved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ssr {
    pub bus_width: u8,
    pub secured_mode: bool,
    pub card_type: u16,
    pub protected_area: u32,
    pub speed_class: u8,
    pub performance_move: u8,
    pub au_size: u8,
    pub erase_size: u16,
    pub erase_timeout: u8,
    pub erase_offset: u8,
    pub uhs_speed_grade: u8,
    pub uhs_au_size: u8,
    pub video_speed_class: u8,
}

impl Ssr {
    /// Decode from the 64 bytes in the order they came off the bus
    pub fn decode(bytes: &[u8; 64]) -> Self {
        let mut head = [0u8; 16];
        head.copy_from_slice(&bytes[..16]);
        // Bit 511 of the register is bit 127 here
        let raw = u128::from_be_bytes(head);

        Self {
            bus_width: raw.get_bits(126..128) as u8,
            secured_mode: raw.get_bit(125),
            card_type: raw.get_bits(96..112) as u16,
            protected_area: raw.get_bits(64..96) as u32,
            speed_class: raw.get_bits(56..64) as u8,
            performance_move: raw.get_bits(48..56) as u8,
            au_size: raw.get_bits(44..48) as u8,
            erase_size: raw.get_bits(24..40) as u16,
            erase_timeout: raw.get_bits(18..24) as u8,
            erase_offset: raw.get_bits(16..18) as u8,
            uhs_speed_grade: raw.get_bits(12..16) as u8,
            uhs_au_size: raw.get_bits(8..12) as u8,
            video_speed_class: raw.get_bits(0..8) as u8,
        }
    }

    pub fn encode(&self) -> [u8; 64] {
        let mut raw = 0u128;
        raw.set_bits(126..128, (self.bus_width & 0x3) as u128);
        raw.set_bit(125, self.secured_mode);
        raw.set_bits(96..112, self.card_type as u128);
        raw.set_bits(64..96, self.protected_area as u128);
        raw.set_bits(56..64, self.speed_class as u128);
        raw.set_bits(48..56, self.performance_move as u128);
        raw.set_bits(44..48, (self.au_size & 0xF) as u128);
        raw.set_bits(24..40, self.erase_size as u128);
        raw.set_bits(18..24, (self.erase_timeout & 0x3F) as u128);
        raw.set_bits(16..18, (self.erase_offset & 0x3) as u128);
        raw.set_bits(12..16, (self.uhs_speed_grade & 0xF) as u128);
        raw.set_bits(8..12, (self.uhs_au_size & 0xF) as u128);
        raw.set_bits(0..8, self.video_speed_class as u128);

        let mut bytes = [0u8; 64];
        bytes[..16].copy_from_slice(&raw.to_be_bytes());
        bytes
    }

    pub fn speed_class(&self) -> SpeedClass {
        SpeedClass::from_bits(self.speed_class)
    }

    /// Allocation unit size in bytes, `None` when undefined
    pub fn au_size_bytes(&self) -> Option<u32> {
        match AU_SIZES_KIB[self.au_size as usize & 0xF] {
            0 => None,
            kib => Some(kib * 1024),
        }
    }

    /// Bus width the card is currently in
    pub fn is_4bit(&self) -> bool {
        self.bus_width == 0b10
    }
}

/// CMD8 argument and R7 response
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IfCond {
    /// Supply voltage, [`IF_COND_2V7_3V6`] is the only defined value
    pub voltage: u8,
    pub pattern: u8,
    pub pcie: bool,
    pub pcie_1v2: bool,
}

impl IfCond {
    pub fn new(pattern: u8) -> Self {
        Self {
            voltage: IF_COND_2V7_3V6,
            pattern,
            pcie: false,
            pcie_1v2: false,
        }
    }

    pub fn decode(raw: u32) -> Self {
        Self {
            voltage: raw.get_bits(8..12) as u8,
            pattern: raw.get_bits(0..8) as u8,
            pcie: raw.get_bit(12),
            pcie_1v2: raw.get_bit(13),
        }
    }

    pub fn encode(&self) -> u32 {
        let mut raw = 0u32;
        raw.set_bit(13, self.pcie_1v2);
        raw.set_bit(12, self.pcie);
        raw.set_bits(8..12, (self.voltage & 0xF) as u32);
        raw.set_bits(0..8, self.pattern as u32);
        raw
    }

    /// Check that `echo` repeats this request's voltage and pattern
    pub fn verify_echo(&self, echo: &IfCond) -> Result<(), SdioError> {
        if echo.voltage != self.voltage {
            return Err(SdioError::BadVoltage {
                bad_volt: echo.voltage,
            });
        }

        if echo.pattern != self.pattern {
            return Err(SdioError::BadCheck {
                good_check: self.pattern,
                bad_check: echo.pattern,
            });
        }

        Ok(())
    }
}
