//! SD commands and their responses

use crate::errors::SdioError;
use crate::host::BusWidth;
use crate::registers::{CardStatus, IfCond, Ocr, Rca};
use crate::sdio_regs::cmd;

/// Possible response types for SD commands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseType {
    /// No response
    R0,
    /// Normal response
    R1,
    /// Normal response with busy on DAT0
    R1b,
    /// CID/CSD register
    R2,
    /// OCR register, no CRC
    R3,
    /// Published RCA
    R6,
    /// Card interface condition
    R7,
}

/// How much of a response the controller collects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseWidth {
    None,
    /// 48 bit frame, 32 bit payload
    Short,
    /// 136 bit frame, 128 bit payload
    Long,
}

impl ResponseType {
    pub fn width(self) -> ResponseWidth {
        match self {
            Self::R0 => ResponseWidth::None,
            Self::R2 => ResponseWidth::Long,
            Self::R1 | Self::R1b | Self::R3 | Self::R6 | Self::R7 => ResponseWidth::Short,
        }
    }

    /// Length of the response on the CMD line in bits
    pub fn len_bits(self) -> u8 {
        match self.width() {
            ResponseWidth::None => 0,
            ResponseWidth::Short => 48,
            ResponseWidth::Long => 136,
        }
    }

    /// False for responses whose frame has no CRC field
    pub fn has_crc(self) -> bool {
        !matches!(self, Self::R0 | Self::R3)
    }

    /// WAITRESP encoding for the CMD register
    pub fn waitresp(self) -> u32 {
        match self.width() {
            ResponseWidth::None => cmd::WAITRESP_NONE,
            ResponseWidth::Short => cmd::WAITRESP_SHORT,
            ResponseWidth::Long => cmd::WAITRESP_LONG,
        }
    }
}

/// Commands the driver can issue. ACMDs are sent after a CMD55 by the card
/// session, never on their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCmd {
    /// CMD0: GO_IDLE_STATE, R0
    GoIdleState,
    /// CMD2: ALL_SEND_CID, requests all SD cards send their CIDs. R2.
    AllSendCid,
    /// CMD3: SEND_RELATIVE_ADDR, asks the card to publish a new RCA. R6.
    SendRelativeAddr,
    /// CMD7: SELECT_DESELECT_CARD with the card's RCA. R1b.
    SelectCard(u16),
    /// CMD7 with RCA 0, deselects every card. No response.
    DeselectAll,
    /// CMD8: SEND_IF_COND, supply voltage and check pattern. R7.
    SendIfCond(IfCond),
    /// CMD9: SEND_CSD, supply the RCA. R2.
    SendCsd(u16),
    /// CMD10: SEND_CID, supply the RCA. R2.
    SendCid(u16),
    /// CMD12: STOP_TRANSMISSION, R1b.
    StopTransmission,
    /// CMD13: SEND_STATUS, supply the RCA. R1.
    SendStatus(u16),
    /// CMD16: SET_BLOCKLEN, only meaningful for standard capacity. R1.
    SetBlockLen(u32),
    /// CMD17: READ_SINGLE_BLOCK, supply the data address. R1.
    ReadSingleBlock(u32),
    /// CMD18: READ_MULTIPLE_BLOCK, supply the data address. R1.
    ReadMultipleBlock(u32),
    /// CMD24: WRITE_BLOCK, supply the data address. R1.
    WriteBlock(u32),
    /// CMD25: WRITE_MULTIPLE_BLOCK, supply the data address. R1.
    WriteMultipleBlock(u32),
    /// CMD55: APP_CMD, supply the RCA. R1.
    AppCmd(u16),
    /// ACMD6: SET_BUS_WIDTH. R1.
    SetBusWidth(BusWidth),
    /// ACMD13: SD_STATUS, 64 byte data block. R1.
    SdStatus,
    /// ACMD41: SD_SEND_OP_COND. R3.
    SdSendOpCond {
        /// Host capacity support
        hcs: bool,
        /// Maximum performance instead of power saving
        xpc: bool,
        /// Request switching to 1.8V
        s18r: bool,
        /// OCR voltage window, bits 23:0
        window: u32,
    },
    /// ACMD42: SET_CLR_CARD_DETECT, true connects the DAT3 pull-up. R1.
    SetClrCardDetect(bool),
    /// ACMD51: SEND_SCR, 8 byte data block. R1.
    SendScr,
    /// Vendor specific command. The transport does not report CRC failures
    /// for these.
    Vendor {
        index: u8,
        arg: u32,
        response: ResponseType,
        app: bool,
    },
}

impl SdCmd {
    /// Get the index of a command
    pub fn index(&self) -> u8 {
        match self {
            Self::GoIdleState => 0,
            Self::AllSendCid => 2,
            Self::SendRelativeAddr => 3,
            Self::SetBusWidth(_) => 6,
            Self::SelectCard(_) | Self::DeselectAll => 7,
            Self::SendIfCond(_) => 8,
            Self::SendCsd(_) => 9,
            Self::SendCid(_) => 10,
            Self::StopTransmission => 12,
            Self::SendStatus(_) | Self::SdStatus => 13,
            Self::SetBlockLen(_) => 16,
            Self::ReadSingleBlock(_) => 17,
            Self::ReadMultipleBlock(_) => 18,
            Self::WriteBlock(_) => 24,
            Self::WriteMultipleBlock(_) => 25,
            Self::SdSendOpCond { .. } => 41,
            Self::SetClrCardDetect(_) => 42,
            Self::SendScr => 51,
            Self::AppCmd(_) => 55,
            Self::Vendor { index, .. } => index & cmd::CMDINDEX_MASK as u8,
        }
    }

    /// Get the response type of a command
    pub fn response(&self) -> ResponseType {
        match self {
            Self::GoIdleState | Self::DeselectAll => ResponseType::R0,
            Self::AllSendCid | Self::SendCsd(_) | Self::SendCid(_) => ResponseType::R2,
            Self::SendRelativeAddr => ResponseType::R6,
            Self::SelectCard(_) | Self::StopTransmission => ResponseType::R1b,
            Self::SendIfCond(_) => ResponseType::R7,
            Self::SdSendOpCond { .. } => ResponseType::R3,
            Self::SendStatus(_)
            | Self::SetBlockLen(_)
            | Self::ReadSingleBlock(_)
            | Self::ReadMultipleBlock(_)
            | Self::WriteBlock(_)
            | Self::WriteMultipleBlock(_)
            | Self::AppCmd(_)
            | Self::SetBusWidth(_)
            | Self::SdStatus
            | Self::SetClrCardDetect(_)
            | Self::SendScr => ResponseType::R1,
            Self::Vendor { response, .. } => *response,
        }
    }

    /// Returns true if a command must be preceded by CMD55
    pub fn is_acmd(&self) -> bool {
        match self {
            Self::SetBusWidth(_)
            | Self::SdStatus
            | Self::SdSendOpCond { .. }
            | Self::SetClrCardDetect(_)
            | Self::SendScr => true,
            Self::Vendor { app, .. } => *app,
            _ => false,
        }
    }

    /// True for commands that move the card to another state or start a
    /// data phase. The session issues these itself so that its state
    /// follows the card.
    pub fn changes_card_state(&self) -> bool {
        matches!(
            self,
            Self::GoIdleState
                | Self::AllSendCid
                | Self::SendRelativeAddr
                | Self::SelectCard(_)
                | Self::DeselectAll
                | Self::ReadSingleBlock(_)
                | Self::ReadMultipleBlock(_)
                | Self::WriteBlock(_)
                | Self::WriteMultipleBlock(_)
                | Self::SetBusWidth(_)
                | Self::SdStatus
                | Self::SdSendOpCond { .. }
                | Self::SendScr
        )
    }

    /// 32 bit command argument
    pub fn argument(&self) -> u32 {
        match self {
            Self::SetBlockLen(arg)
            | Self::ReadSingleBlock(arg)
            | Self::ReadMultipleBlock(arg)
            | Self::WriteBlock(arg)
            | Self::WriteMultipleBlock(arg) => *arg,
            Self::GoIdleState
            | Self::AllSendCid
            | Self::SendRelativeAddr
            | Self::DeselectAll
            | Self::StopTransmission
            | Self::SdStatus
            | Self::SendScr => 0,
            // RCA in 31:16, stuff bits below
            Self::SelectCard(rca)
            | Self::SendCsd(rca)
            | Self::SendCid(rca)
            | Self::SendStatus(rca)
            | Self::AppCmd(rca) => Rca {
                address: *rca,
                status: 0,
            }
            .argument(),
            Self::SendIfCond(if_cond) => if_cond.encode(),
            Self::SetBusWidth(width) => width.acmd6_argument(),
            Self::SdSendOpCond {
                hcs,
                xpc,
                s18r,
                window,
            } => {
                let mut arg = window & 0xFF_FFFF;
                if *hcs {
                    arg |= 1 << 30;
                }
                if *xpc {
                    arg |= 1 << 28;
                }
                if *s18r {
                    arg |= 1 << 24;
                }
                arg
            }
            Self::SetClrCardDetect(connect) => *connect as u32,
            Self::Vendor { arg, .. } => *arg,
        }
    }

    /// True when a CRC failure on the response is expected and carries no
    /// meaning
    pub fn crc_exempt(&self) -> bool {
        matches!(self, Self::SdSendOpCond { .. } | Self::Vendor { .. })
    }

    /// True when RESPCMD holds the 0x3F sentinel instead of the command
    /// index, because the response frame has no index field
    pub fn reports_sentinel_index(&self) -> bool {
        match self {
            Self::AllSendCid | Self::SendCsd(_) | Self::SendCid(_) | Self::SdSendOpCond { .. } => {
                true
            }
            Self::Vendor { response, .. } => matches!(response, ResponseType::R2 | ResponseType::R3),
            _ => false,
        }
    }

    /// True for commands that start a data transfer
    pub fn has_data(&self) -> bool {
        matches!(
            self,
            Self::ReadSingleBlock(_)
                | Self::ReadMultipleBlock(_)
                | Self::WriteBlock(_)
                | Self::WriteMultipleBlock(_)
                | Self::SdStatus
                | Self::SendScr
        )
    }

    /// CMD register value, CPSMEN included
    pub fn command_word(&self) -> u32 {
        cmd::make(self.index(), self.response().waitresp())
    }
}

/// Response payload as read from RESP1..RESP4
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawResponse {
    /// Command sent, no response expected
    None,
    Short(u32),
    /// Most significant word first
    Long([u32; 4]),
}

/// Typed response to a command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCmdResponse {
    /// Returns nothing
    R0,
    /// Returns the card status
    R1(CardStatus),
    /// Identical to R1
    R1b(CardStatus),
    /// Returns cid or csd
    R2([u32; 4]),
    /// Returns OCR register
    R3(Ocr),
    /// Returns RCA
    R6(Rca),
    /// Returns the interface condition echo
    R7(IfCond),
}

impl SdCmdResponse {
    /// Interpret `raw` as the response to `command`
    pub fn decode(command: &SdCmd, raw: RawResponse) -> Result<Self, SdioError> {
        let response = match (command.response(), raw) {
            (ResponseType::R0, RawResponse::None) => Self::R0,
            (ResponseType::R1, RawResponse::Short(word)) => Self::R1(CardStatus(word)),
            (ResponseType::R1b, RawResponse::Short(word)) => Self::R1b(CardStatus(word)),
            (ResponseType::R2, RawResponse::Long(words)) => Self::R2(words),
            (ResponseType::R3, RawResponse::Short(word)) => Self::R3(Ocr::decode(word)),
            (ResponseType::R6, RawResponse::Short(word)) => Self::R6(Rca::decode(word)),
            (ResponseType::R7, RawResponse::Short(word)) => Self::R7(IfCond::decode(word)),
            _ => {
                return Err(SdioError::UnexpectedResponse {
                    cmd: command.index(),
                });
            }
        };

        Ok(response)
    }

    /// Card status for R1 and R1b responses
    pub fn card_status(&self) -> Option<CardStatus> {
        match self {
            Self::R1(status) | Self::R1b(status) => Some(*status),
            _ => None,
        }
    }
}
