//! Errors raised by the SDIO card driver

use embedded_io::{blocking::ReadExactError, Error, ErrorKind};
use snafu::prelude::*;

use crate::session::SessionState;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SdioError {
    // Command path
    #[snafu(display("(SDIO) Timeout on CMD{cmd}!"))]
    CmdTimeout { cmd: u8 },
    #[snafu(display("(SDIO) Bad response CRC on CMD{cmd}!"))]
    CmdCrcFail { cmd: u8 },
    #[snafu(display("(SDIO) Response to CMD{bad_cmd} while CMD{good_cmd} was sent!"))]
    WrongCmd { good_cmd: u8, bad_cmd: u8 },
    #[snafu(display("(SDIO) CMD{cmd} never reached a terminal status!"))]
    CmdDeadline { cmd: u8 },

    // Data path
    #[snafu(display("(SDIO) Bad data CRC!"))]
    DataCrcFail {},
    #[snafu(display("(SDIO) Data timeout!"))]
    DataTimeout {},
    #[snafu(display("(SDIO) Start bit not detected on all data lines!"))]
    StartBitError {},
    #[snafu(display("(SDIO) Receive FIFO overrun!"))]
    RxOverrun {},
    #[snafu(display("(SDIO) Transmit FIFO underrun!"))]
    TxUnderrun {},
    #[snafu(display("(SDIO) Data transfer never reached a terminal status!"))]
    DataDeadline {},
    #[snafu(display("(SDIO) DMA transfer did not complete!"))]
    DmaFailed {},

    // Card status bits
    #[snafu(display("(SDIO) Out of range!"))]
    OutOfRange {},
    #[snafu(display("(SDIO) Misaligned address!"))]
    AddressError {},
    #[snafu(display("(SDIO) Block length incorrect!"))]
    BlockLenError {},
    #[snafu(display("(SDIO) Erase sequence error!"))]
    EraseSeqError {},
    #[snafu(display("(SDIO) Erase parameters error!"))]
    EraseParamError {},
    #[snafu(display("(SDIO) Write protection violation!"))]
    WpViolation {},
    #[snafu(display("(SDIO) Card is locked!"))]
    CardIsLocked {},
    #[snafu(display("(SDIO) Failed to lock/unlock card!"))]
    LockUnlockFailed {},
    #[snafu(display("(SDIO) Card saw a bad command CRC!"))]
    ComCrcError {},
    #[snafu(display("(SDIO) Illegal Command!"))]
    IllegalCommand {},
    #[snafu(display("(SDIO) Card ECC failed!"))]
    CardEccFailed {},
    #[snafu(display("(SDIO) CC Error!"))]
    CcError {},
    #[snafu(display("(SDIO) General card error!"))]
    GenericError {},
    #[snafu(display("(SDIO) CSD overwrite error!"))]
    CsdOverwrite {},
    #[snafu(display("(SDIO) Wp erase skip!"))]
    WpEraseSkip {},
    #[snafu(display("(SDIO) Authentication error!"))]
    AkeSeqError {},

    // Negotiation and identification
    #[snafu(display("(SDIO) Bad CMD8 check pattern {bad_check:#04x}, sent {good_check:#04x}!"))]
    BadCheck { good_check: u8, bad_check: u8 },
    #[snafu(display("(SDIO) Bad CMD8 voltage {bad_volt:#x}!"))]
    BadVoltage { bad_volt: u8 },
    #[snafu(display("(SDIO) Bad OCR voltage range {range:#08x}!"))]
    BadVoltRange { range: u32 },
    #[snafu(display("(SDIO) Card stayed busy through ACMD41!"))]
    OpCondTimeout {},
    #[snafu(display("(SDIO) Card did not change its RCA from {rca:#06x}!"))]
    RcaUnchanged { rca: u16 },
    #[snafu(display("(SDIO) Card does not support that bus width!"))]
    UnsupportedBusWidth {},
    #[snafu(display("(SDIO) Unsupported CSD structure {structure}!"))]
    UnsupportedCsd { structure: u8 },
    #[snafu(display("(SDIO) Unexpected response to CMD{cmd}!"))]
    UnexpectedResponse { cmd: u8 },
    #[snafu(display("(SDIO) No card in the slot!"))]
    NoCard {},
    #[snafu(display("(SDIO) Power register never latched!"))]
    PowerOnFailed {},
    #[snafu(display("(SDIO) Bus is busy!"))]
    BusBusy {},
    #[snafu(display("(SDIO) Card stayed busy programming!"))]
    ProgrammingTimeout {},

    // Session
    #[snafu(display("(SDIO) Operation not allowed in state {state:?}!"))]
    NotReady { state: SessionState },
    #[snafu(display("(SDIO) CMD{cmd} changes card state, use the session call!"))]
    SessionCommand { cmd: u8 },
    #[snafu(display("(SDIO) Session is disconnected, call end() then begin()!"))]
    Disconnected {},

    // Byte stream
    #[snafu(display("(IO) Unexpected EOF!"))]
    IoUnexpectedEof {},
    #[snafu(display("(IO) Seek outside of the card!"))]
    SeekOutOfRange {},
}

impl SdioError {
    /// True for errors raised by the data path state machine
    pub fn is_data_path(&self) -> bool {
        matches!(
            self,
            Self::DataCrcFail {}
                | Self::DataTimeout {}
                | Self::StartBitError {}
                | Self::RxOverrun {}
                | Self::TxUnderrun {}
                | Self::DataDeadline {}
                | Self::DmaFailed {}
        )
    }
}

impl Error for SdioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<SdioError> for ReadExactError<SdioError> {
    fn from(e: SdioError) -> ReadExactError<SdioError> {
        Self::Other(e)
    }
}

impl From<ReadExactError<SdioError>> for SdioError {
    fn from(e: ReadExactError<SdioError>) -> SdioError {
        match e {
            ReadExactError::UnexpectedEof => Self::IoUnexpectedEof {},
            ReadExactError::Other(e) => e,
        }
    }
}
