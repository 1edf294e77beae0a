use crate::resolver::Discovery;

pub use visa_sys::{ResourceManager, VisaError, VisaLibrary, VisaResult};
use visa_sys::Instrument as SysInstrument;

pub mod asynced;
mod visa_sys;

const DEFAULT_TIMEOUT: f32 = 3.0;

/// Class filter passed to resource enumeration: any instrument, on any bus.
pub const INSTRUMENT_FILTER: &str = "?*INSTR";

const IDENTITY_QUERY: &str = "*IDN?\n";
const IDENTITY_MAX_LEN: usize = 256;

#[derive(Clone, Debug)]
pub enum VisaRequest {
    Write(Vec<u8>),
    Read(usize),
}

#[derive(Clone, Debug)]
pub enum VisaReply {
    Written,
    Bytes(Vec<u8>),
}

pub struct Instrument {
    instr: SysInstrument,
}

impl Instrument {
    pub fn open(rm: &ResourceManager, addr: &str) -> VisaResult<Self> {
        Ok(Self {
            instr: rm.open_session(addr, Some(DEFAULT_TIMEOUT))?,
        })
    }

    pub fn write(&self, data: &[u8]) -> VisaResult<()> {
        self.instr.write(data).map(|_| ())
    }

    pub fn read(&self, max_len: usize) -> VisaResult<Vec<u8>> {
        self.instr.read(max_len)
    }

    /// Write `msg` and read back at most `max_len` bytes as text, with
    /// trailing whitespace trimmed.
    pub fn query_string(&self, msg: &str, max_len: usize) -> VisaResult<String> {
        self.instr.write(msg.as_bytes())?;
        let data = self.instr.read(max_len)?;
        Ok(String::from_utf8_lossy(&data).trim_end().to_string())
    }

    pub fn addr(&self) -> &str {
        self.instr.addr()
    }

    pub fn handle(&self, request: VisaRequest) -> VisaResult<VisaReply> {
        match request {
            VisaRequest::Write(data) => {
                self.write(&data)?;
                Ok(VisaReply::Written)
            }
            VisaRequest::Read(max_len) => self.read(max_len).map(VisaReply::Bytes),
        }
    }
}

impl Discovery for ResourceManager {
    fn enumerate(&self) -> VisaResult<Vec<String>> {
        self.find_resources(INSTRUMENT_FILTER)
    }

    fn identify(&self, descriptor: &str) -> VisaResult<String> {
        // Transient session, separate from the long-lived one. Closed on drop.
        let instr = Instrument::open(self, descriptor)?;
        instr.query_string(IDENTITY_QUERY, IDENTITY_MAX_LEN)
    }
}
