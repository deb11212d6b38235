//! Decoding of the crash dump left behind by the installed handlers.

use scroll::Cread;
use static_assertions::const_assert_eq;
use thiserror::Error;

use crate::arm;

/// The two words marking a dump record as present and unconsumed.
pub const DUMP_MAGIC: [u32; 2] = [0xDEAD_C0DE, 0xDEAD_CAFE];

/// Wire size of [`DumpHeader`] in bytes.
pub const DUMP_HEADER_SIZE: usize = 40;

/// Number of captured registers.
pub const REGISTER_COUNT: usize = 18;

/// Display names of the captured registers, by dump index.
pub const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12", "SP", "LR",
    "PC", "CPSR", "FPEXC",
];

const_assert_eq!(REGISTER_NAMES.len(), REGISTER_COUNT);

const SP_INDEX: usize = 13;
const CPSR_INDEX: usize = 16;

/// Thumb state bit of the CPSR.
const CPSR_THUMB_BIT: u32 = 0x20;
/// Low nibble of the CPSR mode field, as captured by the handlers.
const CPSR_MODE_NIBBLE: u32 = 0xF;
const ABORT_MODE_NIBBLE: u32 = 7;
const UNDEFINED_MODE_NIBBLE: u32 = 11;

/// Fixed-layout record descriptor at the head of a dump region.
///
/// Ten little-endian words; see [`DUMP_HEADER_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpHeader {
    /// Magic words; [`DUMP_MAGIC`] when a dump is present.
    pub magic: [u32; 2],
    /// Faulting processor, 9 or 11.
    pub processor: u32,
    /// Faulting core index. Secondary processor only.
    pub core: u32,
    /// Raw fault category code, see [`ExceptionType`].
    pub kind: u32,
    /// Whole record size in bytes, header included.
    pub total_size: u32,
    /// Register section size in bytes.
    pub register_dump_size: u32,
    /// Code section size in bytes.
    pub code_dump_size: u32,
    /// Stack section size in bytes.
    pub stack_dump_size: u32,
    /// Additional-data section size in bytes.
    pub additional_data_size: u32,
}

/// A dump record that cannot be decoded safely.
#[derive(Error, Debug)]
pub enum DumpError {
    /// The record claims more bytes than are available.
    #[error("dump record declares {expected} bytes but only {available} are available")]
    Truncated { expected: usize, available: usize },
    /// Header size fields do not add up to the declared total.
    #[error("dump sections sum to {sections} bytes but the header declares {declared}")]
    SectionSizeMismatch { declared: usize, sections: usize },
    /// The register section cannot hold the 18 captured registers.
    #[error("register section of {size} bytes cannot hold the {REGISTER_COUNT} captured registers")]
    RegisterSectionTooSmall { size: usize },
}

impl DumpHeader {
    /// Decode a header from the first [`DUMP_HEADER_SIZE`] bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, DumpError> {
        if bytes.len() < DUMP_HEADER_SIZE {
            return Err(DumpError::Truncated {
                expected: DUMP_HEADER_SIZE,
                available: bytes.len(),
            });
        }
        Ok(DumpHeader {
            magic: [
                bytes.cread_with(0x00, scroll::LE),
                bytes.cread_with(0x04, scroll::LE),
            ],
            processor: bytes.cread_with(0x08, scroll::LE),
            core: bytes.cread_with(0x0C, scroll::LE),
            kind: bytes.cread_with(0x10, scroll::LE),
            total_size: bytes.cread_with(0x14, scroll::LE),
            register_dump_size: bytes.cread_with(0x18, scroll::LE),
            code_dump_size: bytes.cread_with(0x1C, scroll::LE),
            stack_dump_size: bytes.cread_with(0x20, scroll::LE),
            additional_data_size: bytes.cread_with(0x24, scroll::LE),
        })
    }

    /// Does the region hold an unconsumed dump from a known processor?
    ///
    /// The reporter zeroes the magic words after processing, so a consumed
    /// region answers `false` and re-invocation is a no-op.
    pub fn is_present(&self) -> bool {
        self.magic == DUMP_MAGIC && (self.processor == 9 || self.processor == 11)
    }
}

/// Fault category, from the header's `kind` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    Fiq,
    UndefinedInstruction,
    PrefetchAbort,
    DataAbort,
}

impl ExceptionType {
    /// Decode the header code, `None` for anything unknown.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ExceptionType::Fiq),
            1 => Some(ExceptionType::UndefinedInstruction),
            2 => Some(ExceptionType::PrefetchAbort),
            3 => Some(ExceptionType::DataAbort),
            _ => None,
        }
    }

    /// Human-readable category name.
    pub fn name(self) -> &'static str {
        match self {
            ExceptionType::Fiq => "FIQ",
            ExceptionType::UndefinedInstruction => "undefined instruction",
            ExceptionType::PrefetchAbort => "prefetch abort",
            ExceptionType::DataAbort => "data abort",
        }
    }
}

/// Semantic refinement of an undefined-instruction fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialException {
    /// The kernel's own panic break.
    KernelPanic,
    /// The break system call.
    SvcBreak,
}

impl SpecialException {
    /// Human-readable label appended to the category.
    pub fn name(self) -> &'static str {
        match self {
            SpecialException::KernelPanic => "kernel panic",
            SpecialException::SvcBreak => "svcBreak",
        }
    }
}

/// Identity of the process that was running when the fault hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process name, up to 8 ASCII characters.
    pub name: String,
    /// Process identifier.
    pub id: u64,
}

/// A fully decoded dump record.
#[derive(Debug, Clone)]
pub struct ExceptionDump {
    /// The decoded header.
    pub header: DumpHeader,
    /// The 18 captured registers, see [`REGISTER_NAMES`].
    pub registers: [u32; REGISTER_COUNT],
    /// Code bytes around the faulting instruction.
    pub code: Vec<u8>,
    /// Captured stack bytes, starting at the faulting SP.
    pub stack: Vec<u8>,
    /// Process identification; secondary processor only.
    pub additional: Vec<u8>,
}

impl ExceptionDump {
    /// Decode a whole record.
    ///
    /// Unlike the handlers' own consumers, this verifies that the four
    /// section sizes and the header add up to `total_size` and that the
    /// record fits `bytes` before any section is touched, so a corrupted
    /// header cannot cause reads outside the record.
    pub fn parse(bytes: &[u8]) -> Result<Self, DumpError> {
        let header = DumpHeader::parse(bytes)?;

        let total = header.total_size as usize;
        if total > bytes.len() {
            return Err(DumpError::Truncated {
                expected: total,
                available: bytes.len(),
            });
        }
        let sections = DUMP_HEADER_SIZE
            + header.register_dump_size as usize
            + header.code_dump_size as usize
            + header.stack_dump_size as usize
            + header.additional_data_size as usize;
        if sections != total {
            return Err(DumpError::SectionSizeMismatch {
                declared: total,
                sections,
            });
        }
        if (header.register_dump_size as usize) < REGISTER_COUNT * 4 {
            return Err(DumpError::RegisterSectionTooSmall {
                size: header.register_dump_size as usize,
            });
        }

        let registers_start = DUMP_HEADER_SIZE;
        let code_start = registers_start + header.register_dump_size as usize;
        let stack_start = code_start + header.code_dump_size as usize;
        let additional_start = stack_start + header.stack_dump_size as usize;

        let mut registers = [0u32; REGISTER_COUNT];
        for (i, register) in registers.iter_mut().enumerate() {
            *register = bytes.cread_with(registers_start + i * 4, scroll::LE);
        }

        tracing::debug!(
            "decoded {}-byte dump from processor {} (type {})",
            total,
            header.processor,
            header.kind
        );

        Ok(ExceptionDump {
            header,
            registers,
            code: bytes[code_start..stack_start].to_vec(),
            stack: bytes[stack_start..additional_start].to_vec(),
            additional: bytes[additional_start..total].to_vec(),
        })
    }

    /// The fault category, if the header code is known.
    pub fn exception_type(&self) -> Option<ExceptionType> {
        ExceptionType::from_code(self.header.kind)
    }

    /// Captured stack pointer.
    pub fn sp(&self) -> u32 {
        self.registers[SP_INDEX]
    }

    /// Captured CPSR.
    pub fn cpsr(&self) -> u32 {
        self.registers[CPSR_INDEX]
    }

    /// Was the faulting code running in Thumb state?
    pub fn is_thumb(&self) -> bool {
        self.cpsr() & CPSR_THUMB_BIT != 0
    }

    /// Refine an undefined-instruction fault from the last captured opcode.
    ///
    /// The handlers capture code up to and including the faulting
    /// instruction, so its encoding sits at the very end of the code
    /// section; the CPSR Thumb bit picks the instruction width.
    pub fn special_exception(&self) -> Option<SpecialException> {
        if self.exception_type() != Some(ExceptionType::UndefinedInstruction) {
            return None;
        }
        if !self.is_thumb() && self.code.len() >= 4 {
            let tail = &self.code[self.code.len() - 4..];
            match u32::from_le_bytes(tail.try_into().unwrap()) {
                arm::KERNEL_PANIC_ARM => Some(SpecialException::KernelPanic),
                arm::SVC_BREAK_ARM => Some(SpecialException::SvcBreak),
                _ => None,
            }
        } else if self.is_thumb() && self.code.len() >= 2 {
            let tail = &self.code[self.code.len() - 2..];
            match u16::from_le_bytes(tail.try_into().unwrap()) {
                arm::SVC_BREAK_THUMB => Some(SpecialException::SvcBreak),
                _ => None,
            }
        } else {
            None
        }
    }

    /// A data abort taken while already in an exception mode means the
    /// handler could not trust its own capture.
    pub fn has_unreliable_capture(&self) -> bool {
        let mode = self.cpsr() & CPSR_MODE_NIBBLE;
        self.exception_type() == Some(ExceptionType::DataAbort)
            && (mode == ABORT_MODE_NIBBLE || mode == UNDEFINED_MODE_NIBBLE)
    }

    /// Name and id of the faulting process, when the dump carries them.
    pub fn process_info(&self) -> Option<ProcessInfo> {
        if self.header.processor != 11 || self.additional.len() < 16 {
            return None;
        }
        let name_bytes = &self.additional[..8];
        let name_len = name_bytes.iter().position(|b| *b == 0).unwrap_or(8);
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();
        let id = u64::from_le_bytes(self.additional[8..16].try_into().unwrap());
        Some(ProcessInfo { name, id })
    }
}
