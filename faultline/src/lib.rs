//! # Exception-handling core for a dual-CPU ARM firmware
//!
//! This crate installs custom exception-vector handlers on both processors of
//! a dual-CPU device by binary-patching precompiled handler images into their
//! reserved code pages, and detects, decodes and reports the structured crash
//! dump those handlers leave behind after a fault.
//!
//! # Examples
//!
//! ## Installing the ARM9 handlers at boot
//! ```no_run
//! # use faultline::Error;
//! use faultline::{install_arm9_handlers, HandlerBlob, MemoryLayout, PhysicalMemory};
//!
//! # let arm9_image: &[u8] = &[];
//! let blob = HandlerBlob::parse(arm9_image)?;
//!
//! // Safety: early boot, identity-mapped physical memory, no other accessor.
//! let mut memory = unsafe { PhysicalMemory::new() };
//!
//! install_arm9_handlers(&mut memory, &MemoryLayout::default(), &blob)?;
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Reporting a crash dump on the next boot
//! ```no_run
//! # use faultline::Error;
//! # struct MyScreen; struct MySd; struct Mcu;
//! # impl faultline::report::Screen for MyScreen {
//! #     fn draw_text(&mut self, _: faultline::report::Surface, _: u32, y: u32,
//! #                  _: faultline::report::Color, _: &str) -> u32 { y }
//! # }
//! # impl faultline::report::DumpStore for MySd {
//! #     fn find_free_name(&mut self, _: &str) -> anyhow::Result<String> { unimplemented!() }
//! #     fn write(&mut self, _: &str, _: &[u8]) -> anyhow::Result<()> { unimplemented!() }
//! # }
//! # impl faultline::report::Power for Mcu {
//! #     fn wait_for_input(&mut self) {}
//! #     fn power_off(&mut self) {}
//! # }
//! use faultline::{detect_and_process_dump, MemoryLayout, PhysicalMemory};
//!
//! # let (mut screen, mut sd, mut mcu) = (MyScreen, MySd, Mcu);
//! let mut memory = unsafe { PhysicalMemory::new() };
//! detect_and_process_dump(
//!     &mut memory,
//!     &MemoryLayout::default(),
//!     &mut screen,
//!     &mut sd,
//!     &mut mcu,
//! )?;
//! // Only reached when no dump was present.
//! # Ok::<(), Error>(())
//! ```
//!
//! The crate is built around a narrow [`MemoryInterface`] abstraction: all
//! scanning, relocation and decoding logic operates on ordinary buffers, and
//! only [`PhysicalMemory`] touches the hardware.

#[warn(missing_docs)]
pub mod arm;
#[warn(missing_docs)]
mod blob;
#[warn(missing_docs)]
pub mod dump;
mod error;
#[warn(missing_docs)]
pub mod install;
mod layout;
#[warn(missing_docs)]
mod memory;
#[warn(missing_docs)]
pub mod report;
pub mod scan;

pub use crate::blob::{BlobError, HandlerBlob, BLOB_HEADER_SIZE};
pub use crate::dump::{DumpError, DumpHeader, ExceptionDump, ExceptionType, SpecialException};
pub use crate::error::Error;
pub use crate::install::{
    install_arm9_handlers, patch_arm11_page, Arm11PatchRequest, PageMarker, PatchError,
};
pub use crate::layout::{
    MemoryLayout, ARM9_VECTOR_OFFSETS, FIQ_SLOT, PREFETCH_ABORT_SLOT, UNDEFINED_INSTRUCTION_SLOT,
    VECTOR_PAGE_WORDS,
};
pub use crate::memory::{
    MemoryError, MemoryInterface, MemoryNotAlignedError, OutOfRegionError, PhysicalMemory,
};
pub use crate::report::{detect_and_process_dump, ReportOutcome};
