//! Narrow hardware-memory abstraction.
//!
//! All address arithmetic and volatile access go through [`MemoryInterface`],
//! so the patching and decoding logic stays ordinary, fully testable code.
//! [`PhysicalMemory`] is the one place that dereferences raw addresses.

/// Memory access to address {address:#010X?} was not aligned to {alignment} bytes.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub struct MemoryNotAlignedError {
    /// The address of the access.
    pub address: u32,
    /// The required alignment in bytes (address increments).
    pub alignment: usize,
}

/// Memory access to address {address:#010X?} of {len} bytes falls outside the accessible region.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub struct OutOfRegionError {
    /// The address of the access.
    pub address: u32,
    /// The length of the access in bytes.
    pub len: usize,
}

/// Any error a [`MemoryInterface`] implementation can raise.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    NotAligned(#[from] MemoryNotAlignedError),
    #[error(transparent)]
    OutOfRegion(#[from] OutOfRegionError),
}

/// An interface to be implemented for drivers that allow access to the fixed
/// memory regions this crate patches and decodes.
pub trait MemoryInterface {
    /// Read a 32bit word at `address`.
    ///
    /// The address has to be a multiple of 4.
    /// Returns [`MemoryError::NotAligned`] if this does not hold true.
    fn read_word_32(&mut self, address: u32) -> Result<u32, MemoryError> {
        let mut word = 0;
        self.read_32(address, core::slice::from_mut(&mut word))?;
        Ok(word)
    }

    /// Read a block of 32bit words at `address` in the target's endianness.
    ///
    /// The number of words read is `data.len()`.
    /// The address has to be a multiple of 4.
    /// Returns [`MemoryError::NotAligned`] if this does not hold true.
    fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), MemoryError>;

    /// Read a block of 8bit words at `address`.
    fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), MemoryError>;

    /// Write a 32bit word to `address`.
    ///
    /// The address has to be a multiple of 4.
    /// Returns [`MemoryError::NotAligned`] if this does not hold true.
    fn write_word_32(&mut self, address: u32, data: u32) -> Result<(), MemoryError> {
        self.write_32(address, core::slice::from_ref(&data))
    }

    /// Write a block of 32bit words to `address` in the target's endianness.
    ///
    /// The number of words written is `data.len()`.
    /// The address has to be a multiple of 4.
    /// Returns [`MemoryError::NotAligned`] if this does not hold true.
    fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), MemoryError>;

    /// Write a block of 8bit words to `address`.
    fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError>;
}

fn check_alignment(address: u32, alignment: usize) -> Result<(), MemoryError> {
    if address as usize % alignment != 0 {
        return Err(MemoryNotAlignedError { address, alignment }.into());
    }
    Ok(())
}

/// Volatile access to identity-mapped physical memory.
///
/// This is the only unsafe boundary in the crate. Everything above it
/// operates on plain buffers.
#[derive(Debug)]
pub struct PhysicalMemory {
    _private: (),
}

impl PhysicalMemory {
    /// Create a handle to the identity-mapped physical address space.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that physical memory is identity-mapped,
    /// that every address later passed to the [`MemoryInterface`] methods is
    /// valid to access, and that nothing else accesses those regions for the
    /// lifetime of the handle. On the target this holds during early boot and
    /// during post-fault reporting, before normal scheduling resumes.
    pub unsafe fn new() -> Self {
        PhysicalMemory { _private: () }
    }
}

impl MemoryInterface for PhysicalMemory {
    fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), MemoryError> {
        check_alignment(address, 4)?;
        for (i, word) in data.iter_mut().enumerate() {
            let ptr = (address as usize + i * 4) as *const u32;
            // Safety: valid per the `PhysicalMemory::new` contract.
            *word = unsafe { ptr.read_volatile() };
        }
        Ok(())
    }

    fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), MemoryError> {
        for (i, byte) in data.iter_mut().enumerate() {
            let ptr = (address as usize + i) as *const u8;
            // Safety: valid per the `PhysicalMemory::new` contract.
            *byte = unsafe { ptr.read_volatile() };
        }
        Ok(())
    }

    fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), MemoryError> {
        check_alignment(address, 4)?;
        for (i, word) in data.iter().enumerate() {
            let ptr = (address as usize + i * 4) as *mut u32;
            // Safety: valid per the `PhysicalMemory::new` contract.
            unsafe { ptr.write_volatile(*word) };
        }
        Ok(())
    }

    fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        for (i, byte) in data.iter().enumerate() {
            let ptr = (address as usize + i) as *mut u8;
            // Safety: valid per the `PhysicalMemory::new` contract.
            unsafe { ptr.write_volatile(*byte) };
        }
        Ok(())
    }
}
