use crate::blob::BlobError;
use crate::dump::DumpError;
use crate::install::PatchError;
use crate::memory::MemoryError;
use thiserror::Error;

/// The overarching error type which contains all possible errors as variants.
#[derive(Error, Debug)]
pub enum Error {
    #[error("The handler image violates its layout contract")]
    Blob(#[from] BlobError),
    #[error("The exception-vector page could not be patched")]
    Patch(#[from] PatchError),
    #[error("The exception dump could not be decoded")]
    Dump(#[from] DumpError),
    #[error("A memory access failed")]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
