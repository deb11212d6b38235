use crate::arm;
use crate::blob::HandlerBlob;
use crate::layout::{MemoryLayout, ARM9_VECTOR_OFFSETS};
use crate::memory::{MemoryError, MemoryInterface};

/// Install the ARM9 exception handlers.
///
/// Copies the handler body to its reserved code page and rewrites the four
/// patched hardware vector slots with a two-instruction stub: `ldr pc,
/// [pc, #-4]` followed by the pre-encoded entry word taken verbatim from the
/// blob header. The addresses are fixed by the hardware contract and always
/// valid, so there is no validation step and no way to roll back.
pub fn install_arm9_handlers(
    memory: &mut impl MemoryInterface,
    layout: &MemoryLayout,
    blob: &HandlerBlob<'_>,
) -> Result<(), MemoryError> {
    memory.write_8(layout.arm9_handler_base, blob.body())?;

    for (i, offset) in ARM9_VECTOR_OFFSETS.iter().enumerate() {
        let slot = layout.arm9_vector_base + offset;
        memory.write_word_32(slot, arm::LDR_PC_LITERAL)?;
        memory.write_word_32(slot + 4, blob.entry_word(i))?;
    }

    tracing::info!(
        "ARM9 exception handlers installed at {:#010X}",
        layout.arm9_handler_base
    );
    Ok(())
}
