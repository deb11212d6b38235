use thiserror::Error;

use crate::arm;
use crate::blob::HandlerBlob;
use crate::layout::{MemoryLayout, FIQ_SLOT, PREFETCH_ABORT_SLOT, UNDEFINED_INSTRUCTION_SLOT};
use crate::scan::{locate, Pattern, ScanOrigin};

/// The instruction markers the patcher must locate in the vector page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMarker {
    /// Start of the vendor FPU-init sequence.
    FpuInit,
    /// First unwritten word after the vendor code.
    FreeSpace,
    /// Vendor MCU-reboot call site.
    McuReboot,
}

/// The vector page does not look like the patcher expects. Nothing was written.
#[derive(Error, Debug)]
pub enum PatchError {
    /// A required instruction pattern is missing (or sits where it cannot be
    /// the real marker).
    #[error("required instruction marker {marker:?} was not found in the vector page")]
    MarkerNotFound { marker: PageMarker },
    /// The free region after the vendor code cannot hold the handler body.
    #[error("no room for a {required}-byte handler body at page byte offset {offset:#X}")]
    InsufficientSpace { required: usize, offset: usize },
}

/// Caller-supplied inputs for [`patch_arm11_page`].
#[derive(Debug)]
pub struct Arm11PatchRequest<'a> {
    /// Stack the installed handlers will run on.
    pub stack_address: u32,
    /// Code-set offset of the currently running program.
    pub code_set_offset: u32,
    /// The kernel data-abort-handler snippet, editable in place.
    pub dabt_handler: &'a mut [u32],
    /// Address the snippet executes from. The snippet is edited through a
    /// different mapping, so branch sources are computed against this.
    pub dabt_handler_address: u32,
}

const PAGE_MARKERS: [Pattern<PageMarker>; 3] = [
    Pattern {
        word: arm::FPU_INIT_MARKER,
        role: PageMarker::FpuInit,
        origin: ScanOrigin::Start,
    },
    Pattern {
        word: arm::FREE_SPACE_SENTINEL,
        role: PageMarker::FreeSpace,
        origin: ScanOrigin::PreviousMatch,
    },
    Pattern {
        word: arm::MCU_REBOOT_MARKER,
        role: PageMarker::McuReboot,
        origin: ScanOrigin::Start,
    },
];

/// Slot word index and blob entry-word index, per patched vector.
const VECTOR_SLOTS: [(usize, usize); 3] = [
    (UNDEFINED_INSTRUCTION_SLOT, 1),
    (PREFETCH_ABORT_SLOT, 2),
    (FIQ_SLOT, 0),
];

/// Install the ARM11 exception handlers into the shared vector page.
///
/// Locates the vendor markers, proves the free region can hold the handler
/// body, copies the body in, rewrites the three vector slots as branches into
/// it, redirects the kernel's data-abort path, and resolves the relocation
/// placeholders inside the copied body.
///
/// Validation is strictly ahead of mutation: on any error the page and the
/// data-abort snippet are byte-for-byte unchanged.
pub fn patch_arm11_page(
    page: &mut [u32],
    blob: &HandlerBlob<'_>,
    layout: &MemoryLayout,
    request: Arm11PatchRequest<'_>,
) -> Result<(), PatchError> {
    // Locate.
    let mut fpu_init = None;
    let mut free_space = None;
    let mut mcu_reboot = None;
    for (role, offset) in locate(page, &PAGE_MARKERS) {
        let offset = offset.ok_or(PatchError::MarkerNotFound { marker: role })?;
        match role {
            PageMarker::FpuInit => fpu_init = Some(offset),
            PageMarker::FreeSpace => free_space = Some(offset),
            PageMarker::McuReboot => mcu_reboot = Some(offset),
        }
    }
    let (fpu_init, free_space, mcu_reboot) = match (fpu_init, free_space, mcu_reboot) {
        (Some(f), Some(s), Some(m)) => (f, s, m),
        // locate() returned every role above.
        _ => unreachable!(),
    };

    // Validate.
    if page.len() <= FIQ_SLOT {
        return Err(PatchError::InsufficientSpace {
            required: blob.body_len(),
            offset: 0,
        });
    }
    let body_words = blob.body_len() / 4;
    let last_body_word = body_words
        .checked_sub(1)
        .ok_or(PatchError::InsufficientSpace {
            required: blob.body_len(),
            offset: free_space * 4,
        })?;
    // The word the last copied instruction would land on must still be free;
    // that single probe bounds the whole region.
    if page.get(free_space + last_body_word) != Some(&arm::FREE_SPACE_SENTINEL) {
        return Err(PatchError::InsufficientSpace {
            required: blob.body_len(),
            offset: free_space * 4,
        });
    }
    // The markers sit next to the real call/landing sites, not on them.
    let fpu_target = fpu_init + 3;
    let reboot_target = mcu_reboot
        .checked_sub(2)
        .ok_or(PatchError::MarkerNotFound {
            marker: PageMarker::McuReboot,
        })?;

    // Copy the handler body into the free region.
    for (i, word) in blob.body_words().enumerate() {
        page[free_space + i] = word;
    }

    // Rewrite the vector slots as branches into the copied body.
    for (slot, entry) in VECTOR_SLOTS {
        let target = (free_space as u32 * 4)
            .wrapping_add(blob.entry_word(entry))
            .wrapping_sub(32);
        page[slot] = arm::build_b(slot as u32 * 4, target);
    }

    let context = RelocationContext {
        stack_address: request.stack_address,
        code_set_offset: request.code_set_offset,
        fpu_target,
        reboot_target,
        page_address: layout.vector_page_address,
    };

    redirect_dabt_handler(layout, blob, free_space, request);

    apply_relocations(page, free_space, body_words, &context);

    tracing::info!(
        "ARM11 exception handlers installed at page byte offset {:#X}",
        free_space * 4
    );
    Ok(())
}

/// Hook the kernel's own data-abort path into the new handlers.
///
/// Scans the snippet up to (not including) the word equal to the stack
/// address. The `srsdb` that saves banked state is replaced with a branch
/// out; after the `subs pc, lr, #4` return, a register restore plus the same
/// branch are laid in. Branch sources use the snippet's executing address,
/// not the address it is edited at. Unrelated kernel fault paths keep their
/// existing instructions.
fn redirect_dabt_handler(
    layout: &MemoryLayout,
    blob: &HandlerBlob<'_>,
    free_space: usize,
    request: Arm11PatchRequest<'_>,
) {
    // The kernel-context entry sits one header length past the FIQ vector
    // entry; the raw header word encodes exactly that.
    let target = layout
        .vector_page_address
        .wrapping_add(free_space as u32 * 4)
        .wrapping_add(blob.entry_word(0));

    let snippet = request.dabt_handler;
    let mut i = 0;
    while i < snippet.len() && snippet[i] != request.stack_address {
        match snippet[i] {
            arm::SRS_DB_SP_SVC => {
                let source = request.dabt_handler_address.wrapping_add(i as u32 * 4);
                snippet[i] = arm::build_b(source, target);
            }
            arm::SUBS_PC_LR_4 => {
                if i + 2 >= snippet.len() {
                    break;
                }
                snippet[i + 1] = arm::POP_R0_R3;
                let source = request
                    .dabt_handler_address
                    .wrapping_add((i as u32 + 2) * 4);
                snippet[i + 2] = arm::build_b(source, target);
                i += 2;
            }
            _ => {}
        }
        i += 1;
    }
}

#[derive(Debug, Clone, Copy)]
enum Relocation {
    StackPointer,
    FpuInitCall,
    RebootBranch,
    MainHandlerAddress,
    CodeSetOffset,
}

/// Sentinel word in the copied body, and what replaces it.
const RELOCATIONS: [(u32, Relocation); 5] = [
    (arm::STACK_POINTER_SENTINEL, Relocation::StackPointer),
    (arm::BL_SELF, Relocation::FpuInitCall),
    (arm::B_SELF, Relocation::RebootBranch),
    (arm::BX_R12, Relocation::MainHandlerAddress),
    (arm::CODE_SET_SENTINEL, Relocation::CodeSetOffset),
];

struct RelocationContext {
    stack_address: u32,
    code_set_offset: u32,
    /// Word index of the real FPU-init entry.
    fpu_target: usize,
    /// Word index of the real MCU-reboot call site.
    reboot_target: usize,
    page_address: u32,
}

fn apply_relocations(
    page: &mut [u32],
    free_space: usize,
    body_words: usize,
    ctx: &RelocationContext,
) {
    for idx in free_space..free_space + body_words {
        let Some(&(_, relocation)) = RELOCATIONS.iter().find(|(word, _)| *word == page[idx]) else {
            continue;
        };
        match relocation {
            Relocation::StackPointer => page[idx] = ctx.stack_address.wrapping_sub(0x10),
            Relocation::FpuInitCall => {
                page[idx] = arm::build_bl(idx as u32 * 4, ctx.fpu_target as u32 * 4)
            }
            Relocation::RebootBranch => {
                page[idx] = arm::build_b(idx as u32 * 4, ctx.reboot_target as u32 * 4)
            }
            Relocation::MainHandlerAddress => {
                // The word after `bx r12` holds a body-relative offset; turn
                // it into the absolute virtual address it maps to.
                if let Some(operand) = page.get_mut(idx + 1) {
                    *operand = ctx
                        .page_address
                        .wrapping_add(free_space as u32 * 4)
                        .wrapping_add(*operand)
                        .wrapping_sub(32);
                }
            }
            Relocation::CodeSetOffset => page[idx] = ctx.code_set_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{arm11_blob_image, arm11_page};
    use pretty_assertions::assert_eq;

    fn request(dabt: &mut [u32]) -> Arm11PatchRequest<'_> {
        Arm11PatchRequest {
            stack_address: 0x1FF8_0000,
            code_set_offset: 0xCC,
            dabt_handler: dabt,
            dabt_handler_address: 0xFFF0_4000,
        }
    }

    #[test]
    fn success_mutates_the_page() {
        let image = arm11_blob_image();
        let blob = HandlerBlob::parse(&image).unwrap();
        let mut page = arm11_page(blob.body_len() / 4);
        let mut dabt = [0u32; 4];

        patch_arm11_page(&mut page, &blob, &MemoryLayout::default(), request(&mut dabt)).unwrap();

        let free = crate::test::ARM11_FREE_SPACE_WORD;
        assert_eq!(
            Some(free as u32 * 4 + blob.entry_word(0) - 32),
            arm::branch_target(FIQ_SLOT as u32 * 4, page[FIQ_SLOT])
        );
    }

    #[test]
    fn reboot_marker_at_page_start_is_rejected() {
        let image = arm11_blob_image();
        let blob = HandlerBlob::parse(&image).unwrap();
        let mut page = arm11_page(blob.body_len() / 4);
        // Move the reboot marker to word 1, too close to hold a call site.
        let old = crate::scan::find_word(&page, arm::MCU_REBOOT_MARKER).unwrap();
        page[old] = 0xE1A0_0000;
        page[1] = arm::MCU_REBOOT_MARKER;
        let pristine = page.clone();
        let mut dabt = [0u32; 4];

        let result =
            patch_arm11_page(&mut page, &blob, &MemoryLayout::default(), request(&mut dabt));

        assert!(matches!(
            result,
            Err(PatchError::MarkerNotFound {
                marker: PageMarker::McuReboot
            })
        ));
        assert_eq!(pristine, page);
    }

    #[test]
    fn degenerate_blob_body_is_rejected() {
        let mut image = arm11_blob_image();
        image.truncate(32);
        let blob = HandlerBlob::parse(&image).unwrap();
        let mut page = arm11_page(8);
        let pristine = page.clone();
        let mut dabt = [0u32; 4];

        let result =
            patch_arm11_page(&mut page, &blob, &MemoryLayout::default(), request(&mut dabt));

        assert!(matches!(result, Err(PatchError::InsufficientSpace { .. })));
        assert_eq!(pristine, page);
    }
}
