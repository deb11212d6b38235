//! Exception-vector installation for both processors.
//!
//! The ARM9 installer writes to hardware-fixed, always-valid addresses and
//! cannot fail. The ARM11 patcher has to find its way around vendor code that
//! already lives in the shared vector page, and refuses to touch anything
//! unless every precondition holds.

mod arm11;
mod arm9;

pub use arm11::{patch_arm11_page, Arm11PatchRequest, PageMarker, PatchError};
pub use arm9::install_arm9_handlers;
