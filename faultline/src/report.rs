//! Post-fault diagnostic reporting.
//!
//! Runs once on the boot after a fault: decodes the dump the handlers left
//! behind, renders it, persists the raw record, consumes the region and
//! halts. Screen, storage and power are external collaborators reached
//! through the traits below.

use crate::dump::{DumpHeader, ExceptionDump, DUMP_HEADER_SIZE, REGISTER_COUNT, REGISTER_NAMES};
use crate::error::Error;
use crate::layout::MemoryLayout;
use crate::memory::MemoryInterface;

/// Horizontal glyph advance of the report font.
pub const SPACING_X: u32 = 10;
/// Vertical line advance of the report font.
pub const SPACING_Y: u32 = 10;

/// Upper bound on rendered stack-dump lines; longer captures are truncated.
pub const STACK_DUMP_MAX_LINES: usize = 19;
const STACK_BYTES_PER_LINE: usize = 8;

/// Render target of a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Main screen carrying the report itself.
    Top,
    /// Secondary screen carrying the stack dump.
    Bottom,
}

/// Text color of a draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Red,
    Yellow,
}

/// Text output collaborator.
pub trait Screen {
    /// Prepare the screens for drawing. Called once, before the first draw.
    fn init(&mut self) {}

    /// Draw `text` at `(x, y)` and return the y coordinate it was drawn at
    /// (the last line's, if the collaborator wraps long text). Callers
    /// advance by [`SPACING_Y`] per line themselves.
    fn draw_text(&mut self, surface: Surface, x: u32, y: u32, color: Color, text: &str) -> u32;
}

/// Persistent-storage collaborator.
pub trait DumpStore {
    /// Find a file name inside `folder` that does not collide with an
    /// existing dump.
    fn find_free_name(&mut self, folder: &str) -> anyhow::Result<String>;

    /// Write `data` to `path`.
    fn write(&mut self, path: &str, data: &[u8]) -> anyhow::Result<()>;
}

/// User-input and power collaborator.
pub trait Power {
    /// Block until the user presses any button.
    fn wait_for_input(&mut self);

    /// Cut power. On hardware this never returns.
    fn power_off(&mut self);
}

/// What [`detect_and_process_dump`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// No (or an already consumed) dump; nothing was rendered or written.
    NoDump,
    /// A dump was reported and consumed. On hardware this value is never
    /// observed because the power collaborator does not return.
    Processed,
}

/// Detect a crash dump and, if one is present, report it.
///
/// Absence is a normal outcome and returns immediately. Otherwise the dump
/// is rendered, persisted (best effort), zeroed and the device halted via
/// the power collaborator. The zeroing of the magic words is what makes a
/// second invocation a no-op.
pub fn detect_and_process_dump(
    memory: &mut impl MemoryInterface,
    layout: &MemoryLayout,
    screen: &mut impl Screen,
    store: &mut impl DumpStore,
    power: &mut impl Power,
) -> Result<ReportOutcome, Error> {
    let mut header_bytes = [0u8; DUMP_HEADER_SIZE];
    memory.read_8(layout.dump_header_address, &mut header_bytes)?;
    let header = DumpHeader::parse(&header_bytes)?;
    if !header.is_present() {
        tracing::trace!("no exception dump present");
        return Ok(ReportOutcome::NoDump);
    }

    let total = header.total_size as usize;
    if total > layout.dump_region_size as usize {
        return Err(crate::dump::DumpError::Truncated {
            expected: total,
            available: layout.dump_region_size as usize,
        }
        .into());
    }
    let mut record = vec![0u8; total];
    memory.read_8(layout.dump_header_address, &mut record)?;
    let dump = ExceptionDump::parse(&record)?;

    screen.init();
    let y = render_report(screen, &dump);
    render_stack_dump(screen, &dump);
    let y = persist(screen, store, &dump, &record, y);
    screen.draw_text(
        Surface::Top,
        10,
        y + SPACING_Y,
        Color::White,
        "Press any button to shutdown",
    );

    // Zeroing the whole record, magic words included, is the sole
    // "already consumed" marker.
    memory.write_8(layout.dump_header_address, &vec![0u8; total])?;

    power.wait_for_input();
    power.power_off();
    Ok(ReportOutcome::Processed)
}

fn category_line(dump: &ExceptionDump) -> String {
    match (dump.exception_type(), dump.special_exception()) {
        (Some(kind), Some(special)) => {
            format!("Exception type:  {} ({})", kind.name(), special.name())
        }
        (Some(kind), None) => format!("Exception type:  {}", kind.name()),
        (None, _) => format!("Exception type:  unknown ({})", dump.header.kind),
    }
}

/// Render the main report. Returns the y coordinate of its last line.
fn render_report(screen: &mut impl Screen, dump: &ExceptionDump) -> u32 {
    screen.draw_text(Surface::Top, 10, 10, Color::Red, "An exception occurred");

    let processor_line = if dump.header.processor == 11 {
        format!("Processor:       ARM11 (core {})", dump.header.core)
    } else {
        "Processor:       ARM9".to_string()
    };
    let mut y = screen.draw_text(Surface::Top, 10, 30, Color::White, &processor_line);

    y = screen.draw_text(
        Surface::Top,
        10,
        y + SPACING_Y,
        Color::White,
        &category_line(dump),
    );

    if let Some(info) = dump.process_info() {
        let line = format!("Current process: {} ({:016X})", info.name, info.id);
        y = screen.draw_text(Surface::Top, 10, y + SPACING_Y, Color::White, &line);
    }
    y += SPACING_Y;

    for i in (0..REGISTER_COUNT - 1).step_by(2) {
        let left = format!("{:<7}{:08X}", REGISTER_NAMES[i], dump.registers[i]);
        y = screen.draw_text(Surface::Top, 10, y + SPACING_Y, Color::White, &left);

        // The primary processor has no FPEXC; its half of the last row stays
        // empty.
        if i != REGISTER_COUNT - 2 || dump.header.processor != 9 {
            let right = format!("{:<7}{:08X}", REGISTER_NAMES[i + 1], dump.registers[i + 1]);
            screen.draw_text(Surface::Top, 10 + 22 * SPACING_X, y, Color::White, &right);
        }
    }
    y += SPACING_Y;

    if dump.has_unreliable_capture() {
        y = screen.draw_text(
            Surface::Top,
            10,
            y + SPACING_Y,
            Color::Yellow,
            "Incorrect dump: failed to dump code and/or stack",
        ) + SPACING_Y;
    }

    y
}

fn render_stack_dump(screen: &mut impl Screen, dump: &ExceptionDump) {
    let mut y = screen.draw_text(Surface::Bottom, 10, 10, Color::White, "Stack dump:") + SPACING_Y;

    let mut offset = 0;
    let mut line = 0;
    while line < STACK_DUMP_MAX_LINES && offset < dump.stack.len() {
        let label = format!("{:08X}:", dump.sp().wrapping_add(8 * line as u32));
        y = screen.draw_text(Surface::Bottom, 10, y + SPACING_Y, Color::White, &label);

        let mut column = 0;
        while column < STACK_BYTES_PER_LINE && offset < dump.stack.len() {
            let x = 10 + 10 * SPACING_X + 3 * column as u32 * SPACING_X;
            let byte = format!("{:02X}", dump.stack[offset]);
            screen.draw_text(Surface::Bottom, x, y, Color::White, &byte);
            column += 1;
            offset += 1;
        }
        line += 1;
    }
}

/// Write the raw record out. Failure is reported on screen and to the log,
/// never propagated: the rest of the flow must still run.
fn persist(
    screen: &mut impl Screen,
    store: &mut impl DumpStore,
    dump: &ExceptionDump,
    record: &[u8],
    y: u32,
) -> u32 {
    let folder = format!("dumps/arm{}", dump.header.processor);
    let written = store.find_free_name(&folder).and_then(|name| {
        let path = format!("{folder}/{name}");
        store.write(&path, record)?;
        Ok(path)
    });

    match written {
        Ok(path) => {
            tracing::info!("exception dump written to {path}");
            let y = screen.draw_text(
                Surface::Top,
                10,
                y + SPACING_Y,
                Color::White,
                "You can find a dump in the following file:",
            );
            screen.draw_text(Surface::Top, 10, y + SPACING_Y, Color::White, &path) + SPACING_Y
        }
        Err(error) => {
            tracing::warn!("writing the exception dump failed: {error:#}");
            screen.draw_text(
                Surface::Top,
                10,
                y + SPACING_Y,
                Color::Red,
                "Error writing the dump file",
            )
        }
    }
}
