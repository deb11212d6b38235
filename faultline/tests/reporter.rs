//! End-to-end properties of the exception dump reporter.

use faultline::report::{Color, Surface, SPACING_X};
use faultline::test::{DumpFixture, MockMemory, RecordingPower, RecordingScreen, VecDumpStore};
use faultline::{detect_and_process_dump, MemoryInterface, MemoryLayout, ReportOutcome};
use pretty_assertions::assert_eq;
use test_case::test_case;

const REGION_LEN: usize = 0x800;

struct TestRun {
    outcome: ReportOutcome,
    memory: MockMemory,
    screen: RecordingScreen,
    store: VecDumpStore,
    power: RecordingPower,
    layout: MemoryLayout,
}

fn run_with(fixture: &DumpFixture, fail_writes: bool) -> TestRun {
    let layout = MemoryLayout::default();
    let record = fixture.to_bytes();
    assert!(record.len() <= REGION_LEN);

    let mut region = record.clone();
    region.resize(REGION_LEN, 0);
    let mut memory = MockMemory::new();
    memory.add_range(layout.dump_header_address, region);

    let mut screen = RecordingScreen::new();
    let mut store = VecDumpStore::new();
    store.fail_writes = fail_writes;
    let mut power = RecordingPower::new();

    let outcome =
        detect_and_process_dump(&mut memory, &layout, &mut screen, &mut store, &mut power)
            .expect("reporting failed");

    TestRun {
        outcome,
        memory,
        screen,
        store,
        power,
        layout,
    }
}

fn run(fixture: &DumpFixture) -> TestRun {
    run_with(fixture, false)
}

#[test]
fn absent_dump_is_a_silent_no_op() {
    let layout = MemoryLayout::default();
    let mut memory = MockMemory::new();
    memory.add_range(layout.dump_header_address, vec![0u8; REGION_LEN]);
    let mut screen = RecordingScreen::new();
    let mut store = VecDumpStore::new();
    let mut power = RecordingPower::new();

    let outcome =
        detect_and_process_dump(&mut memory, &layout, &mut screen, &mut store, &mut power)
            .unwrap();

    assert_eq!(ReportOutcome::NoDump, outcome);
    assert!(screen.calls.is_empty());
    assert!(store.files.is_empty());
    assert!(!power.powered_off);
}

#[test]
fn processing_consumes_the_dump() {
    let fixture = DumpFixture::arm11();
    let total = fixture.to_bytes().len();
    let mut run = run(&fixture);

    assert_eq!(ReportOutcome::Processed, run.outcome);
    assert!(run.power.waited_for_input);
    assert!(run.power.powered_off);

    // Exactly the record is zeroed.
    let mut consumed = vec![0xFFu8; total];
    run.memory
        .read_8(run.layout.dump_header_address, &mut consumed)
        .unwrap();
    assert_eq!(vec![0u8; total], consumed);

    // A second invocation finds nothing.
    let mut screen = RecordingScreen::new();
    let mut store = VecDumpStore::new();
    let mut power = RecordingPower::new();
    let outcome = detect_and_process_dump(
        &mut run.memory,
        &run.layout,
        &mut screen,
        &mut store,
        &mut power,
    )
    .unwrap();
    assert_eq!(ReportOutcome::NoDump, outcome);
    assert!(screen.calls.is_empty());
}

/// Register cells render as exactly 15 characters: a 7-wide name column and
/// 8 hex digits.
fn register_cells(screen: &RecordingScreen, x: u32) -> usize {
    screen
        .calls_on(Surface::Top)
        .filter(|call| call.x == x && call.text.len() == 15)
        .count()
}

#[test]
fn register_grid_renders_two_columns_of_nine() {
    let run = run(&DumpFixture::arm11());

    assert_eq!(9, register_cells(&run.screen, 10));
    assert_eq!(9, register_cells(&run.screen, 10 + 22 * SPACING_X));
    assert!(run
        .screen
        .calls
        .iter()
        .any(|call| call.text.starts_with("FPEXC")));
}

#[test]
fn arm9_register_grid_omits_fpexc() {
    let run = run(&DumpFixture::arm9());

    assert_eq!(9, register_cells(&run.screen, 10));
    assert_eq!(8, register_cells(&run.screen, 10 + 22 * SPACING_X));
    assert!(!run
        .screen
        .calls
        .iter()
        .any(|call| call.text.starts_with("FPEXC")));
}

#[test_case(300, 19, 152 ; "truncated at nineteen lines")]
#[test_case(40, 5, 40 ; "short capture renders fully")]
fn stack_dump_line_cap(stack_len: usize, lines: usize, bytes: usize) {
    let mut fixture = DumpFixture::arm11();
    fixture.stack = (0..stack_len).map(|i| i as u8).collect();
    let run = run(&fixture);

    let labels = run
        .screen
        .calls_on(Surface::Bottom)
        .filter(|call| call.text.len() == 9 && call.text.ends_with(':'))
        .count();
    let cells = run
        .screen
        .calls_on(Surface::Bottom)
        .filter(|call| call.text.len() == 2)
        .count();

    assert_eq!(lines, labels);
    assert_eq!(bytes, cells);
}

#[test]
fn stack_lines_are_labelled_from_sp() {
    let mut fixture = DumpFixture::arm11();
    fixture.registers[13] = 0x0D00_0000;
    fixture.stack = vec![0x11; 20];
    let run = run(&fixture);

    let labels: Vec<String> = run
        .screen
        .calls_on(Surface::Bottom)
        .filter(|call| call.text.len() == 9 && call.text.ends_with(':'))
        .map(|call| call.text.clone())
        .collect();

    assert_eq!(
        vec!["0D000000:", "0D000008:", "0D000010:"],
        labels
    );
}

#[test]
fn thumb_breakpoint_syscall_is_labelled() {
    let mut fixture = DumpFixture::arm11();
    fixture.kind = 1;
    fixture.registers[16] = 0x13 | 0x20; // Thumb state
    fixture.code = vec![0x00, 0x00, 0x3C, 0xDF]; // ends with svc 0x3C
    let run = run(&fixture);

    assert!(run
        .screen
        .calls_on(Surface::Top)
        .any(|call| call.text == "Exception type:  undefined instruction (svcBreak)"));
}

#[test]
fn process_line_shows_name_and_id() {
    let mut fixture = DumpFixture::arm11();
    fixture.additional = b"game1\0\0\0".to_vec();
    fixture
        .additional
        .extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
    let run = run(&fixture);

    assert!(run
        .screen
        .calls_on(Surface::Top)
        .any(|call| call.text == "Current process: game1 (1122334455667788)"));
}

#[test]
fn unreliable_capture_is_annotated() {
    let mut fixture = DumpFixture::arm11();
    fixture.kind = 3;
    fixture.registers[16] = 0x17; // data abort taken in abort mode
    let run = run(&fixture);

    assert!(run.screen.calls.iter().any(|call| {
        call.color == Color::Yellow
            && call.text == "Incorrect dump: failed to dump code and/or stack"
    }));
}

#[test]
fn raw_record_is_persisted_per_processor() {
    let fixture = DumpFixture::arm11();
    let record = fixture.to_bytes();
    let run = run(&fixture);

    assert_eq!(1, run.store.files.len());
    let (path, data) = &run.store.files[0];
    assert_eq!("dumps/arm11/crash_dump_00000000.dmp", path);
    assert_eq!(&record, data);
    assert!(run
        .screen
        .calls_on(Surface::Top)
        .any(|call| call.text == *path));

    let arm9 = run_with(&DumpFixture::arm9(), false);
    assert!(arm9.store.files[0].0.starts_with("dumps/arm9/"));
}

#[test]
fn persistence_failure_does_not_stop_the_flow() {
    let fixture = DumpFixture::arm11();
    let total = fixture.to_bytes().len();
    let mut run = run_with(&fixture, true);

    assert_eq!(ReportOutcome::Processed, run.outcome);
    assert!(run.power.powered_off);
    assert!(run.screen.calls.iter().any(|call| {
        call.color == Color::Red && call.text == "Error writing the dump file"
    }));
    assert!(!run
        .screen
        .calls
        .iter()
        .any(|call| call.text == "You can find a dump in the following file:"));

    // The dump is still consumed.
    let mut consumed = vec![0xFFu8; total];
    run.memory
        .read_8(run.layout.dump_header_address, &mut consumed)
        .unwrap();
    assert_eq!(vec![0u8; total], consumed);
}
