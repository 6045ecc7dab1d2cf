//! Tests for the dispatch façade

use std::sync::{Arc, Mutex};
use std::thread;

use super::*;
use crate::test_utils::{events_of, failing_entry, mock_entry, probe_entry, probe_events, ti84_rom};

fn mock_dispatcher() -> Dispatcher {
    Dispatcher::new(
        BackendCatalog::new()
            .with(mock_entry("rust"))
            .with(mock_entry("cemu")),
    )
}

fn loaded(dispatcher: &Dispatcher) -> SessionHandle {
    let handle = dispatcher.create().unwrap();
    dispatcher.load_rom(handle, &ti84_rom()).unwrap();
    dispatcher.power_on(handle);
    handle
}

// ============================================================================
// Backend selection
// ============================================================================

#[test]
fn test_backend_listing() {
    let dispatcher = mock_dispatcher();
    assert_eq!(dispatcher.available_backends(), vec!["rust", "cemu"]);
    assert_eq!(dispatcher.backend_count(), 2);
    assert_eq!(dispatcher.current_backend(), None);
}

#[test]
fn test_create_selects_default_backend() {
    let dispatcher = Dispatcher::new(
        BackendCatalog::new()
            .with(mock_entry("rust"))
            .with(mock_entry("cemu"))
            .with_default("cemu"),
    );
    dispatcher.create().unwrap();
    assert_eq!(dispatcher.current_backend().as_deref(), Some("cemu"));
}

#[test]
fn test_set_backend_unknown_keeps_state() {
    let dispatcher = mock_dispatcher();
    let handle = loaded(&dispatcher);
    assert_eq!(
        dispatcher.set_backend("nope"),
        Err(EmuError::UnknownBackend("nope".into()))
    );
    assert_eq!(dispatcher.current_backend().as_deref(), Some("rust"));
    assert_eq!(dispatcher.run_cycles(handle, 10), 10);
}

#[test]
fn test_set_backend_invalidates_handle() {
    let dispatcher = mock_dispatcher();
    let handle = loaded(&dispatcher);
    dispatcher.set_backend("cemu").unwrap();

    assert_eq!(dispatcher.current_backend().as_deref(), Some("cemu"));
    assert_eq!(dispatcher.live_session(), None);
    assert_eq!(dispatcher.run_cycles(handle, 10), 0);
    assert_eq!(dispatcher.load_rom(handle, &ti84_rom()), Err(EmuError::InvalidHandle));

    let fresh = dispatcher.create().unwrap();
    assert_ne!(fresh, handle);
}

#[test]
fn test_failed_switch_keeps_backend() {
    let dispatcher = Dispatcher::new(
        BackendCatalog::new()
            .with(mock_entry("rust"))
            .with(failing_entry("cemu")),
    );
    let handle = loaded(&dispatcher);

    assert!(matches!(
        dispatcher.set_backend("cemu"),
        Err(EmuError::SymbolMissing { .. })
    ));
    assert_eq!(dispatcher.current_backend().as_deref(), Some("rust"));
    // The session was ended before the switch was attempted.
    assert_eq!(dispatcher.live_session(), None);
    assert_eq!(dispatcher.run_cycles(handle, 10), 0);
}

#[test]
fn test_create_with_no_loadable_backend() {
    let dispatcher = Dispatcher::new(BackendCatalog::new().with(failing_entry("cemu")));
    assert_eq!(dispatcher.create(), Err(EmuError::NoBackendAvailable));
    assert_eq!(dispatcher.current_backend(), None);
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn test_single_session() {
    let dispatcher = mock_dispatcher();
    let handle = dispatcher.create().unwrap();
    assert_eq!(dispatcher.create(), Err(EmuError::InstanceAlreadyActive));

    dispatcher.destroy(handle);
    assert_eq!(dispatcher.live_session(), None);
    dispatcher.destroy(handle);
    assert!(dispatcher.create().is_ok());
}

#[test]
fn test_mismatched_handle_before_any_backend() {
    let dispatcher = mock_dispatcher();
    let stray = SessionHandle::from_raw(42).unwrap();

    assert_eq!(dispatcher.run_cycles(stray, 100), 0);
    assert_eq!(dispatcher.backlight(stray), 0);
    assert!(!dispatcher.is_lcd_on(stray));
    assert_eq!(dispatcher.save_state_size(stray), 0);
    assert_eq!(dispatcher.framebuffer_size(stray), (0, 0));
    assert_eq!(dispatcher.load_rom(stray, &ti84_rom()), Err(EmuError::InvalidHandle));
    dispatcher.reset(stray);
    dispatcher.set_key(stray, 0, 0, true);

    // No backend was selected on behalf of the stray handle.
    assert_eq!(dispatcher.current_backend(), None);
}

#[test]
fn test_lifecycle() {
    let dispatcher = mock_dispatcher();
    let handle = loaded(&dispatcher);

    assert_eq!(dispatcher.run_cycles(handle, 1000), 1000);
    assert_eq!(dispatcher.backlight(handle), 0xFF);
    assert!(dispatcher.is_lcd_on(handle));
    dispatcher.set_key(handle, 6, 0, true);
    dispatcher.reset(handle);
    assert_eq!(dispatcher.framebuffer_size(handle), (320, 240));
}

#[test]
fn test_load_rom_errors_map_to_emu_error() {
    let dispatcher = mock_dispatcher();
    let handle = dispatcher.create().unwrap();
    assert_eq!(dispatcher.load_rom(handle, &[]), Err(EmuError::EmptyOrInvalidInput));
    assert_eq!(dispatcher.run_cycles(handle, 10), 0);
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn test_framebuffer_closure_sees_pixels() {
    let dispatcher = mock_dispatcher();
    let handle = loaded(&dispatcher);
    dispatcher.run_cycles(handle, 7);

    let first = dispatcher.framebuffer(handle, |view| view.pixels.map(|p| (p.len(), p[0])));
    assert_eq!(first, Some((320 * 240, 0xFF00_0007)));

    let stray = SessionHandle::from_raw(handle.get() + 1).unwrap();
    assert!(dispatcher.framebuffer(stray, |view| view.pixels.is_none()));
}

#[test]
fn test_copy_framebuffer() {
    let dispatcher = mock_dispatcher();
    let handle = dispatcher.create().unwrap();

    let mut frame = vec![0u32; 320 * 240];
    assert_eq!(
        dispatcher.copy_framebuffer(handle, &mut frame),
        Err(EmuError::NotInitialized)
    );

    dispatcher.load_rom(handle, &ti84_rom()).unwrap();
    dispatcher.run_cycles(handle, 3);
    assert_eq!(dispatcher.copy_framebuffer(handle, &mut frame), Ok((320, 240)));
    assert!(frame.iter().all(|&p| p == 0xFF00_0003));

    let mut small = vec![0u32; 100];
    assert_eq!(
        dispatcher.copy_framebuffer(handle, &mut small),
        Err(EmuError::BufferTooSmall)
    );
}

// ============================================================================
// Save states
// ============================================================================

#[test]
fn test_save_state_vec_round_trip() {
    let dispatcher = mock_dispatcher();
    let handle = loaded(&dispatcher);
    dispatcher.run_cycles(handle, 250);

    let image = dispatcher.save_state_vec(handle).unwrap();
    assert!(image.len() < dispatcher.save_state_size(handle));
    assert_eq!(calc_shared::peek_version(&image), Some(0xCECE_001B));

    dispatcher.run_cycles(handle, 1);
    dispatcher.load_state(handle, &image).unwrap();
    assert_eq!(
        dispatcher.framebuffer(handle, |view| view.pixels.map(|p| p[0])),
        Some(0xFF00_00FA)
    );
}

#[test]
fn test_save_state_errors() {
    let dispatcher = mock_dispatcher();
    let handle = dispatcher.create().unwrap();
    assert_eq!(dispatcher.save_state_vec(handle), Err(EmuError::NotInitialized));

    dispatcher.load_rom(handle, &ti84_rom()).unwrap();
    let mut small = vec![0u8; 64];
    assert_eq!(dispatcher.save_state(handle, &mut small), Err(EmuError::BufferTooSmall));
    assert_eq!(dispatcher.load_state(handle, &[1, 2, 3]), Err(EmuError::DataTooShort));

    let mut wrong = 7u32.to_le_bytes().to_vec();
    wrong.extend_from_slice(&[0u8; 16]);
    assert_eq!(dispatcher.load_state(handle, &wrong), Err(EmuError::VersionMismatch));
}

#[test]
fn test_backend_specific_codes_pass_through() {
    let events = probe_events();
    let dispatcher = Dispatcher::new(BackendCatalog::new().with(probe_entry("probe", &events)));
    let handle = dispatcher.create().unwrap();
    dispatcher.load_rom(handle, &[1]).unwrap();
    assert_eq!(dispatcher.load_state(handle, &[0u8; 16]), Err(EmuError::Unsupported));
    assert_eq!(dispatcher.save_state_vec(handle).unwrap(), b"PROBESTA".to_vec());
    assert!(events_of(&events).contains(&"probe:log_sink".to_string()));
}

// ============================================================================
// Logs
// ============================================================================

#[test]
fn test_backend_logs_reach_ring() {
    let dispatcher = mock_dispatcher();
    let handle = loaded(&dispatcher);
    dispatcher.destroy(handle);

    let lines = dispatcher.drain_logs();
    assert!(lines.iter().any(|l| l.starts_with("loaded ")));
    assert!(lines.iter().any(|l| l == "power on"));
    assert!(lines.iter().any(|l| l == "instance destroyed"));
    assert!(dispatcher.drain_logs().is_empty());
}

#[test]
fn test_log_listener_sees_lines_live() {
    let dispatcher = mock_dispatcher();
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let listener_seen = Arc::clone(&seen);
    dispatcher.set_log_callback(Some(Arc::new(move |line: &str| {
        listener_seen.lock().unwrap().push(line.to_string());
    })));

    let handle = loaded(&dispatcher);
    assert!(seen.lock().unwrap().iter().any(|l| l == "power on"));

    dispatcher.set_log_callback(None);
    dispatcher.destroy(handle);
    assert!(!seen.lock().unwrap().iter().any(|l| l == "instance destroyed"));
    assert!(dispatcher.drain_logs().iter().any(|l| l == "instance destroyed"));
}

#[test]
fn test_log_listener_may_call_back_into_dispatcher() {
    let dispatcher = Arc::new(mock_dispatcher());
    let seen = Arc::new(Mutex::new(Vec::<(String, Option<String>)>::new()));
    let listener_seen = Arc::clone(&seen);
    let weak = Arc::downgrade(&dispatcher);
    dispatcher.set_log_callback(Some(Arc::new(move |line: &str| {
        let current = weak.upgrade().and_then(|d| d.current_backend());
        listener_seen.lock().unwrap().push((line.to_string(), current));
    })));

    let handle = loaded(&dispatcher);
    dispatcher.destroy(handle);

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&("power on".to_string(), Some("rust".to_string()))));
    assert!(seen.contains(&("instance destroyed".to_string(), Some("rust".to_string()))));
}

#[test]
fn test_ring_capacity_from_config() {
    let mut config = HostConfig::default();
    config.logging.ring_capacity = 2;
    let dispatcher = Dispatcher::from_config_with_catalog(
        &config,
        BackendCatalog::new().with(mock_entry("rust")),
    );
    let handle = loaded(&dispatcher);
    dispatcher.destroy(handle);

    assert_eq!(dispatcher.logs().len(), 2);
    assert!(dispatcher.logs().dropped() > 0);
    let lines = dispatcher.drain_logs();
    assert_eq!(lines.last().map(String::as_str), Some("instance destroyed"));
}

#[test]
fn test_scratch_dir_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HostConfig::default();
    config.session.scratch_dir = Some(dir.path().to_path_buf());
    let events = probe_events();
    let probe_events_for_factory = Arc::clone(&events);
    let dispatcher = Dispatcher::from_config_with_catalog(
        &config,
        BackendCatalog::new().with(crate::registry::BackendEntry::builtin("files", move || {
            Ok(Box::new(
                crate::test_utils::ProbeBackend::new("files", &probe_events_for_factory)
                    .with_scratch_support(),
            ) as Box<dyn crate::backend::Backend>)
        })),
    );
    dispatcher.create().unwrap();
    assert!(events_of(&events).contains(&"files:scratch_dir".to_string()));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_switching_while_running_is_serialized() {
    let events = probe_events();
    let dispatcher = Dispatcher::new(
        BackendCatalog::new()
            .with(probe_entry("rust", &events))
            .with(probe_entry("cemu", &events)),
    );
    loaded(&dispatcher);

    thread::scope(|scope| {
        let runner = scope.spawn(|| {
            for _ in 0..200 {
                if let Some(handle) = dispatcher.live_session() {
                    let ran = dispatcher.run_cycles(handle, 10);
                    assert!(ran == 0 || ran == 10);
                    dispatcher.set_key(handle, 1, 1, true);
                    dispatcher.reset(handle);
                }
            }
        });
        let switcher = scope.spawn(|| {
            for i in 0..50 {
                let name = if i % 2 == 0 { "cemu" } else { "rust" };
                dispatcher.set_backend(name).unwrap();
                if let Ok(handle) = dispatcher.create() {
                    let _ = dispatcher.load_rom(handle, &ti84_rom());
                }
            }
        });
        switcher.join().unwrap();
        runner.join().unwrap();
    });

    assert_eq!(dispatcher.current_backend().as_deref(), Some("rust"));
    assert!(dispatcher.live_session().is_some());

    // After an instance drops, the next event under its name must come
    // from a fresh instance, whose first call is the log sink install.
    let recorded = events_of(&events);
    assert!(recorded.iter().filter(|e| e.ends_with(":drop")).count() >= 50);
    for (i, event) in recorded.iter().enumerate() {
        let Some(name) = event.strip_suffix(":drop") else {
            continue;
        };
        let prefix = format!("{name}:");
        if let Some(next) = recorded[i + 1..].iter().find(|e| e.starts_with(&prefix)) {
            assert_eq!(next, &format!("{name}:log_sink"), "call reached {name} after it unloaded");
        }
    }
}
