//! Catalogue behavior over operation sequences: counts, identity, hit-count
//! gating.

use debugger_cdp::debug::{BreakpointManager, HitCountCondition, HitCountOp};

#[test]
fn test_count_tracks_creates_minus_removes() {
    let mut mgr = BreakpointManager::new();
    let mut ids = Vec::new();

    for line in 1..=10 {
        ids.push(mgr.create_breakpoint("/a.js", line, None));
    }
    assert_eq!(mgr.get_breakpoint_count(), 10);

    for id in ids.iter().take(4) {
        assert!(mgr.remove_breakpoint(id));
    }
    assert_eq!(mgr.get_breakpoint_count(), 6);

    // Removing already-removed ids changes nothing.
    for id in ids.iter().take(4) {
        assert!(!mgr.remove_breakpoint(id));
    }
    assert_eq!(mgr.get_breakpoint_count(), 6);
}

#[test]
fn test_get_returns_entry_until_removed() {
    let mut mgr = BreakpointManager::new();
    let id = mgr.create_breakpoint("/a.js", 10, None);

    let bp = mgr.get_breakpoint(&id).unwrap().clone();
    assert_eq!(bp.id, id);

    assert!(mgr.remove_breakpoint(&id));
    assert!(mgr.get_breakpoint(&id).is_none());
    assert!(!mgr.has_breakpoint(&id));
    assert!(!mgr.remove_breakpoint(&id));
}

#[test]
fn test_by_file_listing() {
    let mut mgr = BreakpointManager::new();
    mgr.create_breakpoint("/a.js", 10, None);
    mgr.create_breakpoint("/b.js", 20, None);
    mgr.create_logpoint("/a.js", 30, "here");

    let for_a = mgr.get_breakpoints_by_file("/a.js");
    assert_eq!(for_a.len(), 2);
    assert!(for_a.iter().all(|bp| bp.file() == Some("/a.js")));
    assert!(mgr.get_breakpoints_by_file("/c.js").is_empty());
}

#[test]
fn test_hit_count_modulo_scenario() {
    let mut mgr = BreakpointManager::new();
    let id = mgr.create_breakpoint("/a.js", 1, None);
    mgr.set_hit_count_condition(
        &id,
        Some(HitCountCondition {
            op: HitCountOp::Mod,
            value: 3,
        }),
    );

    let mut observed = vec![mgr.should_pause_on_hit_count(&id)];
    for _ in 0..7 {
        mgr.increment_hit_count(&id);
        observed.push(mgr.should_pause_on_hit_count(&id));
    }

    assert_eq!(
        observed,
        vec![true, false, false, true, false, false, true, false]
    );
}

#[test]
fn test_hit_count_threshold_conditions() {
    let mut mgr = BreakpointManager::new();
    let id = mgr.create_breakpoint("/a.js", 1, None);

    // Pause only after the fifth hit.
    mgr.set_hit_count_condition(
        &id,
        Some(HitCountCondition {
            op: HitCountOp::Gt,
            value: 5,
        }),
    );
    for _ in 0..5 {
        mgr.increment_hit_count(&id);
    }
    assert!(!mgr.should_pause_on_hit_count(&id));
    mgr.increment_hit_count(&id);
    assert!(mgr.should_pause_on_hit_count(&id));

    // Dropping the condition reverts to always-pause.
    mgr.set_hit_count_condition(&id, None);
    assert!(mgr.should_pause_on_hit_count(&id));
}

#[test]
fn test_toggle_identity_over_many_flips() {
    let mut mgr = BreakpointManager::new();
    let id = mgr.create_breakpoint("/f.js", 42, Some("x>0".to_string()));

    for flips in 1..=6 {
        mgr.toggle_breakpoint(&id);
        let bp = mgr.get_breakpoint(&id).unwrap();
        assert_eq!(bp.enabled, flips % 2 == 0);
        assert_eq!(bp.id, id);
        assert_eq!(bp.file(), Some("/f.js"));
        assert_eq!(bp.line(), Some(42));
        assert_eq!(bp.condition(), Some("x>0"));
    }
}
