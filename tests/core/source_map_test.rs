//! Source-map translation, including the breakpoint path: a `.ts` request
//! stays keyed to the `.ts` file in the catalogue while the wire call
//! targets the compiled location.

#[path = "../helpers/fake_inspector.rs"]
mod fake_inspector;

use debugger_cdp::debug::{DebugSession, SessionState, SessionTarget};
use debugger_cdp::source_map::{CompiledLocation, SourceLocation, SourceMapManager};
use fake_inspector::FakeInspector;
use std::sync::Arc;
use std::time::Duration;

// Identity-shaped tsc map: compiled line n maps to source line n of app.ts.
const MAP_JSON: &str = r#"{"version":3,"file":"app.js","sources":["app.ts"],"names":["greet","count"],"mappings":"AAAAA;AACAC;AACA;AACA;AACA;AACA;AACA;AACA"}"#;

fn write_fixture(dir: &tempfile::TempDir) -> (String, String) {
    let js = dir.path().join("app.js");
    let ts = dir.path().join("app.ts");
    std::fs::write(&js, "function g(){}\nvar c=0;\ng();\nc++;\nc++;\nc++;\nc++;\nc++;\n").unwrap();
    std::fs::write(&ts, "function greet(){}\nlet count=0;\ngreet();\ncount++;\ncount++;\ncount++;\ncount++;\ncount++;\n").unwrap();
    std::fs::write(dir.path().join("app.js.map"), MAP_JSON).unwrap();
    (
        js.to_str().unwrap().to_string(),
        ts.to_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn test_round_trip_stays_within_two_lines() {
    let dir = tempfile::tempdir().unwrap();
    let (js, _ts) = write_fixture(&dir);
    let manager = SourceMapManager::new();

    for line in 1..=8u32 {
        let source = manager
            .map_compiled_to_source(&CompiledLocation {
                file: js.clone(),
                line,
                column: 0,
            })
            .await
            .expect("forward mapping");
        assert!(source.file.ends_with("app.ts"));

        let back = manager
            .map_source_to_compiled(&source)
            .await
            .expect("reverse mapping");
        assert_eq!(back.file, js);
        assert!(
            back.line.abs_diff(line) <= 2,
            "line {} came back as {}",
            line,
            back.line
        );
    }
}

#[tokio::test]
async fn test_name_translation() {
    let dir = tempfile::tempdir().unwrap();
    let (js, _ts) = write_fixture(&dir);
    let manager = SourceMapManager::new();

    assert_eq!(
        manager.map_variable_name(&js, "g", 1, 0).await.as_deref(),
        Some("greet")
    );
    assert_eq!(
        manager.map_variable_name(&js, "c", 2, 0).await.as_deref(),
        Some("count")
    );

    let names = manager.get_variable_names_at_location(&js, 1, 0).await;
    assert_eq!(names, vec!["greet".to_string()]);
}

#[tokio::test]
async fn test_ts_breakpoint_translates_on_wire_only() {
    let dir = tempfile::tempdir().unwrap();
    let (js, ts) = write_fixture(&dir);

    let server = FakeInspector::start().await;
    let session = Arc::new(DebugSession::new(SessionTarget::Attach {
        ws_url: server.ws_url.clone(),
    }));
    session.clone().start().await.unwrap();
    for _ in 0..50 {
        if session.get_state() == SessionState::Paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let id = session.set_breakpoint(&ts, 4, None).await.unwrap();

    // Catalogue keeps the user's path.
    let bp = session.get_breakpoint(&id).unwrap();
    assert_eq!(bp.file(), Some(ts.as_str()));
    assert_eq!(bp.line(), Some(4));
    assert!(bp.cdp_breakpoint_id.is_some());
    assert_eq!(session.get_breakpoints_by_file(&ts).len(), 1);

    // The wire saw the compiled location.
    let requests = server.state.requests_for("Debugger.setBreakpointByUrl");
    assert_eq!(requests.len(), 1);
    let url = requests[0]["params"]["url"].as_str().unwrap();
    assert_eq!(url, format!("file://{}", js));
    assert_eq!(requests[0]["params"]["lineNumber"], 3);

    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_js_breakpoint_is_not_translated() {
    let dir = tempfile::tempdir().unwrap();
    let (js, _ts) = write_fixture(&dir);

    let server = FakeInspector::start().await;
    let session = Arc::new(DebugSession::new(SessionTarget::Attach {
        ws_url: server.ws_url.clone(),
    }));
    session.clone().start().await.unwrap();
    for _ in 0..50 {
        if session.get_state() == SessionState::Paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    session.set_breakpoint(&js, 2, None).await.unwrap();

    let requests = server.state.requests_for("Debugger.setBreakpointByUrl");
    assert_eq!(
        requests[0]["params"]["url"].as_str().unwrap(),
        format!("file://{}", js)
    );
    assert_eq!(requests[0]["params"]["lineNumber"], 1);

    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_paused_frames_map_back_to_source() {
    let dir = tempfile::tempdir().unwrap();
    let (js, _ts) = write_fixture(&dir);

    let server = FakeInspector::start().await;
    *server.state.frames.lock().unwrap() = serde_json::json!([{
        "callFrameId": "frame-0",
        "functionName": "greet",
        "location": {"scriptId": "1", "lineNumber": 2, "columnNumber": 0},
        "url": format!("file://{}", js),
        "scopeChain": [],
    }]);

    let session = Arc::new(DebugSession::new(SessionTarget::Attach {
        ws_url: server.ws_url.clone(),
    }));
    session.clone().start().await.unwrap();
    for _ in 0..50 {
        if session.get_state() == SessionState::Paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Async variant maps through the source map…
    let mapped = session.get_call_stack().await.unwrap();
    assert!(mapped[0].file.ends_with("app.ts"));
    assert_eq!(mapped[0].line, 3);

    // …the sync variant reports the compiled location.
    let raw = session.get_call_stack_sync().unwrap();
    assert_eq!(raw[0].file, js);
    assert_eq!(raw[0].line, 3);

    session.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_source_location_round_trip_types() {
    let loc = SourceLocation {
        file: "/src/app.ts".to_string(),
        line: 10,
        column: 0,
    };
    let text = serde_json::to_string(&loc).unwrap();
    let parsed: SourceLocation = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, loc);
}
