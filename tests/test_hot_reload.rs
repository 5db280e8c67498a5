//! Scenario: touching a watched patch file should cause the graph to be
//! cleared and the new file's nodes to take its place within 400ms.

use std::fs;
use std::time::{Duration, Instant};

use patchline::script::ScriptEngine;
use patchline::watcher::Watcher;

#[test]
fn touching_the_watched_file_reloads_within_400ms() {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "patchline-hot-reload-test-{}.lua",
        std::process::id()
    ));
    fs::write(&path, "sound(osc(1, 440, Sine)):play()").unwrap();

    let mut engine = ScriptEngine::new(8).unwrap();
    assert!(engine.run_file(&path));
    assert_eq!(engine.snapshot_handle().load().sinked_nodes.len(), 1);

    let watcher = Watcher::spawn(&path).unwrap();

    // Give the filesystem clock a moment, then write a patch with two sinks.
    std::thread::sleep(Duration::from_millis(20));
    fs::write(
        &path,
        "sound(osc(1, 220, Sine)):play()\nsound(osc(1, 330, Sine)):play()",
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_millis(400);
    let mut reloaded = false;
    while Instant::now() < deadline {
        if watcher.try_recv().is_some() {
            assert!(engine.reload(&path).unwrap());
            reloaded = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(reloaded, "watcher did not signal a reload within 400ms");
    assert_eq!(engine.snapshot_handle().load().sinked_nodes.len(), 2);

    fs::remove_file(&path).ok();
}

#[test]
fn reload_clears_nodes_even_when_the_new_file_fails_to_parse() {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "patchline-hot-reload-broken-{}.lua",
        std::process::id()
    ));
    fs::write(&path, "sound(osc(1, 440, Sine)):play()").unwrap();

    let mut engine = ScriptEngine::new(8).unwrap();
    assert!(engine.run_file(&path));
    assert_eq!(engine.snapshot_handle().load().sinked_nodes.len(), 1);

    fs::write(&path, "this is not ) valid lua (((").unwrap();
    let ok = engine.reload(&path).unwrap();

    assert!(!ok, "a syntax error should be reported as a failed reload");
    assert_eq!(
        engine.snapshot_handle().load().sinked_nodes.len(),
        0,
        "the graph should still be cleared even though the new file failed"
    );

    fs::remove_file(&path).ok();
}
