use jobloom::document::Workflow;
use jobloom::events::ResultEvent;
use rustc_hash::FxHashMap;

/// Assert `earlier` appears before `later` in the captured chunks.
pub fn assert_precedes(chunks: &[String], earlier: &str, later: &str) {
    let first = chunks
        .iter()
        .position(|c| c == earlier)
        .unwrap_or_else(|| panic!("`{earlier}` missing from {chunks:?}"));
    let second = chunks
        .iter()
        .position(|c| c == later)
        .unwrap_or_else(|| panic!("`{later}` missing from {chunks:?}"));
    assert!(
        first < second,
        "`{earlier}` should precede `{later}` in {chunks:?}"
    );
}

/// Find the result log owned by a script id anywhere in a snapshot.
pub fn results_for<'a>(snapshot: &'a Workflow, script_id: &str) -> Option<&'a Vec<ResultEvent>> {
    for event in &snapshot.lifecycle {
        if event.id == script_id {
            return Some(&event.results);
        }
    }
    for job in &snapshot.jobs {
        for event in &job.lifecycle {
            if event.id == script_id {
                return Some(&event.results);
            }
        }
        for step in &job.steps {
            if step.script.id() == script_id {
                return Some(&step.results);
            }
            for event in &step.lifecycle {
                if event.id == script_id {
                    return Some(&event.results);
                }
            }
        }
    }
    None
}

/// Check snapshot fidelity: every snapshot's per-slot result log equals the
/// events with that script id delivered so far, in arrival order.
pub fn assert_snapshot_fidelity(pairs: &[(Workflow, ResultEvent)]) {
    let mut seen: FxHashMap<String, Vec<ResultEvent>> = FxHashMap::default();
    for (snapshot, event) in pairs {
        seen.entry(event.script_id().to_string())
            .or_default()
            .push(event.clone());
        for (script_id, events) in &seen {
            // Job-scoped form requests own no slot; skip ids with no home.
            let Some(results) = results_for(snapshot, script_id) else {
                continue;
            };
            assert_eq!(
                results, events,
                "result log for `{script_id}` diverged from delivered events"
            );
        }
    }
}
