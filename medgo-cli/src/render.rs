//! Plain-text views for the terminal.

use medgo_core::models::{SessionMetadata, UploadResource, UploadStatus};
use medgo_core::{NodeRun, PathDag, PathTreeNode, PollPhase, PollState, StopReason};
use std::fmt::Write;

const LABEL_WIDTH: usize = 24;

// ============================================================================
// Sessions
// ============================================================================

/// One line per session, active first, marked with `*`.
pub fn sessions(list: &[SessionMetadata], active: &str) -> String {
    let mut out = String::new();
    for meta in list {
        let marker = if meta.id == active { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{} {}  {:>3} msgs  {}",
            marker, meta.id, meta.message_count, meta.title
        );
    }
    out
}

// ============================================================================
// Path views
// ============================================================================

pub fn runs(runs: &[NodeRun]) -> String {
    if runs.is_empty() {
        return "No node runs recorded.\n".to_string();
    }

    let mut out = String::new();
    for run in runs {
        let duration = match run.duration_ms {
            Some(ms) => format!("{} ms", ms),
            None => "-".to_string(),
        };
        let stream = if run.has_stream { "  [stream]" } else { "" };
        let _ = writeln!(
            out,
            "{:<width$} {:>10}  {}{}",
            run.node,
            duration,
            run.run_id,
            stream,
            width = LABEL_WIDTH
        );
    }
    out
}

pub fn dag(dag: &PathDag) -> String {
    if dag.nodes.is_empty() {
        return "No path recorded.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", dag.chain().join(" -> "));
    for node in &dag.nodes {
        let _ = writeln!(
            out,
            "  {:<width$} {:<8} runs={}",
            node.label,
            node.kind.as_str(),
            node.run_ids.len(),
            width = LABEL_WIDTH
        );
    }
    for edge in &dag.edges {
        let _ = writeln!(out, "  {} -> {}", edge.source, edge.target);
    }
    out
}

pub fn tree(root: &PathTreeNode) -> String {
    let mut out = String::new();
    write_tree(&mut out, root, 0);
    out
}

fn write_tree(out: &mut String, node: &PathTreeNode, depth: usize) {
    let _ = write!(out, "{}{}", "  ".repeat(depth), node.label);
    if depth > 0 {
        let _ = write!(out, " ({})", node.kind.as_str());
        if node.start_count > 1 {
            let _ = write!(out, " x{}", node.start_count);
        }
    }
    out.push('\n');
    for child in &node.children {
        write_tree(out, child, depth + 1);
    }
}

// ============================================================================
// Uploads
// ============================================================================

fn status_label(status: UploadStatus) -> &'static str {
    match status {
        UploadStatus::Stored => "stored",
        UploadStatus::Indexing => "indexing",
        UploadStatus::Indexed => "indexed",
        UploadStatus::Failed => "failed",
        UploadStatus::Unknown => "unknown",
    }
}

pub fn uploads(items: &[UploadResource]) -> String {
    if items.is_empty() {
        return "No uploads.\n".to_string();
    }

    let mut out = String::new();
    for item in items {
        let name = item.original_filename.as_deref().unwrap_or(&item.id);
        let _ = write!(out, "{:<10} {}", status_label(item.status), name);
        if let Some(err) = &item.error_message {
            let _ = write!(out, "  ({})", err);
        }
        out.push('\n');
    }
    out
}

/// One status line per published poll state.
pub fn poll_line(state: &PollState) -> String {
    let pending = state
        .items
        .iter()
        .filter(|item| !item.status.is_terminal())
        .count();
    let phase = match state.phase {
        PollPhase::Polling => "polling",
        PollPhase::Idle => "idle",
        PollPhase::ErrorBackoff => "retrying",
    };

    let mut line = format!(
        "[{}] fetch #{}: {} uploads, {} pending",
        phase,
        state.fetches,
        state.items.len(),
        pending
    );
    if let Some(err) = &state.error {
        let _ = write!(line, ", last error: {}", err);
    }
    line
}

pub fn stop_reason(reason: &StopReason) -> String {
    match reason {
        StopReason::AllTerminal => "All uploads finished processing.".to_string(),
        StopReason::MaxDuration => "Stopped watching: time limit reached.".to_string(),
        StopReason::RetriesExhausted(err) => format!("Gave up after repeated failures: {}", err),
        StopReason::Cancelled => "Stopped.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medgo_core::models::PathEvent;
    use medgo_core::{aggregate_node_runs, build_dag, build_path_tree, PollError};
    use serde_json::json;

    fn path() -> Vec<PathEvent> {
        [
            json!({"node": "router", "edge": "on_chain_start", "run_id": "r1", "ts": "2024-05-01T10:00:00Z"}),
            json!({"node": "router", "edge": "on_chain_end", "run_id": "r1", "ts": "2024-05-01T10:00:00.250Z"}),
            json!({"node": "context_build", "edge": "on_chain_start", "run_id": "r2", "ts": "2024-05-01T10:00:01Z"}),
            json!({"node": "router", "edge": "on_chain_start", "run_id": "r3", "ts": "2024-05-01T10:00:02Z"}),
        ]
        .iter()
        .filter_map(PathEvent::from_value)
        .collect()
    }

    fn upload(id: &str, status: UploadStatus) -> UploadResource {
        UploadResource {
            id: id.to_string(),
            status,
            original_filename: None,
            error_message: None,
            created_at: None,
        }
    }

    // ========================================================================
    // TEST 1: session list marks the active one
    // ========================================================================
    #[test]
    fn test_sessions_marks_active() {
        let list = vec![
            SessionMetadata {
                id: "a".to_string(),
                title: "Chest pain".to_string(),
                last_activity: 2,
                message_count: 4,
                first_message: None,
            },
            SessionMetadata {
                id: "b".to_string(),
                title: "New conversation".to_string(),
                last_activity: 1,
                message_count: 0,
                first_message: None,
            },
        ];
        let text = sessions(&list, "a");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "* a    4 msgs  Chest pain");
        assert!(lines[1].starts_with("  b"));
    }

    // ========================================================================
    // TEST 2: path views
    // ========================================================================
    #[test]
    fn test_runs_show_duration() {
        let text = runs(&aggregate_node_runs(&path()));
        let first = text.lines().next().unwrap();
        assert!(first.starts_with("router"));
        assert!(first.contains("250 ms"));
        assert!(first.ends_with("r1"));
        assert_eq!(runs(&[]), "No node runs recorded.\n");
    }

    #[test]
    fn test_dag_lists_chain_and_edges() {
        let text = dag(&build_dag(&path()));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "router -> context_build");
        assert!(lines.contains(&"  router -> context_build"));
        assert!(lines.contains(&"  context_build -> router"));
    }

    #[test]
    fn test_tree_indents_children() {
        let text = tree(&build_path_tree(&path(), Some("medgo")));
        assert_eq!(
            text,
            "medgo\n  router (router)\n    context_build (context)\n      router (router)\n"
        );
    }

    // ========================================================================
    // TEST 3: upload status
    // ========================================================================
    #[test]
    fn test_uploads_prefer_filename() {
        let mut labs = upload("u1", UploadStatus::Failed);
        labs.original_filename = Some("labs.pdf".to_string());
        labs.error_message = Some("unreadable".to_string());
        let text = uploads(&[labs, upload("u2", UploadStatus::Indexing)]);
        assert_eq!(text, "failed     labs.pdf  (unreadable)\nindexing   u2\n");
    }

    #[test]
    fn test_poll_line_counts_pending() {
        let state = PollState {
            scope: "u-1".to_string(),
            phase: PollPhase::ErrorBackoff,
            items: vec![
                upload("a", UploadStatus::Indexed),
                upload("b", UploadStatus::Stored),
            ],
            error: Some(PollError::with_status("bad gateway", 502)),
            fetches: 3,
            stopped: None,
        };
        let line = poll_line(&state);
        assert!(line.starts_with("[retrying] fetch #3: 2 uploads, 1 pending, last error: "));
        assert!(line.contains("bad gateway"));
    }
}
