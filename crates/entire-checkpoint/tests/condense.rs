//! Condensation flow against a real on-disk repository.

use std::io::Write;
use std::path::PathBuf;

use entire_checkpoint::condense::{
    condense, list_checkpoint_infos, read_checkpoint_info, read_full_transcript, CondenseOptions,
    Summarizer,
};
use entire_checkpoint::rewind::{logs_only_points, restore_logs_only};
use entire_checkpoint::shadow::shadow_ref_for;
use entire_checkpoint::CheckpointStore;
use entire_core::hash::sha256_hex;
use entire_core::paths::{checkpoint_shard_path, metadata_ref_name, shadow_ref_name};
use entire_core::trailers;
use entire_core::CheckpointId;
use entire_git::Repository;
use entire_session::{AgentKind, State, StateStore};
use time::OffsetDateTime;

struct Fixture {
    tmp: tempfile::TempDir,
    root: PathBuf,
    repo: Repository,
    state_store: StateStore,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("repo");
    std::fs::create_dir_all(&root).unwrap();
    let raw = git2::Repository::init(&root).unwrap();
    let mut config = raw.config().unwrap();
    config.set_str("user.name", "Test").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();
    drop(config);
    drop(raw);
    std::fs::write(root.join("README.md"), "readme\n").unwrap();
    let repo = Repository::open(&root).unwrap();
    repo.commit_workdir("initial").unwrap();
    let state_store = StateStore::new(&repo.common_dir());
    Fixture {
        tmp,
        root,
        repo,
        state_store,
    }
}

impl Fixture {
    fn new_session(&self, id: &str) -> State {
        let state = State::new(
            id,
            AgentKind::ClaudeCode,
            self.repo.head_commit().unwrap(),
            self.root.to_string_lossy().into_owned(),
            None,
            OffsetDateTime::now_utc(),
        );
        self.state_store.save(&state).unwrap();
        state
    }

    fn transcript(&self, name: &str, lines: &[String]) -> PathBuf {
        let path = self.tmp.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    /// Write `content` into `file` and checkpoint it as one agent turn.
    fn checkpoint_turn(
        &self,
        state: &mut State,
        transcript_name: &str,
        lines: &[String],
        file: &str,
        content: &str,
    ) {
        std::fs::write(self.root.join(file), content).unwrap();
        let transcript = self.transcript(transcript_name, lines);
        let store = CheckpointStore::new(&self.repo, &self.state_store);
        store.save_changes(state, &transcript).unwrap().unwrap();
    }
}

fn prompt_line(uuid: &str, text: &str) -> String {
    format!(r#"{{"type":"user","uuid":"{uuid}","message":{{"content":"{text}"}}}}"#)
}

fn edit_line(fixture: &Fixture, uuid: &str, file: &str) -> String {
    let abs = fixture.root.join(file);
    format!(
        r#"{{"type":"assistant","uuid":"{uuid}","message":{{"content":[{{"type":"text","text":"wrote it"}},{{"type":"tool_use","name":"Write","input":{{"file_path":"{}"}}}}]}}}}"#,
        abs.to_string_lossy()
    )
}

#[test]
fn condense_writes_complete_sharded_entry() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-entry");
    let lines = vec![
        prompt_line("u1", "add function foo"),
        edit_line(&f, "a1", "main.py"),
    ];
    f.checkpoint_turn(&mut state, "t.jsonl", &lines, "main.py", "def foo():\n    pass\n");

    let outcome = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .expect("condensation produces an entry");

    let id = &outcome.checkpoint_id;
    assert_eq!(outcome.checkpoints_count, 1);
    assert_eq!(outcome.files_touched, vec!["main.py"]);

    // All entry files exist at the sharded path.
    let tip = f.repo.ref_target(&metadata_ref_name()).unwrap().unwrap();
    let shard = checkpoint_shard_path(id);
    for name in [
        "metadata.json",
        "full.jsonl",
        "content_hash.txt",
        "prompt.txt",
        "context.md",
        "summary.txt",
    ] {
        assert!(
            f.repo
                .read_blob(&tip, &format!("{shard}/{name}"))
                .unwrap()
                .is_some(),
            "missing {name}"
        );
    }

    // Invariant I3: stored hash equals sha-256 of full.jsonl.
    let full = f
        .repo
        .read_blob(&tip, &format!("{shard}/full.jsonl"))
        .unwrap()
        .unwrap();
    let stored = f
        .repo
        .read_blob(&tip, &format!("{shard}/content_hash.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(stored).unwrap(), sha256_hex(&full));

    // prompt.txt carries the user prompt; summary falls back to it.
    let prompt = f
        .repo
        .read_blob(&tip, &format!("{shard}/prompt.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(prompt).unwrap(), "add function foo");

    // The session reserved the id and advanced its transcript cursor.
    assert_eq!(
        state.pending_checkpoint_id.as_deref(),
        Some(id.as_str())
    );
    assert_eq!(state.checkpoint_transcript_start, 2);
    assert!(state.prompt_attributions.is_empty());
}

#[test]
fn condense_reuses_pending_id_without_new_commit() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-reuse");
    let lines = vec![
        prompt_line("u1", "add function foo"),
        edit_line(&f, "a1", "main.py"),
    ];
    f.checkpoint_turn(&mut state, "t.jsonl", &lines, "main.py", "x = 1\n");

    let first = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();
    let tip_after_first = f.repo.ref_target(&metadata_ref_name()).unwrap();

    // A second condensation (aborted commit retried, or amend with the
    // shadow still present) reuses the reserved id verbatim.
    let second = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(second.checkpoint_id, first.checkpoint_id);
    assert!(second.metadata_commit.is_none());
    assert_eq!(f.repo.ref_target(&metadata_ref_name()).unwrap(), tip_after_first);
}

#[test]
fn condense_nothing_returns_none() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-none");
    let outcome =
        condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default()).unwrap();
    assert!(outcome.is_none());
    // The session survives: nothing asked for a discard.
    assert!(f.state_store.load("2026-08-01-none").unwrap().is_some());
}

#[test]
fn discard_if_no_files_drops_session_and_ref() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-discard");

    // A transcript-only checkpoint: conversation happened, no files.
    let lines = vec![prompt_line("u1", "just a question")];
    let transcript = f.transcript("t.jsonl", &lines);
    let store = CheckpointStore::new(&f.repo, &f.state_store);
    store.save_changes(&mut state, &transcript).unwrap().unwrap();
    let shadow_ref = shadow_ref_for(&state);
    assert!(f.repo.ref_target(&shadow_ref).unwrap().is_some());

    let outcome = condense(
        &f.repo,
        &f.state_store,
        &mut state,
        &CondenseOptions {
            discard_if_no_files: true,
            summarizer: None,
        },
    )
    .unwrap();
    assert!(outcome.is_none());
    assert!(f.repo.ref_target(&shadow_ref).unwrap().is_none());
    assert!(f.state_store.load("2026-08-01-discard").unwrap().is_none());
}

#[test]
fn successive_condensations_chain_and_accumulate() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-chain");

    let lines1 = vec![prompt_line("u1", "first"), edit_line(&f, "a1", "one.py")];
    f.checkpoint_turn(&mut state, "t.jsonl", &lines1, "one.py", "one = 1\n");
    let first = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();

    // The user commit lands; the shadow ref is finalized away and the
    // next turn starts a new chain on the new HEAD.
    f.repo.delete_ref(&shadow_ref_for(&state)).unwrap();
    f.repo.commit_workdir("user commit one").unwrap();

    let lines2 = vec![
        prompt_line("u1", "first"),
        edit_line(&f, "a1", "one.py"),
        prompt_line("u2", "second"),
        edit_line(&f, "a2", "two.py"),
    ];
    f.checkpoint_turn(&mut state, "t.jsonl", &lines2, "two.py", "two = 2\n");
    let second = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();

    assert_ne!(first.checkpoint_id, second.checkpoint_id);

    // Both entries remain addressable from the metadata tip.
    let infos = list_checkpoint_infos(&f.repo).unwrap();
    assert_eq!(infos.len(), 2);

    // The second chains to the first and accumulates its transcript.
    let info = read_checkpoint_info(&f.repo, &second.checkpoint_id)
        .unwrap()
        .unwrap();
    assert_eq!(info.parent_checkpoint_id.as_ref(), Some(&first.checkpoint_id));
    let full = read_full_transcript(&f.repo, &second.checkpoint_id)
        .unwrap()
        .unwrap();
    assert!(full.contains("first"));
    assert!(full.contains("second"));
    let first_full = read_full_transcript(&f.repo, &first.checkpoint_id)
        .unwrap()
        .unwrap();
    assert!(full.starts_with(&first_full), "full.jsonl is append-only across condensations");
}

#[test]
fn condensing_a_task_chain_keeps_the_task_marker() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-task");
    std::fs::write(f.root.join("task.py"), "t = 1\n").unwrap();
    let lines = vec![
        prompt_line("u1", "run the subtask"),
        edit_line(&f, "a1", "task.py"),
    ];
    let transcript = f.transcript("t.jsonl", &lines);
    let store = CheckpointStore::new(&f.repo, &f.state_store);
    store
        .save_task_checkpoint(&mut state, "toolu_042", &transcript)
        .unwrap()
        .unwrap();

    let outcome = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();
    let info = read_checkpoint_info(&f.repo, &outcome.checkpoint_id)
        .unwrap()
        .unwrap();
    assert!(info.is_task);
    assert_eq!(info.tool_use_id.as_deref(), Some("toolu_042"));
}

#[test]
fn mixed_chain_condenses_without_task_marker() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-mixed");
    let store = CheckpointStore::new(&f.repo, &f.state_store);

    std::fs::write(f.root.join("m.py"), "m = 1\n").unwrap();
    let lines = vec![prompt_line("u1", "subtask"), edit_line(&f, "a1", "m.py")];
    let transcript = f.transcript("t.jsonl", &lines);
    store
        .save_task_checkpoint(&mut state, "toolu_007", &transcript)
        .unwrap()
        .unwrap();

    std::fs::write(f.root.join("m.py"), "m = 2\n").unwrap();
    let lines = vec![
        prompt_line("u1", "subtask"),
        edit_line(&f, "a1", "m.py"),
        prompt_line("u2", "now the main turn"),
        edit_line(&f, "a2", "m.py"),
    ];
    let transcript = f.transcript("t.jsonl", &lines);
    store.save_changes(&mut state, &transcript).unwrap().unwrap();

    let outcome = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(outcome.checkpoints_count, 2);
    let info = read_checkpoint_info(&f.repo, &outcome.checkpoint_id)
        .unwrap()
        .unwrap();
    assert!(!info.is_task);
    assert!(info.tool_use_id.is_none());
}

#[test]
fn configured_summarizer_writes_summary() {
    struct FixedSummarizer;
    impl Summarizer for FixedSummarizer {
        fn summarize(&self, _transcript: &str) -> Option<String> {
            Some("a tidy summary".to_string())
        }
    }

    let f = fixture();
    let mut state = f.new_session("2026-08-01-summ");
    let lines = vec![prompt_line("u1", "do work"), edit_line(&f, "a1", "w.py")];
    f.checkpoint_turn(&mut state, "t.jsonl", &lines, "w.py", "w = 1\n");

    let outcome = condense(
        &f.repo,
        &f.state_store,
        &mut state,
        &CondenseOptions {
            discard_if_no_files: false,
            summarizer: Some(&FixedSummarizer),
        },
    )
    .unwrap()
    .unwrap();

    let tip = f.repo.ref_target(&metadata_ref_name()).unwrap().unwrap();
    let shard = checkpoint_shard_path(&outcome.checkpoint_id);
    let summary = f
        .repo
        .read_blob(&tip, &format!("{shard}/summary.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(summary).unwrap(), "a tidy summary");
}

#[test]
fn logs_only_point_restores_transcript() {
    let f = fixture();
    let claude_dir = f.tmp.path().join("claude-projects");
    std::env::set_var("ENTIRE_TEST_CLAUDE_PROJECT_DIR", &claude_dir);

    let mut state = f.new_session("2026-08-01-logs");
    let lines = vec![prompt_line("u1", "make it"), edit_line(&f, "a1", "made.py")];
    f.checkpoint_turn(&mut state, "t.jsonl", &lines, "made.py", "made = 1\n");
    let outcome = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();

    // The user commit carries the trailer; the shadow is finalized away.
    let message = trailers::append_trailer(
        "make it",
        trailers::CHECKPOINT_TRAILER,
        outcome.checkpoint_id.as_str(),
    );
    f.repo.commit_workdir(&message).unwrap();
    f.repo.delete_ref(&shadow_ref_for(&state)).unwrap();

    let points = logs_only_points(&f.repo, 10).unwrap();
    assert_eq!(points.len(), 1);
    assert!(points[0].is_logs_only);
    assert_eq!(points[0].checkpoint_id.as_ref(), Some(&outcome.checkpoint_id));

    let dest = restore_logs_only(&f.repo, &points[0]).unwrap();
    assert!(dest.starts_with(&claude_dir));
    assert_eq!(dest.file_name().unwrap().to_str().unwrap(), "logs.jsonl");
    let restored = std::fs::read_to_string(&dest).unwrap();
    assert!(restored.contains("make it"));

    std::env::remove_var("ENTIRE_TEST_CLAUDE_PROJECT_DIR");
}

#[test]
fn worktree_isolation_by_ref_name_not_id() {
    // Parallel worktrees on the same base get distinct shadow refs; the
    // checkpoint id depends only on session, base, index and transcript.
    let base = "0123456789abcdef0123456789abcdef01234567";
    let main_ref = shadow_ref_name(base, None);
    let linked_ref = shadow_ref_name(base, Some("feat-x"));
    assert_ne!(main_ref, linked_ref);

    let hash = sha256_hex(b"same transcript");
    let id_main = CheckpointId::derive("2026-08-01-wt", base, 1, &hash);
    let id_linked = CheckpointId::derive("2026-08-01-wt", base, 1, &hash);
    assert_eq!(id_main, id_linked, "identical inputs, identical ids");

    let other_hash = sha256_hex(b"different transcript");
    let id_other = CheckpointId::derive("2026-08-01-wt", base, 1, &other_hash);
    assert_ne!(id_main, id_other, "different transcript content, different ids");
}

#[test]
fn checkpoint_id_is_stable_across_runs() {
    let f = fixture();
    let mut state = f.new_session("2026-08-01-stable");
    let lines = vec![prompt_line("u1", "stable"), edit_line(&f, "a1", "s.py")];
    f.checkpoint_turn(&mut state, "t.jsonl", &lines, "s.py", "s = 1\n");

    // Recompute what condense derives, from the same inputs.
    let shadow_ref = shadow_ref_for(&state);
    let tip = f.repo.ref_target(&shadow_ref).unwrap().unwrap();
    let transcript = f
        .repo
        .read_blob(&tip, ".entire/metadata/2026-08-01-stable/transcript.jsonl")
        .unwrap()
        .unwrap();
    let expected = CheckpointId::derive(
        &state.session_id,
        &state.base_commit,
        state.step_count,
        &sha256_hex(&transcript),
    );

    let outcome = condense(&f.repo, &f.state_store, &mut state, &CondenseOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(outcome.checkpoint_id, expected);
}
