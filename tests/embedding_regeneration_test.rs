//! Embedding regeneration against a fake embedding service
//!
//! Covers the no-op rerun, per-entry failures, cancellation and the
//! single-run guard.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use pile_lib::ai::EmbeddingService;
use pile_lib::index::EMBEDDINGS_FILE;
use pile_lib::{CancelFlag, EntryDraft, EntryStore, IndexEvent, Pile, PileError, Result};

/// Vector = [length, vowels, 1]; fails for texts containing "FAIL".
#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
    delay: Option<Duration>,
    cancel_on_call: Option<(usize, CancelFlag)>,
}

impl EmbeddingService for CountingEmbedder {
    fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some((at, flag)) = &self.cancel_on_call {
            if call >= *at {
                flag.cancel();
            }
        }
        if text.contains("FAIL") {
            return Err(PileError::Service("Model 'mxbai-embed-large' not found".into()));
        }
        let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
        Ok(vec![text.len() as f32, vowels as f32, 1.0])
    }
}

fn pile_with(bodies: &[&str]) -> (TempDir, Pile, Vec<String>) {
    let temp_dir = TempDir::new().unwrap();
    let pile = Pile::open(temp_dir.path()).unwrap();
    let paths = bodies
        .iter()
        .map(|body| pile.create_entry(EntryDraft::new(*body)).unwrap())
        .collect();
    (temp_dir, pile, paths)
}

#[test]
fn test_second_run_is_a_no_op() {
    let (_dir, pile, paths) = pile_with(&["<p>one</p>", "<p>two</p>", "<p></p>"]);
    let regenerator = pile.embedding_regenerator(CountingEmbedder::default());
    let mut events = pile.index().subscribe();

    let first = pile.regenerate_embeddings(&regenerator, &CancelFlag::new()).unwrap();
    assert_eq!(first.requested, 3);
    assert_eq!(first.embedded, 2);
    assert_eq!(first.skipped_empty, 1);
    assert!(first.failures.is_empty());
    assert_eq!(events.try_recv().unwrap(), IndexEvent::EmbeddingsUpdated { count: 2 });

    let calls = regenerator.progress().snapshot();
    assert_eq!(calls.total, 3);
    assert_eq!(calls.completed, 3);
    assert!(!calls.is_running);

    // Only the empty entry is still missing; nothing new to embed
    let second = pile.regenerate_embeddings(&regenerator, &CancelFlag::new()).unwrap();
    assert_eq!(second.requested, 1);
    assert_eq!(second.embedded, 0);
    assert!(events.try_recv().is_err());

    assert!(pile.index().get(&paths[0]).unwrap().embedding.is_some());
    assert!(pile.store().exists(EMBEDDINGS_FILE));
}

#[test]
fn test_failures_are_reported_per_entry() {
    let (_dir, pile, paths) = pile_with(&["<p>fine</p>", "<p>FAIL here</p>", "<p>also fine</p>"]);
    let regenerator = pile.embedding_regenerator(CountingEmbedder::default());

    let report = pile.regenerate_embeddings(&regenerator, &CancelFlag::new()).unwrap();
    assert_eq!(report.embedded, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, paths[1]);
    assert!(report.failures[0].message.contains("not found"));
    assert!(pile.index().get(&paths[1]).unwrap().embedding.is_none());
}

#[test]
fn test_cancel_leaves_index_untouched() {
    let (_dir, pile, paths) = pile_with(&["<p>a</p>", "<p>b</p>", "<p>c</p>", "<p>d</p>"]);
    let cancel = CancelFlag::new();
    let regenerator = pile.embedding_regenerator(CountingEmbedder {
        cancel_on_call: Some((2, cancel.clone())),
        ..Default::default()
    });
    let before = pile.index().snapshot();

    let result = pile.regenerate_embeddings(&regenerator, &cancel);
    assert!(matches!(result, Err(PileError::Cancelled)));

    assert!(std::sync::Arc::ptr_eq(&before, &pile.index().snapshot()));
    assert!(paths
        .iter()
        .all(|p| pile.index().get(p).unwrap().embedding.is_none()));
    assert!(!pile.store().exists(EMBEDDINGS_FILE));
    assert!(!regenerator.progress().snapshot().is_running);
}

#[test]
fn test_concurrent_run_returns_empty_report() {
    let (_dir, pile, _paths) = pile_with(&["<p>slow one</p>", "<p>slow two</p>", "<p>slow three</p>"]);
    let regenerator = pile.embedding_regenerator(CountingEmbedder {
        delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });

    std::thread::scope(|scope| {
        let first = scope.spawn(|| pile.regenerate_embeddings(&regenerator, &CancelFlag::new()));

        let progress = regenerator.progress();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !progress.snapshot().is_running && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(progress.snapshot().is_running);

        let second = pile.regenerate_embeddings(&regenerator, &CancelFlag::new()).unwrap();
        assert_eq!(second.requested, 0);
        assert_eq!(second.embedded, 0);

        let first = first.join().unwrap().unwrap();
        assert_eq!(first.embedded, 3);
    });
}

#[test]
fn test_edited_entry_is_reembedded_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = {
        let pile = Pile::open(temp_dir.path()).unwrap();
        let path = pile.create_entry(EntryDraft::new("<p>first draft</p>")).unwrap();
        let regenerator = pile.embedding_regenerator(CountingEmbedder::default());
        pile.regenerate_embeddings(&regenerator, &CancelFlag::new()).unwrap();

        pile.save_entry(&path, "<p>a completely different second draft</p>").unwrap();
        assert!(pile.index().get(&path).unwrap().embedding.is_none());
        pile.close();
        path
    };

    let pile = Pile::open(temp_dir.path()).unwrap();
    assert!(pile.index().get(&path).unwrap().embedding.is_none());

    let regenerator = pile.embedding_regenerator(CountingEmbedder::default());
    let report = pile.regenerate_embeddings(&regenerator, &CancelFlag::new()).unwrap();
    assert_eq!(report.requested, 1);
    assert_eq!(report.embedded, 1);

    let text = "a completely different second draft";
    let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
    assert_eq!(
        pile.index().get(&path).unwrap().embedding,
        Some(vec![text.len() as f32, vowels as f32, 1.0])
    );
}
