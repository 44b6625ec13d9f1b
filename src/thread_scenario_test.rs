// Reply chains: resolution from any member, text rendering, deletion behaviour

#[cfg(test)]
mod thread_scenario_tests {
    use tempfile::TempDir;

    use crate::entry::types::EntryMetadata;
    use crate::error::PileError;
    use crate::pile::{EntryDraft, Pile};
    use crate::test_support::*;
    use crate::thread::{thread_to_text, ThreadResolver, ThreadText};

    const ROOT: &str = "2024/Jan/240101-120000.md";
    const REPLY: &str = "2024/Jan/240101-120500.md";

    fn paths(thread: &[crate::entry::types::Entry]) -> Vec<&str> {
        thread.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_thread_is_the_same_from_every_member() {
        let (_dir, store, index) = fs_index();
        let mut root = EntryMetadata::new(at(1, 10, 0));
        root.replies = vec!["2024/Jan/a.md".into()];
        write_meta(&store, "2024/Jan/r.md", &root, "<p>root</p>");

        let mut a = EntryMetadata::new(at(1, 11, 0));
        a.is_reply = true;
        a.replies = vec!["2024/Jan/b.md".into()];
        write_meta(&store, "2024/Jan/a.md", &a, "<p>first reply</p>");

        let mut b = EntryMetadata::new(at(1, 12, 0));
        b.is_reply = true;
        write_meta(&store, "2024/Jan/b.md", &b, "<p>nested reply</p>");
        index.load();

        let resolver = ThreadResolver::new(&index);
        let expected = vec!["2024/Jan/r.md", "2024/Jan/a.md", "2024/Jan/b.md"];
        for member in &expected {
            let thread = resolver.get_thread(member).unwrap();
            assert_eq!(paths(&thread), expected, "thread from {}", member);
        }
        assert_eq!(
            thread_to_text(&resolver.get_thread("2024/Jan/b.md").unwrap()),
            "root\n\nfirst reply\n\nnested reply"
        );
    }

    #[test]
    fn test_replies_keep_listed_order() {
        let (_dir, store, index) = fs_index();
        let mut root = EntryMetadata::new(at(1, 10, 0));
        // Listed order wins over creation order
        root.replies = vec!["2024/Jan/late.md".into(), "2024/Jan/early.md".into()];
        write_meta(&store, ROOT, &root, "root");
        for (path, created) in [("2024/Jan/late.md", at(3, 0, 0)), ("2024/Jan/early.md", at(2, 0, 0))] {
            let mut meta = EntryMetadata::new(created);
            meta.is_reply = true;
            write_meta(&store, path, &meta, path);
        }
        index.load();

        let thread = ThreadResolver::new(&index).get_thread(ROOT).unwrap();
        assert_eq!(paths(&thread), vec![ROOT, "2024/Jan/late.md", "2024/Jan/early.md"]);
    }

    #[test]
    fn test_dangling_reply_is_skipped() {
        let (_dir, store, index) = fs_index();
        let mut root = EntryMetadata::new(at(1, 12, 0));
        root.replies = vec!["2024/Jan/missing.md".into(), REPLY.into()];
        write_meta(&store, ROOT, &root, "<p>Root</p>");
        let mut reply = EntryMetadata::new(at(1, 12, 5));
        reply.is_reply = true;
        write_meta(&store, REPLY, &reply, "<p>Reply</p>");
        index.load();

        let thread = ThreadResolver::new(&index).get_thread(REPLY).unwrap();
        assert_eq!(paths(&thread), vec![ROOT, REPLY]);
    }

    #[test]
    fn test_reply_cycle_terminates() {
        let (_dir, store, index) = fs_index();
        let mut a = EntryMetadata::new(at(1, 1, 0));
        a.replies = vec!["2024/Jan/b.md".into()];
        let mut b = EntryMetadata::new(at(1, 2, 0));
        b.replies = vec!["2024/Jan/a.md".into()];
        write_meta(&store, "2024/Jan/a.md", &a, "a");
        write_meta(&store, "2024/Jan/b.md", &b, "b");
        index.load();

        let thread = ThreadResolver::new(&index).get_thread("2024/Jan/a.md").unwrap();
        assert_eq!(thread.len(), 2);
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let (_dir, _store, index) = fs_index();
        index.load();
        let err = ThreadResolver::new(&index).get_thread("2024/Jan/nope.md").unwrap_err();
        assert!(matches!(err, PileError::NotFound(_)));
    }

    #[test]
    fn test_threads_as_text_skips_unknown_paths() {
        let (_dir, store, index) = fs_index();
        write_entry(&store, ROOT, at(1, 12, 0), "<p>Morning <b>pages</b></p>");
        write_entry(&store, REPLY, at(1, 12, 5), "<p>Second</p>");
        index.load();

        let texts = ThreadResolver::new(&index).get_threads_as_text(&[
            REPLY.to_string(),
            "2024/Jan/gone.md".to_string(),
            ROOT.to_string(),
        ]);
        assert_eq!(
            texts,
            vec![
                ThreadText { path: REPLY.into(), text: "Second".into() },
                ThreadText { path: ROOT.into(), text: "Morning pages".into() },
            ]
        );
    }

    #[test]
    fn test_create_reply_then_delete_it() {
        let temp_dir = TempDir::new().unwrap();
        let pile = Pile::open(temp_dir.path()).unwrap();

        let root = pile.create_entry(EntryDraft::new("<p>Root</p>")).unwrap();
        let reply = pile.create_reply(&root, EntryDraft::new("<p>Reply</p>")).unwrap();
        let before = pile.index().get(&root).unwrap();
        assert_eq!(before.replies, vec![reply.clone()]);
        assert_eq!(pile.thread(&reply).unwrap().len(), 2);

        pile.delete_entry(&reply).unwrap();

        let after = pile.index().get(&root).unwrap();
        assert!(after.replies.is_empty());
        assert_eq!(after.updated_at, before.updated_at);
        assert!(!pile.index().contains(&reply));
        assert!(!temp_dir.path().join(&reply).exists());
        assert!(read_meta(pile.store(), &root).replies.is_empty());
        assert!(pile.index().consistency_errors().is_empty());
    }

    #[test]
    fn test_deleting_root_leaves_replies_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let pile = Pile::open(temp_dir.path()).unwrap();

        let root = pile.create_entry(EntryDraft::new("<p>Root</p>")).unwrap();
        let reply = pile.create_reply(&root, EntryDraft::new("<p>Reply</p>")).unwrap();
        pile.delete_entry(&root).unwrap();

        assert!(!pile.index().contains(&root));
        let orphan = pile.index().get(&reply).unwrap();
        assert!(orphan.is_reply);
        // The orphan now resolves to a thread of its own
        let thread = pile.thread(&reply).unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].path, reply);
    }

    #[test]
    fn test_failed_reply_delete_keeps_thread_intact() {
        let temp_dir = TempDir::new().unwrap();
        let pile = Pile::open(temp_dir.path()).unwrap();
        let root = pile.create_entry(EntryDraft::new("<p>root</p>")).unwrap();
        let reply = pile.create_reply(&root, EntryDraft::new("<p>reply</p>")).unwrap();

        // A non-empty directory where the reply file was cannot be unlinked
        let disk = temp_dir.path().join(&reply);
        std::fs::remove_file(&disk).unwrap();
        std::fs::create_dir_all(disk.join("stuck")).unwrap();

        let err = pile.delete_entry(&reply).unwrap_err();
        assert!(!err.is_not_found());

        assert!(pile.index().contains(&reply));
        assert_eq!(pile.index().parent_of(&reply), Some(root.clone()));
        assert_eq!(pile.index().get(&root).unwrap().replies, vec![reply.clone()]);
        assert_eq!(read_meta(pile.store(), &root).replies, vec![reply]);
    }
}
