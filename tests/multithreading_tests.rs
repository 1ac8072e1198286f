#[cfg(not(target_os = "wasi"))]
mod multithreading_test {
    use bottledb::{BucketRoot, CommitRequest, PageFlags, PageKind, PageViewMut, Store};
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    const PAGE_SIZE: usize = 4096;

    fn create_tempfile() -> tempfile::NamedTempFile {
        if cfg!(target_os = "wasi") {
            tempfile::NamedTempFile::new_in("/").unwrap()
        } else {
            tempfile::NamedTempFile::new().unwrap()
        }
    }

    fn leaf_page(id: u64) -> Vec<u8> {
        let mut buffer = vec![0; PAGE_SIZE];
        let mut page = PageViewMut::new(&mut buffer).unwrap();
        page.set_id(id);
        page.set_flags(PageFlags::LEAF);
        buffer
    }

    #[test]
    fn shared_across_threads() {
        let tmpfile = create_tempfile();
        let store = Arc::new(
            Store::builder()
                .set_page_size(PAGE_SIZE)
                .open(tmpfile.path())
                .unwrap(),
        );

        let store2 = store.clone();
        let t = thread::spawn(move || store2.current_meta().unwrap().transaction_id);
        assert_eq!(t.join().unwrap(), 1);
    }

    #[test]
    fn readers_during_remap() {
        let tmpfile = create_tempfile();
        let store = Store::builder()
            .set_page_size(PAGE_SIZE)
            .open(tmpfile.path())
            .unwrap();
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut rng = rand::thread_rng();
                    while !done.load(Ordering::Acquire) {
                        let pages = store.pages().unwrap();
                        assert!(pages.meta().unwrap().transaction_id >= 1);
                        assert_eq!(pages.page(3).unwrap().kind(), Some(PageKind::Leaf));

                        // Every page that is readable was fully written before it became readable
                        let readable = pages.readable_len() / PAGE_SIZE as u64;
                        let id = rng.gen_range(4..readable.max(5));
                        if let Ok(page) = pages.page(id) {
                            assert_eq!(page.id(), id);
                            assert_eq!(page.kind(), Some(PageKind::Leaf));
                        }
                    }
                });
            }

            for id in 4..200u64 {
                store.write_pages(id, &leaf_page(id)).unwrap();
                if id % 8 == 0 {
                    store.remap(0).unwrap();
                }
                if id % 16 == 0 {
                    store
                        .commit(CommitRequest {
                            root: BucketRoot::new(3, id),
                            freelist: 2,
                            allocator_cursor: id + 1,
                        })
                        .unwrap();
                }
            }
            done.store(true, Ordering::Release);
        });

        store.remap(0).unwrap();
        let pages = store.pages().unwrap();
        for id in 4..200u64 {
            assert_eq!(pages.page(id).unwrap().id(), id);
        }
        assert_eq!(pages.meta().unwrap().root, BucketRoot::new(3, 192));
    }
}
