use rust_media_frame::events::MediaRecord;
use rust_media_frame::pool::RotationPool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn path(i: usize) -> PathBuf {
    PathBuf::from(format!("/media/{i:03}.jpg"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_ingest_and_display_keep_pool_consistent() {
    let pool = Arc::new(RotationPool::with_seed(11));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                for i in (w * 50)..(w * 50 + 50) {
                    if i % 2 == 0 {
                        pool.insert_as_new(MediaRecord::new(path(i), 0.0));
                    } else {
                        pool.insert_as_unseen(MediaRecord::new(path(i), 0.0));
                    }
                    if i % 5 == 0 {
                        pool.remove(&path(i));
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let reader = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut shown = 0usize;
            for _ in 0..500 {
                if pool.select_next().is_some() {
                    shown += 1;
                }
                tokio::task::yield_now().await;
            }
            shown
        })
    };

    for w in writers {
        w.await.unwrap();
    }
    reader.await.unwrap();

    // 200 inserted, every fifth removed.
    let stats = pool.stats();
    assert_eq!(stats.all, 160);
    assert!(stats.unseen + stats.new <= stats.all);
    for i in 0..200 {
        assert_eq!(pool.contains(&path(i)), i % 5 != 0, "{}", path(i).display());
    }

    // Drain leftovers, then one full cycle shows every live record once.
    for _ in 0..stats.unseen + stats.new {
        pool.select_next().unwrap();
    }
    let cycle: HashSet<PathBuf> = (0..160)
        .map(|_| pool.select_next().unwrap().path)
        .collect();
    assert_eq!(cycle.len(), 160);
    assert!(!cycle.contains(Path::new("/media/000.jpg")));
}

#[test]
fn removed_new_head_is_never_selected() {
    let pool = RotationPool::with_seed(2);
    pool.insert_as_unseen(MediaRecord::new("/media/old.jpg", 0.0));
    pool.insert_as_new(MediaRecord::new("/media/a.jpg", 0.0));
    pool.insert_as_new(MediaRecord::new("/media/b.jpg", 0.0));

    assert!(pool.remove(Path::new("/media/a.jpg")));
    assert_eq!(
        pool.select_next().unwrap().path,
        PathBuf::from("/media/b.jpg")
    );
    assert_eq!(
        pool.select_next().unwrap().path,
        PathBuf::from("/media/old.jpg")
    );
}
