use super::*;
use crate::{
    config::Settings,
    test_support::{image_row, MemoryObjects, MemoryRealtime, MemoryRows},
    upload::SelectedFile,
};
use std::sync::atomic::Ordering;

async fn mounted(
    rows: &Arc<MemoryRows>,
    realtime: &Arc<MemoryRealtime>,
    images: i64,
) -> GalleryView {
    rows.seed(
        "gallery",
        (1..=images)
            .map(|id| image_row(id, if id % 2 == 0 { "Cat" } else { "Dog" }))
            .collect(),
    );
    let session = BackendSession::new(
        Settings::default(),
        rows.clone(),
        MemoryObjects::new(),
        realtime.clone(),
    );
    let mut view = GalleryView::mount(&session).await.expect("mount");
    assert!(view.is_loading());
    assert!(view.step().await);
    view
}

fn ids(view: &GalleryView) -> Vec<i64> {
    view.images().map(|image| image.id.0.as_int().expect("serial id")).collect()
}

#[tokio::test]
async fn mount_subscribes_to_inserts_and_loads_first_page_newest_first() {
    let rows = MemoryRows::new();
    let realtime = MemoryRealtime::new();
    let view = mounted(&rows, &realtime, 13).await;

    let spec = realtime.specs.lock().expect("specs")[0].clone();
    assert_eq!(spec.topic, "gallery");
    assert_eq!(spec.row_inserts, vec!["gallery".to_string()]);
    assert!(spec.broadcasts.is_empty());
    assert!(!spec.presence);

    assert!(!view.is_loading());
    assert_eq!(ids(&view), (6..=13).rev().collect::<Vec<_>>());
    assert!(view.has_more());
}

#[tokio::test]
async fn scrolling_to_bottom_pages_until_short_page() {
    let rows = MemoryRows::new();
    let realtime = MemoryRealtime::new();
    let mut view = mounted(&rows, &realtime, 13).await;

    assert!(view.near_bottom());
    assert!(view.is_loading_more());
    assert!(!view.near_bottom());
    view.step().await;

    assert_eq!(view.images().count(), 13);
    assert!(!view.has_more());
    assert!(!view.near_bottom());
    assert_eq!(rows.query_count(), 2);
}

#[tokio::test]
async fn search_reloads_with_title_filter() {
    let rows = MemoryRows::new();
    let realtime = MemoryRealtime::new();
    let mut view = mounted(&rows, &realtime, 6).await;

    assert!(view.set_search("cat"));
    assert!(view.is_loading());
    assert_eq!(view.images().count(), 0);
    view.step().await;

    assert_eq!(view.search(), Some("cat"));
    assert_eq!(ids(&view), vec![6, 4, 2]);
}

#[tokio::test]
async fn pushed_images_are_prepended_when_they_match_search() {
    let rows = MemoryRows::new();
    let realtime = MemoryRealtime::new();
    let mut view = mounted(&rows, &realtime, 2).await;
    view.set_search("cat");
    view.step().await;

    for (id, title) in [(10, "Dog park"), (11, "Fat cat")] {
        realtime
            .push(
                "gallery",
                PushEvent::RowInserted {
                    collection: "gallery".into(),
                    record: image_row(id, title),
                },
            )
            .await;
        view.step().await;
    }
    assert_eq!(ids(&view), vec![11, 2]);
}

#[tokio::test]
async fn completed_upload_reloads_first_page() {
    let rows = MemoryRows::new();
    let realtime = MemoryRealtime::new();
    let mut view = mounted(&rows, &realtime, 3).await;

    let uploader = view.uploader();
    uploader
        .select_file(SelectedFile {
            file_name: "new.png".into(),
            content_type: Some("image/png".into()),
            bytes: vec![1, 2, 3],
        })
        .expect("select");
    uploader.set_title("Fresh").expect("title");
    uploader.submit().await.expect("upload");

    assert!(view.step().await);
    assert!(view.is_loading());
    assert!(view.step().await);

    assert_eq!(ids(&view), vec![4, 3, 2, 1]);
    let newest = view.images().next().expect("image");
    assert_eq!(newest.title, "Fresh");
    assert!(newest.image_url.starts_with("https://cdn.test/images/"));
}

#[tokio::test]
async fn failed_initial_load_can_be_retried() {
    let rows = MemoryRows::new();
    rows.fail_queries.store(true, Ordering::SeqCst);
    let realtime = MemoryRealtime::new();
    let mut view = mounted(&rows, &realtime, 3).await;

    assert_eq!(view.phase(), LoadPhase::Idle);
    assert!(view.last_error().is_some());

    rows.fail_queries.store(false, Ordering::SeqCst);
    assert!(view.retry());
    view.step().await;
    assert_eq!(view.images().count(), 3);
}

#[tokio::test]
async fn unmount_unsubscribes() {
    let rows = MemoryRows::new();
    let realtime = MemoryRealtime::new();
    let view = mounted(&rows, &realtime, 1).await;
    let channel = realtime.channel("gallery");

    view.unmount().await;
    assert_eq!(channel.unsubscribes.load(Ordering::SeqCst), 1);
}
