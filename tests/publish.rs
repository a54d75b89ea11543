mod mocks;

use digest_reels::api::VideoMetadata;
use digest_reels::publish::{PlaylistTarget, PublishOutcome, PublishRequest, Publisher};
use mocks::video_host::MockVideoHost;
use digest_reels::progress::{idempotency_key, ItemStatus, RunStop};
use mocks::{fast_policy, open_store};
use std::path::Path;

fn request(dir: &Path, playlist: Option<&str>) -> PublishRequest {
    let video = dir.join("2025-03-07.mp4");
    let thumbnail = dir.join("thumbnail.png");
    std::fs::write(&video, b"mp4").unwrap();
    std::fs::write(&thumbnail, b"\x89PNG").unwrap();
    PublishRequest {
        run_id: "2025-03-07".into(),
        video,
        thumbnail: Some(thumbnail),
        meta: VideoMetadata {
            title: "OFA Daily Summary 2025-03-07".into(),
            description: "Stories".into(),
            tags: vec!["ai".into()],
            category_id: "22".into(),
            privacy_status: "private".into(),
        },
        playlist: playlist.map(|name| PlaylistTarget {
            name: name.into(),
            description: format!("{name} uploads"),
            privacy_status: "private".into(),
            create_if_missing: true,
        }),
    }
}

#[tokio::test]
async fn test_publish_runs_every_step_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 10_000);
    let host = MockVideoHost::default().with_playlist("daily digest", "PLdaily");
    let publisher = Publisher::new(&store, &host, fast_policy(3));

    let outcome = publisher.publish(request(dir.path(), Some("Daily Digest"))).await.unwrap();
    let PublishOutcome::Published {
        video,
        playlist_id,
        warnings,
    } = outcome
    else {
        panic!("expected a published video");
    };
    assert_eq!(video.video_id, "vid1");
    assert_eq!(video.url, "https://www.youtube.com/watch?v=vid1");
    assert_eq!(playlist_id.as_deref(), Some("PLdaily"));
    assert!(warnings.is_empty());
    assert_eq!(*host.thumbnails.lock().unwrap(), vec!["vid1"]);
    assert_eq!(
        *host.added.lock().unwrap(),
        vec![("PLdaily".to_string(), "vid1".to_string())]
    );
    assert!(host.created.lock().unwrap().is_empty());
    assert_eq!(store.quota().used(), 1600 + 50 + 51 + 50);

    // Rerunning the same digest never uploads twice.
    let outcome = publisher.publish(request(dir.path(), Some("Daily Digest"))).await.unwrap();
    assert!(matches!(
        outcome,
        PublishOutcome::Published { ref video, .. } if video.video_id == "vid1"
    ));
    assert_eq!(host.uploads.lock().unwrap().len(), 1);
    assert_eq!(host.added.lock().unwrap().len(), 1);
    assert_eq!(store.quota().used(), 1751);
}

#[tokio::test]
async fn test_upload_is_deferred_when_quota_is_short() {
    let dir = tempfile::tempdir().unwrap();
    let host = MockVideoHost::default();
    {
        let store = open_store(dir.path(), 1_000);
        let outcome = Publisher::new(&store, &host, fast_policy(3))
            .publish(request(dir.path(), None))
            .await
            .unwrap();
        let PublishOutcome::Deferred(summary) = outcome else {
            panic!("expected the upload to be deferred");
        };
        assert_eq!(summary.remaining, 1);
        assert!(host.uploads.lock().unwrap().is_empty());
    }

    let store = open_store(dir.path(), 10_000);
    let outcome = Publisher::new(&store, &host, fast_policy(3))
        .publish(request(dir.path(), None))
        .await
        .unwrap();
    assert!(matches!(outcome, PublishOutcome::Published { playlist_id: None, .. }));
    assert_eq!(host.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_follow_up_failures_become_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 10_000);
    let host = MockVideoHost {
        reject_thumbnail: true,
        ..MockVideoHost::default()
    };
    let publisher = Publisher::new(&store, &host, fast_policy(3));

    let outcome = publisher.publish(request(dir.path(), Some("Daily Digest"))).await.unwrap();
    let PublishOutcome::Published {
        playlist_id,
        warnings,
        ..
    } = outcome
    else {
        panic!("expected a published video");
    };
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("account not verified"));
    assert_eq!(*host.created.lock().unwrap(), vec!["Daily Digest"]);
    assert_eq!(playlist_id.as_deref(), Some("PLDailyDigest"));
    assert_eq!(host.added.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_provider_quota_error_defers_upload_instead_of_failing() {
    let dir = tempfile::tempdir().unwrap();
    let host = MockVideoHost {
        upload_quota_exceeded: true,
        ..MockVideoHost::default()
    };
    {
        let store = open_store(dir.path(), 10_000);
        let outcome = Publisher::new(&store, &host, fast_policy(3))
            .publish(request(dir.path(), None))
            .await
            .unwrap();
        let PublishOutcome::Deferred(summary) = outcome else {
            panic!("expected the upload to be deferred");
        };
        assert!(matches!(summary.stop, RunStop::QuotaExhausted { .. }));
        assert!(summary.failed.is_empty());
        assert_eq!(
            store.status_of(&idempotency_key(&["upload", "2025-03-07"])),
            Some(ItemStatus::Pending)
        );
        assert_eq!(store.quota().remaining(), 0);
    }

    // A raised limit leaves room; the pending upload then runs once.
    let host = MockVideoHost {
        upload_quota_exceeded: false,
        ..host
    };
    let store = open_store(dir.path(), 20_000);
    let outcome = Publisher::new(&store, &host, fast_policy(3))
        .publish(request(dir.path(), None))
        .await
        .unwrap();
    assert!(matches!(outcome, PublishOutcome::Published { ref video, .. } if video.video_id == "vid1"));
}
