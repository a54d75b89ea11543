mod mocks;

use digest_reels::festival::{FestivalBuilder, FestivalOptions};
use digest_reels::progress::RunStop;
use mocks::catalog::MockCatalog;
use mocks::search::MockSearch;
use mocks::video_host::MockVideoHost;
use mocks::{fast_policy, open_store};

fn options(spotify_only: bool) -> FestivalOptions {
    FestivalOptions {
        playlist_name: "Fest".into(),
        market: "US".into(),
        tracks_per_artist: 5,
        spotify_only,
        youtube_privacy_status: "private".into(),
    }
}

fn lineup(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_builds_both_playlists_and_reruns_are_noops() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 10_000);
    let catalog = MockCatalog::new(&["A", "B"], 2);
    let search = MockSearch::without(&["B - B song 2"]);
    let host = MockVideoHost::default();
    let artists = lineup(&["A", "B", "Ghost"]);

    let builder = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3));
    let report = builder.build(&artists, &options(false)).await.unwrap();

    assert_eq!(report.tracks, 4);
    assert_eq!(report.artists_missing, vec!["Ghost"]);
    assert_eq!(*catalog.created.lock().unwrap(), vec!["Fest"]);
    assert_eq!(catalog.added.lock().unwrap().len(), 1);
    assert_eq!(catalog.added.lock().unwrap()[0].len(), 4);
    assert_eq!(report.youtube_playlist_id.as_deref(), Some("PLFest"));

    let youtube = report.youtube.as_ref().unwrap();
    assert_eq!(youtube.stop, RunStop::Completed);
    assert_eq!(youtube.done, 3);
    assert_eq!(youtube.failed.len(), 1);
    assert!(youtube.failed[0].reason.contains("no YouTube video found"));
    assert_eq!(host.added.lock().unwrap().len(), 3);
    assert!(!report.needs_rerun());

    let again = builder.build(&artists, &options(false)).await.unwrap();
    assert_eq!(catalog.created.lock().unwrap().len(), 1);
    assert_eq!(catalog.added.lock().unwrap().len(), 1);
    assert_eq!(host.created.lock().unwrap().len(), 1);
    assert_eq!(host.added.lock().unwrap().len(), 3);
    assert_eq!(search.queries.lock().unwrap().len(), 4);
    assert_eq!(again.youtube.unwrap().skipped, 4);
}

#[tokio::test]
async fn test_youtube_quota_stops_and_resumes_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MockCatalog::new(&["A", "B"], 2);
    let search = MockSearch::default();
    let host = MockVideoHost::default();
    let artists = lineup(&["A", "B"]);

    {
        // Playlist (51) plus two additions (50 each).
        let store = open_store(dir.path(), 160);
        let report = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3))
            .build(&artists, &options(false))
            .await
            .unwrap();
        let youtube = report.youtube.as_ref().unwrap();
        assert!(matches!(youtube.stop, RunStop::QuotaExhausted { .. }));
        assert_eq!(youtube.done, 2);
        assert_eq!(youtube.remaining, 2);
        assert!(report.needs_rerun());
    }

    let store = open_store(dir.path(), 10_000);
    let report = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3))
        .build(&artists, &options(false))
        .await
        .unwrap();
    assert_eq!(report.youtube.unwrap().totals.done, 4);

    let added = host.added.lock().unwrap();
    assert_eq!(added.len(), 4);
    let mut videos: Vec<&String> = added.iter().map(|(_, v)| v).collect();
    videos.dedup();
    assert_eq!(videos.len(), 4);
    assert_eq!(host.created.lock().unwrap().len(), 1);
    assert_eq!(catalog.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_spotify_only_never_touches_youtube() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 10_000);
    let catalog = MockCatalog::new(&["A"], 7);
    let search = MockSearch::default();
    let host = MockVideoHost::default();

    let report = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3))
        .build(&lineup(&["A"]), &options(true))
        .await
        .unwrap();

    assert_eq!(report.tracks, 5);
    assert!(report.youtube.is_none());
    assert!(search.queries.lock().unwrap().is_empty());
    assert!(host.created.lock().unwrap().is_empty());
    assert_eq!(store.quota().used(), 0);
}

#[tokio::test]
async fn test_empty_lineup_result_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 10_000);
    let catalog = MockCatalog::new(&[], 0);
    let search = MockSearch::default();
    let host = MockVideoHost::default();

    let err = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3))
        .build(&lineup(&["Nobody"]), &options(false))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No tracks found"));
    assert!(catalog.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_provider_quota_error_leaves_tracks_pending() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = MockCatalog::new(&["A", "B"], 2);
    let search = MockSearch::default();
    let host = MockVideoHost {
        quota_after_adds: Some(2),
        ..MockVideoHost::default()
    };
    let artists = lineup(&["A", "B"]);

    {
        let store = open_store(dir.path(), 10_000);
        let builder = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3));
        let report = builder.build(&artists, &options(false)).await.unwrap();
        let youtube = report.youtube.as_ref().unwrap();
        assert!(matches!(youtube.stop, RunStop::QuotaExhausted { .. }));
        assert_eq!(youtube.done, 2);
        assert!(youtube.failed.is_empty());
        assert_eq!(youtube.remaining, 2);
        assert!(report.needs_rerun());
        assert_eq!(search.queries.lock().unwrap().len(), 3);

        // Same period: nothing is searched or added.
        let again = builder.build(&artists, &options(false)).await.unwrap();
        assert_eq!(again.youtube.unwrap().attempted, 0);
        assert_eq!(search.queries.lock().unwrap().len(), 3);
    }

    let host = MockVideoHost {
        quota_after_adds: None,
        ..host
    };
    let store = open_store(dir.path(), 20_000);
    let report = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3))
        .build(&artists, &options(false))
        .await
        .unwrap();
    let youtube = report.youtube.unwrap();
    assert_eq!(youtube.stop, RunStop::Completed);
    assert_eq!(youtube.totals.done, 4);
    assert_eq!(host.added.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_grown_lineup_adds_only_new_spotify_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 10_000);
    let catalog = MockCatalog::new(&["A", "B"], 2);
    let search = MockSearch::default();
    let host = MockVideoHost::default();
    let builder = FestivalBuilder::new(&store, &catalog, &search, &host, fast_policy(3));

    builder.build(&lineup(&["A"]), &options(true)).await.unwrap();
    let report = builder.build(&lineup(&["A", "B"]), &options(true)).await.unwrap();

    assert_eq!(report.tracks, 4);
    let added = catalog.added.lock().unwrap();
    assert_eq!(added.len(), 2);
    assert_eq!(added[0], vec!["spotify:track:artist0-1", "spotify:track:artist0-2"]);
    assert_eq!(added[1], vec!["spotify:track:artist1-1", "spotify:track:artist1-2"]);
    assert_eq!(added.iter().map(Vec::len).sum::<usize>(), 4);
}
