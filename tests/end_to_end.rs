//! End-to-end scenarios against `FileManager`, using the in-memory
//! `FakeDecoder` in place of a native MEF3 library.

use std::sync::Arc;
use std::time::Duration;

use mefcached::config::Config;
use mefcached::decoder::fake::{FakeDecoder, FakeRecording};
use mefcached::manager::FileManager;

fn manager_with(decoder: FakeDecoder, n_prefetch: usize, capacity_multiplier: usize) -> FileManager {
    let mut config = Config::from_str("").expect("default config");
    config.n_prefetch = n_prefetch;
    config.cache_capacity_multiplier = capacity_multiplier;
    FileManager::new(&config, Arc::new(decoder))
}

#[tokio::test]
async fn open_enumerate_read_sequential() {
    let decoder = FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 1000.0, 10.0));
    let manager = manager_with(decoder, 0, 1);

    let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
    manager.set_segment_seconds(file_id, 2.0).unwrap();
    assert_eq!(manager.get_segment_count(file_id).unwrap(), 5);

    for index in 0..5 {
        let chunk = manager.get_signal_segment(file_id, index).await.unwrap();
        assert_eq!(chunk.matrix.shape(), (1, 2000));
    }
}

#[tokio::test]
async fn prefetch_single_flight_avoids_extra_decoder_reads() {
    let decoder = Arc::new(
        FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 1000.0, 10.0)),
    );
    let manager = {
        let mut config = Config::from_str("").unwrap();
        config.n_prefetch = 3;
        config.cache_capacity_multiplier = 3; // capacity = 9
        FileManager::new(&config, decoder.clone())
    };

    let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
    manager.set_segment_seconds(file_id, 1.0).unwrap();

    manager.get_signal_segment(file_id, 0).await.unwrap();
    // Give the background prefetch jobs a chance to land.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let reads_before = decoder.read_call_count();
    for index in 1..=3 {
        manager.get_signal_segment(file_id, index).await.unwrap();
    }
    assert_eq!(decoder.read_call_count(), reads_before, "prefetched segments should not trigger new reads");
}

#[tokio::test]
async fn resize_invalidates_prior_cache_entries() {
    let decoder = Arc::new(
        FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 1000.0, 10.0)),
    );
    let manager = manager_with_arc(decoder.clone(), 0, 1);

    let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
    manager.set_segment_seconds(file_id, 2.0).unwrap();
    manager.get_signal_segment(file_id, 0).await.unwrap();

    let reads_before = decoder.read_call_count();
    manager.set_segment_seconds(file_id, 1.0).unwrap();
    manager.get_signal_segment(file_id, 0).await.unwrap();
    assert_eq!(decoder.read_call_count(), reads_before + 1);
}

#[tokio::test]
async fn channel_filter_preserves_requested_order() {
    let decoder =
        FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(3, 1000.0, 10.0));
    let manager = manager_with(decoder, 0, 1);

    let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
    manager.set_segment_seconds(file_id, 2.0).unwrap();
    manager
        .set_active_channels(file_id, vec!["Ch3".to_string(), "Ch1".to_string()])
        .unwrap();

    let chunk = manager.get_signal_segment(file_id, 0).await.unwrap();
    assert_eq!(chunk.matrix.shape().0, 2);
    assert_eq!(chunk.channel_names, vec!["Ch3".to_string(), "Ch1".to_string()]);
    // FakeDecoder's deterministic formula encodes the channel index (0-based
    // in the recording, so Ch3 => 2, Ch1 => 0) into every sample.
    assert!(chunk.matrix.rows[0][0] >= 2_000_000.0 && chunk.matrix.rows[0][0] < 3_000_000.0);
    assert!(chunk.matrix.rows[1][0] < 1_000_000.0);
}

#[tokio::test]
async fn concurrent_readers_on_same_segment_decode_once() {
    let decoder = Arc::new(
        FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 1000.0, 10.0)),
    );
    decoder.set_read_delay(Duration::from_millis(30));
    let manager = Arc::new(manager_with_arc(decoder.clone(), 0, 1));

    let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
    manager.set_segment_seconds(file_id, 2.0).unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager.get_signal_segment(file_id, 0).await.unwrap()
        }));
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    assert_eq!(decoder.read_call_count(), 1);
    for chunk in &results[1..] {
        assert_eq!(chunk.matrix.rows, results[0].matrix.rows);
    }
}

#[tokio::test]
async fn closing_file_leaves_no_cache_entries_and_cancels_prefetch() {
    let decoder = Arc::new(
        FakeDecoder::new().with_recording("/rec.mefd", FakeRecording::new(1, 1000.0, 10.0)),
    );
    decoder.set_read_delay(Duration::from_millis(40));
    let manager = {
        let mut config = Config::from_str("").unwrap();
        config.n_prefetch = 5;
        config.cache_capacity_multiplier = 5;
        FileManager::new(&config, decoder.clone())
    };

    let file_id = manager.open_file("/rec.mefd".to_string()).await.unwrap();
    manager.set_segment_seconds(file_id, 2.0).unwrap();

    manager.get_signal_segment(file_id, 0).await.unwrap();
    manager.close_file(file_id).await.unwrap();

    // Whatever prefetch jobs were in flight should resolve to no-ops.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let reopened = manager.open_file("/rec.mefd".to_string()).await.unwrap();
    manager.set_segment_seconds(reopened, 2.0).unwrap();
    let reads_before = decoder.read_call_count();
    manager.get_signal_segment(reopened, 1).await.unwrap();
    assert_eq!(decoder.read_call_count(), reads_before + 1);
}

fn manager_with_arc(decoder: Arc<FakeDecoder>, n_prefetch: usize, capacity_multiplier: usize) -> FileManager {
    let mut config = Config::from_str("").unwrap();
    config.n_prefetch = n_prefetch;
    config.cache_capacity_multiplier = capacity_multiplier;
    FileManager::new(&config, decoder)
}
