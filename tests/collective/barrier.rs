use hiercomm::CommConfig;

use super::helpers::run_ranks;

#[tokio::test]
async fn test_barriers_count_per_kind() {
    let config = CommConfig::default().with_procs_per_model(2);
    let results = run_ranks(4, config, |e| async move {
        e.model_barrier().await.unwrap();
        e.intermodel_barrier().await.unwrap();
        e.global_barrier().await.unwrap();
        e.global_barrier().await.unwrap();
        e.stats()
    })
    .await;
    for s in results {
        assert_eq!(s.num_model_barriers, 1);
        assert_eq!(s.num_intermodel_barriers, 1);
        assert_eq!(s.num_global_barriers, 2);
        // Barriers carry no payload bytes in the statistics.
        assert_eq!(s.bytes_sent, 0);
        assert_eq!(s.bytes_received, 0);
    }
}

#[tokio::test]
async fn test_repeated_global_barriers_odd_world() {
    let results = run_ranks(5, CommConfig::default(), |e| async move {
        for _ in 0..20 {
            e.global_barrier().await.unwrap();
        }
        e.stats().num_global_barriers
    })
    .await;
    assert!(results.iter().all(|&n| n == 20));
}

#[tokio::test]
async fn test_reset_stats_clears_counters() {
    let results = run_ranks(3, CommConfig::default(), |e| async move {
        e.global_barrier().await.unwrap();
        e.reset_stats();
        e.stats()
    })
    .await;
    for s in results {
        assert_eq!(s, hiercomm::CommStats::default());
    }
}
