use hiercomm::{CommConfig, DistMat, LocalMatrix, Mat, SCALAR_BYTES, Scalar};

use super::helpers::{one_per_model, run_ranks};

#[tokio::test]
async fn test_send_recv_buffer_between_models() {
    let config = CommConfig::default().with_procs_per_model(2);
    let results = run_ranks(4, config, |e| async move {
        // Rank i of model 0 sends to rank i of model 1.
        if e.model_rank() == 0 {
            let data: Vec<Scalar> = (0..5).map(|i| (i + 10 * e.rank_in_model()) as Scalar).collect();
            e.send_buffer(&data, 1, e.rank_in_model()).await.unwrap();
            None
        } else {
            let mut buf = vec![0.0 as Scalar; 8];
            let n = e.recv_buffer(&mut buf, 0, e.rank_in_model()).await.unwrap();
            Some((e.rank_in_model(), n, buf, e.stats()))
        }
    })
    .await;
    for (rim, n, buf, stats) in results.into_iter().flatten() {
        assert_eq!(n, 5);
        let base = 10.0 * rim as Scalar;
        assert_eq!(&buf[..5], &[base, base + 1.0, base + 2.0, base + 3.0, base + 4.0]);
        assert_eq!(stats.bytes_received, (5 * SCALAR_BYTES) as u64);
    }
}

#[tokio::test]
async fn test_send_recv_dist_matrix_local_shard() {
    let results = run_ranks(2, one_per_model(), |e| async move {
        let local = Mat::from_col_major(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        if e.model_rank() == 0 {
            let mat = DistMat::new(4, 2, local).unwrap();
            e.send_matrix(&mat, 1, 0).await.unwrap();
            (mat.local_byte_len(), e.stats().bytes_sent)
        } else {
            let mut mat = DistMat::new(4, 2, Mat::new(2, 2)).unwrap();
            e.recv_matrix(&mut mat, 0, 0).await.unwrap();
            assert_eq!(mat.local().to_col_major(), vec![1.0, 2.0, 3.0, 4.0]);
            (mat.local_byte_len(), e.stats().bytes_received)
        }
    })
    .await;
    // Counted from the local shard, not the global shape.
    for (local_bytes, counted) in results {
        assert_eq!(local_bytes, 4 * SCALAR_BYTES);
        assert_eq!(counted, (4 * SCALAR_BYTES) as u64);
    }
}

#[tokio::test]
async fn test_recv_matrix_any_source() {
    let results = run_ranks(3, one_per_model(), |e| async move {
        let me = e.rank_in_world();
        if me == 0 {
            let mut senders = Vec::new();
            for _ in 0..2 {
                let mut m = Mat::new(1, 2);
                let src = e.recv_matrix_any(&mut m).await.unwrap();
                assert_eq!(m.to_col_major(), vec![src as Scalar; 2]);
                senders.push(src);
            }
            senders.sort_unstable();
            senders
        } else {
            let m = Mat::filled(1, 2, me as Scalar);
            e.send_matrix(&m, 0, 0).await.unwrap();
            Vec::new()
        }
    })
    .await;
    assert_eq!(results[0], vec![1, 2]);
}

#[tokio::test]
async fn test_send_to_unknown_model_fails() {
    let results = run_ranks(2, one_per_model(), |e| async move {
        e.send_buffer(&[1.0], 5, 0).await
    })
    .await;
    for r in results {
        assert!(matches!(r, Err(hiercomm::CommError::InvalidModel { model: 5, num_models: 2 })));
    }
}

#[tokio::test]
async fn test_broadcast_counts_payload_once() {
    let results = run_ranks(4, one_per_model(), |e| async move {
        let mut data: Vec<Scalar> = if e.rank_in_world() == 1 {
            vec![7.0, 8.0, 9.0]
        } else {
            vec![0.0; 3]
        };
        e.broadcast_buffer(&mut data, &[0, 1, 3], 1).await.unwrap();
        (data, e.stats())
    })
    .await;
    let bytes = (3 * SCALAR_BYTES) as u64;
    // Root: sent once, regardless of the two destinations.
    assert_eq!(results[1].1.bytes_sent, bytes);
    assert_eq!(results[1].1.bytes_received, 0);
    for w in [0, 3] {
        assert_eq!(results[w].0, vec![7.0, 8.0, 9.0]);
        assert_eq!(results[w].1.bytes_received, bytes);
        assert_eq!(results[w].1.bytes_sent, 0);
    }
    // Not a destination: untouched.
    assert_eq!(results[2].0, vec![0.0; 3]);
    assert_eq!(results[2].1.bytes_received, 0);
}

#[tokio::test]
async fn test_broadcast_matrix_to_destinations() {
    let results = run_ranks(3, one_per_model(), |e| async move {
        let mut m = if e.rank_in_world() == 0 {
            Mat::from_col_major(2, 1, vec![4.0, 5.0]).unwrap()
        } else {
            Mat::new(2, 1)
        };
        e.broadcast_matrix(&mut m, &[1, 2], 0).await.unwrap();
        m.to_col_major()
    })
    .await;
    for values in results {
        assert_eq!(values, vec![4.0, 5.0]);
    }
}

#[tokio::test]
async fn test_intermodel_sum_and_broadcast() {
    let config = CommConfig::default().with_procs_per_model(2);
    let results = run_ranks(6, config, |e| async move {
        let mut summed = Mat::filled(2, 3, (e.model_rank() + 1) as Scalar);
        e.intermodel_sum_matrix(&mut summed).await.unwrap();

        let local = Mat::filled(1, 2, e.model_rank() as Scalar);
        let mut dist = DistMat::new(1, 4, local).unwrap();
        e.intermodel_broadcast_matrix(&mut dist, 2).await.unwrap();
        (summed.to_col_major(), dist.local().to_col_major(), e.stats())
    })
    .await;
    for (summed, broadcast, stats) in results {
        assert_eq!(summed, vec![6.0; 6]);
        assert_eq!(broadcast, vec![2.0, 2.0]);
        // The plain sum is charged its local size once each way.
        assert!(stats.bytes_sent >= (6 * SCALAR_BYTES) as u64);
        assert!(stats.bytes_received >= (6 * SCALAR_BYTES) as u64);
        assert_eq!(stats.allreduce.calls, 0);
    }
}
