use hiercomm::{
    Algorithm, AllreduceOptions, CommError, IdentityTransform, Mat, QuantizedTransform,
    SCALAR_BYTES, Scalar,
};

use super::helpers::{
    allreduce_with, expected_sum, one_per_model, rank_matrix, remote_only, run_ranks,
};

/// Run `algorithm` with the identity transform on `n` ranks and check every
/// rank holds the exact sum.
async fn check_exact(algorithm: Algorithm, n: usize, height: usize, width: usize, opts: AllreduceOptions) {
    let results = run_ranks(n, one_per_model(), move |e| async move {
        let mut mat = rank_matrix(e.rank_in_world(), height, width);
        let max_recv = height * width * SCALAR_BYTES;
        allreduce_with(&e, algorithm, &mut mat, max_recv, &mut IdentityTransform, opts)
            .await
            .unwrap();
        mat.to_col_major()
    })
    .await;

    let expected = expected_sum(n as u32, height, width);
    for (rank, values) in results.iter().enumerate() {
        assert_eq!(
            values, &expected,
            "{algorithm} on {n} ranks, {height}x{width}, rank {rank}"
        );
    }
}

#[tokio::test]
async fn test_recursive_doubling_row_vector_sum() {
    let results = run_ranks(4, one_per_model(), |e| async move {
        let r = e.rank_in_world() as Scalar;
        let mut mat = Mat::from_col_major(1, 4, vec![r; 4]).unwrap();
        let opts = e.allreduce_options();
        e.recursive_doubling_allreduce(e.intermodel_comm(), &mut mat, 4 * SCALAR_BYTES, &mut IdentityTransform, opts)
            .await
            .unwrap();
        mat.to_col_major()
    })
    .await;
    for values in results {
        assert_eq!(values, vec![6.0; 4]);
    }
}

#[tokio::test]
async fn test_pe_ring_three_ranks_of_ones() {
    let results = run_ranks(3, one_per_model(), |e| async move {
        let mut mat = Mat::filled(1, 3, 1.0);
        let opts = e.allreduce_options();
        e.pe_ring_allreduce(e.intermodel_comm(), &mut mat, 3 * SCALAR_BYTES, &mut IdentityTransform, opts)
            .await
            .unwrap();
        mat.to_col_major()
    })
    .await;
    for values in results {
        assert_eq!(values, vec![3.0; 3]);
    }
}

#[tokio::test]
async fn test_recursive_doubling_power_of_two_counts() {
    for n in [1, 2, 4, 8] {
        check_exact(Algorithm::RecursiveDoubling, n, 3, 5, remote_only()).await;
        check_exact(Algorithm::RecursiveDoubling, n, 3, 5, AllreduceOptions::default()).await;
    }
}

#[tokio::test]
async fn test_pe_ring_any_count_and_uneven_slices() {
    for n in [1, 2, 3, 5, 6] {
        check_exact(Algorithm::PairwiseExchangeRing, n, 2, 7, remote_only()).await;
        check_exact(Algorithm::PairwiseExchangeRing, n, 2, 7, AllreduceOptions::default()).await;
    }
}

#[tokio::test]
async fn test_pe_ring_more_ranks_than_columns() {
    check_exact(Algorithm::PairwiseExchangeRing, 5, 3, 2, remote_only()).await;
    check_exact(Algorithm::PairwiseExchangeRing, 4, 3, 0, remote_only()).await;
}

#[tokio::test]
async fn test_ring_any_count() {
    for n in [2, 3, 4, 5] {
        check_exact(Algorithm::Ring, n, 4, 9, remote_only()).await;
        check_exact(Algorithm::Ring, n, 4, 9, AllreduceOptions::default()).await;
    }
}

#[tokio::test]
async fn test_rabenseifner_power_of_two_counts() {
    for n in [2, 4, 8] {
        check_exact(Algorithm::Rabenseifner, n, 2, 8, remote_only()).await;
        check_exact(Algorithm::Rabenseifner, n, 2, 11, AllreduceOptions::default()).await;
    }
    // Fewer columns than ranks leaves some slices empty.
    check_exact(Algorithm::Rabenseifner, 8, 2, 3, remote_only()).await;
}

#[tokio::test]
async fn test_id_recv_receives_in_place() {
    let opts = AllreduceOptions {
        id_recv: true,
        no_local_transform: false,
    };
    check_exact(Algorithm::PairwiseExchangeRing, 3, 2, 5, opts).await;
    check_exact(Algorithm::PairwiseExchangeRing, 5, 2, 5, opts).await;
    check_exact(Algorithm::Ring, 4, 2, 6, opts).await;
    check_exact(Algorithm::Rabenseifner, 4, 2, 6, opts).await;
}

#[tokio::test]
async fn test_id_recv_rejects_lossy_transform() {
    let results = run_ranks(2, one_per_model(), |e| async move {
        let mut mat = Mat::filled(2, 2, 1.0);
        let opts = AllreduceOptions {
            id_recv: true,
            no_local_transform: true,
        };
        e.pe_ring_allreduce(e.intermodel_comm(), &mut mat, 64, &mut QuantizedTransform, opts)
            .await
    })
    .await;
    for r in results {
        assert!(matches!(r, Err(CommError::Config { .. })));
    }
}

#[tokio::test]
async fn test_power_of_two_algorithms_reject_three_ranks() {
    let results = run_ranks(3, one_per_model(), |e| async move {
        let mut mat = Mat::filled(2, 2, 1.0);
        let opts = e.allreduce_options();
        let rd = allreduce_with(&e, Algorithm::RecursiveDoubling, &mut mat, 64, &mut IdentityTransform, opts).await;
        let rab = allreduce_with(&e, Algorithm::Rabenseifner, &mut mat, 64, &mut IdentityTransform, opts).await;
        (rd, rab, mat.to_col_major())
    })
    .await;
    for (rd, rab, values) in results {
        assert!(matches!(rd, Err(CommError::NotPowerOfTwo { nprocs: 3, .. })));
        assert!(matches!(rab, Err(CommError::NotPowerOfTwo { nprocs: 3, .. })));
        // Nothing was exchanged.
        assert_eq!(values, vec![1.0; 4]);
    }
}

#[tokio::test]
async fn test_non_contiguous_matrix() {
    let results = run_ranks(3, one_per_model(), |e| async move {
        let r = e.rank_in_world();
        let mut mat = Mat::with_ldim(2, 4, 5).unwrap();
        for j in 0..4 {
            for i in 0..2 {
                mat.set(i, j, (r as usize * 100 + i + 10 * j) as Scalar);
            }
        }
        let opts = super::helpers::remote_only();
        e.pe_ring_allreduce(e.intermodel_comm(), &mut mat, 8 * SCALAR_BYTES, &mut IdentityTransform, opts)
            .await
            .unwrap();
        e.ring_allreduce(e.intermodel_comm(), &mut mat, 8 * SCALAR_BYTES, &mut IdentityTransform, opts)
            .await
            .unwrap();
        mat.to_col_major()
    })
    .await;
    // Two sums in a row multiply the first result by three.
    let expected: Vec<Scalar> = expected_sum(3, 2, 4).into_iter().map(|v| v * 3.0).collect();
    for values in results {
        assert_eq!(values, expected);
    }
}

#[tokio::test]
async fn test_intermodel_allreduce_dispatches_by_shape() {
    // Small power-of-two (recursive doubling) and large (pairwise exchange).
    for (n, h, w) in [(4, 4, 4), (4, 2, 70), (3, 4, 4)] {
        let results = run_ranks(n, one_per_model(), move |e| async move {
            let mut mat = rank_matrix(e.rank_in_world(), h, w);
            let opts = e.allreduce_options();
            e.intermodel_allreduce(&mut mat, h * w * SCALAR_BYTES, &mut IdentityTransform, opts)
                .await
                .unwrap();
            (mat.to_col_major(), e.stats().allreduce.calls)
        })
        .await;
        let expected = expected_sum(n as u32, h, w);
        for (values, calls) in results {
            assert_eq!(values, expected);
            assert_eq!(calls, 1);
        }
    }
}

#[tokio::test]
async fn test_same_algorithm_is_deterministic() {
    let results = run_ranks(4, one_per_model(), |e| async move {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let r = e.rank_in_world() as Scalar;
            let mut mat = Mat::filled(3, 6, 0.1 * (r + 1.0));
            let opts = super::helpers::remote_only();
            e.rabenseifner_allreduce(e.intermodel_comm(), &mut mat, 18 * SCALAR_BYTES, &mut IdentityTransform, opts)
                .await
                .unwrap();
            runs.push(mat.to_col_major());
        }
        runs
    })
    .await;
    for runs in results {
        assert_eq!(runs[0], runs[1]);
    }
}

#[tokio::test]
async fn test_allreduce_stats_accumulate() {
    let results = run_ranks(4, one_per_model(), |e| async move {
        let mut mat = Mat::filled(2, 4, 1.0);
        let opts = super::helpers::remote_only();
        e.pe_ring_allreduce(e.intermodel_comm(), &mut mat, 8 * SCALAR_BYTES, &mut IdentityTransform, opts)
            .await
            .unwrap();
        e.stats()
    })
    .await;
    let slice = (2 * SCALAR_BYTES) as u64;
    for s in results {
        assert_eq!(s.allreduce.calls, 1);
        // Three reduce-scatter and three allgather steps of one slice each.
        assert_eq!(s.allreduce.rs_bytes_sent, 3 * slice);
        assert_eq!(s.allreduce.rs_bytes_received, 3 * slice);
        assert_eq!(s.allreduce.ag_bytes_sent, 3 * slice);
        assert_eq!(s.allreduce.ag_bytes_received, 3 * slice);
        assert_eq!(s.bytes_sent, 6 * slice);
        assert_eq!(s.bytes_received, 6 * slice);
    }
}
