use hiercomm::{CommConfig, CommError, HierComm, LocalTransport};
use std::sync::Arc;

use super::helpers::{run_ranks, run_ranks_on_hosts};

#[tokio::test]
async fn test_model_layout_six_ranks_three_per_model() {
    let config = CommConfig::default().with_procs_per_model(3);
    let results = run_ranks(6, config, |e| async move {
        (
            e.rank_in_world(),
            e.model_rank(),
            e.rank_in_model(),
            e.num_models(),
            e.model_comm().group().to_vec(),
            e.intermodel_comm().group().to_vec(),
            e.am_model_master(),
            e.am_world_master(),
        )
    })
    .await;
    for (w, model, rim, num_models, model_group, inter_group, model_master, world_master) in results {
        assert_eq!(model, w / 3);
        assert_eq!(rim, w % 3);
        assert_eq!(num_models, 2);
        let base = model * 3;
        assert_eq!(model_group, vec![base, base + 1, base + 2]);
        assert_eq!(inter_group, vec![rim, rim + 3]);
        assert_eq!(model_master, rim == 0);
        assert_eq!(world_master, w == 0);
    }
}

#[tokio::test]
async fn test_default_is_one_model() {
    let results = run_ranks(4, CommConfig::default(), |e| async move {
        (e.num_models(), e.procs_per_model(), e.intermodel_comm().size())
    })
    .await;
    for (num_models, ppm, inter) in results {
        assert_eq!(num_models, 1);
        assert_eq!(ppm, 4);
        assert_eq!(inter, 1);
    }
}

#[tokio::test]
async fn test_bad_procs_per_model_rejected() {
    for (world, ppm) in [(4, 8), (6, 4)] {
        let mut handles = Vec::new();
        for t in LocalTransport::mesh(world) {
            let config = CommConfig::default().with_procs_per_model(ppm);
            handles.push(tokio::spawn(HierComm::new(Arc::new(t), config)));
        }
        for h in handles {
            assert!(matches!(h.await.unwrap(), Err(CommError::Config { .. })));
        }
    }
}

#[tokio::test]
async fn test_node_groups_on_mixed_hosts() {
    let hosts = ["n0", "n1", "n0", "n1", "n2"];
    let results = run_ranks_on_hosts(&hosts, CommConfig::default(), |e| async move {
        (
            e.world_ranks_on_node().to_vec(),
            e.rank_in_node(),
            e.procs_per_node(),
        )
    })
    .await;
    let expected_groups = [vec![0, 2], vec![1, 3], vec![0, 2], vec![1, 3], vec![4]];
    for (w, (group, rank_in_node, ppn)) in results.iter().enumerate() {
        assert_eq!(group, &expected_groups[w]);
        assert_eq!(*ppn as usize, group.len());
        assert_eq!(group[*rank_in_node as usize], w as u32);
    }
    // Node locality is symmetric.
    for a in 0..hosts.len() {
        for b in 0..hosts.len() {
            let a_sees_b = results[a].0.contains(&(b as u32));
            let b_sees_a = results[b].0.contains(&(a as u32));
            assert_eq!(a_sees_b, b_sees_a, "ranks {a} and {b}");
        }
    }
}

#[tokio::test]
async fn test_is_rank_node_local_on_intermodel_comm() {
    let hosts = ["a", "a", "b", "b"];
    let config = CommConfig::default().with_procs_per_model(1);
    let results = run_ranks_on_hosts(&hosts, config, |e| async move {
        let comm = e.intermodel_comm();
        (0..comm.size())
            .map(|r| e.is_rank_node_local(r, comm))
            .collect::<Vec<_>>()
    })
    .await;
    assert_eq!(results[0], vec![true, true, false, false]);
    assert_eq!(results[3], vec![false, false, true, true]);
}

#[tokio::test]
async fn test_hostname_override_merges_nodes() {
    let hosts = ["x", "y", "z"];
    let config = CommConfig {
        hostname: Some("shared".into()),
        ..CommConfig::default()
    };
    let results = run_ranks_on_hosts(&hosts, config, |e| async move {
        (e.procs_per_node(), e.topology().hostname.clone())
    })
    .await;
    for (ppn, host) in results {
        assert_eq!(ppn, 3);
        assert_eq!(host, "shared");
    }
}
