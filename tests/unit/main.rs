//! Unit tests for valkey-trib.
//!
//! These tests run without any live nodes and exercise the public API:
//! state parsing, pure planning, and the in-memory directory/registry.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

mod parsing_tests {
    use valkey_trib::{ClusterNodesView, NodeAddr, SlotRange, TOTAL_SLOTS};

    const NODES_OUTPUT: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 10.1.0.1:6379@16379 myself,master - 0 0 2 connected 0-5461
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 10.1.0.2:6379@16379 master - 0 0 1 connected 5462-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 10.1.0.3:6379@16379 master - 0 0 3 connected 10923-16383
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 10.1.0.4:6379@16379 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 0 2 connected";

    #[test]
    fn parses_full_cluster_nodes_output() {
        let view = ClusterNodesView::parse(NODES_OUTPUT).unwrap();
        assert_eq!(view.masters().count(), 3);
        assert_eq!(view.replicas().count(), 1);
        assert_eq!(view.total_slots_assigned(), TOTAL_SLOTS as usize);

        let myself = view.myself().unwrap();
        assert_eq!(myself.addr, NodeAddr::new("10.1.0.1", 6379));
        assert_eq!(myself.slots, vec![SlotRange::new(0, 5461)]);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(ClusterNodesView::parse("not a node line").is_err());
        assert!(ClusterNodesView::parse("id 10.0.0.1:6379@16379 master - 0 0 1 connected 99999").is_err());
    }
}

mod planning_tests {
    use valkey_trib::{build_create_params, calculate_distribution, NodeAddr, TOTAL_SLOTS};

    #[test]
    fn distribution_is_contiguous_and_complete() {
        let dist = calculate_distribution(5).unwrap();
        let total: u32 = dist.iter().map(|r| u32::from(r.count())).sum();
        assert_eq!(total, u32::from(TOTAL_SLOTS));
        for window in dist.windows(2) {
            assert_eq!(window[1].start, window[0].end + 1);
        }
    }

    #[test]
    fn derived_params_pair_masters_with_offhost_replicas() {
        let hosts: Vec<NodeAddr> = [
            "host-a:7000", "host-a:7001", "host-b:7000", "host-b:7001", "host-c:7000",
            "host-c:7001",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

        let params = build_create_params(1, &hosts).unwrap();
        assert_eq!(params.len(), 3);
        for param in &params {
            assert_eq!(param.replicas.len(), 1);
            assert_ne!(param.master.host, param.replicas[0].host);
        }
    }
}

mod directory_tests {
    use valkey_trib::{
        ClusterRegistry, MemoryDirectory, MemoryRegistry, NodeAddr, NodeDirectory, NodeExclusion,
    };

    #[tokio::test]
    async fn entry_points_respect_exclusion() {
        let directory = MemoryDirectory::new();
        let first: NodeAddr = "10.2.0.1:6379".parse().unwrap();
        let second: NodeAddr = "10.2.0.2:6379".parse().unwrap();
        directory.register("edge", first.clone());
        directory.register("edge", second.clone());

        assert_eq!(directory.entry_point("edge").await.unwrap(), first);
        assert_eq!(
            directory
                .entry_point_excluding("edge", &NodeExclusion::ByAddr(first))
                .await
                .unwrap(),
            second
        );
    }

    #[tokio::test]
    async fn registry_round_trips_representatives() {
        let registry = MemoryRegistry::new();
        let addr: NodeAddr = "10.2.0.9:6379".parse().unwrap();
        registry.record("edge", &addr).await.unwrap();
        assert_eq!(registry.last("edge"), Some(addr));
    }
}
