/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use std::collections::HashSet;
use std::sync::Arc;

use tidewater::{
    CommandDao, CommandFetcher, IdSlotBasedCommandFetcher, InMemoryCluster, MasterSlotManager,
    MemoryCommandDao, NewCommand,
};

const MASTERS: [&str; 3] = ["m1:5678", "m2:5678", "m3:5678"];

fn fetcher(
    address: &str,
    cluster: &Arc<InMemoryCluster>,
    dao: &Arc<MemoryCommandDao>,
) -> IdSlotBasedCommandFetcher {
    let manager = Arc::new(MasterSlotManager::new(address, cluster.clone()));
    manager.refresh();
    IdSlotBasedCommandFetcher::new(manager, dao.clone(), 100, 1)
}

async fn fetched_ids(fetcher: &IdSlotBasedCommandFetcher) -> Vec<i64> {
    fetcher
        .fetch_commands()
        .await
        .unwrap()
        .iter()
        .map(|command| command.id)
        .collect()
}

#[tokio::test]
async fn test_masters_fetch_disjoint_shards_covering_the_backlog() {
    let cluster = Arc::new(InMemoryCluster::new());
    for master in MASTERS {
        cluster.register_master(master);
    }
    let dao = Arc::new(MemoryCommandDao::new());
    for _ in 0..9 {
        dao.insert(NewCommand::start(1, 1)).await.unwrap();
    }

    let mut seen = HashSet::new();
    let mut shards = Vec::new();
    for master in MASTERS {
        let ids = fetched_ids(&fetcher(master, &cluster, &dao)).await;
        for id in &ids {
            assert!(seen.insert(*id), "command {} fetched by two masters", id);
        }
        shards.push(ids);
    }

    assert_eq!(seen.len(), 9);
    assert_eq!(shards[0], vec![3, 6, 9]);
    assert_eq!(shards[1], vec![1, 4, 7]);
    assert_eq!(shards[2], vec![2, 5, 8]);
}

#[tokio::test]
async fn test_membership_change_reshards_on_next_cycle() {
    let cluster = Arc::new(InMemoryCluster::new());
    for master in MASTERS {
        cluster.register_master(master);
    }
    let dao = Arc::new(MemoryCommandDao::new());
    for _ in 0..6 {
        dao.insert(NewCommand::start(1, 1)).await.unwrap();
    }
    let first = fetcher(MASTERS[0], &cluster, &dao);
    assert_eq!(fetched_ids(&first).await, vec![3, 6]);

    cluster.remove_master(MASTERS[2]);

    // The stale assignment yields an empty cycle, then the new shard.
    assert!(fetched_ids(&first).await.is_empty());
    assert_eq!(fetched_ids(&first).await, vec![2, 4, 6]);
    let slot = first.slot_manager().current().unwrap();
    assert_eq!((slot.current_slot, slot.total_slots), (0, 2));
}

#[tokio::test]
async fn test_master_outside_the_cluster_fetches_nothing() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.register_master(MASTERS[0]);
    let dao = Arc::new(MemoryCommandDao::new());
    dao.insert(NewCommand::start(1, 1)).await.unwrap();

    let outsider = fetcher("m9:5678", &cluster, &dao);
    assert!(outsider.slot_manager().current().is_none());
    assert!(fetched_ids(&outsider).await.is_empty());
    assert_eq!(dao.pending().len(), 1);
}
