use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};

use super::client::CloudSubnetApi;
use super::types::{CloudSubnet, CycleSummary, VpcSyncOutcome};
use crate::cidr;
use crate::config::Config;
use crate::db::Store;
use crate::models::*;

/// Background reconciler: on a fixed interval, converges the prefix store
/// toward each cloud VPC's reported subnet set. One single-writer worker per
/// VPC; VPCs within a cycle run in parallel.
pub struct VpcSyncService {
    store: Store,
    client: Arc<dyn CloudSubnetApi>,
    config: Config,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl VpcSyncService {
    pub fn new(store: Store, client: Arc<dyn CloudSubnetApi>, config: Config) -> Self {
        Self {
            store,
            client,
            config,
            stop_tx: None,
        }
    }

    /// Start the sync cycle timer
    pub fn start(&mut self) {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let store = self.store.clone();
        let client = self.client.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(config.sync_interval_secs));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_sync_cycle(&store, client.clone(), &config).await;
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("VPC sync service stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the sync service
    #[allow(dead_code)]
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Run one complete synchronization cycle over the AWS VPC registry
pub async fn run_sync_cycle(
    store: &Store,
    client: Arc<dyn CloudSubnetApi>,
    config: &Config,
) -> CycleSummary {
    tracing::info!("Starting VPC subnet synchronization cycle");
    let started = Instant::now();
    let mut summary = CycleSummary::default();

    // Per-cycle VPC registry; never cached across cycles
    let vpcs = match load_vpc_registry(store, config).await {
        Ok(vpcs) => vpcs,
        Err(e) => {
            tracing::error!("Sync cycle failed to load VPC registry: {}", e);
            return summary;
        }
    };
    summary.total_vpcs = vpcs.len();

    if vpcs.is_empty() {
        tracing::warn!("No AWS VPCs found in registry. Skipping sync.");
        return summary;
    }

    let mut workers: JoinSet<Result<Option<VpcSyncOutcome>>> = JoinSet::new();
    for vpc in vpcs {
        let store = store.clone();
        let client = client.clone();
        let config = config.clone();
        workers.spawn(async move { sync_single_vpc(&store, client.as_ref(), &config, &vpc).await });
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(Some(_outcome))) => summary.synced += 1,
            Ok(Ok(None)) => summary.skipped_unreachable += 1,
            Ok(Err(e)) => tracing::error!("VPC sync worker failed: {}", e),
            Err(e) => tracing::error!("VPC sync worker panicked: {}", e),
        }
    }

    summary.duration_ms = started.elapsed().as_millis();
    tracing::info!(
        "Sync cycle completed: {}/{} VPCs synced ({} unreachable) in {}ms",
        summary.synced,
        summary.total_vpcs,
        summary.skipped_unreachable,
        summary.duration_ms
    );
    summary
}

async fn load_vpc_registry(store: &Store, config: &Config) -> Result<Vec<Vpc>> {
    let total = store.count_vpcs_by_provider(cloud_provider::AWS).await?;
    tracing::info!("Loading {} AWS VPCs from registry", total);

    let mut vpcs = Vec::with_capacity(total as usize);
    let batch = config.db_batch_size as i64;
    let mut offset = 0i64;
    while offset < total {
        let page = store
            .list_vpcs_by_provider(cloud_provider::AWS, batch, offset)
            .await?;
        if page.is_empty() {
            break;
        }
        vpcs.extend(page);
        offset += batch;
    }
    Ok(vpcs)
}

/// Sync one VPC. Returns Ok(None) when the VPC is unreachable; the cycle
/// skips it entirely and every stored prefix of that VPC stays untouched.
pub async fn sync_single_vpc(
    store: &Store,
    client: &dyn CloudSubnetApi,
    config: &Config,
    vpc: &Vpc,
) -> Result<Option<VpcSyncOutcome>> {
    tracing::info!(
        "Syncing VPC: {} ({})",
        vpc.provider_vpc_id,
        vpc.description.as_deref().unwrap_or("-")
    );

    // Reachability probe; any error preserves existing state
    if let Err(e) = client.describe_vpc(&vpc.provider_vpc_id).await {
        tracing::warn!("VPC {} is unreachable: {}", vpc.provider_vpc_id, e);
        tracing::info!(
            "Skipping sync for unreachable VPC {} - keeping existing subnet data unchanged",
            vpc.provider_vpc_id
        );
        return Ok(None);
    }

    let subnets = match client
        .list_subnets(
            &vpc.provider_vpc_id,
            config.aws_page_size,
            config.max_subnets_per_vpc,
        )
        .await
    {
        Ok(subnets) => subnets,
        Err(e) => {
            tracing::warn!("VPC {} is unreachable: {}", vpc.provider_vpc_id, e);
            return Ok(None);
        }
    };

    let outcome = apply_vpc_sync(store, config, vpc, subnets).await?;
    Ok(Some(outcome))
}

/// Set-membership classification of cloud CIDRs against stored CIDRs:
/// (created, tombstone, updated), each in address-stable order.
pub(crate) fn classify(
    stored_cidrs: &[String],
    cloud_cidrs: &[String],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let stored: std::collections::BTreeSet<&String> = stored_cidrs.iter().collect();
    let cloud: std::collections::BTreeSet<&String> = cloud_cidrs.iter().collect();

    let created = cloud
        .difference(&stored)
        .map(|s| s.to_string())
        .collect();
    let deleted = stored
        .difference(&cloud)
        .map(|s| s.to_string())
        .collect();
    let updated = cloud
        .intersection(&stored)
        .map(|s| s.to_string())
        .collect();
    (created, deleted, updated)
}

/// Parent/VRF placement resolved through the VPC's prefix association
struct SubnetPlacement {
    parent_prefix_id: Option<String>,
    vrf_id: String,
    routable: bool,
    orphan: bool,
}

async fn resolve_placement(
    store: &Store,
    config: &Config,
    vpc: &Vpc,
    association: Option<&VpcPrefixAssociation>,
    parent: Option<&Prefix>,
    subnet_cidr: &str,
) -> Result<SubnetPlacement> {
    let fallback = SubnetPlacement {
        parent_prefix_id: None,
        vrf_id: config.default_vrf_id.clone(),
        routable: true,
        orphan: false,
    };

    let (association, parent) = match (association, parent) {
        (Some(a), Some(p)) => (a, p),
        _ => {
            tracing::warn!(
                "No VPC association found for VPC {}, using default routable=true and {}",
                vpc.provider_vpc_id,
                config.default_vrf_id
            );
            return Ok(fallback);
        }
    };

    let subnet_net = cidr::parse_cidr(subnet_cidr)
        .map_err(|e| anyhow::anyhow!("Invalid subnet CIDR {}: {}", subnet_cidr, e))?;
    let association_net = cidr::parse_cidr(&association.vpc_prefix_cidr)
        .map_err(|e| anyhow::anyhow!("Invalid association CIDR: {}", e))?;

    // A subnet outside the association's CIDR is preserved as an orphan for
    // operator inspection rather than misattached
    if !cidr::is_strict_subnet(&subnet_net, &association_net) {
        tracing::warn!(
            "Subnet {} is not within VPC CIDR {}",
            subnet_cidr,
            association.vpc_prefix_cidr
        );
        return Ok(SubnetPlacement {
            orphan: true,
            ..fallback
        });
    }

    if association.routable {
        Ok(SubnetPlacement {
            parent_prefix_id: Some(parent.prefix_id.clone()),
            vrf_id: parent.vrf_id.clone(),
            routable: true,
            orphan: false,
        })
    } else {
        // Non-routable subnets live at the root of an auto-created
        // per-VPC VRF
        let vrf_id = store.ensure_vpc_vrf(vpc).await?;
        Ok(SubnetPlacement {
            parent_prefix_id: None,
            vrf_id,
            routable: false,
            orphan: false,
        })
    }
}

/// Converge the store toward the reported subnet set for one VPC
pub async fn apply_vpc_sync(
    store: &Store,
    config: &Config,
    vpc: &Vpc,
    cloud_subnets: Vec<CloudSubnet>,
) -> Result<VpcSyncOutcome> {
    let mut outcome = VpcSyncOutcome::default();

    let stored = store.list_vpc_subnet_prefixes(&vpc.vpc_id).await?;
    if stored.len() > 1000 {
        tracing::info!(
            "Large VPC detected: {} existing prefixes for VPC {}",
            stored.len(),
            vpc.provider_vpc_id
        );
    }
    let stored_by_cidr: BTreeMap<String, Prefix> = stored
        .into_iter()
        .map(|p| (p.cidr.clone(), p))
        .collect();

    let mut cloud_by_cidr: BTreeMap<String, CloudSubnet> = BTreeMap::new();
    for subnet in cloud_subnets {
        match cidr::parse_cidr(&subnet.cidr_block) {
            Ok(net) => {
                cloud_by_cidr.insert(cidr::canonical(&net), subnet);
            }
            Err(e) => {
                tracing::warn!(
                    "VPC {} reported invalid CIDR {}: {}",
                    vpc.provider_vpc_id,
                    subnet.cidr_block,
                    e
                );
            }
        }
    }

    let stored_cidrs: Vec<String> = stored_by_cidr.keys().cloned().collect();
    let cloud_cidrs: Vec<String> = cloud_by_cidr.keys().cloned().collect();
    let (created, deleted, updated) = classify(&stored_cidrs, &cloud_cidrs);

    let association = store.find_association_for_vpc(&vpc.vpc_id).await?;
    let parent = match &association {
        Some(a) => store.get_prefix(&a.parent_prefix_id).await?,
        None => None,
    };

    if !created.is_empty() {
        tracing::info!("Creating {} new subnet prefixes", created.len());
    }
    for (i, cidr_str) in created.iter().enumerate() {
        let subnet = &cloud_by_cidr[cidr_str];
        if let Err(e) = create_subnet_prefix(
            store,
            config,
            vpc,
            association.as_ref(),
            parent.as_ref(),
            cidr_str,
            subnet,
            &mut outcome,
        )
        .await
        {
            tracing::error!("Failed to create subnet prefix {}: {}", cidr_str, e);
            outcome.errors.push(format!("{}: {}", cidr_str, e));
        }
        if (i + 1) % config.batch_size == 0 {
            tracing::info!("Created {}/{} new subnets", i + 1, created.len());
        }
    }

    if !deleted.is_empty() {
        tracing::info!("Marking {} subnet prefixes as deleted", deleted.len());
    }
    for (i, cidr_str) in deleted.iter().enumerate() {
        let prefix = &stored_by_cidr[cidr_str];
        if let Err(e) = tombstone_subnet_prefix(store, prefix, &mut outcome).await {
            tracing::error!("Failed to mark subnet prefix as deleted {}: {}", cidr_str, e);
            outcome.errors.push(format!("{}: {}", cidr_str, e));
        }
        if (i + 1) % config.batch_size == 0 {
            tracing::info!("Processed {}/{} deletions", i + 1, deleted.len());
        }
    }

    for (i, cidr_str) in updated.iter().enumerate() {
        let prefix = &stored_by_cidr[cidr_str];
        let subnet = &cloud_by_cidr[cidr_str];
        if let Err(e) = update_subnet_prefix(store, prefix, subnet, &mut outcome).await {
            tracing::error!("Failed to update subnet prefix {}: {}", cidr_str, e);
            outcome.errors.push(format!("{}: {}", cidr_str, e));
        }
        // Less frequent logging for updates
        if (i + 1) % (config.batch_size * 5) == 0 {
            tracing::info!("Updated {}/{} subnets", i + 1, updated.len());
        }
    }

    tracing::info!(
        "VPC {}: +{} -{} ~{} subnets ({} resurrected)",
        vpc.provider_vpc_id,
        outcome.created,
        outcome.tombstoned,
        outcome.updated,
        outcome.resurrected
    );
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn create_subnet_prefix(
    store: &Store,
    config: &Config,
    vpc: &Vpc,
    association: Option<&VpcPrefixAssociation>,
    parent: Option<&Prefix>,
    cidr_str: &str,
    subnet: &CloudSubnet,
    outcome: &mut VpcSyncOutcome,
) -> Result<()> {
    let placement =
        resolve_placement(store, config, vpc, association, parent, cidr_str).await?;

    let mut tags = subnet.tags.clone();
    tags.insert(tag_keys::AWS_SUBNET_ID.to_string(), subnet.subnet_id.clone().into());
    tags.insert(
        tag_keys::AVAILABILITY_ZONE.to_string(),
        subnet.availability_zone.clone().into(),
    );
    tags.insert(tag_keys::STATE.to_string(), subnet.state.clone().into());
    tags.insert(tag_keys::SYNC_SOURCE.to_string(), "aws_auto_sync".into());
    tags.insert(tag_keys::LAST_SYNC.to_string(), Utc::now().to_rfc3339().into());

    // upsert_vpc_subnet degrades an insert race with a concurrent writer
    // into the update path
    store
        .upsert_vpc_subnet(
            &vpc.vpc_id,
            cidr_str,
            tags,
            placement.parent_prefix_id.as_deref(),
            &placement.vrf_id,
            placement.routable,
        )
        .await?;

    tracing::info!("Created subnet prefix: {} ({})", cidr_str, subnet.subnet_id);
    outcome.created += 1;
    if placement.orphan {
        outcome.orphaned += 1;
    }
    Ok(())
}

/// Tombstone, never hard-delete: the prefix stays in the tree with deletion
/// marker tags until the cloud re-reports its CIDR.
async fn tombstone_subnet_prefix(
    store: &Store,
    prefix: &Prefix,
    outcome: &mut VpcSyncOutcome,
) -> Result<()> {
    if prefix.tags.contains_key(tag_keys::DELETED_FROM_AWS) {
        tracing::debug!("Subnet prefix {} already tombstoned", prefix.cidr);
        return Ok(());
    }

    let mut tags = prefix.tags.clone();
    tags.insert(
        tag_keys::DELETED_FROM_AWS.to_string(),
        Utc::now().to_rfc3339().into(),
    );
    tags.insert(
        tag_keys::DELETION_REASON.to_string(),
        "aws_subnet_not_found".into(),
    );
    store.replace_prefix_tags(&prefix.prefix_id, &tags).await?;

    tracing::info!("Marked subnet prefix as deleted: {}", prefix.cidr);
    outcome.tombstoned += 1;
    Ok(())
}

/// Refresh cloud metadata on a still-present subnet. A tombstoned prefix
/// re-reported by the cloud is a resurrection: the deletion markers are
/// stripped and resurrected_at recorded, under the same prefix id.
async fn update_subnet_prefix(
    store: &Store,
    prefix: &Prefix,
    subnet: &CloudSubnet,
    outcome: &mut VpcSyncOutcome,
) -> Result<()> {
    let was_deleted = prefix.tags.contains_key(tag_keys::DELETED_FROM_AWS);

    let mut tags = prefix.tags.clone();
    tags.insert(tag_keys::AWS_SUBNET_ID.to_string(), subnet.subnet_id.clone().into());
    tags.insert(
        tag_keys::AVAILABILITY_ZONE.to_string(),
        subnet.availability_zone.clone().into(),
    );
    tags.insert(tag_keys::STATE.to_string(), subnet.state.clone().into());
    tags.insert(tag_keys::LAST_SYNC.to_string(), Utc::now().to_rfc3339().into());

    if was_deleted {
        tags.remove(tag_keys::DELETED_FROM_AWS);
        tags.remove(tag_keys::DELETION_REASON);
        tags.insert(
            tag_keys::RESURRECTED_AT.to_string(),
            Utc::now().to_rfc3339().into(),
        );
        tracing::info!(
            "Resurrected previously deleted subnet: {} (new subnet ID: {})",
            subnet.cidr_block,
            subnet.subnet_id
        );
    }

    store.replace_prefix_tags(&prefix.prefix_id, &tags).await?;

    outcome.updated += 1;
    if was_deleted {
        outcome.resurrected += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock cloud: per-VPC subnet lists; a missing entry is an unreachable VPC
    struct MockCloud {
        vpcs: Mutex<HashMap<String, Vec<CloudSubnet>>>,
    }

    impl MockCloud {
        fn new() -> Self {
            Self {
                vpcs: Mutex::new(HashMap::new()),
            }
        }

        fn report(&self, provider_vpc_id: &str, subnets: Vec<CloudSubnet>) {
            self.vpcs
                .lock()
                .unwrap()
                .insert(provider_vpc_id.to_string(), subnets);
        }

        fn unreach(&self, provider_vpc_id: &str) {
            self.vpcs.lock().unwrap().remove(provider_vpc_id);
        }
    }

    #[async_trait::async_trait]
    impl CloudSubnetApi for MockCloud {
        async fn describe_vpc(&self, provider_vpc_id: &str) -> Result<()> {
            if self.vpcs.lock().unwrap().contains_key(provider_vpc_id) {
                Ok(())
            } else {
                Err(anyhow::anyhow!("InvalidVpcID.NotFound: {}", provider_vpc_id))
            }
        }

        async fn list_subnets(
            &self,
            provider_vpc_id: &str,
            _page_size: usize,
            max_subnets: usize,
        ) -> Result<Vec<CloudSubnet>> {
            let mut subnets = self
                .vpcs
                .lock()
                .unwrap()
                .get(provider_vpc_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("InvalidVpcID.NotFound"))?;
            subnets.truncate(max_subnets);
            Ok(subnets)
        }
    }

    fn test_config() -> Config {
        Config {
            db_path: ":memory:".to_string(),
            db_max_connections: 1,
            listen_addr: String::new(),
            default_vrf_id: "prod-vrf".to_string(),
            sync_enabled: false,
            sync_interval_secs: 300,
            aws_region: "us-east-2".to_string(),
            aws_page_size: 50,
            max_subnets_per_vpc: 10000,
            db_batch_size: 100,
            batch_size: 10,
            cloud_api_url: String::new(),
            cloud_api_token: String::new(),
        }
    }

    fn cloud_subnet(subnet_id: &str, cidr: &str) -> CloudSubnet {
        CloudSubnet {
            subnet_id: subnet_id.to_string(),
            cidr_block: cidr.to_string(),
            availability_zone: "us-east-2a".to_string(),
            state: "available".to_string(),
            tags: TagMap::new(),
            ip_version: 4,
        }
    }

    async fn seeded_vpc(store: &Store, routable: bool) -> (Vpc, Prefix) {
        store.ensure_default_vrf("prod-vrf").await.unwrap();
        let parent = store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.0.0.0/16".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: true,
                vpc_children_type_flag: true,
                request_id: None,
            })
            .await
            .unwrap();
        let vpc = store
            .create_vpc(&CreateVpcRequest {
                description: Some("test vpc".to_string()),
                provider: "aws".to_string(),
                provider_account_id: Some("123456789".to_string()),
                provider_vpc_id: "vpc-sync".to_string(),
                region: Some("us-east-2".to_string()),
                tags: TagMap::new(),
                request_id: None,
            })
            .await
            .unwrap();
        store
            .create_association(&CreateAssociationRequest {
                vpc_id: vpc.vpc_id.clone(),
                vpc_prefix_cidr: "10.0.0.0/16".to_string(),
                routable,
                parent_prefix_id: parent.prefix_id.clone(),
                request_id: None,
            })
            .await
            .unwrap();
        (vpc, parent)
    }

    #[test]
    fn test_classify_set_membership() {
        let stored = vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()];
        let cloud = vec!["10.0.2.0/24".to_string(), "10.0.3.0/24".to_string()];
        let (created, deleted, updated) = classify(&stored, &cloud);
        assert_eq!(created, vec!["10.0.3.0/24"]);
        assert_eq!(deleted, vec!["10.0.1.0/24"]);
        assert_eq!(updated, vec!["10.0.2.0/24"]);
    }

    #[tokio::test]
    async fn test_discovery_tombstone_and_resurrection() {
        let store = Store::in_memory().await.unwrap();
        let config = test_config();
        let (vpc, parent) = seeded_vpc(&store, true).await;
        let cloud = MockCloud::new();

        // Cycle 1: two subnets discovered under the association parent
        cloud.report(
            "vpc-sync",
            vec![
                cloud_subnet("subnet-1", "10.0.1.0/24"),
                cloud_subnet("subnet-2", "10.0.2.0/24"),
            ],
        );
        let outcome = sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.created, 2);

        let subnets = store.list_vpc_subnet_prefixes(&vpc.vpc_id).await.unwrap();
        assert_eq!(subnets.len(), 2);
        for subnet in &subnets {
            assert_eq!(subnet.parent_prefix_id.as_deref(), Some(parent.prefix_id.as_str()));
            assert_eq!(subnet.vrf_id, "prod-vrf");
            assert!(subnet.routable);
            assert_eq!(subnet.source, "vpc");
            assert_eq!(subnet.indentation_level, 1);
        }
        let original_id = subnets
            .iter()
            .find(|p| p.cidr == "10.0.2.0/24")
            .unwrap()
            .prefix_id
            .clone();

        // Cycle 2: 10.0.2.0/24 disappears from the cloud -> tombstoned, kept
        cloud.report("vpc-sync", vec![cloud_subnet("subnet-1", "10.0.1.0/24")]);
        let outcome = sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.tombstoned, 1);

        let gone = store.get_prefix(&original_id).await.unwrap().unwrap();
        assert!(gone.tags.contains_key("deleted_from_aws"));
        assert_eq!(
            gone.tags.get("deletion_reason").and_then(|v| v.as_str()),
            Some("aws_subnet_not_found")
        );

        // Cycle 3: the CIDR returns -> resurrection under the same prefix id
        cloud.report(
            "vpc-sync",
            vec![
                cloud_subnet("subnet-1", "10.0.1.0/24"),
                cloud_subnet("subnet-9", "10.0.2.0/24"),
            ],
        );
        let outcome = sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.resurrected, 1);

        let back = store.get_prefix(&original_id).await.unwrap().unwrap();
        assert!(!back.tags.contains_key("deleted_from_aws"));
        assert!(!back.tags.contains_key("deletion_reason"));
        assert!(back.tags.contains_key("resurrected_at"));
        assert_eq!(
            back.tags.get("aws_subnet_id").and_then(|v| v.as_str()),
            Some("subnet-9")
        );
    }

    #[tokio::test]
    async fn test_unreachable_vpc_preserves_state() {
        let store = Store::in_memory().await.unwrap();
        let config = test_config();
        let (vpc, _parent) = seeded_vpc(&store, true).await;
        let cloud = MockCloud::new();

        cloud.report("vpc-sync", vec![cloud_subnet("subnet-1", "10.0.1.0/24")]);
        sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();
        let before = store.list_vpc_subnet_prefixes(&vpc.vpc_id).await.unwrap();

        // describe-vpc now fails: the cycle must not touch any prefix
        cloud.unreach("vpc-sync");
        let outcome = sync_single_vpc(&store, &cloud, &config, &vpc).await.unwrap();
        assert!(outcome.is_none());

        let after = store.list_vpc_subnet_prefixes(&vpc.vpc_id).await.unwrap();
        assert_eq!(
            serde_json::to_value(&before).unwrap(),
            serde_json::to_value(&after).unwrap()
        );
    }

    #[tokio::test]
    async fn test_non_routable_association_uses_vpc_vrf() {
        let store = Store::in_memory().await.unwrap();
        let config = test_config();
        let (vpc, _parent) = seeded_vpc(&store, false).await;
        let cloud = MockCloud::new();

        cloud.report("vpc-sync", vec![cloud_subnet("subnet-1", "10.0.1.0/24")]);
        sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();

        let subnets = store.list_vpc_subnet_prefixes(&vpc.vpc_id).await.unwrap();
        assert_eq!(subnets.len(), 1);
        let subnet = &subnets[0];
        assert_eq!(subnet.vrf_id, "aws_123456789_vpc-sync");
        assert!(!subnet.routable);
        assert!(subnet.parent_prefix_id.is_none());

        let vrf = store.get_vrf("aws_123456789_vpc-sync").await.unwrap().unwrap();
        assert!(!vrf.routable_flag);
        assert!(!vrf.is_default);
    }

    #[tokio::test]
    async fn test_subnet_outside_association_is_orphaned() {
        let store = Store::in_memory().await.unwrap();
        let config = test_config();
        let (vpc, _parent) = seeded_vpc(&store, true).await;
        let cloud = MockCloud::new();

        // 192.168.0.0/24 is not inside the association's 10.0.0.0/16
        cloud.report("vpc-sync", vec![cloud_subnet("subnet-x", "192.168.0.0/24")]);
        let outcome = sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.orphaned, 1);

        let subnets = store.list_vpc_subnet_prefixes(&vpc.vpc_id).await.unwrap();
        assert_eq!(subnets.len(), 1);
        assert!(subnets[0].parent_prefix_id.is_none());
        assert_eq!(subnets[0].vrf_id, "prod-vrf");
    }

    #[tokio::test]
    async fn test_repeat_sync_is_stable() {
        let store = Store::in_memory().await.unwrap();
        let config = test_config();
        let (vpc, _parent) = seeded_vpc(&store, true).await;
        let cloud = MockCloud::new();

        cloud.report("vpc-sync", vec![cloud_subnet("subnet-1", "10.0.1.0/24")]);
        sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();
        let outcome = sync_single_vpc(&store, &cloud, &config, &vpc)
            .await
            .unwrap()
            .unwrap();

        // Second cycle with the same report is pure metadata refresh
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.tombstoned, 0);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.resurrected, 0);
        assert_eq!(store.list_vpc_subnet_prefixes(&vpc.vpc_id).await.unwrap().len(), 1);
    }
}
