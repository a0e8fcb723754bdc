use anyhow::Result;
use chrono::Utc;
use ipnet::IpNet;

use super::{IpamError, NotFoundError, Store};
use crate::cidr::{self, SubnetIter};
use crate::models::*;

/// Bounded retry for allocations losing a concurrent-commit race
const MAX_ALLOCATION_ATTEMPTS: usize = 3;

/// Available-candidate scan bound. Only one subnet is returned per
/// allocation and available_count is advisory, so a handful suffices even
/// for IPv6 parents with astronomically many candidates.
const MAX_AVAILABLE_TO_FIND: usize = 16;

/// Strict tag match: every required key present with exactly equal value.
/// Extra keys on the candidate are fine; an empty requirement matches all.
pub fn tags_match_strictly(candidate_tags: &TagMap, required: &TagMap) -> bool {
    required
        .iter()
        .all(|(key, value)| candidate_tags.get(key) == Some(value))
}

fn is_allocation_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<IpamError>(),
        Some(IpamError::DuplicateCidr(_)) | Some(IpamError::SiblingOverlap(_))
    )
}

impl Store {
    /// Candidate parents for an allocation: the explicit parent when given
    /// (it must exist, be manual, and match the required tags), otherwise
    /// every tag-matching manual prefix in the VRF. Ordered most-specific
    /// first, ties broken by ascending network address.
    pub async fn find_matching_parents(
        &self,
        vrf_id: &str,
        required_tags: &TagMap,
        parent_prefix_id: Option<&str>,
    ) -> Result<Vec<Prefix>> {
        if let Some(parent_id) = parent_prefix_id {
            let parent = self
                .get_prefix(parent_id)
                .await?
                .ok_or_else(|| NotFoundError::new("Prefix", parent_id))?;
            if parent.source != prefix_source::MANUAL {
                return Err(IpamError::ParentMismatch(
                    "Can only allocate subnets from manual prefixes".to_string(),
                )
                .into());
            }
            if !tags_match_strictly(&parent.tags, required_tags) {
                return Err(IpamError::ParentMismatch(format!(
                    "Parent prefix {} does not match the required tags",
                    parent_id
                ))
                .into());
            }
            return Ok(vec![parent]);
        }

        let all = self
            .filter_prefixes(&PrefixFilter {
                vrf_id: Some(vrf_id.to_string()),
                source: Some(prefix_source::MANUAL.to_string()),
                ..Default::default()
            })
            .await?;

        let mut matching: Vec<Prefix> = all
            .into_iter()
            .filter(|p| tags_match_strictly(&p.tags, required_tags))
            .collect();

        matching.sort_by(|a, b| {
            let len_a = cidr::parse_cidr(&a.cidr).map(|n| n.prefix_len()).unwrap_or(0);
            let len_b = cidr::parse_cidr(&b.cidr).map(|n| n.prefix_len()).unwrap_or(0);
            len_b.cmp(&len_a).then_with(|| {
                let key_a = cidr::parse_cidr(&a.cidr).map(|n| cidr::network_key(&n));
                let key_b = cidr::parse_cidr(&b.cidr).map(|n| cidr::network_key(&n));
                key_a.cmp(&key_b)
            })
        });

        Ok(matching)
    }

    /// Available /subnet_size candidates inside a parent, in address order,
    /// capped at `cap`. The enumeration is lazy; it stops as soon as enough
    /// free candidates are seen.
    async fn available_in_parent(
        &self,
        parent: &Prefix,
        parent_net: &IpNet,
        subnet_size: u8,
        cap: usize,
    ) -> Result<Vec<IpNet>> {
        let children = self.list_prefix_children(&parent.prefix_id).await?;
        let child_nets: Vec<IpNet> = children
            .iter()
            .filter_map(|c| cidr::parse_cidr(&c.cidr).ok())
            .collect();

        let mut available = Vec::new();
        for candidate in SubnetIter::new(parent_net, subnet_size)
            .map_err(IpamError::InvalidMaskLength)?
        {
            if child_nets.iter().any(|c| cidr::overlaps(&candidate, c)) {
                continue;
            }
            available.push(candidate);
            if available.len() >= cap {
                break;
            }
        }
        Ok(available)
    }

    /// First-fit subnet allocation (§ allocate-subnet). Deterministic given
    /// a fixed store state; a concurrent allocator hitting the same
    /// candidate loses the commit race and this call retries with fresh
    /// state, bounded at three attempts.
    pub async fn allocate_subnet(&self, req: &AllocateSubnetRequest) -> Result<SubnetAllocation> {
        if req.subnet_size > 128 {
            return Err(IpamError::InvalidMaskLength(format!(
                "Subnet size /{} exceeds the 128-bit address space",
                req.subnet_size
            ))
            .into());
        }

        let mut last_conflict = None;
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            match self.try_allocate_once(req).await {
                Ok(allocation) => return Ok(allocation),
                Err(e) if is_allocation_conflict(&e) => {
                    tracing::warn!(
                        "Allocation attempt {}/{} lost a concurrent commit race: {}",
                        attempt,
                        MAX_ALLOCATION_ATTEMPTS,
                        e
                    );
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| {
            IpamError::NoSpaceAvailable("Subnet allocation failed".to_string()).into()
        }))
    }

    async fn try_allocate_once(&self, req: &AllocateSubnetRequest) -> Result<SubnetAllocation> {
        let parents = self
            .find_matching_parents(&req.vrf_id, &req.tags, req.parent_prefix_id.as_deref())
            .await?;

        if parents.is_empty() {
            return Err(IpamError::ParentMismatch(format!(
                "No parent prefixes found in VRF {} matching tags {}",
                req.vrf_id,
                serde_json::Value::Object(req.tags.clone())
            ))
            .into());
        }

        let explicit = req.parent_prefix_id.is_some();
        for parent in &parents {
            // A routable allocation cannot come out of a non-routable parent
            if req.routable && !parent.routable {
                continue;
            }

            let parent_net = match cidr::parse_cidr(&parent.cidr) {
                Ok(n) => n,
                Err(_) => continue,
            };
            if req.subnet_size < parent_net.prefix_len()
                || req.subnet_size > cidr::max_prefix_len(&parent_net)
            {
                if explicit {
                    return Err(IpamError::InvalidMaskLength(format!(
                        "Subnet size /{} is not valid within parent {}",
                        req.subnet_size, parent.cidr
                    ))
                    .into());
                }
                continue;
            }

            let available = self
                .available_in_parent(parent, &parent_net, req.subnet_size, MAX_AVAILABLE_TO_FIND)
                .await?;
            let chosen = match available.first() {
                Some(net) => *net,
                None => continue,
            };

            let mut tags = req.tags.clone();
            if let Some(description) = &req.description {
                tags.insert(tag_keys::DESCRIPTION.to_string(), description.clone().into());
            }
            tags.insert(
                tag_keys::ALLOCATED_FROM.to_string(),
                parent.prefix_id.clone().into(),
            );
            tags.insert(
                tag_keys::ALLOCATION_TIMESTAMP.to_string(),
                Utc::now().to_rfc3339().into(),
            );

            let prefix = self
                .create_allocated_prefix(&CreatePrefixRequest {
                    vrf_id: req.vrf_id.clone(),
                    cidr: chosen.to_string(),
                    parent_prefix_id: Some(parent.prefix_id.clone()),
                    tags,
                    routable: req.routable,
                    vpc_children_type_flag: req.vpc_children_type_flag,
                    request_id: None,
                })
                .await?;

            return Ok(SubnetAllocation {
                allocated_cidr: prefix.cidr.clone(),
                parent_prefix_id: parent.prefix_id.clone(),
                prefix_id: prefix.prefix_id.clone(),
                available_count: available.len().saturating_sub(1),
                parent_cidr: parent.cidr.clone(),
                tags: prefix.tags,
                routable: prefix.routable,
                created_at: prefix.created_at,
            });
        }

        let parent_cidrs: Vec<&str> = parents.iter().map(|p| p.cidr.as_str()).collect();
        Err(IpamError::NoSpaceAvailable(format!(
            "No available /{} subnets found in parent prefixes: [{}]",
            req.subnet_size,
            parent_cidrs.join(", ")
        ))
        .into())
    }

    /// Preview of free candidates inside a parent before allocating
    pub async fn preview_available_subnets(
        &self,
        parent_prefix_id: &str,
        subnet_size: u8,
    ) -> Result<AvailableSubnets> {
        let parent = self
            .get_prefix(parent_prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", parent_prefix_id))?;
        if parent.source != prefix_source::MANUAL {
            return Err(IpamError::ParentMismatch(
                "Can only allocate subnets from manual prefixes".to_string(),
            )
            .into());
        }

        let parent_net = cidr::parse_cidr(&parent.cidr).map_err(IpamError::InvalidCidr)?;
        if subnet_size < parent_net.prefix_len() || subnet_size > cidr::max_prefix_len(&parent_net)
        {
            return Err(IpamError::InvalidMaskLength(format!(
                "Subnet size /{} is not valid within parent {}",
                subnet_size, parent.cidr
            ))
            .into());
        }

        let available = self
            .available_in_parent(&parent, &parent_net, subnet_size, MAX_AVAILABLE_TO_FIND)
            .await?;

        let diff = subnet_size - parent_net.prefix_len();
        let total_possible = if diff >= 64 {
            u64::MAX
        } else {
            1u64 << diff
        };

        Ok(AvailableSubnets {
            parent_prefix_id: parent.prefix_id,
            parent_cidr: parent.cidr,
            subnet_size,
            available_count: available.len(),
            available_subnets: available.iter().map(|n| n.to_string()).collect(),
            total_possible,
            ip_version: cidr::ip_version(&parent_net),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_req(vrf: &str, size: u8, parent: Option<&str>) -> AllocateSubnetRequest {
        AllocateSubnetRequest {
            vrf_id: vrf.to_string(),
            subnet_size: size,
            tags: TagMap::new(),
            routable: true,
            parent_prefix_id: parent.map(|s| s.to_string()),
            description: None,
            vpc_children_type_flag: false,
            request_id: None,
        }
    }

    async fn seeded() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.ensure_default_vrf("prod-vrf").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_first_fit_in_address_order() {
        let store = seeded().await;
        let parent = store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.0.0.0/12".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: true,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();

        let first = store
            .allocate_subnet(&alloc_req("prod-vrf", 16, None))
            .await
            .unwrap();
        assert_eq!(first.allocated_cidr, "10.0.0.0/16");
        assert_eq!(first.parent_prefix_id, parent.prefix_id);
        assert_eq!(
            first.tags.get("allocated_from").and_then(|v| v.as_str()),
            Some(parent.prefix_id.as_str())
        );

        let second = store
            .allocate_subnet(&alloc_req("prod-vrf", 16, None))
            .await
            .unwrap();
        assert_eq!(second.allocated_cidr, "10.1.0.0/16");

        // Allocated subnets satisfy the mask-length and containment invariant
        let allocated = store.get_prefix(&second.prefix_id).await.unwrap().unwrap();
        assert_eq!(allocated.parent_prefix_id.as_deref(), Some(parent.prefix_id.as_str()));
        assert_eq!(allocated.indentation_level, 1);
    }

    #[tokio::test]
    async fn test_tag_matched_parent_selection() {
        let store = seeded().await;
        let mut env_tags = TagMap::new();
        env_tags.insert("env".to_string(), "prod".into());
        env_tags.insert("team".to_string(), "net".into());

        store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.0.0.0/16".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: true,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();
        let tagged = store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.1.0.0/16".to_string(),
                parent_prefix_id: None,
                tags: env_tags.clone(),
                routable: true,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();

        let mut required = TagMap::new();
        required.insert("env".to_string(), "prod".into());
        let mut req = alloc_req("prod-vrf", 24, None);
        req.tags = required;

        // Only the tagged parent qualifies; extra keys on it are fine.
        // The allocated subnet carries the request tags, not the parent's.
        let allocation = store.allocate_subnet(&req).await.unwrap();
        assert_eq!(allocation.parent_prefix_id, tagged.prefix_id);
        assert_eq!(allocation.allocated_cidr, "10.1.0.0/24");
        assert!(!allocation.tags.contains_key("team"));
    }

    #[tokio::test]
    async fn test_routable_request_skips_non_routable_parent() {
        let store = seeded().await;
        store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.0.0.0/16".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: false,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();

        let err = store
            .allocate_subnet(&alloc_req("prod-vrf", 24, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::NoSpaceAvailable(_))
        ));

        // A non-routable request against the same parent succeeds
        let mut req = alloc_req("prod-vrf", 24, None);
        req.routable = false;
        assert!(store.allocate_subnet(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_exhausted_parent_reports_no_space() {
        let store = seeded().await;
        let parent = store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.0.0.0/30".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: true,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();

        store
            .allocate_subnet(&alloc_req("prod-vrf", 31, Some(&parent.prefix_id)))
            .await
            .unwrap();
        store
            .allocate_subnet(&alloc_req("prod-vrf", 31, Some(&parent.prefix_id)))
            .await
            .unwrap();

        let err = store
            .allocate_subnet(&alloc_req("prod-vrf", 31, Some(&parent.prefix_id)))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::NoSpaceAvailable(_))
        ));
        assert!(msg.contains("10.0.0.0/30"));
    }

    #[tokio::test]
    async fn test_invalid_mask_lengths() {
        let store = seeded().await;
        let parent = store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.0.0.0/16".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: true,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();

        // Larger than the parent
        let err = store
            .allocate_subnet(&alloc_req("prod-vrf", 8, Some(&parent.prefix_id)))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::InvalidMaskLength(_))
        ));

        // Beyond the address family
        let err = store
            .allocate_subnet(&alloc_req("prod-vrf", 64, Some(&parent.prefix_id)))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::InvalidMaskLength(_))
        ));
    }

    #[tokio::test]
    async fn test_allocation_is_deterministic() {
        // Two stores with identical state make the identical choice
        for _ in 0..2 {
            let store = seeded().await;
            store
                .create_manual_prefix(&CreatePrefixRequest {
                    vrf_id: "prod-vrf".to_string(),
                    cidr: "10.0.0.0/16".to_string(),
                    parent_prefix_id: None,
                    tags: TagMap::new(),
                    routable: true,
                    vpc_children_type_flag: false,
                    request_id: None,
                })
                .await
                .unwrap();
            let allocation = store
                .allocate_subnet(&alloc_req("prod-vrf", 24, None))
                .await
                .unwrap();
            assert_eq!(allocation.allocated_cidr, "10.0.0.0/24");
        }
    }

    #[tokio::test]
    async fn test_ipv6_allocation_is_lazy() {
        let store = seeded().await;
        store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "2001:db8::/32".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: true,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();

        // 2^32 candidate /64s; first-fit must return promptly
        let allocation = store
            .allocate_subnet(&alloc_req("prod-vrf", 64, None))
            .await
            .unwrap();
        assert_eq!(allocation.allocated_cidr, "2001:db8::/64");

        let second = store
            .allocate_subnet(&alloc_req("prod-vrf", 64, None))
            .await
            .unwrap();
        assert_eq!(second.allocated_cidr, "2001:db8:0:1::/64");
    }

    #[tokio::test]
    async fn test_preview_available_subnets() {
        let store = seeded().await;
        let parent = store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "10.0.0.0/24".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: true,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();
        store
            .allocate_subnet(&alloc_req("prod-vrf", 26, Some(&parent.prefix_id)))
            .await
            .unwrap();

        let preview = store
            .preview_available_subnets(&parent.prefix_id, 26)
            .await
            .unwrap();
        assert_eq!(preview.total_possible, 4);
        assert_eq!(preview.available_count, 3);
        assert_eq!(preview.available_subnets[0], "10.0.0.64/26");
        assert_eq!(preview.ip_version, 4);
    }

    #[test]
    fn test_tags_match_strictly() {
        let mut candidate = TagMap::new();
        candidate.insert("env".to_string(), "prod".into());
        candidate.insert("team".to_string(), "net".into());

        let empty = TagMap::new();
        assert!(tags_match_strictly(&candidate, &empty));

        let mut required = TagMap::new();
        required.insert("env".to_string(), "prod".into());
        assert!(tags_match_strictly(&candidate, &required));

        required.insert("team".to_string(), "storage".into());
        assert!(!tags_match_strictly(&candidate, &required));

        let mut missing = TagMap::new();
        missing.insert("region".to_string(), "us".into());
        assert!(!tags_match_strictly(&candidate, &missing));
    }
}
