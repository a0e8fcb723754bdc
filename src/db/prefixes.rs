use anyhow::Result;
use chrono::Utc;
use ipnet::IpNet;
use sqlx::{Sqlite, Transaction};

use super::row_helpers::map_prefix_row;
use super::{is_unique_violation, IpamError, NotFoundError, Store};
use crate::cidr;
use crate::models::*;

const SELECT_PREFIX: &str = "SELECT * FROM prefixes";

/// Row image for a prefix insert. Derived columns (ip_version, prefix_len,
/// network_key) are computed from `net` at write time.
pub(crate) struct NewPrefix {
    pub prefix_id: String,
    pub vrf_id: String,
    pub net: IpNet,
    pub tags: TagMap,
    pub indentation_level: i32,
    pub parent_prefix_id: Option<String>,
    pub source: String,
    pub routable: bool,
    pub vpc_children_type_flag: bool,
    pub vpc_id: Option<String>,
}

impl Store {
    pub async fn get_prefix(&self, prefix_id: &str) -> Result<Option<Prefix>> {
        let row = sqlx::query(&format!("{} WHERE prefix_id = ?", SELECT_PREFIX))
            .bind(prefix_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(map_prefix_row))
    }

    /// Look up by the (vrf_id, cidr) natural key. The CIDR is canonicalized
    /// before the query so host-bit spellings still match.
    pub async fn get_prefix_by_cidr(&self, vrf_id: &str, cidr: &str) -> Result<Option<Prefix>> {
        let net = cidr::parse_cidr(cidr).map_err(IpamError::InvalidCidr)?;
        let row = sqlx::query(&format!("{} WHERE vrf_id = ? AND cidr = ?", SELECT_PREFIX))
            .bind(vrf_id)
            .bind(cidr::canonical(&net))
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(map_prefix_row))
    }

    pub async fn list_prefix_children(&self, parent_prefix_id: &str) -> Result<Vec<Prefix>> {
        let rows = sqlx::query(&format!(
            "{} WHERE parent_prefix_id = ? ORDER BY ip_version, network_key",
            SELECT_PREFIX
        ))
        .bind(parent_prefix_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(map_prefix_row).collect())
    }

    /// All prefixes of a VPC mirrored from the cloud, for the sync service
    pub async fn list_vpc_subnet_prefixes(&self, vpc_id: &str) -> Result<Vec<Prefix>> {
        let rows = sqlx::query(&format!(
            "{} WHERE vpc_id = ? AND source = ? ORDER BY ip_version, network_key",
            SELECT_PREFIX
        ))
        .bind(vpc_id)
        .bind(prefix_source::VPC)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(map_prefix_row).collect())
    }

    /// Flat tree rows: grouped by VRF, then depth, then numeric network
    /// address. Handlers nest these into a forest via parent links.
    pub async fn prefix_tree(&self, vrf_id: Option<&str>) -> Result<Vec<Prefix>> {
        let rows = match vrf_id {
            Some(vrf) => {
                sqlx::query(&format!(
                    "{} WHERE vrf_id = ? ORDER BY vrf_id, indentation_level, ip_version, network_key",
                    SELECT_PREFIX
                ))
                .bind(vrf)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "{} ORDER BY vrf_id, indentation_level, ip_version, network_key",
                    SELECT_PREFIX
                ))
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(rows.iter().map(map_prefix_row).collect())
    }

    pub async fn filter_prefixes(&self, filter: &PrefixFilter) -> Result<Vec<Prefix>> {
        let mut sql = String::from(
            "SELECT p.* FROM prefixes p LEFT JOIN vpcs v ON p.vpc_id = v.vpc_id WHERE 1 = 1",
        );
        if filter.vrf_id.is_some() {
            sql.push_str(" AND p.vrf_id = ?");
        }
        if filter.routable.is_some() {
            sql.push_str(" AND p.routable = ?");
        }
        if filter.source.is_some() {
            sql.push_str(" AND p.source = ?");
        }
        if filter.provider.is_some() {
            sql.push_str(" AND v.provider = ?");
        }
        if filter.provider_account_id.is_some() {
            sql.push_str(" AND v.provider_account_id = ?");
        }
        sql.push_str(" ORDER BY p.ip_version, p.network_key, p.prefix_len");

        let mut query = sqlx::query(&sql);
        if let Some(vrf) = &filter.vrf_id {
            query = query.bind(vrf);
        }
        if let Some(routable) = filter.routable {
            query = query.bind(routable);
        }
        if let Some(source) = &filter.source {
            query = query.bind(source);
        }
        if let Some(provider) = &filter.provider {
            query = query.bind(provider);
        }
        if let Some(account) = &filter.provider_account_id {
            query = query.bind(account);
        }

        let rows = query.fetch_all(self.pool()).await?;
        let mut prefixes: Vec<Prefix> = rows.iter().map(map_prefix_row).collect();
        if let Some(search) = &filter.search {
            prefixes = apply_search(prefixes, search);
        }
        Ok(prefixes)
    }

    pub async fn create_manual_prefix(&self, req: &CreatePrefixRequest) -> Result<Prefix> {
        self.create_manual_prefix_inner(req, false).await
    }

    /// Allocator entry point: identical to a manual create except that a
    /// parent with vpc_children_type_flag=true is admitted, since allocated
    /// leaves are exactly what such parents host.
    pub(crate) async fn create_allocated_prefix(&self, req: &CreatePrefixRequest) -> Result<Prefix> {
        self.create_manual_prefix_inner(req, true).await
    }

    async fn create_manual_prefix_inner(
        &self,
        req: &CreatePrefixRequest,
        from_allocator: bool,
    ) -> Result<Prefix> {
        let net = cidr::parse_cidr(&req.cidr).map_err(IpamError::InvalidCidr)?;
        let prefix_id = format!("manual-{}-{}", req.vrf_id, cidr::cidr_for_id(&net));

        let mut tx = self.pool().begin().await?;

        let vrf_exists: Option<(String,)> =
            sqlx::query_as("SELECT vrf_id FROM vrfs WHERE vrf_id = ?")
                .bind(&req.vrf_id)
                .fetch_optional(&mut *tx)
                .await?;
        if vrf_exists.is_none() {
            return Err(NotFoundError::new("VRF", &req.vrf_id).into());
        }

        let parent = match &req.parent_prefix_id {
            Some(parent_id) => {
                let parent = fetch_prefix(&mut tx, parent_id)
                    .await?
                    .ok_or_else(|| NotFoundError::new("Prefix", parent_id))?;
                if parent.source == prefix_source::VPC {
                    return Err(IpamError::ChildrenNotAllowed(
                        "VPC-sourced prefixes cannot have child prefixes".to_string(),
                    )
                    .into());
                }
                if parent.vpc_children_type_flag && !from_allocator {
                    return Err(IpamError::ChildrenNotAllowed(format!(
                        "Prefix {} admits only VPC subnets as children",
                        parent.prefix_id
                    ))
                    .into());
                }
                Some(parent)
            }
            None => None,
        };

        validate_prefix_conflicts(&mut tx, &req.vrf_id, &net, parent.as_ref()).await?;

        let indentation_level = parent.as_ref().map(|p| p.indentation_level + 1).unwrap_or(0);
        insert_prefix(
            &mut tx,
            &NewPrefix {
                prefix_id: prefix_id.clone(),
                vrf_id: req.vrf_id.clone(),
                net,
                tags: req.tags.clone(),
                indentation_level,
                parent_prefix_id: req.parent_prefix_id.clone(),
                source: prefix_source::MANUAL.to_string(),
                routable: req.routable,
                vpc_children_type_flag: req.vpc_children_type_flag,
                vpc_id: None,
            },
        )
        .await?;

        tx.commit().await?;

        self.get_prefix(&prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", &prefix_id).into())
    }

    /// Create a prefix mirrored from a cloud subnet. The parent, VRF, and
    /// routability have already been resolved by the sync service.
    pub async fn create_vpc_sourced_prefix(
        &self,
        vpc_id: &str,
        cidr_str: &str,
        parent_prefix_id: Option<&str>,
        tags: TagMap,
        vrf_id: &str,
        routable: bool,
    ) -> Result<Prefix> {
        let net = cidr::parse_cidr(cidr_str).map_err(IpamError::InvalidCidr)?;
        let prefix_id = format!("{}-subnet-{}", vpc_id, cidr::cidr_for_id(&net));

        let mut tx = self.pool().begin().await?;

        let vpc_exists: Option<(String,)> =
            sqlx::query_as("SELECT vpc_id FROM vpcs WHERE vpc_id = ?")
                .bind(vpc_id)
                .fetch_optional(&mut *tx)
                .await?;
        if vpc_exists.is_none() {
            return Err(NotFoundError::new("VPC", vpc_id).into());
        }
        let vrf_exists: Option<(String,)> =
            sqlx::query_as("SELECT vrf_id FROM vrfs WHERE vrf_id = ?")
                .bind(vrf_id)
                .fetch_optional(&mut *tx)
                .await?;
        if vrf_exists.is_none() {
            return Err(NotFoundError::new("VRF", vrf_id).into());
        }

        let parent = match parent_prefix_id {
            Some(parent_id) => Some(
                fetch_prefix(&mut tx, parent_id)
                    .await?
                    .ok_or_else(|| NotFoundError::new("Prefix", parent_id))?,
            ),
            None => None,
        };

        validate_prefix_conflicts(&mut tx, vrf_id, &net, parent.as_ref()).await?;

        let indentation_level = parent.as_ref().map(|p| p.indentation_level + 1).unwrap_or(0);
        insert_prefix(
            &mut tx,
            &NewPrefix {
                prefix_id: prefix_id.clone(),
                vrf_id: vrf_id.to_string(),
                net,
                tags,
                indentation_level,
                parent_prefix_id: parent_prefix_id.map(|s| s.to_string()),
                source: prefix_source::VPC.to_string(),
                routable,
                vpc_children_type_flag: false,
                vpc_id: Some(vpc_id.to_string()),
            },
        )
        .await?;

        tx.commit().await?;

        self.get_prefix(&prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", &prefix_id).into())
    }

    /// Create a public IP prefix in public-vrf, always routable, never
    /// parented. With a vpc_id the entry is VPC-attached (source=vpc and a
    /// vpc-children leaf); without one it is a standalone manual entry.
    pub async fn create_public_ip_prefix(&self, req: &CreatePublicIpRequest) -> Result<Prefix> {
        let net = cidr::parse_cidr(&req.cidr).map_err(IpamError::InvalidCidr)?;

        let (prefix_id, source, vpc_children_type_flag) = match &req.vpc_id {
            Some(vpc_id) => (
                format!("{}-subnet-{}", vpc_id, cidr::cidr_for_id(&net)),
                prefix_source::VPC,
                true,
            ),
            None => (
                format!("public-ip-{}", cidr::cidr_for_id(&net)),
                prefix_source::MANUAL,
                false,
            ),
        };

        let mut tx = self.pool().begin().await?;

        if let Some(vpc_id) = &req.vpc_id {
            let vpc_exists: Option<(String,)> =
                sqlx::query_as("SELECT vpc_id FROM vpcs WHERE vpc_id = ?")
                    .bind(vpc_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if vpc_exists.is_none() {
                return Err(NotFoundError::new("VPC", vpc_id).into());
            }
        }

        validate_prefix_conflicts(&mut tx, PUBLIC_VRF_ID, &net, None).await?;

        insert_prefix(
            &mut tx,
            &NewPrefix {
                prefix_id: prefix_id.clone(),
                vrf_id: PUBLIC_VRF_ID.to_string(),
                net,
                tags: req.tags.clone(),
                indentation_level: 0,
                parent_prefix_id: None,
                source: source.to_string(),
                routable: true,
                vpc_children_type_flag,
                vpc_id: req.vpc_id.clone(),
            },
        )
        .await?;

        tx.commit().await?;

        self.get_prefix(&prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", &prefix_id).into())
    }

    /// Update a manual prefix. VPC-sourced prefixes are owned by the sync
    /// service and refuse user mutation.
    pub async fn update_manual_prefix(
        &self,
        prefix_id: &str,
        req: &UpdatePrefixRequest,
    ) -> Result<Prefix> {
        let mut tx = self.pool().begin().await?;

        let current = fetch_prefix(&mut tx, prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", prefix_id))?;

        if current.source != prefix_source::MANUAL {
            return Err(IpamError::VpcSourcedImmutable(format!(
                "Cannot update VPC-sourced prefix {}",
                prefix_id
            ))
            .into());
        }

        // Turning the flag on while manual children exist would orphan them
        // from the "VPC subnets only" contract
        if req.vpc_children_type_flag == Some(true) && !current.vpc_children_type_flag {
            let (manual_children,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM prefixes WHERE parent_prefix_id = ? AND source = ?",
            )
            .bind(prefix_id)
            .bind(prefix_source::MANUAL)
            .fetch_one(&mut *tx)
            .await?;
            if manual_children > 0 {
                return Err(IpamError::ChildrenNotAllowed(format!(
                    "Prefix {} has {} manual child prefix(es); cannot restrict children to VPC subnets",
                    prefix_id, manual_children
                ))
                .into());
            }
        }

        let tags = req.tags.clone().unwrap_or(current.tags);
        let routable = req.routable.unwrap_or(current.routable);
        let flag = req
            .vpc_children_type_flag
            .unwrap_or(current.vpc_children_type_flag);

        sqlx::query(
            "UPDATE prefixes SET tags = ?, routable = ?, vpc_children_type_flag = ?, updated_at = ? WHERE prefix_id = ?",
        )
        .bind(serde_json::to_string(&tags)?)
        .bind(routable)
        .bind(flag)
        .bind(Utc::now())
        .bind(prefix_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_prefix(prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", prefix_id).into())
    }

    /// Replace a prefix's tag map wholesale. Internal: the sync service and
    /// the association endpoints maintain tags on prefixes of any source.
    pub(crate) async fn replace_prefix_tags(&self, prefix_id: &str, tags: &TagMap) -> Result<()> {
        let result = sqlx::query("UPDATE prefixes SET tags = ?, updated_at = ? WHERE prefix_id = ?")
            .bind(serde_json::to_string(tags)?)
            .bind(Utc::now())
            .bind(prefix_id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(NotFoundError::new("Prefix", prefix_id).into());
        }
        Ok(())
    }

    pub async fn delete_manual_prefix(&self, prefix_id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let prefix = fetch_prefix(&mut tx, prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", prefix_id))?;

        if prefix.source != prefix_source::MANUAL {
            return Err(IpamError::VpcSourcedImmutable(format!(
                "Cannot delete VPC-sourced prefix {}",
                prefix_id
            ))
            .into());
        }

        let (children,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM prefixes WHERE parent_prefix_id = ?")
                .bind(prefix_id)
                .fetch_one(&mut *tx)
                .await?;
        if children > 0 {
            return Err(IpamError::HasChildren(format!(
                "Cannot delete prefix {} - it has {} child prefix(es)",
                prefix_id, children
            ))
            .into());
        }

        let (associations,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM vpc_prefix_associations WHERE parent_prefix_id = ?",
        )
        .bind(prefix_id)
        .fetch_one(&mut *tx)
        .await?;
        if associations > 0 {
            return Err(IpamError::PrefixInUse(format!(
                "Cannot delete prefix {} - it has {} VPC association(s)",
                prefix_id, associations
            ))
            .into());
        }

        sqlx::query("DELETE FROM prefixes WHERE prefix_id = ?")
            .bind(prefix_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Idempotent create-or-update of a cloud subnet leaf. Returns the
    /// prefix id. An insert race with a concurrent writer degrades to the
    /// update path.
    pub async fn upsert_vpc_subnet(
        &self,
        vpc_id: &str,
        cidr_str: &str,
        tags: TagMap,
        parent_prefix_id: Option<&str>,
        vrf_id: &str,
        routable: bool,
    ) -> Result<String> {
        let net = cidr::parse_cidr(cidr_str).map_err(IpamError::InvalidCidr)?;
        let canonical = cidr::canonical(&net);

        let existing = sqlx::query(&format!(
            "{} WHERE vpc_id = ? AND cidr = ? AND source = ?",
            SELECT_PREFIX
        ))
        .bind(vpc_id)
        .bind(&canonical)
        .bind(prefix_source::VPC)
        .fetch_optional(self.pool())
        .await?;

        if let Some(row) = existing {
            let prefix = map_prefix_row(&row);
            let mut merged = prefix.tags.clone();
            for (k, v) in tags {
                merged.insert(k, v);
            }
            self.replace_prefix_tags(&prefix.prefix_id, &merged).await?;
            return Ok(prefix.prefix_id);
        }

        match self
            .create_vpc_sourced_prefix(vpc_id, cidr_str, parent_prefix_id, tags.clone(), vrf_id, routable)
            .await
        {
            Ok(prefix) => Ok(prefix.prefix_id),
            Err(err)
                if matches!(
                    err.downcast_ref::<IpamError>(),
                    Some(IpamError::DuplicateCidr(_))
                ) =>
            {
                // Lost the insert race; the row exists now
                let prefix = self
                    .get_prefix_by_cidr(vrf_id, &canonical)
                    .await?
                    .ok_or_else(|| NotFoundError::new("Prefix", &canonical))?;
                let mut merged = prefix.tags.clone();
                for (k, v) in tags {
                    merged.insert(k, v);
                }
                self.replace_prefix_tags(&prefix.prefix_id, &merged).await?;
                Ok(prefix.prefix_id)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn is_prefix_associated(&self, prefix_id: &str) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM vpc_prefix_associations WHERE parent_prefix_id = ?",
        )
        .bind(prefix_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }

    /// Longest-prefix-match among same-family manual prefixes of the VRF
    pub async fn find_best_parent(&self, vrf_id: &str, cidr_str: &str) -> Result<Option<Prefix>> {
        let net = cidr::parse_cidr(cidr_str).map_err(IpamError::InvalidCidr)?;
        let rows = sqlx::query(&format!(
            "{} WHERE vrf_id = ? AND source = ? AND ip_version = ? ORDER BY prefix_len DESC, network_key",
            SELECT_PREFIX
        ))
        .bind(vrf_id)
        .bind(prefix_source::MANUAL)
        .bind(cidr::ip_version(&net) as i32)
        .fetch_all(self.pool())
        .await?;

        for row in &rows {
            let candidate = map_prefix_row(row);
            if let Ok(candidate_net) = cidr::parse_cidr(&candidate.cidr) {
                if cidr::is_strict_subnet(&net, &candidate_net) {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }
}

async fn fetch_prefix(
    tx: &mut Transaction<'_, Sqlite>,
    prefix_id: &str,
) -> Result<Option<Prefix>> {
    let row = sqlx::query(&format!("{} WHERE prefix_id = ?", SELECT_PREFIX))
        .bind(prefix_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.as_ref().map(map_prefix_row))
}

/// Conflict validation run inside every create, in the insert transaction:
///   1. exact (vrf, cidr) duplicate
///   2. parent family / VRF / strict containment
///   3. overlap against the sibling set (same parent, or both root)
async fn validate_prefix_conflicts(
    tx: &mut Transaction<'_, Sqlite>,
    vrf_id: &str,
    net: &IpNet,
    parent: Option<&Prefix>,
) -> Result<()> {
    let canonical = cidr::canonical(net);

    let duplicate: Option<(String,)> =
        sqlx::query_as("SELECT prefix_id FROM prefixes WHERE vrf_id = ? AND cidr = ?")
            .bind(vrf_id)
            .bind(&canonical)
            .fetch_optional(&mut **tx)
            .await?;
    if let Some((existing_id,)) = duplicate {
        return Err(IpamError::DuplicateCidr(format!(
            "Prefix {} already exists in VRF {} ({})",
            canonical, vrf_id, existing_id
        ))
        .into());
    }

    if let Some(parent) = parent {
        if parent.vrf_id != vrf_id {
            return Err(IpamError::ParentMismatch(format!(
                "Parent prefix {} belongs to VRF {}, not {}",
                parent.prefix_id, parent.vrf_id, vrf_id
            ))
            .into());
        }
        let parent_net = cidr::parse_cidr(&parent.cidr)
            .map_err(|e| IpamError::InvalidCidr(format!("Parent {}: {}", parent.prefix_id, e)))?;
        if !cidr::same_family(net, &parent_net) {
            return Err(IpamError::FamilyMismatch(format!(
                "Prefix {} and parent {} are different IP families",
                canonical, parent.cidr
            ))
            .into());
        }
        if !cidr::is_strict_subnet(net, &parent_net) {
            return Err(IpamError::ParentMismatch(format!(
                "Prefix {} does not fit within parent {}",
                canonical, parent.cidr
            ))
            .into());
        }
    }

    let sibling_rows = match parent {
        Some(parent) => {
            sqlx::query("SELECT cidr FROM prefixes WHERE vrf_id = ? AND parent_prefix_id = ?")
                .bind(vrf_id)
                .bind(&parent.prefix_id)
                .fetch_all(&mut **tx)
                .await?
        }
        None => {
            sqlx::query("SELECT cidr FROM prefixes WHERE vrf_id = ? AND parent_prefix_id IS NULL")
                .bind(vrf_id)
                .fetch_all(&mut **tx)
                .await?
        }
    };

    for row in &sibling_rows {
        let sibling_cidr: String = sqlx::Row::get(row, "cidr");
        let sibling_net = match cidr::parse_cidr(&sibling_cidr) {
            Ok(n) => n,
            Err(_) => continue,
        };
        if cidr::overlaps(net, &sibling_net) {
            return Err(IpamError::SiblingOverlap(format!(
                "Prefix {} overlaps with existing sibling prefix {} under the same parent",
                canonical, sibling_cidr
            ))
            .into());
        }
    }

    Ok(())
}

async fn insert_prefix(tx: &mut Transaction<'_, Sqlite>, new: &NewPrefix) -> Result<()> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"INSERT INTO prefixes
           (prefix_id, vrf_id, cidr, ip_version, prefix_len, network_key, tags,
            indentation_level, parent_prefix_id, source, routable,
            vpc_children_type_flag, vpc_id, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&new.prefix_id)
    .bind(&new.vrf_id)
    .bind(cidr::canonical(&new.net))
    .bind(cidr::ip_version(&new.net) as i32)
    .bind(new.net.prefix_len() as i32)
    .bind(cidr::network_key(&new.net))
    .bind(serde_json::to_string(&new.tags)?)
    .bind(new.indentation_level)
    .bind(&new.parent_prefix_id)
    .bind(&new.source)
    .bind(new.routable)
    .bind(new.vpc_children_type_flag)
    .bind(&new.vpc_id)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(IpamError::DuplicateCidr(format!(
            "Prefix {} already exists in VRF {}",
            cidr::canonical(&new.net),
            new.vrf_id
        ))
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Free-text / tag search over a prefix list. Terms are AND-combined;
/// a `key:value` term matches tag entries by substring on both sides, any
/// other term matches the CIDR, the prefix id, a tag value, or (when the
/// term parses as a CIDR) containment in either direction.
pub fn apply_search(prefixes: Vec<Prefix>, query: &str) -> Vec<Prefix> {
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return prefixes;
    }

    prefixes
        .into_iter()
        .filter(|prefix| terms.iter().all(|term| term_matches(prefix, term)))
        .collect()
}

fn term_matches(prefix: &Prefix, term: &str) -> bool {
    let term_lower = term.to_lowercase();

    if let Some((key, value)) = term.split_once(':') {
        if !term.starts_with("http") {
            let key = key.trim().to_lowercase();
            let value = value.trim().to_lowercase();
            return prefix.tags.iter().any(|(k, v)| {
                k.to_lowercase().contains(&key)
                    && tag_value_text(v).to_lowercase().contains(&value)
            });
        }
    }

    if prefix.cidr.to_lowercase().contains(&term_lower)
        || prefix.prefix_id.to_lowercase().contains(&term_lower)
    {
        return true;
    }

    if term.contains('/') {
        if let (Ok(search_net), Ok(prefix_net)) =
            (cidr::parse_cidr(term), cidr::parse_cidr(&prefix.cidr))
        {
            if cidr::overlaps(&search_net, &prefix_net) {
                return true;
            }
        }
    }

    prefix
        .tags
        .values()
        .any(|v| tag_value_text(v).to_lowercase().contains(&term_lower))
}

fn tag_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
