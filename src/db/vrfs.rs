use anyhow::Result;
use chrono::Utc;

use super::row_helpers::map_vrf_row;
use super::{IpamError, NotFoundError, Store};
use crate::models::*;

/// Auto-created VRFs follow the `{provider}_{account}_{vpc}` naming
/// convention (plus a legacy `vrf:` form). They are owned by the sync
/// service and refuse manual edits.
pub fn is_auto_created_vrf(vrf_id: &str) -> bool {
    if vrf_id.starts_with("vrf:") {
        return true;
    }
    let re = regex_lite::Regex::new(r"^(aws|azure|gcp|other)_[^_]+_[^_]+$")
        .expect("static pattern");
    re.is_match(vrf_id)
}

impl Store {
    pub async fn list_vrfs(&self) -> Result<Vec<Vrf>> {
        let rows = sqlx::query("SELECT * FROM vrfs ORDER BY vrf_id")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(map_vrf_row).collect())
    }

    pub async fn get_vrf(&self, vrf_id: &str) -> Result<Option<Vrf>> {
        let row = sqlx::query("SELECT * FROM vrfs WHERE vrf_id = ?")
            .bind(vrf_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(map_vrf_row))
    }

    pub async fn create_vrf(&self, req: &CreateVrfRequest) -> Result<Vrf> {
        let mut tx = self.pool().begin().await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT vrf_id FROM vrfs WHERE vrf_id = ?")
                .bind(&req.vrf_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(IpamError::AlreadyExists(format!(
                "VRF with ID '{}' already exists",
                req.vrf_id
            ))
            .into());
        }

        // At most one default VRF
        if req.is_default {
            sqlx::query("UPDATE vrfs SET is_default = 0 WHERE is_default = 1")
                .execute(&mut *tx)
                .await?;
        }

        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO vrfs (vrf_id, description, tags, routable_flag, is_default, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&req.vrf_id)
        .bind(&req.description)
        .bind(serde_json::to_string(&req.tags)?)
        .bind(req.routable_flag)
        .bind(req.is_default)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_vrf(&req.vrf_id)
            .await?
            .ok_or_else(|| NotFoundError::new("VRF", &req.vrf_id).into())
    }

    pub async fn update_vrf(&self, vrf_id: &str, req: &UpdateVrfRequest) -> Result<Vrf> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM vrfs WHERE vrf_id = ?")
            .bind(vrf_id)
            .fetch_optional(&mut *tx)
            .await?;
        let current = match row.as_ref().map(map_vrf_row) {
            Some(v) => v,
            None => return Err(NotFoundError::new("VRF", vrf_id).into()),
        };

        if is_auto_created_vrf(vrf_id) {
            return Err(IpamError::ProtectedVrf(format!(
                "Cannot edit auto-created VRF '{}'",
                vrf_id
            ))
            .into());
        }

        if req.is_default == Some(true) {
            sqlx::query("UPDATE vrfs SET is_default = 0 WHERE vrf_id != ?")
                .bind(vrf_id)
                .execute(&mut *tx)
                .await?;
        }

        let description = req.description.clone().or(current.description);
        let tags = req.tags.clone().unwrap_or(current.tags);
        let routable_flag = req.routable_flag.unwrap_or(current.routable_flag);
        let is_default = req.is_default.unwrap_or(current.is_default);

        sqlx::query(
            r#"UPDATE vrfs SET description = ?, tags = ?, routable_flag = ?, is_default = ?, updated_at = ?
               WHERE vrf_id = ?"#,
        )
        .bind(&description)
        .bind(serde_json::to_string(&tags)?)
        .bind(routable_flag)
        .bind(is_default)
        .bind(Utc::now())
        .bind(vrf_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_vrf(vrf_id)
            .await?
            .ok_or_else(|| NotFoundError::new("VRF", vrf_id).into())
    }

    /// Delete a VRF. Refused while any prefix references it, for
    /// auto-created VRFs, and for the last remaining default VRF.
    pub async fn delete_vrf(&self, vrf_id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM vrfs WHERE vrf_id = ?")
            .bind(vrf_id)
            .fetch_optional(&mut *tx)
            .await?;
        let vrf = match row.as_ref().map(map_vrf_row) {
            Some(v) => v,
            None => return Err(NotFoundError::new("VRF", vrf_id).into()),
        };

        if is_auto_created_vrf(vrf_id) {
            return Err(IpamError::ProtectedVrf(format!(
                "Cannot delete auto-created VRF '{}'",
                vrf_id
            ))
            .into());
        }

        let (prefix_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM prefixes WHERE vrf_id = ?")
                .bind(vrf_id)
                .fetch_one(&mut *tx)
                .await?;
        if prefix_count > 0 {
            return Err(IpamError::VrfInUse(format!(
                "Cannot delete VRF '{}' - it is being used by {} prefix(es)",
                vrf_id, prefix_count
            ))
            .into());
        }

        if vrf.is_default {
            let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vrfs")
                .fetch_one(&mut *tx)
                .await?;
            if total == 1 {
                return Err(IpamError::VrfInUse(
                    "Cannot delete the only VRF in the system".to_string(),
                )
                .into());
            }
        }

        sqlx::query("DELETE FROM vrfs WHERE vrf_id = ?")
            .bind(vrf_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Ensure the per-VPC VRF for non-routable subnets exists, creating it
    /// with routable_flag=false when missing. Returns the VRF id.
    pub async fn ensure_vpc_vrf(&self, vpc: &Vpc) -> Result<String> {
        let vrf_id = format!(
            "{}_{}_{}",
            vpc.provider,
            vpc.provider_account_id.as_deref().unwrap_or("unknown"),
            vpc.provider_vpc_id
        );

        if self.get_vrf(&vrf_id).await?.is_some() {
            return Ok(vrf_id);
        }

        let mut description = format!(
            "Auto VRF for {} VPC {}",
            vpc.provider, vpc.provider_vpc_id
        );
        if let Some(account) = &vpc.provider_account_id {
            description.push_str(&format!(" (Account: {})", account));
        }

        let now = Utc::now();
        sqlx::query(
            r#"INSERT OR IGNORE INTO vrfs (vrf_id, description, tags, routable_flag, is_default, created_at, updated_at)
               VALUES (?, ?, '{}', 0, 0, ?, ?)"#,
        )
        .bind(&vrf_id)
        .bind(&description)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        tracing::info!("Created VPC-specific VRF: {}", vrf_id);
        Ok(vrf_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_auto_created_vrf() {
        assert!(is_auto_created_vrf("aws_123456789_vpc-abc123"));
        assert!(is_auto_created_vrf("gcp_proj-1_net-2"));
        assert!(is_auto_created_vrf("vrf:legacy-uuid"));
        assert!(!is_auto_created_vrf("prod-vrf"));
        assert!(!is_auto_created_vrf("public-vrf"));
        assert!(!is_auto_created_vrf("aws_only-one-part"));
    }

    #[tokio::test]
    async fn test_default_vrf_swap() {
        let store = Store::in_memory().await.unwrap();
        store.ensure_default_vrf("prod-vrf").await.unwrap();

        let req = CreateVrfRequest {
            vrf_id: "staging-vrf".to_string(),
            description: None,
            tags: TagMap::new(),
            routable_flag: true,
            is_default: true,
            request_id: None,
        };
        store.create_vrf(&req).await.unwrap();

        let defaults: Vec<String> = store
            .list_vrfs()
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.is_default)
            .map(|v| v.vrf_id)
            .collect();
        assert_eq!(defaults, vec!["staging-vrf".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_vrf_refused_while_referenced() {
        let store = Store::in_memory().await.unwrap();
        store.ensure_default_vrf("prod-vrf").await.unwrap();

        let req = CreatePrefixRequest {
            vrf_id: "prod-vrf".to_string(),
            cidr: "10.0.0.0/8".to_string(),
            parent_prefix_id: None,
            tags: TagMap::new(),
            routable: true,
            vpc_children_type_flag: false,
            request_id: None,
        };
        store.create_manual_prefix(&req).await.unwrap();

        let err = store.delete_vrf("prod-vrf").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::VrfInUse(_))
        ));
    }
}
