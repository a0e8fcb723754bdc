use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::row_helpers::{map_association_row, parse_tags};
use super::{is_unique_violation, IpamError, NotFoundError, Store};
use crate::cidr;
use crate::models::*;

impl Store {
    pub async fn get_association(&self, association_id: &str) -> Result<Option<VpcPrefixAssociation>> {
        let row = sqlx::query("SELECT * FROM vpc_prefix_associations WHERE association_id = ?")
            .bind(association_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(map_association_row))
    }

    /// First association for a VPC; the sync service resolves subnet parents
    /// through it.
    pub async fn find_association_for_vpc(&self, vpc_id: &str) -> Result<Option<VpcPrefixAssociation>> {
        let row = sqlx::query(
            "SELECT * FROM vpc_prefix_associations WHERE vpc_id = ? ORDER BY created_at LIMIT 1",
        )
        .bind(vpc_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.as_ref().map(map_association_row))
    }

    pub async fn list_associations_for_vpc(&self, vpc_id: &str) -> Result<Vec<VpcAssociationDetail>> {
        let rows = sqlx::query(
            r#"SELECT a.association_id, a.vpc_prefix_cidr, a.routable,
                      p.prefix_id, p.cidr AS prefix_cidr, p.vrf_id AS prefix_vrf_id,
                      p.tags AS prefix_tags, p.source AS prefix_source
               FROM vpc_prefix_associations a
               JOIN prefixes p ON a.parent_prefix_id = p.prefix_id
               WHERE a.vpc_id = ?
               ORDER BY a.created_at"#,
        )
        .bind(vpc_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| VpcAssociationDetail {
                association_id: row.get("association_id"),
                vpc_prefix_cidr: row.get("vpc_prefix_cidr"),
                routable: row.get("routable"),
                prefix_id: row.get("prefix_id"),
                prefix_cidr: row.get("prefix_cidr"),
                prefix_vrf_id: row.get("prefix_vrf_id"),
                prefix_tags: parse_tags(&row.get::<String, _>("prefix_tags")),
                prefix_source: row.get("prefix_source"),
            })
            .collect())
    }

    pub async fn list_associations_for_prefix(
        &self,
        prefix_id: &str,
    ) -> Result<Vec<PrefixAssociationDetail>> {
        let rows = sqlx::query(
            r#"SELECT a.association_id, a.vpc_id, a.vpc_prefix_cidr, a.routable,
                      v.provider_vpc_id, v.provider, v.description, v.region
               FROM vpc_prefix_associations a
               JOIN vpcs v ON a.vpc_id = v.vpc_id
               WHERE a.parent_prefix_id = ?
               ORDER BY a.created_at"#,
        )
        .bind(prefix_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| PrefixAssociationDetail {
                association_id: row.get("association_id"),
                vpc_id: row.get("vpc_id"),
                vpc_prefix_cidr: row.get("vpc_prefix_cidr"),
                routable: row.get("routable"),
                provider_vpc_id: row.get("provider_vpc_id"),
                provider: row.get("provider"),
                description: row.get("description"),
                region: row.get("region"),
            })
            .collect())
    }

    /// Associate a VPC with a manual parent prefix. Policy: VPC-sourced
    /// prefixes admit no associations; a routable parent admits one
    /// association; duplicates are refused. The parent prefix is tagged
    /// `associated_vpc` with the provider VPC id.
    pub async fn create_association(
        &self,
        req: &CreateAssociationRequest,
    ) -> Result<VpcPrefixAssociation> {
        let net = cidr::parse_cidr(&req.vpc_prefix_cidr).map_err(IpamError::InvalidCidr)?;

        let parent = self
            .get_prefix(&req.parent_prefix_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Prefix", &req.parent_prefix_id))?;
        if parent.source == prefix_source::VPC {
            return Err(IpamError::AssociationPolicy(
                "Prefixes whose source is cloud VPC cannot associate to VPC".to_string(),
            )
            .into());
        }

        let vpc = self
            .get_vpc(&req.vpc_id)
            .await?
            .ok_or_else(|| NotFoundError::new("VPC", &req.vpc_id))?;

        let mut tx = self.pool().begin().await?;

        let duplicate: Option<(String,)> = sqlx::query_as(
            "SELECT association_id FROM vpc_prefix_associations WHERE parent_prefix_id = ? AND vpc_id = ?",
        )
        .bind(&req.parent_prefix_id)
        .bind(&req.vpc_id)
        .fetch_optional(&mut *tx)
        .await?;
        if duplicate.is_some() {
            return Err(IpamError::AssociationPolicy(
                "This VPC is already associated with this prefix".to_string(),
            )
            .into());
        }

        if parent.routable {
            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT association_id FROM vpc_prefix_associations WHERE parent_prefix_id = ?",
            )
            .bind(&req.parent_prefix_id)
            .fetch_optional(&mut *tx)
            .await?;
            if existing.is_some() {
                return Err(IpamError::AssociationPolicy(
                    "Routable prefixes can only associate to one VPC ID. This prefix is already associated"
                        .to_string(),
                )
                .into());
            }
        }

        let association_id = uuid::Uuid::new_v4().to_string();
        let created_at: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            r#"INSERT INTO vpc_prefix_associations
               (association_id, vpc_id, vpc_prefix_cidr, routable, parent_prefix_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&association_id)
        .bind(&req.vpc_id)
        .bind(cidr::canonical(&net))
        .bind(req.routable)
        .bind(&req.parent_prefix_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if is_unique_violation(&e) {
                return Err(IpamError::AssociationPolicy(format!(
                    "VPC {} is already associated with CIDR {}",
                    vpc.provider_vpc_id, req.vpc_prefix_cidr
                ))
                .into());
            }
            return Err(e.into());
        }

        tx.commit().await?;

        let mut tags = parent.tags.clone();
        tags.insert(
            tag_keys::ASSOCIATED_VPC.to_string(),
            vpc.provider_vpc_id.clone().into(),
        );
        self.replace_prefix_tags(&parent.prefix_id, &tags).await?;

        self.get_association(&association_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Association", &association_id).into())
    }

    /// Remove an association. When it was the parent prefix's last one, the
    /// `associated_vpc` tag is removed as well.
    pub async fn delete_association(&self, association_id: &str) -> Result<()> {
        let association = self
            .get_association(association_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Association", association_id))?;

        sqlx::query("DELETE FROM vpc_prefix_associations WHERE association_id = ?")
            .bind(association_id)
            .execute(self.pool())
            .await?;

        let remaining = self
            .is_prefix_associated(&association.parent_prefix_id)
            .await?;
        if !remaining {
            if let Some(parent) = self.get_prefix(&association.parent_prefix_id).await? {
                if parent.tags.contains_key(tag_keys::ASSOCIATED_VPC) {
                    let mut tags = parent.tags.clone();
                    tags.remove(tag_keys::ASSOCIATED_VPC);
                    self.replace_prefix_tags(&parent.prefix_id, &tags).await?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (Store, Prefix, Vpc) {
        let store = Store::in_memory().await.unwrap();
        store.ensure_default_vrf("prod-vrf").await.unwrap();
        let prefix = store
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
        let vpc = store
            .create_vpc(&CreateVpcRequest {
                description: None,
                provider: "aws".to_string(),
                provider_account_id: Some("123456789".to_string()),
                provider_vpc_id: "vpc-assoc".to_string(),
                region: None,
                tags: TagMap::new(),
                request_id: None,
            })
            .await
            .unwrap();
        (store, prefix, vpc)
    }

    #[tokio::test]
    async fn test_routable_parent_admits_one_association() {
        let (store, prefix, vpc) = seeded().await;

        store
            .create_association(&CreateAssociationRequest {
                vpc_id: vpc.vpc_id.clone(),
                vpc_prefix_cidr: "10.0.0.0/16".to_string(),
                routable: true,
                parent_prefix_id: prefix.prefix_id.clone(),
                request_id: None,
            })
            .await
            .unwrap();

        // Parent is tagged with the provider VPC id
        let tagged = store.get_prefix(&prefix.prefix_id).await.unwrap().unwrap();
        assert_eq!(
            tagged.tags.get("associated_vpc").and_then(|v| v.as_str()),
            Some("vpc-assoc")
        );

        let other = store
            .create_vpc(&CreateVpcRequest {
                description: None,
                provider: "aws".to_string(),
                provider_account_id: Some("123456789".to_string()),
                provider_vpc_id: "vpc-other".to_string(),
                region: None,
                tags: TagMap::new(),
                request_id: None,
            })
            .await
            .unwrap();

        let err = store
            .create_association(&CreateAssociationRequest {
                vpc_id: other.vpc_id,
                vpc_prefix_cidr: "10.0.0.0/16".to_string(),
                routable: true,
                parent_prefix_id: prefix.prefix_id.clone(),
                request_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::AssociationPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_last_association_delete_clears_tag() {
        let (store, prefix, vpc) = seeded().await;
        let association = store
            .create_association(&CreateAssociationRequest {
                vpc_id: vpc.vpc_id.clone(),
                vpc_prefix_cidr: "10.0.0.0/16".to_string(),
                routable: true,
                parent_prefix_id: prefix.prefix_id.clone(),
                request_id: None,
            })
            .await
            .unwrap();

        store
            .delete_association(&association.association_id)
            .await
            .unwrap();

        let cleared = store.get_prefix(&prefix.prefix_id).await.unwrap().unwrap();
        assert!(!cleared.tags.contains_key("associated_vpc"));
        assert!(!store.is_prefix_associated(&prefix.prefix_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_vpc_sourced_prefix_admits_no_association() {
        let (store, _prefix, vpc) = seeded().await;
        let cloud_prefix = store
            .create_vpc_sourced_prefix(&vpc.vpc_id, "10.8.0.0/24", None, TagMap::new(), "prod-vrf", true)
            .await
            .unwrap();

        let err = store
            .create_association(&CreateAssociationRequest {
                vpc_id: vpc.vpc_id,
                vpc_prefix_cidr: "10.8.0.0/24".to_string(),
                routable: true,
                parent_prefix_id: cloud_prefix.prefix_id,
                request_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::AssociationPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_non_routable_parent_admits_many() {
        let store = Store::in_memory().await.unwrap();
        store.ensure_default_vrf("prod-vrf").await.unwrap();
        let prefix = store
            .create_manual_prefix(&CreatePrefixRequest {
                vrf_id: "prod-vrf".to_string(),
                cidr: "172.16.0.0/12".to_string(),
                parent_prefix_id: None,
                tags: TagMap::new(),
                routable: false,
                vpc_children_type_flag: false,
                request_id: None,
            })
            .await
            .unwrap();

        for i in 0..2 {
            let vpc = store
                .create_vpc(&CreateVpcRequest {
                    description: None,
                    provider: "aws".to_string(),
                    provider_account_id: None,
                    provider_vpc_id: format!("vpc-nr-{}", i),
                    region: None,
                    tags: TagMap::new(),
                    request_id: None,
                })
                .await
                .unwrap();
            store
                .create_association(&CreateAssociationRequest {
                    vpc_id: vpc.vpc_id,
                    vpc_prefix_cidr: format!("172.{}.0.0/16", 16 + i),
                    routable: false,
                    parent_prefix_id: prefix.prefix_id.clone(),
                    request_id: None,
                })
                .await
                .unwrap();
        }

        let details = store
            .list_associations_for_prefix(&prefix.prefix_id)
            .await
            .unwrap();
        assert_eq!(details.len(), 2);
    }
}
