use anyhow::Result;
use chrono::Utc;

use super::row_helpers::map_vpc_row;
use super::{is_unique_violation, IpamError, NotFoundError, Store};
use crate::models::*;

impl Store {
    pub async fn list_vpcs(&self) -> Result<Vec<Vpc>> {
        let rows = sqlx::query("SELECT * FROM vpcs ORDER BY provider, provider_vpc_id")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(map_vpc_row).collect())
    }

    /// VPCs of one provider, paged for the sync service's registry load
    pub async fn list_vpcs_by_provider(
        &self,
        provider: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Vpc>> {
        let rows = sqlx::query(
            "SELECT * FROM vpcs WHERE provider = ? ORDER BY provider_vpc_id LIMIT ? OFFSET ?",
        )
        .bind(provider)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(map_vpc_row).collect())
    }

    pub async fn count_vpcs_by_provider(&self, provider: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vpcs WHERE provider = ?")
            .bind(provider)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn get_vpc(&self, vpc_id: &str) -> Result<Option<Vpc>> {
        let row = sqlx::query("SELECT * FROM vpcs WHERE vpc_id = ?")
            .bind(vpc_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(map_vpc_row))
    }

    pub async fn create_vpc(&self, req: &CreateVpcRequest) -> Result<Vpc> {
        let vpc_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"INSERT INTO vpcs (vpc_id, description, provider, provider_account_id, provider_vpc_id, region, tags, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&vpc_id)
        .bind(&req.description)
        .bind(&req.provider)
        .bind(&req.provider_account_id)
        .bind(&req.provider_vpc_id)
        .bind(&req.region)
        .bind(serde_json::to_string(&req.tags)?)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await;

        if let Err(e) = result {
            if is_unique_violation(&e) {
                return Err(IpamError::AlreadyExists(format!(
                    "VPC {} already registered for {} account {}",
                    req.provider_vpc_id,
                    req.provider,
                    req.provider_account_id.as_deref().unwrap_or("-")
                ))
                .into());
            }
            return Err(e.into());
        }

        self.get_vpc(&vpc_id)
            .await?
            .ok_or_else(|| NotFoundError::new("VPC", &vpc_id).into())
    }

    pub async fn update_vpc(&self, vpc_id: &str, req: &UpdateVpcRequest) -> Result<Vpc> {
        let current = self
            .get_vpc(vpc_id)
            .await?
            .ok_or_else(|| NotFoundError::new("VPC", vpc_id))?;

        let description = req.description.clone().or(current.description);
        let region = req.region.clone().or(current.region);
        let tags = req.tags.clone().unwrap_or(current.tags);

        sqlx::query(
            "UPDATE vpcs SET description = ?, region = ?, tags = ?, updated_at = ? WHERE vpc_id = ?",
        )
        .bind(&description)
        .bind(&region)
        .bind(serde_json::to_string(&tags)?)
        .bind(Utc::now())
        .bind(vpc_id)
        .execute(self.pool())
        .await?;

        self.get_vpc(vpc_id)
            .await?
            .ok_or_else(|| NotFoundError::new("VPC", vpc_id).into())
    }

    /// Delete a VPC. Refused while prefixes or associations reference it.
    pub async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let vpc = sqlx::query("SELECT * FROM vpcs WHERE vpc_id = ?")
            .bind(vpc_id)
            .fetch_optional(&mut *tx)
            .await?;
        let vpc = match vpc.as_ref().map(map_vpc_row) {
            Some(v) => v,
            None => return Err(NotFoundError::new("VPC", vpc_id).into()),
        };

        let (prefix_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM prefixes WHERE vpc_id = ?")
                .bind(vpc_id)
                .fetch_one(&mut *tx)
                .await?;
        if prefix_count > 0 {
            return Err(IpamError::VpcInUse(format!(
                "Cannot delete VPC '{}' - it is being used by {} prefix(es)",
                vpc.provider_vpc_id, prefix_count
            ))
            .into());
        }

        let (association_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM vpc_prefix_associations WHERE vpc_id = ?")
                .bind(vpc_id)
                .fetch_one(&mut *tx)
                .await?;
        if association_count > 0 {
            return Err(IpamError::VpcInUse(format!(
                "Cannot delete VPC '{}' - it has {} prefix association(s)",
                vpc.provider_vpc_id, association_count
            ))
            .into());
        }

        sqlx::query("DELETE FROM vpcs WHERE vpc_id = ?")
            .bind(vpc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
