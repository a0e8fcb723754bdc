use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use crate::models::*;

/// Tags are stored as JSON text. A row with malformed tags maps to an empty
/// map rather than failing the whole query.
pub(crate) fn parse_tags(raw: &str) -> TagMap {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(crate) fn map_vrf_row(row: &SqliteRow) -> Vrf {
    Vrf {
        vrf_id: row.get("vrf_id"),
        description: row.get("description"),
        tags: parse_tags(&row.get::<String, _>("tags")),
        routable_flag: row.get("routable_flag"),
        is_default: row.get("is_default"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

pub(crate) fn map_vpc_row(row: &SqliteRow) -> Vpc {
    Vpc {
        vpc_id: row.get("vpc_id"),
        description: row.get("description"),
        provider: row.get("provider"),
        provider_account_id: row.get("provider_account_id"),
        provider_vpc_id: row.get("provider_vpc_id"),
        region: row.get("region"),
        tags: parse_tags(&row.get::<String, _>("tags")),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

pub(crate) fn map_prefix_row(row: &SqliteRow) -> Prefix {
    Prefix {
        prefix_id: row.get("prefix_id"),
        vrf_id: row.get("vrf_id"),
        cidr: row.get("cidr"),
        tags: parse_tags(&row.get::<String, _>("tags")),
        indentation_level: row.get("indentation_level"),
        parent_prefix_id: row.get("parent_prefix_id"),
        source: row.get("source"),
        routable: row.get("routable"),
        vpc_children_type_flag: row.get("vpc_children_type_flag"),
        vpc_id: row.get("vpc_id"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

pub(crate) fn map_association_row(row: &SqliteRow) -> VpcPrefixAssociation {
    VpcPrefixAssociation {
        association_id: row.get("association_id"),
        vpc_id: row.get("vpc_id"),
        vpc_prefix_cidr: row.get("vpc_prefix_cidr"),
        routable: row.get("routable"),
        parent_prefix_id: row.get("parent_prefix_id"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}
