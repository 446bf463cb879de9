use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CustomDomain {
    pub id: i32,
    pub project_id: i32,
    pub domain: String,
    pub zone_id: String,
    pub a_record_id: String,
    pub cname_record_id: String,
    pub live: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomDomain {
    pub fn new(
        project_id: i32,
        domain: String,
        zone_id: String,
        a_record_id: String,
        cname_record_id: String,
    ) -> Self {
        Self {
            id: 0,
            project_id,
            domain,
            zone_id,
            a_record_id,
            cname_record_id,
            live: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
