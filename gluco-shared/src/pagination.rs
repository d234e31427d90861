use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            offset: 0,
            limit: 50,
        }
    }
}

impl Pagination {
    pub fn max_limit() -> Self {
        Pagination {
            offset: 0,
            limit: 100,
        }
    }
}
