//! Post identity used to key records

use serde::{Deserialize, Serialize};

/// Two-part identity of a post: its record URI and content id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

impl PostRef {
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
        }
    }

    pub fn record_key(&self) -> String {
        record_key(&self.uri, &self.cid)
    }
}

/// `"{uri}:{cid}"`
pub fn record_key(uri: &str, cid: &str) -> String {
    format!("{uri}:{cid}")
}
