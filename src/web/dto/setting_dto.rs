use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct SetSettingRequest {
    pub key: String,
    pub value: String,
}
