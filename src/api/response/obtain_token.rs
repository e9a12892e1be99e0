use serde::Deserialize;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObtainToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /* seconds; sent as a number or a numeric string */
    #[serde(default, deserialize_with = "super::opt_u64")]
    pub expires_in: Option<u64>,
}
