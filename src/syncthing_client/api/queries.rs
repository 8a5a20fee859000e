use serde::Serialize;

#[derive(Serialize)]
pub struct FolderQuery<'a> {
    pub folder: &'a str,
}

#[derive(Serialize)]
pub struct EventStreamQuery {
    pub since: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Serialize)]
pub struct ScanQuery<'a> {
    pub folder: &'a str,
    #[serde(rename = "sub", skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<&'a str>,
}
