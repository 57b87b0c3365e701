use std::time::Duration;

pub const PROPOSAL_LIST_TTL: Duration = Duration::from_secs(60);

pub fn proposal_list_key(status: Option<&str>) -> String {
    format!("optimizer:proposals:{}", status.unwrap_or("all"))
}
