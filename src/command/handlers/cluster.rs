//! Cluster layout handler (`cluster_info`), informational only

use crate::command::CommandResult;
use tracing::info;

pub fn handle_cluster_info(clusters: &[(String, Vec<String>)]) -> CommandResult {
    for (cluster, members) in clusters {
        info!(%cluster, members = ?members, "Cluster layout");
    }
    CommandResult::Completed {
        message: format!("{} clusters reported", clusters.len()),
    }
}
