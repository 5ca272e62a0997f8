//! Thin RPC wrapper shared by every task-source binary: a bounded-retry
//! connect (mirroring the agent's reconnect envelope) plus typed helpers
//! around the controller's task-mutation methods.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use mackenzie_core::config::ControllerEndpoint;
use mackenzie_core::error::{MackenzieError, Result};
use mackenzie_core::proto::controller_client::ControllerClient;
use mackenzie_core::proto::{AddNewTaskRequest, CompletedTask, SetTaskProcessedRequest};
use mackenzie_core::tls::TlsMaterial;

const CONNECT_RETRY: Duration = Duration::from_secs(5 * 60);
const CONNECT_INTER_RETRY: Duration = Duration::from_secs(5);

pub async fn connect(endpoint: &ControllerEndpoint, tls: &TlsMaterial) -> Result<ControllerClient<Channel>> {
    let start = std::time::Instant::now();
    loop {
        let attempt = Endpoint::from_shared(endpoint.uri())
            .map_err(|e| MackenzieError::Configuration(format!("invalid controller uri: {e}")))
            .and_then(|ep| {
                ep.tls_config(tls.client_config())
                    .map_err(|e| MackenzieError::Tls(format!("configuring client TLS: {e}")))
            });

        let connected = match attempt {
            Ok(ep) => ep.connect().await,
            Err(e) => return Err(e),
        };

        match connected {
            Ok(channel) => return Ok(ControllerClient::new(channel)),
            Err(e) => {
                tracing::warn!(error = %e, "connecting to controller failed");
                if start.elapsed() > CONNECT_RETRY {
                    return Err(MackenzieError::Transient(format!(
                        "could not connect to controller: {e}"
                    )));
                }
                tokio::time::sleep(CONNECT_INTER_RETRY).await;
            }
        }
    }
}

/// Mint a task; a duplicate id is the documented idempotence point for
/// manual re-runs, so callers that expect collisions should inspect the
/// returned error themselves rather than call `add_new_task_ignore_conflict`.
pub async fn add_new_task(
    client: &mut ControllerClient<Channel>,
    id: String,
    task_type: String,
    data_json: String,
    priority: i32,
) -> Result<()> {
    client
        .add_new_task(AddNewTaskRequest {
            id,
            task_type,
            data_json,
            priority,
        })
        .await
        .map_err(MackenzieError::Rpc)?;
    Ok(())
}

/// Same as `add_new_task`, but a semantic-conflict (duplicate id) response is
/// logged at `warn` and swallowed rather than propagated.
pub async fn add_new_task_ignore_conflict(
    client: &mut ControllerClient<Channel>,
    id: String,
    task_type: String,
    data_json: String,
    priority: i32,
) {
    if let Err(e) = add_new_task(client, id.clone(), task_type, data_json, priority).await {
        tracing::warn!(task_id = %id, error = %e, "failed to add task");
    }
}

pub async fn get_all_completed_tasks(client: &mut ControllerClient<Channel>) -> Result<Vec<CompletedTask>> {
    let resp = client
        .get_all_completed_tasks(mackenzie_core::proto::Empty {})
        .await
        .map_err(MackenzieError::Rpc)?;
    Ok(resp.into_inner().tasks)
}

pub async fn set_task_processed(client: &mut ControllerClient<Channel>, id: String) -> Result<()> {
    client
        .set_task_processed(SetTaskProcessedRequest { id })
        .await
        .map_err(MackenzieError::Rpc)?;
    Ok(())
}
