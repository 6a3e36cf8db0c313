//! Local Machines API tunnel check.

use thiserror::Error;
use tracing::debug;

use super::machines::MachineApi;

/// Reason the tunnel is considered down.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunnelError {
    /// The probe request never got a reply.
    #[error("Machines API is unreachable: {0}")]
    Unreachable(String),

    /// Something answered, but not the Machines API.
    #[error("Machines API probe returned status {0}, expected 404")]
    UnexpectedStatus(u16),
}

/// Checks that the Machines API tunnel is up.
///
/// The API answers an unknown path with 404; any other outcome means the
/// tunnel is not forwarding to it.
///
/// # Errors
///
/// Returns a [`TunnelError`] when the probe fails or returns anything but 404.
pub async fn verify_tunnel(api: &dyn MachineApi) -> Result<(), TunnelError> {
    let reply = api
        .probe()
        .await
        .map_err(|e| TunnelError::Unreachable(e.message))?;

    debug!(status = reply.status, "Tunnel probe answered");

    if reply.status == 404 {
        Ok(())
    } else {
        Err(TunnelError::UnexpectedStatus(reply.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fly::testing::ScriptedMachines;

    #[tokio::test]
    async fn test_tunnel_up_on_404() {
        let api = ScriptedMachines::new();
        assert_eq!(verify_tunnel(&api).await, Ok(()));
    }

    #[tokio::test]
    async fn test_tunnel_down_on_other_status() {
        let api = ScriptedMachines::new().with_probe_status(200);
        assert_eq!(
            verify_tunnel(&api).await,
            Err(TunnelError::UnexpectedStatus(200))
        );
    }

    #[tokio::test]
    async fn test_tunnel_unreachable() {
        let api = ScriptedMachines::new().with_probe_unreachable();
        assert!(matches!(
            verify_tunnel(&api).await,
            Err(TunnelError::Unreachable(_))
        ));
    }
}
