//! Downstream deployment readiness
//!
//! The inference server, chat front-end and extraction service are applied
//! by a separate descriptor. After bootstrap the host only has to provide the
//! credential through the environment; it is never generated here.

use tracing::{info, warn};

use crate::config::DeployConfig;

/// Whether the credential variable is present and non-empty
pub fn credential_present(deploy: &DeployConfig) -> bool {
    std::env::var_os(&deploy.credential_env).is_some_and(|v| !v.is_empty())
}

/// Log what the deployment descriptor will expose and whether it can start
pub fn report_readiness(deploy: &DeployConfig) -> bool {
    info!(
        "Host ready for deployment: inference API on :{}, chat UI on :{}, extraction API on :{}",
        deploy.inference_port, deploy.chat_port, deploy.extraction_port
    );

    let present = credential_present(deploy);
    if !present {
        warn!(
            "{} is not set; export the shared credential before applying the deployment",
            deploy.credential_env
        );
    }
    present
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_absent() {
        let deploy = DeployConfig {
            credential_env: "GPU_HOST_BOOTSTRAP_TEST_UNSET_CREDENTIAL".to_string(),
            ..Default::default()
        };
        assert!(!credential_present(&deploy));
        assert!(!report_readiness(&deploy));
    }

    #[test]
    fn test_credential_present() {
        // PATH is always set for the test process
        let deploy = DeployConfig {
            credential_env: "PATH".to_string(),
            ..Default::default()
        };
        assert!(credential_present(&deploy));
    }
}
