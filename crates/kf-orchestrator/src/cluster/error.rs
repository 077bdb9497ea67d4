//! Mapping of Kubernetes client errors onto the forward error taxonomy

use kf_core::ForwardError;

/// Classify a `kube::Error`, prefixing the message with what was attempted
pub fn map_kube_error(err: kube::Error, what: &str) -> ForwardError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => ForwardError::TargetNotFound(format!("{}: {}", what, response.message)),
            401 | 403 => ForwardError::Unauthorized(format!("{}: {}", what, response.message)),
            408 | 504 => ForwardError::Timeout(format!("{}: {}", what, response.message)),
            code => ForwardError::Cluster(format!("{} ({}): {}", what, code, response.message)),
        },
        kube::Error::Auth(e) => ForwardError::Unauthorized(format!("{}: {}", what, e)),
        kube::Error::HyperError(e) => {
            if e.is_timeout() {
                ForwardError::Timeout(format!("{}: {}", what, e))
            } else {
                ForwardError::ConnectionRefused(format!("{}: {}", what, e))
            }
        }
        kube::Error::Service(e) => {
            let message = e.to_string();
            if message.to_ascii_lowercase().contains("timed out") {
                ForwardError::Timeout(format!("{}: {}", what, message))
            } else {
                ForwardError::ConnectionRefused(format!("{}: {}", what, message))
            }
        }
        other => ForwardError::Cluster(format!("{}: {}", what, other)),
    }
}

/// Whether the error is a 404 from the API server
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}
