//! Structured results of administrative calls.

use crate::error::{EtlPhase, StoreError};
use serde::{Deserialize, Serialize};

/// Whether an administrative call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    /// The call succeeded.
    Ok,
    /// The call failed; see the reason.
    Failed,
}

/// Result of an administrative call, with enough context to diagnose a failure
/// without the server logs.
///
/// # Examples
/// ```rust,ignore
/// let response = executor.consolidate("ABC:DEF", "LTS", Timestamp::now());
/// println!("{}", serde_json::to_string(&response)?);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    /// Outcome.
    pub status: AdminStatus,
    /// PV the call was about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv: Option<String>,
    /// Store involved in a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    /// ETL phase that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<EtlPhase>,
    /// Human-readable description.
    pub reason: String,
}

impl AdminResponse {
    /// A successful response.
    pub fn ok(pv: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            status: AdminStatus::Ok,
            pv: pv.map(str::to_string),
            store: None,
            phase: None,
            reason: reason.into(),
        }
    }

    /// A failed response built from an error.
    pub fn failed(pv: Option<&str>, err: &StoreError) -> Self {
        let (store, phase) = match err {
            StoreError::EtlError {
                source_store,
                phase,
                ..
            } => (Some(source_store.clone()), Some(*phase)),
            StoreError::UnknownStore { store, .. } => (Some(store.clone()), None),
            _ => (None, None),
        };
        Self {
            status: AdminStatus::Failed,
            pv: pv.map(str::to_string),
            store,
            phase,
            reason: err.to_string(),
        }
    }

    /// Returns true for a successful call.
    pub fn is_ok(&self) -> bool {
        self.status == AdminStatus::Ok
    }
}

impl<T> From<(&str, &crate::error::Result<T>)> for AdminResponse {
    fn from((pv, result): (&str, &crate::error::Result<T>)) -> Self {
        match result {
            Ok(_) => Self::ok(Some(pv), "ok"),
            Err(err) => Self::failed(Some(pv), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_phase_and_store() {
        let err = StoreError::EtlError {
            pv: "ABC:DEF".to_string(),
            source_store: "STS".to_string(),
            dest_store: "MTS".to_string(),
            phase: EtlPhase::Append,
            reason: "disk full".to_string(),
        };
        let response = AdminResponse::failed(Some("ABC:DEF"), &err);
        assert!(!response.is_ok());
        assert_eq!(response.store.as_deref(), Some("STS"));
        assert_eq!(response.phase, Some(EtlPhase::Append));
        assert!(response.reason.contains("disk full"));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["phase"], "Append");
    }

    #[test]
    fn test_ok_omits_empty_fields() {
        let json = serde_json::to_value(AdminResponse::ok(None, "flag set")).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("pv").is_none());
        assert!(json.get("phase").is_none());
    }
}
