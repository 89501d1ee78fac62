//! # Queue Message Structures
//!
//! Wire formats of the work queue and the completion queue. Field names are the
//! camelCase keys other pipeline stages already read (`jobId`, `splitNumber`, ...).

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::errors::{MessagingError, MessagingResult};
use crate::constants::STATUS_DOWNLOADED;

/// Message serialization contract for anything sent through a [`super::Session`]
pub trait QueueMessage: Serialize + DeserializeOwned + Send + Sync {
    fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

/// One bounded unit of work: a contiguous page range of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitMessage {
    pub job_id: String,
    /// Pages per split
    pub page_size: u32,
    /// Inter-publish delay of the originating job, in milliseconds
    #[serde(default)]
    pub sleep: u64,
    pub split_number: u32,
}

impl QueueMessage for SplitMessage {}

impl SplitMessage {
    pub fn new(job_id: impl Into<String>, page_size: u32, sleep: u64, split_number: u32) -> Self {
        Self {
            job_id: job_id.into(),
            page_size,
            sleep,
            split_number,
        }
    }

    /// Reject messages that cannot be executed or would escape the artifact root
    pub fn validate(&self) -> Result<(), String> {
        validate_job_id(&self.job_id)?;
        if self.page_size == 0 {
            return Err(format!(
                "split {} of job {} has pageSize 0",
                self.split_number, self.job_id
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    #[serde(rename = "DOWNLOADED")]
    Downloaded,
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionStatus::Downloaded => write!(f, "{STATUS_DOWNLOADED}"),
        }
    }
}

/// Announces that a split's artifacts are on shared storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub job_id: String,
    pub page_size: u32,
    #[serde(default)]
    pub sleep: u64,
    pub split_number: u32,
    pub status: CompletionStatus,
}

impl QueueMessage for CompletionMessage {}

impl CompletionMessage {
    pub fn downloaded(split: &SplitMessage) -> Self {
        Self {
            job_id: split.job_id.clone(),
            page_size: split.page_size,
            sleep: split.sleep,
            split_number: split.split_number,
            status: CompletionStatus::Downloaded,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_job_id(&self.job_id)
    }
}

/// Job ids become file names, so they must be a single path component
pub(crate) fn validate_job_id(job_id: &str) -> Result<(), String> {
    if job_id.trim().is_empty() {
        return Err("jobId is empty".to_string());
    }
    if job_id.contains('/') || job_id.contains('\\') || job_id.contains("..") {
        return Err(format!("jobId {job_id:?} is not a plain identifier"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_message_wire_format() {
        let message = SplitMessage::new("job-42", 100, 250, 3);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"jobId": "job-42", "pageSize": 100, "sleep": 250, "splitNumber": 3})
        );
    }

    #[test]
    fn test_split_message_sleep_defaults_to_zero() {
        let bytes = br#"{"jobId":"j","pageSize":10,"splitNumber":0}"#;
        let message = SplitMessage::from_bytes(bytes).unwrap();
        assert_eq!(message.sleep, 0);
    }

    #[test]
    fn test_completion_message_wire_format() {
        let split = SplitMessage::new("job-42", 100, 250, 3);
        let value = serde_json::to_value(CompletionMessage::downloaded(&split)).unwrap();
        assert_eq!(
            value,
            json!({
                "jobId": "job-42",
                "pageSize": 100,
                "sleep": 250,
                "splitNumber": 3,
                "status": "DOWNLOADED"
            })
        );
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let bytes = br#"{"jobId":"j","pageSize":1,"splitNumber":0,"status":"FAILED"}"#;
        assert!(matches!(
            CompletionMessage::from_bytes(bytes),
            Err(MessagingError::MessageDeserialization { .. })
        ));
    }

    #[test]
    fn test_validation() {
        assert!(SplitMessage::new("job-1", 10, 0, 0).validate().is_ok());
        assert!(SplitMessage::new("", 10, 0, 0).validate().is_err());
        assert!(SplitMessage::new("../etc", 10, 0, 0).validate().is_err());
        assert!(SplitMessage::new("a/b", 10, 0, 0).validate().is_err());
        assert!(SplitMessage::new("job-1", 0, 0, 0).validate().is_err());
    }
}
