use std::fmt;
use std::sync::Arc;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::result::Result;
use crate::session::UploadSession;
use crate::transport::{Method, Request, Transport, TransportError};

pub static SDK_NAME: &str = "fwscan";
pub static SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
pub static DEFAULT_API_PREFIX: &str = "v3/images";

static PART_ALREADY_FINISHED: &str = "part already uploaded and finished";

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    artifact_id: &'a str,
    sdk_name: &'a str,
    sdk_version: &'a str,
    file_name: &'a str,
    file_size_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct UploadTerms {
    #[serde(alias = "image_uuid", alias = "firmware_id", alias = "firmware_uuid")]
    image_id: String,
    #[serde(deserialize_with = "lenient_u64")]
    total_parts: u64,
    #[serde(deserialize_with = "lenient_u64")]
    max_concurrency: u64,
}

/// Where and how to send one part, as prepared by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartDescriptor {
    #[serde(skip)]
    pub part_number: u32,
    #[serde(deserialize_with = "lenient_u64")]
    pub start_offset_bytes: u64,
    #[serde(rename = "part_length_bytes", deserialize_with = "lenient_u64")]
    pub length_bytes: u64,
    #[serde(rename = "prepared_request_URL", default)]
    pub upload_url: Option<String>,
    #[serde(rename = "prepared_request_method", default)]
    pub upload_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartLookup {
    Pending(PartDescriptor),
    AlreadyFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum StatusName {
    Running,
    Success,
    Failure,
    Other(String),
}

impl From<String> for StatusName {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Running" => StatusName::Running,
            "Success" => StatusName::Success,
            "Failure" => StatusName::Failure,
            _ => StatusName::Other(name),
        }
    }
}

impl fmt::Display for StatusName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatusName::Running => write!(f, "Running"),
            StatusName::Success => write!(f, "Success"),
            StatusName::Failure => write!(f, "Failure"),
            StatusName::Other(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScanStatus {
    pub name: StatusName,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScanStatusResponse {
    analysis_status: AnalysisStatus,
}

#[derive(Debug, Deserialize)]
struct AnalysisStatus {
    current: ScanStatus,
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| Error::Decode { endpoint, source })
}

/// Typed calls against the analysis service, one per endpoint.
pub struct ServiceClient {
    transport: Arc<dyn Transport>,
    prefix: String,
}

impl ServiceClient {
    pub fn new(transport: Arc<dyn Transport>, api_prefix: &str) -> Self {
        ServiceClient {
            transport,
            prefix: format!("/{}", api_prefix.trim_matches('/')),
        }
    }

    fn path(&self, rest: &str) -> String {
        format!("{}/{}", self.prefix, rest)
    }

    pub async fn negotiate(
        &self,
        artifact_id: &str,
        file_name: &str,
        file_size_bytes: u64,
    ) -> Result<UploadSession> {
        let payload = serde_json::to_value(UploadRequest {
            artifact_id,
            sdk_name: SDK_NAME,
            sdk_version: SDK_VERSION,
            file_name,
            file_size_bytes,
        })
        .map_err(|source| Error::Decode {
            endpoint: "upload_request",
            source,
        })?;

        let response = self
            .transport
            .call(Request::api(Method::POST, self.path("upload_request/")).with_json(&payload))
            .await
            .map_err(|err| Error::Negotiation(err.to_string()))?;
        let terms: UploadTerms = decode("upload_request", response)?;

        if terms.total_parts == 0 {
            return Err(Error::Negotiation(format!(
                "service assigned no parts to upload {}",
                terms.image_id
            )));
        }
        let total_parts = u32::try_from(terms.total_parts).map_err(|_| {
            Error::Negotiation(format!("part count {} out of range", terms.total_parts))
        })?;

        Ok(UploadSession {
            session_id: terms.image_id,
            file_name: file_name.to_owned(),
            file_size_bytes,
            total_parts,
            max_concurrency: u32::try_from(terms.max_concurrency).unwrap_or(u32::MAX),
        })
    }

    /// Fetches the descriptor for `part_number`.
    ///
    /// A client error whose details say the part is already uploaded and
    /// finished is reported as `PartLookup::AlreadyFinished`.
    pub async fn part_descriptor(&self, session_id: &str, part_number: u32) -> Result<PartLookup> {
        let path = self.path(&format!("{}/part/{}/", session_id, part_number));

        match self.transport.call(Request::api(Method::GET, path)).await {
            Ok(response) => {
                let mut descriptor: PartDescriptor = decode("part", response)?;
                descriptor.part_number = part_number;
                Ok(PartLookup::Pending(descriptor))
            }
            Err(err) if is_already_finished(&err) => Ok(PartLookup::AlreadyFinished),
            Err(err) => Err(err.into()),
        }
    }

    /// Sends the part bytes to the pre-signed request from the descriptor.
    pub async fn transmit_part(
        &self,
        descriptor: &PartDescriptor,
        body: Vec<u8>,
        content_md5: Option<String>,
    ) -> Result<()> {
        let (url, method) = match (&descriptor.upload_url, &descriptor.upload_method) {
            (Some(url), Some(method)) => (url, method),
            _ => {
                return Err(TransportError::InvalidResponse {
                    url: self.path(&format!("part/{}/", descriptor.part_number)),
                    message: "part descriptor has no prepared request".to_owned(),
                }
                .into())
            }
        };
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            TransportError::InvalidResponse {
                url: url.to_owned(),
                message: format!("invalid prepared request method {:?}", method),
            }
        })?;

        self.transport
            .call(Request::presigned(method, url.as_str(), body).with_content_md5(content_md5))
            .await?;

        Ok(())
    }

    pub async fn finish_part(&self, session_id: &str, part_number: u32) -> Result<()> {
        let path = self.path(&format!("{}/part/{}/finished/", session_id, part_number));
        self.transport.call(Request::api(Method::POST, path)).await?;
        Ok(())
    }

    pub async fn finish_session(&self, session_id: &str) -> Result<()> {
        let path = self.path(&format!("{}/finished/", session_id));
        self.transport
            .call(Request::api(Method::POST, path))
            .await
            .map_err(|source| Error::Finalize {
                session_id: session_id.to_owned(),
                source,
            })?;
        Ok(())
    }

    pub async fn scan_status(&self, session_id: &str) -> Result<ScanStatus> {
        let path = self.path(&format!("{}/scan_status/", session_id));
        let response = self.transport.call(Request::api(Method::GET, path)).await?;
        let status: ScanStatusResponse = decode("scan_status", response)?;
        Ok(status.analysis_status.current)
    }
}

fn is_already_finished(err: &TransportError) -> bool {
    err.is_client_error() && err.details() == Some(PART_ALREADY_FINISHED)
}
