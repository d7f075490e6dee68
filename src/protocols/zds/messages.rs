//! Protobuf wire messages.
//!
//! Hand-written `prost` derives; the field tags are part of the wire contract
//! and must not change.

/// First message on every session, sent by the peer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloMessage {
    #[prost(string, tag = "1")]
    pub version: String,
}

/// Identity of the workload a request refers to.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkloadInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(string, tag = "3")]
    pub service_account: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddWorkload {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(message, optional, tag = "2")]
    pub workload_info: Option<WorkloadInfo>,
    /// Identifier of the network namespace (compartment) the workload runs in.
    #[prost(string, tag = "3")]
    pub namespace_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeepWorkload {
    #[prost(string, tag = "1")]
    pub uid: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveWorkload {
    #[prost(string, tag = "1")]
    pub uid: String,
}

/// Workload lifecycle request. Exactly one payload variant must be set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkloadRequest {
    #[prost(oneof = "workload_request::Payload", tags = "1, 2, 3")]
    pub payload: Option<workload_request::Payload>,
}

pub mod workload_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Add(super::AddWorkload),
        #[prost(message, tag = "2")]
        Keep(super::KeepWorkload),
        #[prost(message, tag = "3")]
        Remove(super::RemoveWorkload),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Outcome of a workload request. Exactly one payload variant must be set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkloadResponse {
    #[prost(oneof = "workload_response::Payload", tags = "1, 2")]
    pub payload: Option<workload_response::Payload>,
}

pub mod workload_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Ack(super::Ack),
        #[prost(message, tag = "2")]
        Error(super::ErrorReply),
    }
}

impl HelloMessage {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl WorkloadInfo {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        service_account: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            service_account: service_account.into(),
        }
    }
}

impl WorkloadRequest {
    pub fn add(uid: impl Into<String>, info: WorkloadInfo, namespace_id: impl Into<String>) -> Self {
        Self {
            payload: Some(workload_request::Payload::Add(AddWorkload {
                uid: uid.into(),
                workload_info: Some(info),
                namespace_id: namespace_id.into(),
            })),
        }
    }

    pub fn keep(uid: impl Into<String>) -> Self {
        Self {
            payload: Some(workload_request::Payload::Keep(KeepWorkload { uid: uid.into() })),
        }
    }

    pub fn remove(uid: impl Into<String>) -> Self {
        Self {
            payload: Some(workload_request::Payload::Remove(RemoveWorkload {
                uid: uid.into(),
            })),
        }
    }

    /// Uid of the workload this request targets, if a payload is set.
    pub fn uid(&self) -> Option<&str> {
        match self.payload.as_ref()? {
            workload_request::Payload::Add(add) => Some(add.uid.as_str()),
            workload_request::Payload::Keep(keep) => Some(keep.uid.as_str()),
            workload_request::Payload::Remove(remove) => Some(remove.uid.as_str()),
        }
    }

    /// Short name of the active variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            Some(workload_request::Payload::Add(_)) => "add",
            Some(workload_request::Payload::Keep(_)) => "keep",
            Some(workload_request::Payload::Remove(_)) => "remove",
            None => "unset",
        }
    }
}

impl WorkloadResponse {
    pub fn ack() -> Self {
        Self {
            payload: Some(workload_response::Payload::Ack(Ack {})),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            payload: Some(workload_response::Payload::Error(ErrorReply {
                message: message.into(),
            })),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.payload, Some(workload_response::Payload::Ack(_)))
    }

    /// The peer's error message, when the response is an error.
    pub fn error_message(&self) -> Option<&str> {
        match &self.payload {
            Some(workload_response::Payload::Error(e)) => Some(e.message.as_str()),
            _ => None,
        }
    }
}
