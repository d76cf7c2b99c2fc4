//! Common test infrastructure
//!
//! Provides an in-memory [`FileEndpoint`] that follows the remote protocol
//! closely enough to check upload behaviour end to end:
//! - placeholder creation and name conflicts on session start
//! - offset validation on every chunk
//! - a call log of chunk sizes per phase
//! - one-shot failure injection

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use sp_uploadr::client::ClientError;
use sp_uploadr::upload::{FileDescriptor, FileEndpoint, SessionAck, UploadSession, UploadTarget};
use sp_uploadr::FolderLocator;
use std::collections::HashMap;
use std::sync::Mutex;

/// Folder used by most tests
pub fn test_folder() -> FolderLocator {
    FolderLocator::from_server_relative("https://contoso.sharepoint.com/sites/docs", "/sites/docs/Shared Documents")
}

/// Random payload of `len` bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    data
}

/// One request seen by the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub phase: &'static str,
    pub len: usize,
}

impl Call {
    pub fn new(phase: &'static str, len: usize) -> Self {
        Self { phase, len }
    }
}

struct OpenSession {
    key: String,
    file_name: String,
    buffer: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryEndpoint {
    files: Mutex<HashMap<String, Bytes>>,
    sessions: Mutex<HashMap<String, OpenSession>>,
    calls: Mutex<Vec<Call>>,
    next_session: Mutex<u64>,
    // (phase, 1-based occurrence) to fail once with a 503
    fail_on: Mutex<Option<(&'static str, usize)>>,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which a target is stored, also its server-relative URL
    pub fn key(folder: &FolderLocator, file_name: &str) -> String {
        format!("{}/{}", folder, file_name)
    }

    pub fn insert(&self, folder: &FolderLocator, file_name: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(Self::key(folder, file_name), Bytes::copy_from_slice(content));
    }

    pub fn stored(&self, folder: &FolderLocator, file_name: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(&Self::key(folder, file_name)).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Fail the `occurrence`-th call of `phase` (counted from now) with HTTP 503
    pub fn fail_once(&self, phase: &'static str, occurrence: usize) {
        let seen = self.count(phase);
        *self.fail_on.lock().unwrap() = Some((phase, seen + occurrence));
    }

    fn count(&self, phase: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.phase == phase).count()
    }

    fn record(&self, phase: &'static str, len: usize) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(Call::new(phase, len));
        let nth = self.count(phase);

        let mut fail_on = self.fail_on.lock().unwrap();
        if *fail_on == Some((phase, nth)) {
            *fail_on = None;
            return Err(ClientError::StatusError {
                status: 503,
                code: None,
                message: "Service Unavailable".into(),
            });
        }
        Ok(())
    }

    fn descriptor(key: &str, name: &str, length: usize) -> FileDescriptor {
        FileDescriptor {
            server_relative_url: key.to_string(),
            name: name.to_string(),
            unique_id: None,
            length: Some(length as u64),
            etag: Some("\"{00000000-0000-0000-0000-000000000000},1\"".into()),
            time_last_modified: None,
        }
    }

    fn conflict(name: &str) -> ClientError {
        ClientError::StatusError {
            status: 400,
            code: Some("-2130575257, Microsoft.SharePoint.SPException".into()),
            message: format!("A file with the name '{}' already exists.", name),
        }
    }

    fn bad_request(message: String) -> ClientError {
        ClientError::StatusError {
            status: 400,
            code: None,
            message,
        }
    }

    /// Create or replace a file, honouring `overwrite`
    fn put(&self, target: &UploadTarget, content: Bytes) -> Result<String, ClientError> {
        let key = Self::key(&target.folder, &target.file_name);
        let mut files = self.files.lock().unwrap();
        if !target.overwrite && files.contains_key(&key) {
            return Err(Self::conflict(&target.file_name));
        }
        files.insert(key.clone(), content);
        Ok(key)
    }

    fn append(&self, session: &UploadSession, chunk: &[u8]) -> Result<u64, ClientError> {
        let mut sessions = self.sessions.lock().unwrap();
        let open = sessions
            .get_mut(&session.session_id)
            .ok_or_else(|| Self::bad_request(format!("unknown upload {}", session.session_id)))?;

        if open.buffer.len() as u64 != session.bytes_sent {
            return Err(Self::bad_request(format!(
                "offset {} does not match stored length {}",
                session.bytes_sent,
                open.buffer.len()
            )));
        }
        open.buffer.extend_from_slice(chunk);
        Ok(open.buffer.len() as u64)
    }
}

#[async_trait]
impl FileEndpoint for MemoryEndpoint {
    async fn add_file(&self, target: &UploadTarget, content: Bytes) -> Result<FileDescriptor, ClientError> {
        self.record("add", content.len())?;
        let len = content.len();
        let key = self.put(target, content)?;
        Ok(Self::descriptor(&key, &target.file_name, len))
    }

    async fn start_upload(&self, target: &UploadTarget, chunk: Bytes) -> Result<SessionAck, ClientError> {
        self.record("start", chunk.len())?;
        let key = self.put(target, Bytes::new())?;

        let session_id = {
            let mut next = self.next_session.lock().unwrap();
            *next += 1;
            format!("session-{}", next)
        };
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            OpenSession {
                key,
                file_name: target.file_name.clone(),
                buffer: chunk.to_vec(),
            },
        );

        Ok(SessionAck {
            session_id,
            offset: chunk.len() as u64,
        })
    }

    async fn continue_upload(&self, session: &UploadSession, chunk: Bytes) -> Result<u64, ClientError> {
        self.record("continue", chunk.len())?;
        self.append(session, &chunk)
    }

    async fn finish_upload(&self, session: &UploadSession, chunk: Bytes) -> Result<FileDescriptor, ClientError> {
        self.record("finish", chunk.len())?;
        self.append(session, &chunk)?;

        let open = self
            .sessions
            .lock()
            .unwrap()
            .remove(&session.session_id)
            .ok_or_else(|| Self::bad_request(format!("unknown upload {}", session.session_id)))?;
        let len = open.buffer.len();
        self.files
            .lock()
            .unwrap()
            .insert(open.key.clone(), Bytes::from(open.buffer));
        Ok(Self::descriptor(&open.key, &open.file_name, len))
    }

    async fn cancel_upload(&self, session: &UploadSession) -> Result<(), ClientError> {
        self.record("cancel", 0)?;
        self.sessions
            .lock()
            .unwrap()
            .remove(&session.session_id)
            .map(|_| ())
            .ok_or_else(|| Self::bad_request(format!("unknown upload {}", session.session_id)))
    }

    async fn download(&self, server_relative_url: &str) -> Result<Bytes, ClientError> {
        self.files
            .lock()
            .unwrap()
            .get(server_relative_url)
            .cloned()
            .ok_or_else(|| ClientError::StatusError {
                status: 404,
                code: None,
                message: format!("File not found: {}", server_relative_url),
            })
    }
}
