//! MongoDB Collection
//!
//! Implements SnapshotSource and ChangeLogSource on a synchronous MongoDB
//! collection handle. Change events are read as raw documents so operation
//! kinds the driver does not model still reach the allow-list.

use crate::domain::entities::RawChangeEvent;
use crate::domain::error::SourceError;
use crate::domain::ports::{ChangeCursor, ChangeLogSource, DocumentCursor, SnapshotSource, WatchRequest};
use bson::oid::ObjectId;
use bson::{doc, Document};
use mongodb::change_stream::event::ResumeToken;
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ChangeStreamOptions, FindOptions, FullDocumentType};
use mongodb::sync::{ChangeStream, Client, Collection};
use serde::{Deserialize, Serialize};

/// Server codes for a resume token that can no longer be used:
/// ChangeStreamHistoryLost (286), ChangeStreamFatalError (280) and
/// InvalidResumeToken (260).
const RESUME_TOKEN_CODES: [i32; 3] = [260, 280, 286];

pub struct MongoCollection {
    collection: Collection<Document>,
}

impl MongoCollection {
    /// Connect and verify the deployment answers a ping.
    pub fn connect(uri: &str, database: &str, collection: &str) -> Result<Self, SourceError> {
        let client = Client::with_uri_str(uri).map_err(|e| SourceError::Query(e.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .map_err(|e| SourceError::Query(format!("ping failed: {}", e)))?;

        tracing::info!(database, collection, "connected to source");
        Ok(Self {
            collection: client.database(database).collection::<Document>(collection),
        })
    }
}

impl SnapshotSource for MongoCollection {
    fn scan_after(&self, after: ObjectId) -> Result<DocumentCursor, SourceError> {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self
            .collection
            .find(doc! { "_id": { "$gt": after } }, options)
            .map_err(|e| SourceError::Query(e.to_string()))?;
        Ok(Box::new(
            cursor.map(|r| r.map_err(|e| SourceError::Query(e.to_string()))),
        ))
    }
}

impl ChangeLogSource for MongoCollection {
    fn open(&self, request: &WatchRequest) -> Result<Box<dyn ChangeCursor>, SourceError> {
        let resume_after = match request.resume_after.as_deref() {
            Some(token) => Some(resume_token(token)?),
            None => None,
        };
        let full_document = if request.full_document_lookup {
            Some(FullDocumentType::UpdateLookup)
        } else {
            None
        };
        let options = ChangeStreamOptions::builder()
            .full_document(full_document)
            .resume_after(resume_after)
            .max_await_time(request.max_await_time)
            .build();

        let stream = self
            .collection
            .watch(Vec::<Document>::new(), options)
            .map_err(|e| classify(e, request.resume_after.as_deref()))?
            .with_type::<Document>();

        Ok(Box::new(MongoChangeCursor {
            stream: Some(stream),
            token: request.resume_after.clone(),
        }))
    }
}

#[derive(Serialize)]
struct TokenDocument {
    token: Document,
}

#[derive(Deserialize)]
struct TokenHolder {
    token: ResumeToken,
}

/// The driver only builds ResumeToken by deserialization.
fn resume_token(data: &str) -> Result<ResumeToken, SourceError> {
    let rejected = |reason: String| SourceError::ResumeTokenRejected {
        token: data.to_string(),
        reason,
    };
    let bytes = bson::to_vec(&TokenDocument {
        token: doc! { "_data": data },
    })
    .map_err(|e| rejected(e.to_string()))?;
    let holder: TokenHolder = bson::from_slice(&bytes).map_err(|e| rejected(e.to_string()))?;
    Ok(holder.token)
}

fn classify(error: MongoError, token: Option<&str>) -> SourceError {
    if let (ErrorKind::Command(command), Some(token)) = (error.kind.as_ref(), token) {
        if RESUME_TOKEN_CODES.contains(&command.code) {
            return SourceError::ResumeTokenRejected {
                token: token.to_string(),
                reason: format!("{} ({})", command.message, command.code_name),
            };
        }
    }
    SourceError::ChangeStream(error.to_string())
}

fn parse_event(raw: Document) -> Result<RawChangeEvent, SourceError> {
    let resume_token = raw
        .get_document("_id")
        .and_then(|id| id.get_str("_data"))
        .map_err(|e| SourceError::MalformedDocument(format!("_id._data: {}", e)))?
        .to_string();
    let operation_type = raw
        .get_str("operationType")
        .map_err(|e| SourceError::MalformedDocument(format!("operationType: {}", e)))?
        .to_string();

    Ok(RawChangeEvent {
        resume_token,
        operation_type,
        cluster_time: raw.get_timestamp("clusterTime").ok(),
        ns: raw.get_document("ns").ok().cloned(),
        full_document: raw.get_document("fullDocument").ok().cloned(),
    })
}

struct MongoChangeCursor {
    stream: Option<ChangeStream<Document>>,
    token: Option<String>,
}

impl ChangeCursor for MongoChangeCursor {
    fn try_next(&mut self) -> Result<Option<RawChangeEvent>, SourceError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next_if_any() {
            Ok(Some(raw)) => {
                let event = parse_event(raw)?;
                self.token = Some(event.resume_token.clone());
                Ok(Some(event))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(classify(e, self.token.as_deref())),
        }
    }

    fn is_alive(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_alive())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("change stream closed");
        }
    }
}
