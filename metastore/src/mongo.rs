//! MongoDB-backed stores.
//!
//! One database, two collections: `paper_metadata` and
//! `membership_requests`. Records keep their own string `id`; Mongo's
//! `_id` is left to the server and only used for insertion ordering.

use async_trait::async_trait;
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::store::*;
use crate::types::*;

const METADATA_COLLECTION: &str = "paper_metadata";
const REQUESTS_COLLECTION: &str = "membership_requests";

fn backend_error(e: mongodb::error::Error) -> StoreError {
    match *e.kind {
        mongodb::error::ErrorKind::ServerSelection { .. } => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

fn to_bson<T: Serialize>(value: &T) -> Result<bson::Bson, StoreError> {
    bson::to_bson(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Connected MongoDB handle producing both stores.
#[derive(Clone)]
pub struct MongoStores {
    client: Client,
    db_name: String,
}

impl MongoStores {
    /// Connect and verify with a ping.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server.
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Unavailable(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    async fn collection<T>(&self, name: &str, indexes: Vec<Document>) -> Result<Collection<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync,
    {
        let collection = self.client.database(&self.db_name).collection::<T>(name);
        let models: Vec<IndexModel> = indexes
            .into_iter()
            .map(|keys| {
                IndexModel::builder()
                    .keys(keys)
                    .options(IndexOptions::builder().build())
                    .build()
            })
            .collect();

        if !models.is_empty() {
            collection
                .create_indexes(models)
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to create indexes: {}", e)))?;
        }

        Ok(collection)
    }

    /// Metadata store over the `paper_metadata` collection.
    pub async fn metadata_store(&self) -> Result<MongoMetadataStore, StoreError> {
        let inner = self
            .collection(
                METADATA_COLLECTION,
                vec![
                    doc! { "id": 1 },
                    doc! { "fingerprint": 1 },
                    doc! { "author_address": 1 },
                ],
            )
            .await?;
        Ok(MongoMetadataStore { inner })
    }

    /// Request store over the `membership_requests` collection.
    pub async fn request_store(&self) -> Result<MongoRequestStore, StoreError> {
        let inner = self
            .collection(
                REQUESTS_COLLECTION,
                vec![doc! { "id": 1 }, doc! { "wallet": 1 }, doc! { "status": 1 }],
            )
            .await?;
        Ok(MongoRequestStore { inner })
    }
}

/// Metadata store backed by MongoDB.
#[derive(Clone)]
pub struct MongoMetadataStore {
    inner: Collection<MetadataRecord>,
}

impl MongoMetadataStore {
    async fn find(&self, filter: Document) -> Result<Vec<MetadataRecord>, StoreError> {
        self.inner
            .find(filter)
            .sort(doc! { "_id": 1 })
            .await
            .map_err(backend_error)?
            .try_collect()
            .await
            .map_err(backend_error)
    }
}

#[async_trait]
impl MetadataStore for MongoMetadataStore {
    async fn query(&self, field: MetadataField, value: &str) -> Result<Vec<MetadataRecord>, StoreError> {
        let value = match field {
            MetadataField::Fingerprint => value.to_string(),
            MetadataField::AuthorAddress => value.to_ascii_lowercase(),
        };
        let mut filter = Document::new();
        filter.insert(field.as_str(), value);
        self.find(filter).await
    }

    async fn all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        self.find(doc! {}).await
    }

    async fn create(&self, draft: MetadataDraft) -> Result<MetadataRecord, StoreError> {
        let record = MetadataRecord::from_draft(uuid::Uuid::new_v4().to_string(), draft);
        self.inner
            .insert_one(&record)
            .await
            .map_err(backend_error)?;
        Ok(record)
    }

    async fn update(&self, id: &str, update: MetadataUpdate) -> Result<MetadataRecord, StoreError> {
        let mut set = Document::new();
        if let Some(v) = &update.abstract_text {
            set.insert("abstract_text", v.as_str());
        }
        if let Some(v) = &update.file_ref {
            set.insert("file_ref", v.as_str());
        }
        if let Some(v) = &update.file_name {
            set.insert("file_name", v.as_str());
        }
        if let Some(v) = update.file_size {
            set.insert("file_size", v as i64);
        }
        if let Some(v) = &update.plagiarism {
            set.insert("plagiarism", to_bson(v)?);
        }

        let mut modifications = Document::new();
        if !set.is_empty() {
            modifications.insert("$set", set);
        }
        if !update.append_comments.is_empty() {
            modifications.insert(
                "$push",
                doc! { "comments": { "$each": to_bson(&update.append_comments)? } },
            );
        }

        if !modifications.is_empty() {
            let result = self
                .inner
                .update_one(doc! { "id": id }, modifications)
                .await
                .map_err(backend_error)?;
            if result.matched_count == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }

        self.inner
            .find_one(doc! { "id": id })
            .await
            .map_err(backend_error)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// Membership request store backed by MongoDB.
#[derive(Clone)]
pub struct MongoRequestStore {
    inner: Collection<MembershipRequest>,
}

impl MongoRequestStore {
    async fn find(&self, filter: Document) -> Result<Vec<MembershipRequest>, StoreError> {
        self.inner
            .find(filter)
            .sort(doc! { "created_at": 1, "_id": 1 })
            .await
            .map_err(backend_error)?
            .try_collect()
            .await
            .map_err(backend_error)
    }
}

#[async_trait]
impl MembershipRequestStore for MongoRequestStore {
    async fn create(&self, request: NewMembershipRequest) -> Result<MembershipRequest, StoreError> {
        let stored = MembershipRequest::pending(uuid::Uuid::new_v4().to_string(), request);
        self.inner
            .insert_one(&stored)
            .await
            .map_err(backend_error)?;
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<MembershipRequest>, StoreError> {
        self.inner
            .find_one(doc! { "id": id })
            .await
            .map_err(backend_error)
    }

    async fn by_status(&self, status: RequestStatus) -> Result<Vec<MembershipRequest>, StoreError> {
        self.find(doc! { "status": status.as_str() }).await
    }

    async fn by_wallet(&self, wallet: &str) -> Result<Vec<MembershipRequest>, StoreError> {
        self.find(doc! { "wallet": wallet.to_ascii_lowercase() }).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: RequestStatus,
        reviewed_by: &str,
    ) -> Result<MembershipRequest, StoreError> {
        let updated_at = to_bson(&chrono::Utc::now())?;
        let result = self
            .inner
            .update_one(
                doc! { "id": id },
                doc! { "$set": {
                    "status": status.as_str(),
                    "reviewed_by": reviewed_by,
                    "updated_at": updated_at,
                } },
            )
            .await
            .map_err(backend_error)?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
