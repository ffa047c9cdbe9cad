//! The snapshot source: content-addressed blobs of newline-delimited order
//! records, advertised by a metadata document per collection.

use {
    async_trait::async_trait,
    futures::stream::BoxStream,
    model::{
        eth::{Address, ChainId},
        events::{SnapshotMetadata, SnapshotRecord},
    },
};

#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// The most recent snapshot advertised for the collection, if any.
    async fn latest(
        &self,
        chain_id: ChainId,
        collection: Address,
    ) -> anyhow::Result<Option<SnapshotMetadata>>;

    /// Streams the records of a snapshot blob in file order.
    async fn records(
        &self,
        metadata: &SnapshotMetadata,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<SnapshotRecord>>>;
}

/// Snapshots laid out on the local filesystem: one
/// `{collection:#x}.metadata.json` document next to the newline-delimited
/// blob it advertises. Object storage mounts map onto this directly.
pub mod fs {
    use {super::*, futures::StreamExt, std::path::PathBuf};

    pub struct FsSnapshots {
        root: PathBuf,
    }

    impl FsSnapshots {
        pub fn new(root: PathBuf) -> Self {
            Self { root }
        }
    }

    #[async_trait]
    impl SnapshotSource for FsSnapshots {
        async fn latest(
            &self,
            _chain_id: ChainId,
            collection: Address,
        ) -> anyhow::Result<Option<SnapshotMetadata>> {
            let path = self.root.join(format!("{collection:#x}.metadata.json"));
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            Ok(Some(serde_json::from_slice(&raw)?))
        }

        async fn records(
            &self,
            metadata: &SnapshotMetadata,
        ) -> anyhow::Result<BoxStream<'static, anyhow::Result<SnapshotRecord>>> {
            let path = self.root.join(&metadata.file);
            let raw = tokio::fs::read_to_string(&path).await?;
            let records: Vec<anyhow::Result<SnapshotRecord>> = raw
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str(line).map_err(Into::into))
                .collect();
            Ok(futures::stream::iter(records).boxed())
        }
    }
}

/// In-memory snapshot source for tests.
pub mod in_memory {
    use {
        super::*,
        futures::StreamExt,
        std::{
            collections::HashMap,
            sync::{Arc, Mutex},
        },
    };

    #[derive(Clone, Default)]
    pub struct InMemorySnapshots {
        snapshots: Arc<Mutex<HashMap<Address, (SnapshotMetadata, Vec<SnapshotRecord>)>>>,
    }

    impl InMemorySnapshots {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, metadata: SnapshotMetadata, records: Vec<SnapshotRecord>) {
            self.snapshots
                .lock()
                .unwrap()
                .insert(metadata.collection, (metadata, records));
        }
    }

    #[async_trait]
    impl SnapshotSource for InMemorySnapshots {
        async fn latest(
            &self,
            _chain_id: ChainId,
            collection: Address,
        ) -> anyhow::Result<Option<SnapshotMetadata>> {
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .get(&collection)
                .map(|(metadata, _)| metadata.clone()))
        }

        async fn records(
            &self,
            metadata: &SnapshotMetadata,
        ) -> anyhow::Result<BoxStream<'static, anyhow::Result<SnapshotRecord>>> {
            let records = self
                .snapshots
                .lock()
                .unwrap()
                .get(&metadata.collection)
                .map(|(_, records)| records.clone())
                .unwrap_or_default();
            Ok(futures::stream::iter(records.into_iter().map(Ok)).boxed())
        }
    }
}
