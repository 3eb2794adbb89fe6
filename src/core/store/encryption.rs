// src/core/store/encryption.rs

//! At-rest encryption boundary for message content. The engine ships a
//! no-op encryptor; a real secrets-backed implementation is outside this
//! engine's scope and is plugged in by the embedding application.

use async_trait::async_trait;

use crate::core::error::EngineResult;
use crate::core::store::model::ContentRow;
use crate::core::store::traits::MessageStore;

/// Encrypts and decrypts content payloads. Implementations must be
/// deterministic only in the sense that `decrypt(encrypt(x)) == x`; the
/// ciphertext format is otherwise the implementation's own business.
#[async_trait]
pub trait Encryptor: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> EngineResult<Vec<u8>>;
    async fn decrypt(&self, ciphertext: &[u8]) -> EngineResult<Vec<u8>>;
}

/// Identity encryptor. Used when no encryption is configured; content rows
/// pass through unchanged and `encrypted` stays `false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEncryptor;

#[async_trait]
impl Encryptor for NoopEncryptor {
    async fn encrypt(&self, plaintext: &[u8]) -> EngineResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> EngineResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// Walks every content row of a connector-message and encrypts any row not
/// already marked `encrypted`, writing the result back through `store`.
pub async fn encrypt_connector_message(
    store: &dyn MessageStore,
    encryptor: &dyn Encryptor,
    channel_id: &str,
    message_id: i64,
    metadata_id: i32,
) -> EngineResult<()> {
    for row in store.list_content(channel_id, message_id, metadata_id).await? {
        if row.encrypted {
            continue;
        }
        let ciphertext = encryptor.encrypt(&row.payload).await?;
        store
            .put_content(&ContentRow {
                payload: ciphertext,
                encrypted: true,
                ..row
            })
            .await?;
    }
    Ok(())
}

/// The inverse of [`encrypt_connector_message`]: decrypts every row
/// currently marked `encrypted`.
pub async fn decrypt_connector_message(
    store: &dyn MessageStore,
    encryptor: &dyn Encryptor,
    channel_id: &str,
    message_id: i64,
    metadata_id: i32,
) -> EngineResult<()> {
    for row in store.list_content(channel_id, message_id, metadata_id).await? {
        if !row.encrypted {
            continue;
        }
        let plaintext = encryptor.decrypt(&row.payload).await?;
        store
            .put_content(&ContentRow {
                payload: plaintext,
                encrypted: false,
                ..row
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::model::ContentType;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<Vec<ContentRow>>,
    }

    #[async_trait]
    impl MessageStore for FakeStore {
        async fn create_message(
            &self,
            _channel_id: &str,
            _message_id: i64,
            _server_id: &str,
            _batch_sequence_id: Option<i64>,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn upsert_connector_message(
            &self,
            _cm: &crate::core::store::model::ConnectorMessage,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn get_connector_message(
            &self,
            _channel_id: &str,
            _message_id: i64,
            _metadata_id: i32,
        ) -> EngineResult<Option<crate::core::store::model::ConnectorMessage>> {
            Ok(None)
        }

        async fn put_content(&self, row: &ContentRow) -> EngineResult<()> {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|r| r.content_type != row.content_type);
            rows.push(row.clone());
            Ok(())
        }

        async fn get_content(
            &self,
            _channel_id: &str,
            _message_id: i64,
            _metadata_id: i32,
            content_type: ContentType,
        ) -> EngineResult<Option<ContentRow>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.content_type == content_type)
                .cloned())
        }

        async fn list_content(
            &self,
            _channel_id: &str,
            _message_id: i64,
            _metadata_id: i32,
        ) -> EngineResult<Vec<ContentRow>> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn put_attachment(
            &self,
            _row: &crate::core::store::model::AttachmentRow,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn get_attachment(
            &self,
            _channel_id: &str,
            _message_id: i64,
            _attachment_id: &str,
        ) -> EngineResult<Option<crate::core::store::model::AttachmentRow>> {
            Ok(None)
        }

        async fn inc_stats(
            &self,
            _channel_id: &str,
            _metadata_id: i32,
            _kind: crate::core::store::model::StatKind,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn search(
            &self,
            _channel_id: &str,
            _filter: &crate::core::store::traits::MessageFilter,
            _range: crate::core::store::traits::PageRange,
        ) -> EngineResult<Vec<crate::core::store::model::Message>> {
            Ok(vec![])
        }

        async fn count_by_filter(
            &self,
            _channel_id: &str,
            _filter: &crate::core::store::traits::MessageFilter,
        ) -> EngineResult<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_round_trips() {
        let store = FakeStore::default();
        store
            .put_content(&ContentRow {
                channel_id: "ch1".into(),
                message_id: 1,
                metadata_id: 0,
                content_type: ContentType::Raw,
                payload: b"hello".to_vec(),
                data_type: Some("HL7V2".into()),
                encrypted: false,
            })
            .await
            .unwrap();

        encrypt_connector_message(&store, &NoopEncryptor, "ch1", 1, 0)
            .await
            .unwrap();
        let rows = store.list_content("ch1", 1, 0).await.unwrap();
        assert!(rows[0].encrypted);

        decrypt_connector_message(&store, &NoopEncryptor, "ch1", 1, 0)
            .await
            .unwrap();
        let rows = store.list_content("ch1", 1, 0).await.unwrap();
        assert!(!rows[0].encrypted);
        assert_eq!(rows[0].payload, b"hello");
    }
}
