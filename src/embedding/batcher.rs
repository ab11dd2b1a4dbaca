//! One provider call per document, mapped back onto chunks or records by position.

use super::{EmbeddingClient, EmbeddingClientError};
use crate::processing::{
    structured::to_text_snippet,
    types::{Chunk, EmbeddedChunk, EmbeddedRecord, StructuredRecord},
};

/// Embed every chunk's text with a single provider call.
///
/// Fails with [`EmbeddingClientError::CountMismatch`] when the provider returns a different
/// number of vectors than chunks; no partial result is produced.
pub async fn embed_chunks(
    client: &dyn EmbeddingClient,
    chunks: Vec<Chunk>,
) -> Result<Vec<EmbeddedChunk>, EmbeddingClientError> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }
    let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let vectors = request(client, texts, chunks.len()).await?;
    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
        .collect())
}

/// Embed every record's text snippet with a single provider call.
pub async fn embed_records(
    client: &dyn EmbeddingClient,
    records: Vec<StructuredRecord>,
) -> Result<Vec<EmbeddedRecord>, EmbeddingClientError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let texts = records
        .iter()
        .map(|record| to_text_snippet(&record.fields))
        .collect();
    let vectors = request(client, texts, records.len()).await?;
    Ok(records
        .into_iter()
        .zip(vectors)
        .map(|(record, vector)| EmbeddedRecord { record, vector })
        .collect())
}

async fn request(
    client: &dyn EmbeddingClient,
    texts: Vec<String>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    let vectors = client.generate_embeddings(texts).await?;
    if vectors.len() != expected {
        let error = EmbeddingClientError::CountMismatch {
            expected,
            actual: vectors.len(),
        };
        tracing::error!(error = %error, "Embedding provider returned wrong vector count");
        return Err(error);
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        drop_last: bool,
    }

    #[async_trait]
    impl EmbeddingClient for CountingEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut vectors: Vec<Vec<f32>> = texts
                .iter()
                .map(|text| vec![text.len() as f32])
                .collect();
            if self.drop_last {
                vectors.pop();
            }
            Ok(vectors)
        }
    }

    fn chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|idx| Chunk {
                document_id: "doc.txt".into(),
                chunk_index: idx,
                text: "x".repeat(idx + 1),
                tokenized_text: "x".repeat(idx + 1),
                page_number: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn maps_vectors_positionally_with_one_call() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            drop_last: false,
        };
        let embedded = embed_chunks(&embedder, chunks(3)).await.expect("embedded");

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedded.len(), 3);
        for (idx, item) in embedded.iter().enumerate() {
            assert_eq!(item.chunk.chunk_index, idx);
            assert_eq!(item.vector, vec![(idx + 1) as f32]);
        }
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            drop_last: true,
        };
        let error = embed_chunks(&embedder, chunks(2)).await.unwrap_err();
        assert!(matches!(
            error,
            EmbeddingClientError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn empty_input_skips_the_provider() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            drop_last: false,
        };
        assert!(embed_chunks(&embedder, Vec::new()).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn records_are_embedded_from_snippets() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Ada"));
        let record = StructuredRecord {
            document_id: "c.json".into(),
            fields,
        };
        let embedder = HashingEmbedder::new(8);
        let embedded = embed_records(&embedder, vec![record.clone()])
            .await
            .expect("embedded");

        let expected = embedder
            .generate_embeddings(vec!["Name: Ada".into()])
            .await
            .expect("vector");
        assert_eq!(embedded[0].record, record);
        assert_eq!(embedded[0].vector, expected[0]);
    }
}
