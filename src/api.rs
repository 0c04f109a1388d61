use reqwest::Client;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::path::Path;
use anyhow::{Result, anyhow};

/// Only plain-text files are accepted for upload; everything else is rejected
/// client-side before any request is made.
pub const ACCEPTED_EXTENSION: &str = ".txt";

pub fn accepted_upload(filename: &str) -> bool {
    filename.ends_with(ACCEPTED_EXTENSION)
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// Retrieved passages the answer's `[n]` markers refer to. Not every
    /// backend returns them; missing means no sources panel.
    #[serde(default)]
    pub context: Vec<String>,
}

#[derive(Deserialize)]
struct UploadEnvelope {
    data: UploadReceipt,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub document_id: String,
    pub total_chunks: u32,
}

#[derive(Deserialize)]
struct DocumentsResponse {
    documents: Vec<DocumentInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub total_chunks: u32,
    pub upload_date: Option<String>,
}

/// Thin client for the Q&A backend. The backend does all chunking, retrieval,
/// and answer synthesis; this only speaks its three HTTP endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Upload one file as multipart form data. The caller is expected to have
    /// validated the extension already.
    pub async fn upload(&self, path: &Path) -> Result<UploadReceipt> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid file name: {}", path.display()))?
            .to_string();

        let bytes = tokio::fs::read(path).await?;
        let part = multipart::Part::bytes(bytes).file_name(filename);
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("upload failed with status: {}", response.status()));
        }

        let envelope: UploadEnvelope = response.json().await?;
        Ok(envelope.data)
    }

    pub async fn query(&self, text: &str) -> Result<QueryAnswer> {
        let request = QueryRequest { query: text };

        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("query failed with status: {}", response.status()));
        }

        let answer: QueryAnswer = response.json().await?;
        Ok(answer)
    }

    pub async fn documents(&self) -> Result<Vec<DocumentInfo>> {
        let response = self
            .client
            .get(format!("{}/documents", self.base_url))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "listing documents failed with status: {}",
                response.status()
            ));
        }

        let documents: DocumentsResponse = response.json().await?;
        Ok(documents.documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_upload_txt() {
        assert!(accepted_upload("notes.txt"));
        assert!(accepted_upload("dir.with.dots.txt"));
    }

    #[test]
    fn test_accepted_upload_rejects_other_types() {
        assert!(!accepted_upload("notes.pdf"));
        assert!(!accepted_upload("notes.txt.bak"));
        assert!(!accepted_upload("txt"));
    }

    #[test]
    fn test_accepted_upload_is_case_sensitive() {
        assert!(!accepted_upload("NOTES.TXT"));
    }

    #[test]
    fn test_query_answer_context_defaults_to_empty() {
        let answer: QueryAnswer =
            serde_json::from_str(r#"{"answer": "no sources here"}"#).unwrap();
        assert_eq!(answer.answer, "no sources here");
        assert!(answer.context.is_empty());
    }

    #[test]
    fn test_upload_envelope_shape() {
        let envelope: UploadEnvelope = serde_json::from_str(
            r#"{"data": {"document_id": "d1", "total_chunks": 4}}"#,
        )
        .unwrap();
        assert_eq!(envelope.data.document_id, "d1");
        assert_eq!(envelope.data.total_chunks, 4);
    }
}
