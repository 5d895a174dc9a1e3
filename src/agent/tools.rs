//! Tool definitions and implementations for the syllabus agent.

use super::conversation::{ToolCallRequest, ToolResult};
use crate::config::SearchSettings;
use crate::embedding::Embedder;
use crate::error::{Result, SyllabiError};
use crate::index::{DocumentIndex, IndexedFile};
use crate::ingest::Ingestor;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Name, description and JSON Schema parameters advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    /// Semantic search over indexed syllabi.
    SearchSyllabi { query: String, num_results: usize },

    /// Index a file from the local filesystem.
    UploadSyllabus { file_path: String },

    /// Per-file summaries, optionally narrowed to one source.
    ListIndexedFiles { source: Option<String> },

    /// Index-wide counts.
    GetIndexStats,
}

/// Why a tool call could not produce a result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    SchemaValidation { tool: String, message: String },

    #[error("{0}")]
    Execution(#[from] SyllabiError),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    num_results: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UploadArgs {
    file_path: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    #[serde(default)]
    source: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

/// The fixed tool set, bound to the index it operates on.
pub struct ToolRegistry {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn Embedder>,
    ingestor: Arc<Ingestor>,
    search: SearchSettings,
}

impl ToolRegistry {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn Embedder>,
        ingestor: Arc<Ingestor>,
        search: SearchSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            ingestor,
            search,
        }
    }

    /// Schemas for every tool, in a stable order.
    pub fn describe_all(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema {
                name: "search_syllabi".to_string(),
                description: "Search indexed syllabi for passages relevant to a query. \
                    Use this before answering questions about course content, policies or schedules."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What to look for"
                        },
                        "num_results": {
                            "type": "integer",
                            "description": format!(
                                "Number of passages to return (default: {})",
                                self.search.default_results
                            ),
                            "minimum": 1,
                            "maximum": self.search.max_results
                        }
                    },
                    "required": ["query"],
                    "additionalProperties": false
                }),
            },
            ToolSchema {
                name: "upload_syllabus".to_string(),
                description: "Add a syllabus file from the local filesystem to the index. \
                    Uploading the same path again replaces its previous contents."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Path to a plain-text syllabus file"
                        }
                    },
                    "required": ["file_path"],
                    "additionalProperties": false
                }),
            },
            ToolSchema {
                name: "list_indexed_files".to_string(),
                description: "List indexed syllabus files with chunk counts and sizes. \
                    Use this to see what content is available."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "source": {
                            "type": "string",
                            "description": "Only report this file (full path or file name)"
                        }
                    },
                    "additionalProperties": false
                }),
            },
            ToolSchema {
                name: "get_index_stats".to_string(),
                description: "Get the number of indexed chunks and files.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                }),
            },
        ]
    }

    /// Check a raw request against its tool's schema.
    pub fn validate(&self, request: &ToolCallRequest) -> std::result::Result<ToolCall, ToolError> {
        let name = request.name.as_str();
        let invalid = |message: String| ToolError::SchemaValidation {
            tool: name.to_string(),
            message,
        };

        let args: Value = if request.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&request.arguments).map_err(|e| invalid(e.to_string()))?
        };
        if !args.is_object() {
            return Err(invalid("arguments must be a JSON object".to_string()));
        }

        match name {
            "search_syllabi" => {
                let args: SearchArgs =
                    serde_json::from_value(args).map_err(|e| invalid(e.to_string()))?;
                if args.query.trim().is_empty() {
                    return Err(invalid("query must not be empty".to_string()));
                }
                let num_results = match args.num_results {
                    None => self.search.default_results,
                    Some(n) if n >= 1 && n as usize <= self.search.max_results => n as usize,
                    Some(n) => {
                        return Err(invalid(format!(
                            "num_results must be between 1 and {}, got {}",
                            self.search.max_results, n
                        )))
                    }
                };
                Ok(ToolCall::SearchSyllabi {
                    query: args.query,
                    num_results,
                })
            }
            "upload_syllabus" => {
                let args: UploadArgs =
                    serde_json::from_value(args).map_err(|e| invalid(e.to_string()))?;
                if args.file_path.trim().is_empty() {
                    return Err(invalid("file_path must not be empty".to_string()));
                }
                Ok(ToolCall::UploadSyllabus {
                    file_path: args.file_path,
                })
            }
            "list_indexed_files" => {
                let args: ListArgs =
                    serde_json::from_value(args).map_err(|e| invalid(e.to_string()))?;
                Ok(ToolCall::ListIndexedFiles {
                    source: args.source.filter(|s| !s.trim().is_empty()),
                })
            }
            "get_index_stats" => {
                let _: NoArgs = serde_json::from_value(args).map_err(|e| invalid(e.to_string()))?;
                Ok(ToolCall::GetIndexStats)
            }
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }

    /// Run a validated tool call.
    pub async fn execute(&self, call: &ToolCall) -> Result<Value> {
        match call {
            ToolCall::SearchSyllabi { query, num_results } => {
                self.execute_search(query, *num_results).await
            }
            ToolCall::UploadSyllabus { file_path } => self.execute_upload(file_path).await,
            ToolCall::ListIndexedFiles { source } => self.execute_list(source.as_deref()).await,
            ToolCall::GetIndexStats => self.execute_stats().await,
        }
    }

    /// Validate and run a model request. Failures become failed results.
    #[instrument(skip(self, request), fields(tool = %request.name, call_id = %request.id))]
    pub async fn invoke(&self, request: &ToolCallRequest) -> ToolResult {
        info!("Calling tool {} with args: {}", request.name, request.arguments);

        let outcome = match self.validate(request) {
            Ok(call) => self.execute(&call).await.map_err(ToolError::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(payload) => ToolResult::ok(request, payload),
            Err(e) => {
                warn!("Tool {} failed: {}", request.name, e);
                ToolResult::failed(request, e.to_string())
            }
        }
    }

    async fn execute_search(&self, query: &str, num_results: usize) -> Result<Value> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.search(&embedding, num_results).await?;

        if hits.is_empty() {
            return Ok(json!({
                "results": [],
                "total_found": 0,
                "message": "No matching content found. Make sure syllabi have been uploaded to the index."
            }));
        }

        let results: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "content": truncate_chars(&hit.chunk.content, self.search.snippet_chars),
                    "filename": hit.chunk.filename(),
                    "source": hit.chunk.source,
                    "position": hit.chunk.position,
                    "relevance": round3(hit.score),
                })
            })
            .collect();

        Ok(json!({
            "total_found": results.len(),
            "results": results,
        }))
    }

    async fn execute_upload(&self, file_path: &str) -> Result<Value> {
        let expanded = shellexpand::tilde(file_path).to_string();
        let report = self.ingestor.ingest_file(Path::new(&expanded)).await?;

        Ok(json!({
            "success": true,
            "message": "File uploaded and indexed",
            "file_id": report.source,
            "chunks_indexed": report.chunks_indexed,
            "superseded": report.superseded,
            "status": "completed",
        }))
    }

    async fn execute_list(&self, source: Option<&str>) -> Result<Value> {
        let mut files = self.index.list_files().await?;
        if let Some(wanted) = source {
            files.retain(|f| f.source == wanted || file_name(&f.source) == wanted);
        }

        let listed: Vec<Value> = files.iter().map(file_summary).collect();
        Ok(json!({
            "total": listed.len(),
            "files": listed,
        }))
    }

    async fn execute_stats(&self) -> Result<Value> {
        let stats = self.index.stats().await?;
        Ok(json!({
            "chunk_count": stats.chunk_count,
            "file_count": stats.file_count,
            "backend": self.index.backend(),
        }))
    }
}

fn file_summary(file: &IndexedFile) -> Value {
    json!({
        "source": file.source,
        "filename": file_name(&file.source),
        "chunk_count": file.chunk_count,
        "characters": file.characters,
        "indexed_at": file.indexed_at.to_rfc3339(),
    })
}

fn file_name(source: &str) -> &str {
    Path::new(source)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(source)
}

/// Keep the first `max` characters, marking the cut with "...".
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn round3(score: f32) -> f64 {
    (score as f64 * 1000.0).round() / 1000.0
}
