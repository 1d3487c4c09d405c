//! Metadata scanner
//!
//! Execution-free analysis of a prompt: the parameters it reads, its config
//! block, and the documents it references. Scanning never fails; problems are
//! collected in [`ConversationMetadata::errors`].

pub mod scope_context;

pub use scope_context::*;

use crate::config::ConfigSchema;
use crate::lexer::Span;
use crate::parser::ast::*;
use crate::parser::parse;
use async_trait::async_trait;
use parley_core::{CompileError, Config, Document, ErrorCode};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

// ============================================================================
// REFERENCE LOOKUP
// ============================================================================

/// Async lookup of referenced documents.
///
/// `path` is already resolved against the referencing document; `from` is
/// the referencing document's own path.
#[async_trait]
pub trait ReferenceFn: Send + Sync {
    async fn resolve(&self, path: &str, from: Option<&str>) -> Option<Document>;
}

/// In-memory lookup keyed by path.
#[async_trait]
impl ReferenceFn for HashMap<String, String> {
    async fn resolve(&self, path: &str, _from: Option<&str>) -> Option<Document> {
        self.get(path)
            .map(|content| Document::new(path, content.clone()))
    }
}

/// Resolve `path` relative to the directory of `from`. Leading `/` makes
/// the path absolute; results carry no leading slash.
pub fn resolve_reference_path(path: &str, from: &str) -> String {
    let mut segments: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        let mut dir: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
        dir.pop();
        dir
    };

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

// ============================================================================
// OPTIONS & RESULT
// ============================================================================

#[derive(Clone, Default)]
pub struct ReadMetadataOptions {
    pub prompt: String,
    pub full_path: Option<String>,
    pub reference_fn: Option<Arc<dyn ReferenceFn>>,
    /// Allow-list of parameter names to report.
    pub with_parameters: Option<Vec<String>>,
    pub config_schema: Option<ConfigSchema>,
}

impl fmt::Debug for ReadMetadataOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadMetadataOptions")
            .field("prompt", &self.prompt)
            .field("full_path", &self.full_path)
            .field("reference_fn", &self.reference_fn.is_some())
            .field("with_parameters", &self.with_parameters)
            .field("config_schema", &self.config_schema)
            .finish()
    }
}

impl ReadMetadataOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn full_path(mut self, path: impl Into<String>) -> Self {
        self.full_path = Some(path.into());
        self
    }

    pub fn reference_fn(mut self, reference_fn: impl ReferenceFn + 'static) -> Self {
        self.reference_fn = Some(Arc::new(reference_fn));
        self
    }

    pub fn with_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_parameters = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn config_schema(mut self, schema: ConfigSchema) -> Self {
        self.config_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    /// SHA-256 of `resolved_prompt`, hex encoded.
    pub hash: String,
    /// The prompt with every reference inlined.
    pub resolved_prompt: String,
    pub config: Config,
    pub errors: Vec<CompileError>,
    pub parameters: BTreeSet<String>,
    /// Resolved paths of every referenced document, transitively.
    pub references: BTreeSet<String>,
}

// ============================================================================
// SCANNER
// ============================================================================

struct ScannedDocument {
    resolved: String,
    parameters: BTreeSet<String>,
    config: Option<(Config, Span)>,
}

type ScanFuture<'s> = Pin<Box<dyn Future<Output = ScannedDocument> + Send + 's>>;

struct MetadataScanner {
    reference_fn: Option<Arc<dyn ReferenceFn>>,
    errors: Vec<CompileError>,
    references: BTreeSet<String>,
}

impl MetadataScanner {
    fn report(&mut self, error: CompileError, document: &Document) {
        tracing::warn!(
            path = %document.path,
            code = %error.code,
            error = %error.message,
            "Metadata scan error"
        );
        self.errors.push(error);
    }

    /// Scan `document`; `ancestors` holds the paths of the documents that
    /// reference it, outermost first.
    fn scan_document(&mut self, document: Document, ancestors: Vec<String>) -> ScanFuture<'_> {
        Box::pin(async move {
            let fragment = match parse(&document.content) {
                Ok(fragment) => fragment,
                Err(e) => {
                    self.report(e, &document);
                    return ScannedDocument {
                        resolved: document.content.clone(),
                        parameters: BTreeSet::new(),
                        config: None,
                    };
                }
            };

            let mut tags = Vec::new();
            let mut config = None;
            fragment.walk(&mut |node| match node {
                TemplateNode::Reference(tag) => tags.push(tag.clone()),
                TemplateNode::Config(node) if config.is_none() => {
                    config = Some((node.value.clone(), node.span))
                }
                _ => {}
            });

            let mut reference_parameters = HashMap::new();
            let mut splices = Vec::new();
            let mut lineage = ancestors.clone();
            lineage.push(document.path.clone());

            for tag in tags {
                let located = |e: CompileError| {
                    e.at(tag.span.start, tag.span.end).locate(&document.content)
                };

                let Some(path) = find_attribute(&tag.attributes, "prompt")
                    .and_then(|attribute| attribute.value.static_text())
                else {
                    let error = located(CompileError::new(
                        ErrorCode::InvalidReference,
                        "Reference tags need a static 'prompt' attribute",
                    ));
                    self.report(error, &document);
                    continue;
                };

                let full_path = resolve_reference_path(&path, &document.path);
                if lineage.contains(&full_path) {
                    let error = located(CompileError::new(
                        ErrorCode::CircularReference,
                        format!("Circular reference to '{}'", full_path),
                    ));
                    self.report(error, &document);
                    continue;
                }

                tracing::trace!(path = %full_path, from = %document.path, "Resolving reference");
                let referenced = match &self.reference_fn {
                    Some(reference_fn) => reference_fn.resolve(&full_path, Some(&document.path)).await,
                    None => None,
                };
                let Some(referenced) = referenced else {
                    let error = located(CompileError::new(
                        ErrorCode::ReferenceNotFound,
                        format!("Referenced prompt '{}' not found", full_path),
                    ));
                    self.report(error, &document);
                    continue;
                };

                let child = self.scan_document(referenced, lineage.clone()).await;
                let body = match &child.config {
                    Some((_, span)) => child
                        .resolved
                        .get(span.end..)
                        .unwrap_or_default()
                        .trim_start()
                        .to_string(),
                    None => child.resolved.clone(),
                };

                self.references.insert(full_path);
                reference_parameters.insert(tag.span.start, child.parameters);
                splices.push((tag.span.start, tag.span.end, body));
            }

            let parameters = collect_parameters(&fragment, reference_parameters);
            ScannedDocument {
                resolved: splice(&document.content, splices),
                parameters,
                config,
            }
        })
    }
}

/// Replace byte ranges of `source`; ranges are in document order.
fn splice(source: &str, splices: Vec<(usize, usize, String)>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (start, end, replacement) in splices {
        out.push_str(source.get(cursor..start).unwrap_or_default());
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(source.get(cursor..).unwrap_or_default());
    out
}

// ============================================================================
// ENTRY POINT
// ============================================================================

/// Scan a prompt without executing it.
pub async fn read_metadata(options: ReadMetadataOptions) -> ConversationMetadata {
    let document = Document::new(options.full_path.unwrap_or_default(), options.prompt);
    let mut scanner = MetadataScanner {
        reference_fn: options.reference_fn,
        errors: Vec::new(),
        references: BTreeSet::new(),
    };

    let scanned = scanner.scan_document(document.clone(), Vec::new()).await;
    let (config, config_span) = match scanned.config {
        Some((config, span)) => (config, Some(span)),
        None => (Config::new(), None),
    };

    if let Some(schema) = &options.config_schema {
        let span = config_span.unwrap_or_default();
        for violation in schema.validate(&config) {
            let error = CompileError::new(ErrorCode::InvalidConfig, violation)
                .at(span.start, span.end)
                .locate(&document.content);
            scanner.report(error, &document);
        }
    }

    let mut parameters = scanned.parameters;
    if let Some(allowed) = &options.with_parameters {
        parameters.retain(|name| allowed.contains(name));
    }

    let hash = hex::encode(Sha256::digest(scanned.resolved.as_bytes()));
    tracing::debug!(
        parameters = parameters.len(),
        references = scanner.references.len(),
        errors = scanner.errors.len(),
        "Read prompt metadata"
    );

    ConversationMetadata {
        hash,
        resolved_prompt: scanned.resolved,
        config,
        errors: scanner.errors,
        parameters,
        references: scanner.references,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reference_path() {
        assert_eq!(resolve_reference_path("b", "dir/a"), "dir/b");
        assert_eq!(resolve_reference_path("../b", "dir/sub/a"), "dir/b");
        assert_eq!(resolve_reference_path("./x/y", "a"), "x/y");
        assert_eq!(resolve_reference_path("/root/b", "dir/a"), "root/b");
        assert_eq!(resolve_reference_path("b", ""), "b");
    }

    #[test]
    fn test_splice_replaces_ranges_in_order() {
        let out = splice(
            "a <ref/> b <ref/> c",
            vec![(2, 8, "X".to_string()), (11, 17, "Y".to_string())],
        );
        assert_eq!(out, "a X b Y c");
    }
}
