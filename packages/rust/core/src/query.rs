//! The question-answering pipeline: rewrite → retrieve → synthesize.
//!
//! Stage 1 turns the conversational question into a keyword query on the
//! fast model tier, degrading to the raw question on any failure. Stage 2
//! is vector search with optional reranking. Stage 3 synthesizes a grounded
//! answer on the strong tier; its failures surface to the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use sitegist_shared::{Config, Hit, Result, SitegistError};
use sitegist_vector::{ChatMessage, Llm, ModelTier, Reranker, VectorStore};

/// Output token cap for query rewriting.
const REWRITE_MAX_TOKENS: u32 = 100;

/// Output token cap for answer synthesis.
const SYNTHESIS_MAX_TOKENS: u32 = 1024;

/// Synthesis gets a longer leash than the rewrite call.
const SYNTHESIS_TIMEOUT_SECS: u64 = 60;

const REWRITE_SYSTEM_PROMPT: &str = "Rewrite the user's question as a short keyword-rich query \
for semantic search over scraped website content. Extract key concepts, add close synonyms, \
keep it to 2-10 words, no quotes or special characters. Output only the rewritten query.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about \
website content. Answer ONLY from the provided sources. If the sources are insufficient to \
answer, say so plainly. Cite the sources you used by their titles. Do not invent information \
that is not present in the sources.";

const NO_SOURCES_ANSWER: &str = "I don't have any information about that in my knowledge base. \
Try rephrasing the question or scraping more content first.";

// ---------------------------------------------------------------------------
// Answer types
// ---------------------------------------------------------------------------

/// One cited source, distinct per page, in first-referenced order.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub site_name: String,
    pub page_name: String,
    pub page_url: String,
    pub score: f32,
}

/// The pipeline's final response.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub optimized_query: String,
    pub answer: String,
    pub sources_used: usize,
    pub sources: Vec<SourceRef>,
}

// ---------------------------------------------------------------------------
// QueryPipeline
// ---------------------------------------------------------------------------

/// Read-side pipeline over the vector store.
pub struct QueryPipeline {
    llm: Arc<dyn Llm>,
    reranker: Option<Arc<dyn Reranker>>,
    store: Arc<VectorStore>,
    rewrite_timeout: Duration,
}

impl QueryPipeline {
    pub fn new(
        llm: Arc<dyn Llm>,
        reranker: Option<Arc<dyn Reranker>>,
        store: Arc<VectorStore>,
        config: &Config,
    ) -> Self {
        Self {
            llm,
            reranker,
            store,
            rewrite_timeout: Duration::from_secs(config.default_timeout),
        }
    }

    /// Answer a question grounded in stored chunks.
    #[instrument(skip_all, fields(top_k))]
    pub async fn ask(
        &self,
        question: &str,
        history: &[ChatMessage],
        top_k: usize,
        filter_domain: Option<&str>,
        filter_site: Option<&str>,
    ) -> Result<Answer> {
        // Stage 1: rewrite. Failure here never fails the question.
        let optimized_query = self.rewrite_query(question, history).await;
        debug!(query = %optimized_query, "optimized query");

        // Stage 2: retrieve, with the candidate pool doubled when a
        // reranker gets a second pass.
        let fetch_k = if self.reranker.is_some() {
            top_k.saturating_mul(2)
        } else {
            top_k
        };
        let mut hits = self
            .store
            .search(&optimized_query, fetch_k, filter_domain, filter_site)
            .await?;

        if let Some(reranker) = &self.reranker {
            if !hits.is_empty() {
                match reranker.rerank(question, hits.clone(), top_k).await {
                    Ok(reranked) => hits = reranked,
                    Err(e) => {
                        warn!(error = %e, "reranker failed, keeping vector order");
                        hits.truncate(top_k);
                    }
                }
            }
        }

        if hits.is_empty() {
            return Ok(Answer {
                question: question.to_string(),
                optimized_query,
                answer: NO_SOURCES_ANSWER.to_string(),
                sources_used: 0,
                sources: Vec::new(),
            });
        }

        // Stage 3: synthesize. Failures surface.
        let answer = self.synthesize(question, history, &hits).await?;

        let sources = distinct_sources(&hits);
        info!(sources_used = hits.len(), "answer generated");

        Ok(Answer {
            question: question.to_string(),
            optimized_query,
            answer,
            sources_used: hits.len(),
            sources,
        })
    }

    /// Stage 1: keyword-query rewriting on the fast tier.
    async fn rewrite_query(&self, question: &str, history: &[ChatMessage]) -> String {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(question));

        let completion = tokio::time::timeout(
            self.rewrite_timeout,
            self.llm.complete(
                ModelTier::Fast,
                Some(REWRITE_SYSTEM_PROMPT),
                &messages,
                REWRITE_MAX_TOKENS,
            ),
        )
        .await;

        match completion {
            Ok(Ok(text)) => {
                let rewritten = text.trim().trim_matches('"').trim().to_string();
                if rewritten.is_empty() {
                    question.to_string()
                } else {
                    rewritten
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "query rewrite failed, using raw question");
                question.to_string()
            }
            Err(_) => {
                warn!("query rewrite timed out, using raw question");
                question.to_string()
            }
        }
    }

    /// Stage 3: grounded synthesis on the strong tier.
    async fn synthesize(
        &self,
        question: &str,
        history: &[ChatMessage],
        hits: &[Hit],
    ) -> Result<String> {
        let context = render_context(hits);
        let prompt = format!(
            "Answer this question using the sources below.\n\n\
             Question: {question}\n\nSources:\n{context}"
        );

        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prompt));

        tokio::time::timeout(
            Duration::from_secs(SYNTHESIS_TIMEOUT_SECS),
            self.llm.complete(
                ModelTier::Strong,
                Some(SYNTHESIS_SYSTEM_PROMPT),
                &messages,
                SYNTHESIS_MAX_TOKENS,
            ),
        )
        .await
        .map_err(|_| SitegistError::Llm("answer synthesis timed out".into()))?
    }
}

/// Context block listing every hit as a numbered source.
fn render_context(hits: &[Hit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "Source {}: {} - {}\n{}",
                i + 1,
                hit.site_name,
                hit.page_name,
                hit.chunk_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Distinct `(site, page)` references in first-referenced order.
fn distinct_sources(hits: &[Hit]) -> Vec<SourceRef> {
    let mut seen = std::collections::HashSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.page_url.clone()))
        .map(|hit| SourceRef {
            site_name: hit.site_name.clone(),
            page_name: hit.page_name.clone(),
            page_url: hit.page_url.clone(),
            score: hit.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(page_url: &str, score: f32) -> Hit {
        Hit {
            chunk_id: format!("{page_url}_0"),
            domain: "example.com".into(),
            site_name: "Example".into(),
            page_name: "page".into(),
            page_url: page_url.into(),
            chunk_text: "text".into(),
            score,
        }
    }

    #[test]
    fn context_numbers_sources() {
        let hits = vec![hit("https://example.com/a", 0.9), hit("https://example.com/b", 0.8)];
        let context = render_context(&hits);
        assert!(context.contains("Source 1: Example - page"));
        assert!(context.contains("Source 2:"));
        assert!(context.contains("\n---\n"));
    }

    #[test]
    fn sources_are_distinct_and_ordered() {
        let hits = vec![
            hit("https://example.com/a", 0.9),
            hit("https://example.com/b", 0.8),
            hit("https://example.com/a", 0.7),
        ];
        let sources = distinct_sources(&hits);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].page_url, "https://example.com/a");
        assert_eq!(sources[0].score, 0.9);
        assert_eq!(sources[1].page_url, "https://example.com/b");
    }
}
