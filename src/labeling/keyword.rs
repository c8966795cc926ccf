//! Offline labeler: titles from the most distinctive words of a cluster.

use super::embedding::EmbeddingGenerator;
use super::{LabelContext, Labeler, TopicLabel, prompt};
use crate::error::{LabelError, LabelResult};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

/// Words used for a title.
const TITLE_TERMS: usize = 3;

/// Shortest word considered a keyword.
const MIN_TERM_CHARS: usize = 3;

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'-]*").expect("word pattern is valid")
});

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "and", "any", "are", "because", "been", "before",
    "but", "can", "cannot", "could", "did", "does", "doesn't", "don't", "for", "from", "get",
    "got", "had", "has", "have", "her", "him", "his", "how", "i'm", "into", "it's", "its", "just",
    "like", "more", "most", "much", "not", "now", "off", "one", "only", "other", "our", "out",
    "over", "really", "she", "should", "some", "still", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "too", "use", "very", "was", "way", "were",
    "what", "when", "where", "which", "while", "who", "why", "will", "with", "would", "you",
    "your",
];

/// Labels clusters by keyword frequency across their representative texts.
///
/// Terms already used by the parent or ancestors are skipped, so child
/// titles say what distinguishes them.
#[derive(Default, Clone)]
pub struct KeywordLabeler {
    generator: Option<Arc<dyn EmbeddingGenerator>>,
}

impl KeywordLabeler {
    /// Keyword labeler without title embeddings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyword labeler that embeds titles with `generator`.
    pub fn with_embeddings(generator: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    /// Top terms ordered by document frequency, then total count, then text.
    pub fn keywords(texts: &[String], exclude: &BTreeSet<String>, limit: usize) -> Vec<String> {
        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for text in texts {
            let lowered = text.to_lowercase();
            let mut seen_here: BTreeSet<&str> = BTreeSet::new();
            for word in WORD.find_iter(&lowered).map(|m| m.as_str()) {
                if word.chars().count() < MIN_TERM_CHARS
                    || STOPWORDS.contains(&word)
                    || exclude.contains(word)
                    || word.chars().all(|c| c.is_numeric())
                {
                    continue;
                }
                let entry = counts.entry(word.to_string()).or_default();
                entry.1 += 1;
                if seen_here.insert(word) {
                    entry.0 += 1;
                }
            }
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(limit).map(|(word, _)| word).collect()
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lowercase_words(titles: impl Iterator<Item = impl AsRef<str>>) -> BTreeSet<String> {
    titles
        .flat_map(|t| {
            WORD.find_iter(&t.as_ref().to_lowercase())
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[async_trait]
impl Labeler for KeywordLabeler {
    async fn label(&self, texts: &[String], context: &LabelContext<'_>) -> LabelResult<TopicLabel> {
        let exclude = lowercase_words(
            context
                .ancestors
                .iter()
                .map(String::as_str)
                .chain(context.parent_title),
        );
        let terms = Self::keywords(texts, &exclude, TITLE_TERMS);
        if terms.is_empty() {
            return Err(LabelError::InvalidResponse(
                "no distinctive terms in representative texts".to_string(),
            ));
        }

        let title = terms.iter().map(|t| title_case(t)).collect::<Vec<_>>().join(" ");
        let description = format!(
            "{} items ({}) mentioning {}",
            context.cluster_size,
            prompt::level_description(context.level),
            terms.join(", ")
        );
        Ok(TopicLabel::new(title, description))
    }

    async fn embed(&self, text: &str) -> LabelResult<Vec<f32>> {
        let Some(generator) = self.generator.clone() else {
            return Err(LabelError::NotConfigured {
                reason: "local_embeddings is disabled".to_string(),
            });
        };
        let text = text.to_string();
        let mut embeddings =
            tokio::task::spawn_blocking(move || generator.generate_embeddings(&[text.as_str()]))
                .await
                .map_err(|e| LabelError::Embedding(e.to_string()))??;
        embeddings
            .pop()
            .ok_or_else(|| LabelError::Embedding("generator returned no embedding".to_string()))
    }
}
