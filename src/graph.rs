//! # Keyword graph
//!
//! A graph-structured index kept next to the vector index. Nodes are terms
//! (entry tags plus content words); two terms share an edge when they occur
//! in the same journal entry, weighted by how many entries they share.
//!
//! A query is answered by walking the graph one hop:
//!
//! - an entry scores `1.0` for every query term it contains;
//! - the strongest neighbors of each query term are expanded, and an entry
//!   scores [`NEIGHBOR_WEIGHT`] for every expanded term it contains.
//!
//! This recalls entries that never use the query's words but share a topic
//! with entries that do ("hiking" → "lat" → the Da Lat coffee trip). It
//! needs no embeddings, so it keeps working in degraded mode.
//!
//! The graph holds no state of its own on disk. It is rebuilt from the
//! journal documents in the index store whenever a runtime is assembled.
//!
//! Vector and graph rankings are merged with [`reciprocal_rank_fusion`].

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::models::{Document, ScoredDocument};

/// Score contributed by a term reached through one edge.
pub const NEIGHBOR_WEIGHT: f32 = 0.5;

/// Neighbors expanded per query term, strongest edges first.
pub const NEIGHBOR_LIMIT: usize = 8;

/// Distinct terms kept per entry; bounds the edges one entry can add.
pub const MAX_TERMS_PER_ENTRY: usize = 64;

/// Rank constant for reciprocal rank fusion.
const RRF_K: f32 = 60.0;

const MIN_TERM_CHARS: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "and", "any", "are", "been", "before", "being",
    "but", "can", "could", "did", "does", "doing", "for", "from", "had", "has", "have", "her",
    "his", "how", "into", "its", "just", "like", "more", "most", "not", "now", "our", "out",
    "over", "she", "should", "some", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "those", "today", "too", "very", "was", "went", "were", "what",
    "when", "where", "which", "while", "who", "why", "will", "with", "would", "yesterday",
    "you", "your",
];

/// Lowercased content words of `text`, without stopwords, first occurrence order.
pub fn terms(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
        .filter(|w| !w.chars().all(|c| c.is_numeric()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

struct GraphEntry {
    document: Document,
    terms: BTreeSet<String>,
    seq: u64,
}

/// Term co-occurrence graph over journal entries, keyed by `entry_id`.
///
/// Re-indexing an entry replaces its previous terms.
#[derive(Default)]
pub struct KeywordGraph {
    entries: HashMap<i64, GraphEntry>,
    postings: HashMap<String, BTreeSet<i64>>,
    edges: HashMap<String, HashMap<String, u32>>,
    next_seq: u64,
}

impl KeywordGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored documents; anything without an `entry_id` is skipped.
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Self {
        let mut graph = Self::new();
        for document in documents {
            graph.insert(document);
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct co-occurrence edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashMap::len).sum::<usize>() / 2
    }

    /// Add or replace the entry behind `document`. Returns `false` for
    /// documents that are not journal entries.
    pub fn insert(&mut self, document: &Document) -> bool {
        let Some(entry_id) = document.entry_id() else {
            return false;
        };
        self.remove(entry_id);

        let mut entry_terms: BTreeSet<String> = document
            .tags()
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        for term in terms(&document.text) {
            if entry_terms.len() >= MAX_TERMS_PER_ENTRY {
                break;
            }
            entry_terms.insert(term);
        }

        for term in &entry_terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(entry_id);
            for other in &entry_terms {
                if other != term {
                    *self
                        .edges
                        .entry(term.clone())
                        .or_default()
                        .entry(other.clone())
                        .or_insert(0) += 1;
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            entry_id,
            GraphEntry {
                document: document.clone(),
                terms: entry_terms,
                seq,
            },
        );
        true
    }

    fn remove(&mut self, entry_id: i64) {
        let Some(old) = self.entries.remove(&entry_id) else {
            return;
        };
        for term in &old.terms {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(&entry_id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
            let Some(neighbors) = self.edges.get_mut(term) else {
                continue;
            };
            for other in &old.terms {
                if let Some(weight) = neighbors.get_mut(other) {
                    *weight -= 1;
                    if *weight == 0 {
                        neighbors.remove(other);
                    }
                }
            }
            if neighbors.is_empty() {
                self.edges.remove(term);
            }
        }
    }

    /// Strongest neighbors of `term`, ties broken alphabetically.
    pub fn neighbors(&self, term: &str, limit: usize) -> Vec<(&str, u32)> {
        let Some(edges) = self.edges.get(term) else {
            return Vec::new();
        };
        let mut neighbors: Vec<(&str, u32)> =
            edges.iter().map(|(t, w)| (t.as_str(), *w)).collect();
        neighbors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        neighbors.truncate(limit);
        neighbors
    }

    /// Up to `top_k` entries reachable from the query's terms, best first.
    /// Equal scores keep indexing order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredDocument> {
        let query_terms: BTreeSet<String> = terms(query).into_iter().collect();
        if query_terms.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut expanded: BTreeSet<&str> = BTreeSet::new();
        for term in &query_terms {
            for (neighbor, _) in self.neighbors(term, NEIGHBOR_LIMIT) {
                if !query_terms.contains(neighbor) {
                    expanded.insert(neighbor);
                }
            }
        }

        let mut scores: HashMap<i64, f32> = HashMap::new();
        for term in &query_terms {
            for id in self.postings.get(term).into_iter().flatten() {
                *scores.entry(*id).or_insert(0.0) += 1.0;
            }
        }
        for term in expanded {
            for id in self.postings.get(term).into_iter().flatten() {
                *scores.entry(*id).or_insert(0.0) += NEIGHBOR_WEIGHT;
            }
        }

        let mut ranked: Vec<(&GraphEntry, f32)> = scores
            .into_iter()
            .filter_map(|(id, score)| self.entries.get(&id).map(|e| (e, score)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.seq.cmp(&b.0.seq))
        });
        ranked.truncate(top_k);
        ranked
            .into_iter()
            .map(|(entry, score)| ScoredDocument {
                document: entry.document.clone(),
                score,
            })
            .collect()
    }
}

/// Identity used when merging rankings: journal documents by entry, the
/// rest by text.
fn fusion_key(document: &Document) -> String {
    match document.entry_id() {
        Some(id) => format!("entry:{id}"),
        None => format!("text:{}", document.text),
    }
}

/// Merge ranked lists with Reciprocal Rank Fusion (k = 60).
///
/// A document scores `1 / (k + rank)` for the first rank it holds in each
/// list; the fused list is sorted by that score and cut to `top_k`. Equal
/// scores keep the order documents were first seen.
pub fn reciprocal_rank_fusion(lists: &[Vec<ScoredDocument>], top_k: usize) -> Vec<ScoredDocument> {
    let mut fused: Vec<ScoredDocument> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for list in lists {
        let mut counted: BTreeSet<String> = BTreeSet::new();
        for (rank, hit) in list.iter().enumerate() {
            let key = fusion_key(&hit.document);
            if !counted.insert(key.clone()) {
                continue;
            }
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            match position.get(&key) {
                Some(&i) => fused[i].score += contribution,
                None => {
                    position.insert(key, fused.len());
                    fused.push(ScoredDocument {
                        document: hit.document.clone(),
                        score: contribution,
                    });
                }
            }
        }
    }

    // Stable sort keeps first-seen order for ties.
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    fused.truncate(top_k);
    fused
}
