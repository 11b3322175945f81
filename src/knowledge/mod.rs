//! Curated knowledge base: items, corpus parsing, and the search index

mod index;
mod item;
mod parser;

pub use index::{
    IndexError, IndexResult, IndexStats, KnowledgeIndex, LoadReport, SearchHit, UniquenessReport,
};
pub use item::{Domain, KnowledgeItem};
pub use parser::{parse_domain_document, ParseError, ParsedDocument};
