//! Section extraction for combined export documents.
//!
//! A combined export concatenates one delimited table per entity type, each
//! introduced by a marker line (`=== CLIENTS ===`). Everything before the
//! first marker is unrecognized preamble and discarded; every other line
//! belongs to exactly one section.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn marker_pattern() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^===\s*(.+?)\s*===\s*$").expect("valid marker pattern"))
}

/// Canonical form of a section tag: uppercase, inner whitespace collapsed.
pub fn canonical_tag(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Named raw-text blocks in encounter order. Duplicate tags are concatenated,
/// not overwritten.
#[derive(Debug, Default)]
pub struct SectionMap {
    order: Vec<String>,
    blocks: HashMap<String, String>,
}

impl SectionMap {
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.blocks.get(&canonical_tag(tag)).map(String::as_str)
    }

    /// Section tags in first-encounter order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Append a block of text to a section, creating it if needed.
    pub fn insert_block(&mut self, tag: &str, block: &str) {
        let tag = canonical_tag(tag);
        if !self.blocks.contains_key(&tag) {
            self.order.push(tag.clone());
            self.blocks.insert(tag.clone(), String::new());
        }
        if let Some(existing) = self.blocks.get_mut(&tag) {
            existing.push_str(block);
            if !block.ends_with('\n') {
                existing.push('\n');
            }
        }
    }

    fn ensure(&mut self, tag: &str) {
        if !self.blocks.contains_key(tag) {
            self.order.push(tag.to_string());
            self.blocks.insert(tag.to_string(), String::new());
        }
    }
}

/// Split a document into sections on `=== NAME ===` marker lines.
pub fn split_sections(document: &str) -> SectionMap {
    let mut sections = SectionMap::default();
    let mut current: Option<String> = None;

    for line in document.lines() {
        if let Some(caps) = marker_pattern().captures(line) {
            let tag = canonical_tag(&caps[1]);
            sections.ensure(&tag);
            current = Some(tag);
        } else if let Some(tag) = &current {
            sections.insert_block(tag, line);
        }
    }

    log::debug!("extracted {} sections", sections.len());
    sections
}
