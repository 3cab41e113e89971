//! # Tag Links
//!
//! Registry resolving symbolic tags to the cells that define them.
//!
//! Several cells may define the same tag. Each tag keeps a stack of current
//! definers (most recent last); a reference without a qualifier resolves to
//! the top of that stack.

use crate::primitives::TAG_QUALIFIER;
use crate::{CellId, DataflowError, Tag};
use std::collections::{BTreeMap, BTreeSet};

/// Tag -> definer registry plus the per-tag current-definer stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRegistry {
    /// tag -> every cell defining it
    links: BTreeMap<Tag, BTreeSet<CellId>>,
    /// cell -> every tag it defines
    rev_links: BTreeMap<CellId, BTreeSet<Tag>>,
    /// tag -> current definers, most recent last; each id at most once
    cur_links: BTreeMap<Tag, Vec<CellId>>,
}

impl LinkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.links.clear();
        self.rev_links.clear();
        self.cur_links.clear();
    }

    /// Register `cell` as a definer of `tag`.
    ///
    /// With `make_current`, the cell also becomes the current definer,
    /// moving to the top of the stack if it was already on it.
    pub fn add_link(&mut self, tag: Tag, cell: CellId, make_current: bool) {
        self.links.entry(tag.clone()).or_default().insert(cell);
        self.rev_links.entry(cell).or_default().insert(tag.clone());
        if make_current {
            let stack = self.cur_links.entry(tag).or_default();
            stack.retain(|c| *c != cell);
            stack.push(cell);
        }
    }

    /// Register every declared `(tag, definers)` pair without making any of
    /// them current. Afterwards, a tag from this batch with exactly one
    /// definer and no current link is promoted, since it is unambiguous.
    pub fn add_links(&mut self, output_tags: &BTreeMap<Tag, BTreeSet<CellId>>) {
        let mut new_tags = BTreeSet::new();
        for (tag, cells) in output_tags {
            for cell in cells {
                self.add_link(tag.clone(), *cell, false);
                new_tags.insert(tag);
            }
        }

        for tag in new_tags {
            if self.has_current_link(tag.as_str()) {
                continue;
            }
            let only = match self.links.get(tag) {
                Some(definers) if definers.len() == 1 => definers.first().copied(),
                _ => None,
            };
            if let Some(cell) = only {
                self.cur_links.entry(tag.clone()).or_default().push(cell);
            }
        }
    }

    /// Remove every link defined by `cell`.
    pub fn remove_links(&mut self, cell: CellId) {
        let Some(tags) = self.rev_links.remove(&cell) else {
            return;
        };
        for tag in tags {
            if let Some(stack) = self.cur_links.get_mut(&tag) {
                stack.retain(|c| *c != cell);
                if stack.is_empty() {
                    self.cur_links.remove(&tag);
                }
            }
            if let Some(definers) = self.links.get_mut(&tag) {
                definers.remove(&cell);
                if definers.is_empty() {
                    self.links.remove(&tag);
                }
            }
        }
    }

    // =========================================================================
    // RESOLUTION
    // =========================================================================

    #[must_use]
    pub fn has_current_link(&self, tag: &str) -> bool {
        self.cur_links.get(tag).is_some_and(|stack| !stack.is_empty())
    }

    /// The current definer of `tag`.
    pub fn get_current_link(&self, tag: &str) -> Result<CellId, DataflowError> {
        self.current_stack(tag)
            .last()
            .copied()
            .ok_or_else(|| DataflowError::UndefinedTag(Tag::new(tag)))
    }

    /// True if some current definer of `tag` other than `requester` exists.
    #[must_use]
    pub fn has_external_link(&self, tag: &str, requester: CellId) -> bool {
        self.current_stack(tag).iter().any(|c| *c != requester)
    }

    /// The most recent current definer of `tag` that is not `requester`.
    ///
    /// This lets a cell read a tag it also defines by deferring to another
    /// cell's definition.
    pub fn get_external_link(&self, tag: &str, requester: CellId) -> Result<CellId, DataflowError> {
        let stack = self.current_stack(tag);
        if stack.is_empty() {
            return Err(DataflowError::UndefinedTag(Tag::new(tag)));
        }
        stack
            .iter()
            .rev()
            .find(|c| **c != requester)
            .copied()
            .ok_or_else(|| DataflowError::AmbiguousTag {
                tag: Tag::new(tag),
                requester,
            })
    }

    /// Current definers of `tag`, most recent last.
    #[must_use]
    pub fn current_stack(&self, tag: &str) -> &[CellId] {
        self.cur_links.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every cell defining `tag`.
    #[must_use]
    pub fn definers(&self, tag: &str) -> Option<&BTreeSet<CellId>> {
        self.links.get(tag)
    }

    /// Every tag defined by `cell`.
    #[must_use]
    pub fn tags_of(&self, cell: CellId) -> Option<&BTreeSet<Tag>> {
        self.rev_links.get(&cell)
    }

    /// All registered tags, in order.
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.links.keys()
    }

    // =========================================================================
    // COMPLETION
    // =========================================================================

    /// Completion candidates for a partially typed reference.
    ///
    /// `prefix` is either `tag` or `tag$qualifier`. For every registered tag
    /// starting with the tag part, candidates are the bare tag (only without a
    /// `$`), `tag$name` for every input-tag name mapped to one of the tag's
    /// definers, and `tag$hex` for every definer; qualified candidates must
    /// start with the qualifier. Candidates are returned once each.
    #[must_use]
    pub fn complete(&self, prefix: &str, input_tags: &BTreeMap<String, CellId>) -> Vec<String> {
        let (tag_prefix, qualifier) = match prefix.split_once(TAG_QUALIFIER) {
            Some((tag, qualifier)) => (tag, Some(qualifier)),
            None => (prefix, None),
        };
        let wanted = qualifier.unwrap_or_default();

        let mut seen = BTreeSet::new();
        let mut results = Vec::new();
        let mut emit = |candidate: String| {
            if seen.insert(candidate.clone()) {
                results.push(candidate);
            }
        };

        for (tag, definers) in &self.links {
            if !tag.as_str().starts_with(tag_prefix) {
                continue;
            }
            if qualifier.is_none() {
                emit(tag.to_string());
            }
            for (name, cell) in input_tags {
                if definers.contains(cell) && name.starts_with(wanted) {
                    emit(format!("{tag}{TAG_QUALIFIER}{name}"));
                }
            }
            for cell in definers {
                let hex = cell.to_string();
                if hex.starts_with(wanted) {
                    emit(format!("{tag}{TAG_QUALIFIER}{hex}"));
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_map(entries: &[(&str, &[u64])]) -> BTreeMap<Tag, BTreeSet<CellId>> {
        entries
            .iter()
            .map(|(tag, cells)| (Tag::new(*tag), cells.iter().map(|c| CellId(*c)).collect()))
            .collect()
    }

    #[test]
    fn most_recent_link_is_current() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("t"), CellId(1), true);
        links.add_link(Tag::new("t"), CellId(2), true);

        assert_eq!(links.get_current_link("t"), Ok(CellId(2)));
        assert_eq!(links.get_external_link("t", CellId(2)), Ok(CellId(1)));
        assert_eq!(links.get_external_link("t", CellId(3)), Ok(CellId(2)));
    }

    #[test]
    fn reactivation_moves_cell_to_top() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("t"), CellId(1), true);
        links.add_link(Tag::new("t"), CellId(2), true);
        links.add_link(Tag::new("t"), CellId(1), true);

        assert_eq!(links.current_stack("t"), &[CellId(2), CellId(1)]);
    }

    #[test]
    fn unknown_tag_is_undefined() {
        let links = LinkRegistry::new();
        assert_eq!(
            links.get_current_link("nope"),
            Err(DataflowError::UndefinedTag(Tag::new("nope")))
        );
        assert!(matches!(
            links.get_external_link("nope", CellId(1)),
            Err(DataflowError::UndefinedTag(_))
        ));
    }

    #[test]
    fn self_only_definer_is_ambiguous() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("t"), CellId(4), true);

        assert!(!links.has_external_link("t", CellId(4)));
        assert!(matches!(
            links.get_external_link("t", CellId(4)),
            Err(DataflowError::AmbiguousTag { requester, .. }) if requester == CellId(4)
        ));
    }

    #[test]
    fn add_links_promotes_unambiguous_tags() {
        let mut links = LinkRegistry::new();
        links.add_links(&tag_map(&[("solo", &[1]), ("pair", &[2, 3])]));

        assert_eq!(links.get_current_link("solo"), Ok(CellId(1)));
        assert!(!links.has_current_link("pair"));
        assert_eq!(links.definers("pair").map(BTreeSet::len), Some(2));
    }

    #[test]
    fn add_links_keeps_existing_current_link() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("t"), CellId(1), true);
        links.remove_links(CellId(1));
        links.add_link(Tag::new("t"), CellId(5), true);

        links.add_links(&tag_map(&[("t", &[5])]));
        assert_eq!(links.current_stack("t"), &[CellId(5)]);
    }

    #[test]
    fn remove_links_prunes_everything() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("a"), CellId(1), true);
        links.add_link(Tag::new("b"), CellId(1), false);
        links.add_link(Tag::new("a"), CellId(2), true);

        links.remove_links(CellId(1));
        assert_eq!(links.current_stack("a"), &[CellId(2)]);
        assert!(links.definers("b").is_none());
        assert!(links.tags_of(CellId(1)).is_none());

        links.remove_links(CellId(2));
        assert_eq!(links, LinkRegistry::new());
    }

    #[test]
    fn complete_bare_prefix() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("total"), CellId(0x1a), true);
        links.add_link(Tag::new("other"), CellId(2), true);

        let input_tags = BTreeMap::from([("sums".to_string(), CellId(0x1a))]);
        assert_eq!(
            links.complete("to", &input_tags),
            vec!["total", "total$sums", "total$1a"]
        );
    }

    #[test]
    fn complete_with_qualifier() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("x"), CellId(0x1a), true);
        links.add_link(Tag::new("x"), CellId(0x2b), true);

        let none = BTreeMap::new();
        assert_eq!(links.complete("x$2", &none), vec!["x$2b"]);
        assert_eq!(links.complete("x$", &none), vec!["x$1a", "x$2b"]);
    }

    #[test]
    fn complete_never_duplicates() {
        let mut links = LinkRegistry::new();
        links.add_link(Tag::new("x"), CellId(0xa), true);

        // An input-tag name that equals the hex id would otherwise repeat.
        let input_tags = BTreeMap::from([("a".to_string(), CellId(0xa))]);
        assert_eq!(links.complete("x", &input_tags), vec!["x", "x$a"]);
    }
}
