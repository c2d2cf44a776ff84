//! Trophy definition XML (TROPCONF.SFM).
//!
//! The file is a `<trophyconf>` document carrying the set's NPCommID, the
//! game title, DLC groups, and one `<trophy>` element per item. Display
//! text may repeat per language as `lang`-attributed siblings; the
//! requested language falls back to the untagged default element.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use tracing::debug;

use questlog_core::models::TrophyTier;

use crate::error::{FormatError, Result};
use crate::trophy::Trophy;

/// Parsed `<trophyconf>` document with trophies in ascending id order.
#[derive(Debug, Clone)]
pub struct TrophyDefinition {
    pub npcommid: Option<String>,
    pub title_name: Option<String>,
    pub trophies: Vec<Trophy>,
}

/// Parse a definition document, selecting `language`-tagged text where
/// present. Malformed trophy elements are skipped, not fatal.
pub fn parse_definition(xml: &str, language: Option<&str>) -> Result<TrophyDefinition> {
    let doc = Document::parse(xml)
        .map_err(|e| FormatError::invalid("trophy definition", e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "trophyconf" {
        return Err(FormatError::invalid(
            "trophy definition",
            format!("unexpected root element <{}>", root.tag_name().name()),
        ));
    }

    let npcommid = child_text(root, "npcommid");
    let title_name = localized_text(root, "title-name", language);

    // DLC groups; trophies reference them by gid.
    let mut group_names: HashMap<String, String> = HashMap::new();
    for group in elements(root, "group") {
        let Some(id) = group.attribute("id") else {
            continue;
        };
        if let Some(name) = localized_text(group, "name", language) {
            group_names.insert(id.to_string(), name);
        }
    }

    let mut trophies = Vec::new();
    for node in elements(root, "trophy") {
        let id = match node.attribute("id").map(str::parse::<i32>) {
            Some(Ok(id)) if id >= 0 => id,
            other => {
                debug!("trophy definition: skipping trophy with id {other:?}");
                continue;
            }
        };
        let tier = match node.attribute("ttype").and_then(TrophyTier::from_type_code) {
            Some(tier) => tier,
            None => {
                debug!("trophy definition: trophy {id} has no usable ttype");
                continue;
            }
        };

        let group_id = node.attribute("gid").map(str::to_string);
        let group_name = group_id
            .as_ref()
            .and_then(|gid| group_names.get(gid).cloned());

        trophies.push(Trophy {
            id,
            tier,
            hidden: matches!(node.attribute("hidden"), Some(v) if v.eq_ignore_ascii_case("yes")),
            name: localized_text(node, "name", language).unwrap_or_default(),
            detail: localized_text(node, "detail", language).unwrap_or_default(),
            group_id,
            group_name,
            unlocked: false,
            unlock_time: None,
        });
    }
    trophies.sort_by_key(|t| t.id);

    Ok(TrophyDefinition {
        npcommid,
        title_name,
        trophies,
    })
}

fn elements<'a, 'input>(
    parent: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    parent
        .children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

fn child_text(parent: Node, name: &str) -> Option<String> {
    elements(parent, name)
        .next()
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Pick the `lang`-tagged variant of a repeated child element, falling back
/// to the untagged default.
fn localized_text(parent: Node, name: &str, language: Option<&str>) -> Option<String> {
    let mut fallback = None;
    for node in elements(parent, name) {
        let text = node.text().map(str::trim).filter(|t| !t.is_empty());
        match node.attribute("lang") {
            Some(lang) => {
                if language.is_some_and(|want| lang.eq_ignore_ascii_case(want)) {
                    if let Some(text) = text {
                        return Some(text.to_string());
                    }
                }
            }
            None => {
                if fallback.is_none() {
                    fallback = text.map(str::to_string);
                }
            }
        }
    }
    fallback
}
