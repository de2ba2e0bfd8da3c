/*
 * gemtext.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gemella, a Gemini protocol server and client.
 *
 * Gemella is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gemella is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gemella.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Gemtext generation: line-prefix document builder (headings, links, list
//! items, quotes, preformat blocks) and the directory listing emitted by
//! the static file handler.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters encoded inside a listing link target. Spaces would otherwise
/// terminate the link URL token.
const LINK_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'%')
    .add(b';');

/// Line-oriented gemtext document builder.
#[derive(Debug, Default)]
pub struct GemtextBuilder {
    out: String,
}

impl GemtextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Heading at level 1-3 (`#`, `##`, `###`).
    pub fn heading(mut self, level: usize, text: &str) -> Self {
        let level = level.clamp(1, 3);
        for _ in 0..level {
            self.out.push('#');
        }
        self.out.push(' ');
        self.out.push_str(text);
        self.out.push('\n');
        self
    }

    /// `=> url` or `=> url description`. The URL is the first
    /// whitespace-separated token after `=>`.
    pub fn link(mut self, url: &str, description: Option<&str>) -> Self {
        self.out.push_str("=> ");
        self.out.push_str(url);
        if let Some(desc) = description {
            self.out.push(' ');
            self.out.push_str(desc);
        }
        self.out.push('\n');
        self
    }

    /// `* item` list line.
    pub fn list_item(mut self, text: &str) -> Self {
        self.out.push_str("* ");
        self.out.push_str(text);
        self.out.push('\n');
        self
    }

    /// `> quote` line.
    pub fn quote(mut self, text: &str) -> Self {
        self.out.push_str("> ");
        self.out.push_str(text);
        self.out.push('\n');
        self
    }

    /// Preformatted block wrapped in ``` toggles, with optional alt text.
    pub fn preformatted(mut self, alt: Option<&str>, content: &str) -> Self {
        self.out.push_str("```");
        if let Some(alt) = alt {
            self.out.push_str(alt);
        }
        self.out.push('\n');
        self.out.push_str(content);
        if !content.ends_with('\n') {
            self.out.push('\n');
        }
        self.out.push_str("```\n");
        self
    }

    /// Plain text line.
    pub fn text(mut self, line: &str) -> Self {
        self.out.push_str(line);
        self.out.push('\n');
        self
    }

    /// Blank line.
    pub fn blank(mut self) -> Self {
        self.out.push('\n');
        self
    }

    pub fn build(self) -> String {
        self.out
    }
}

/// One entry in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Render a directory listing for `display_path` (the request path).
///
/// Entries are sorted alphabetically; subdirectories link as `./name/`,
/// files as `./name` with the name as description. `../` comes first
/// whenever the listed directory is not the document root.
pub fn directory_listing(display_path: &str, entries: &[ListingEntry], at_root: bool) -> String {
    let mut sorted: Vec<&ListingEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut doc = GemtextBuilder::new()
        .heading(1, &format!("Index of {}", display_path))
        .blank();
    if !at_root {
        doc = doc.link("../", None);
    }
    if sorted.is_empty() {
        return doc.text("Empty directory").build();
    }
    for entry in sorted {
        let encoded = utf8_percent_encode(&entry.name, LINK_ENCODE).to_string();
        if entry.is_dir {
            doc = doc.link(&format!("./{}/", encoded), None);
        } else {
            doc = doc.link(&format!("./{}", encoded), Some(&entry.name));
        }
    }
    doc.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_line_prefixes() {
        let doc = GemtextBuilder::new()
            .heading(2, "Title")
            .link("gemini://example.org/", Some("Example"))
            .list_item("one")
            .quote("said")
            .preformatted(Some("rust"), "fn main() {}")
            .build();
        assert!(doc.contains("## Title\n"));
        assert!(doc.contains("=> gemini://example.org/ Example\n"));
        assert!(doc.contains("* one\n"));
        assert!(doc.contains("> said\n"));
        assert!(doc.contains("```rust\nfn main() {}\n```\n"));
    }

    #[test]
    fn listing_sorted_with_parent_link() {
        let entries = vec![
            ListingEntry {
                name: "zeta.txt".into(),
                is_dir: false,
            },
            ListingEntry {
                name: "alpha".into(),
                is_dir: true,
            },
        ];
        let doc = directory_listing("/sub", &entries, false);
        let parent = doc.find("=> ../").unwrap();
        let alpha = doc.find("=> ./alpha/").unwrap();
        let zeta = doc.find("=> ./zeta.txt zeta.txt").unwrap();
        assert!(parent < alpha && alpha < zeta);
    }

    #[test]
    fn root_listing_has_no_parent_link() {
        let doc = directory_listing("/", &[], true);
        assert!(!doc.contains("=> ../"));
    }

    #[test]
    fn empty_directory_gets_a_notice() {
        let doc = directory_listing("/empty/", &[], false);
        assert!(doc.contains("Empty directory"));
        assert!(doc.contains("=> ../"));
    }

    #[test]
    fn listing_encodes_spaces_in_link_target() {
        let entries = vec![ListingEntry {
            name: "my notes.gmi".into(),
            is_dir: false,
        }];
        let doc = directory_listing("/", &entries, true);
        assert!(doc.contains("=> ./my%20notes.gmi my notes.gmi\n"));
    }
}
