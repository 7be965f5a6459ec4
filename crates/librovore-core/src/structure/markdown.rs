//! HTML to Markdown conversion as a structured DOM walk.
//!
//! Preserves headings (ATX), emphasis, lists, links, inline code, and fenced
//! code blocks carrying a detected language. Chrome elements (navigation,
//! sidebars, permalink anchors) are filtered out during the walk by a
//! caller-supplied predicate, and code-block language detection is delegated
//! to a caller-supplied hook because every documentation generator encodes
//! the language differently.

use scraper::{ElementRef, Node};

/// Hooks specializing the conversion for one documentation generator.
pub struct MarkdownConverter<'a> {
    /// Elements for which this returns `true` are dropped with their
    /// subtree.
    pub skip: &'a dyn Fn(&ElementRef<'_>) -> bool,
    /// Detect the fence language for a `<pre>` element.
    pub code_language: &'a dyn Fn(&ElementRef<'_>) -> Option<String>,
}

fn never_skip(_: &ElementRef<'_>) -> bool {
    false
}

fn no_language(_: &ElementRef<'_>) -> Option<String> {
    None
}

impl Default for MarkdownConverter<'static> {
    fn default() -> Self {
        Self {
            skip: &never_skip,
            code_language: &no_language,
        }
    }
}

impl MarkdownConverter<'_> {
    /// Convert an element subtree to Markdown.
    #[must_use]
    pub fn convert(&self, root: ElementRef<'_>) -> String {
        let mut writer = Writer::default();
        self.walk_block(root, &mut writer, 0);
        writer.finish()
    }

    fn walk_block(&self, el: ElementRef<'_>, writer: &mut Writer, list_depth: usize) {
        if (self.skip)(&el) {
            return;
        }
        match el.value().name() {
            "script" | "style" | "template" | "nav" | "noscript" => {},
            "h1" => writer.block(&format!("# {}", self.inline(el))),
            "h2" => writer.block(&format!("## {}", self.inline(el))),
            "h3" => writer.block(&format!("### {}", self.inline(el))),
            "h4" => writer.block(&format!("#### {}", self.inline(el))),
            "h5" => writer.block(&format!("##### {}", self.inline(el))),
            "h6" => writer.block(&format!("###### {}", self.inline(el))),
            "p" => writer.block(&self.inline(el)),
            "pre" => {
                let code = code_text(el);
                if !code.trim().is_empty() {
                    let lang = (self.code_language)(&el).unwrap_or_default();
                    writer.block(&format!("```{lang}\n{}\n```", code.trim_end()));
                }
            },
            "ul" | "ol" => self.walk_list(el, writer, list_depth),
            "blockquote" => {
                let inner = self.convert_children(el);
                let quoted: Vec<String> =
                    inner.lines().map(|line| format!("> {line}")).collect();
                writer.block(&quoted.join("\n"));
            },
            "dt" => writer.block(&format!("**{}**", self.inline(el))),
            "dd" => {
                let indented: Vec<String> = self
                    .convert_children(el)
                    .lines()
                    .map(|line| format!("  {line}"))
                    .collect();
                writer.block(&indented.join("\n"));
            },
            "table" => self.walk_table(el, writer),
            "br" | "hr" => {},
            _ => self.walk_container(el, writer, list_depth),
        }
    }

    /// Descend into a container, flushing loose inline runs as paragraphs.
    fn walk_container(&self, el: ElementRef<'_>, writer: &mut Writer, list_depth: usize) {
        let mut run = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => run.push_str(text),
                Node::Element(element) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        if is_inline(element.name()) {
                            run.push_str(&self.inline_one(child_el));
                        } else {
                            writer.block(collapse_whitespace(&run).trim());
                            run.clear();
                            self.walk_block(child_el, writer, list_depth);
                        }
                    }
                },
                _ => {},
            }
        }
        writer.block(collapse_whitespace(&run).trim());
    }

    /// Block conversion of an element's children into a fresh buffer.
    fn convert_children(&self, el: ElementRef<'_>) -> String {
        let mut writer = Writer::default();
        self.walk_container(el, &mut writer, 0);
        writer.finish()
    }

    fn walk_list(&self, el: ElementRef<'_>, writer: &mut Writer, depth: usize) {
        if depth == 0 {
            writer.end_block();
        }
        let ordered = el.value().name() == "ol";
        let indent = "  ".repeat(depth);
        let mut index = 0usize;
        for item in el.children().filter_map(ElementRef::wrap) {
            if item.value().name() != "li" || (self.skip)(&item) {
                continue;
            }
            index += 1;
            let marker = if ordered {
                format!("{index}. ")
            } else {
                "- ".to_string()
            };
            let mut line = String::new();
            let mut nested: Vec<ElementRef<'_>> = Vec::new();
            for child in item.children() {
                match child.value() {
                    Node::Text(text) => line.push_str(text),
                    Node::Element(element) => {
                        if let Some(child_el) = ElementRef::wrap(child) {
                            if matches!(element.name(), "ul" | "ol") {
                                nested.push(child_el);
                            } else if is_inline(element.name()) || element.name() == "p" {
                                line.push_str(&self.inline_one(child_el));
                            } else {
                                line.push_str(&self.inline(child_el));
                            }
                        }
                    },
                    _ => {},
                }
            }
            let line = collapse_whitespace(&line);
            if !line.is_empty() {
                writer.line(&format!("{indent}{marker}{line}"));
            }
            for sublist in nested {
                self.walk_list(sublist, writer, depth + 1);
            }
        }
        writer.end_block();
    }

    fn walk_table(&self, el: ElementRef<'_>, writer: &mut Writer) {
        let mut rows: Vec<Vec<String>> = Vec::new();
        collect_rows(el, &mut rows, self);
        if rows.is_empty() {
            return;
        }
        let mut lines = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            lines.push(format!("| {} |", row.join(" | ")));
            if i == 0 {
                lines.push(format!(
                    "| {} |",
                    row.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
                ));
            }
        }
        writer.block(&lines.join("\n"));
    }

    /// Inline rendering of an element's children.
    fn inline(&self, el: ElementRef<'_>) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        out.push_str(&self.inline_one(child_el));
                    }
                },
                _ => {},
            }
        }
        collapse_whitespace(&out)
    }

    /// Inline rendering of one element, markers included.
    fn inline_one(&self, el: ElementRef<'_>) -> String {
        if (self.skip)(&el) {
            return String::new();
        }
        match el.value().name() {
            "em" | "i" => format!("*{}*", self.inline(el)),
            "strong" | "b" => format!("**{}**", self.inline(el)),
            "code" => {
                let text: String = el.text().collect();
                if text.is_empty() {
                    String::new()
                } else {
                    format!("`{text}`")
                }
            },
            "a" => {
                let text = self.inline(el);
                match el.value().attr("href") {
                    Some(href) if !text.is_empty() => format!("[{text}]({href})"),
                    _ => text,
                }
            },
            "br" => HARD_BREAK.to_string(),
            "script" | "style" | "template" => String::new(),
            _ => self.inline(el),
        }
    }
}

#[derive(Default)]
struct Writer {
    out: String,
}

impl Writer {
    /// Append a block, separated from the previous one by a blank line.
    fn block(&mut self, text: &str) {
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        self.end_block();
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Append a single line within the current block.
    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn end_block(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn finish(self) -> String {
        self.out.trim().to_string()
    }
}

fn collect_rows(el: ElementRef<'_>, rows: &mut Vec<Vec<String>>, conv: &MarkdownConverter<'_>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => {
                let cells: Vec<String> = child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| matches!(c.value().name(), "td" | "th"))
                    .map(|c| conv.inline(c))
                    .collect();
                if !cells.is_empty() {
                    rows.push(cells);
                }
            },
            "thead" | "tbody" | "tfoot" => collect_rows(child, rows, conv),
            _ => {},
        }
    }
}

/// Raw text of a code block, preserving newlines.
fn code_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

fn is_inline(tag: &str) -> bool {
    matches!(
        tag,
        "a" | "abbr"
            | "b"
            | "br"
            | "cite"
            | "code"
            | "em"
            | "i"
            | "kbd"
            | "mark"
            | "q"
            | "s"
            | "small"
            | "span"
            | "strong"
            | "sub"
            | "sup"
            | "u"
            | "var"
    )
}

/// Placeholder emitted for `<br>` so explicit breaks survive whitespace
/// collapsing while source-formatting newlines do not.
const HARD_BREAK: char = '\u{E000}';

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim_matches(' ').replace(HARD_BREAK, "\n")
}

/// Class suffix after `prefix` on the element itself.
#[must_use]
pub fn element_class_suffix(el: &ElementRef<'_>, prefix: &str) -> Option<String> {
    el.value()
        .classes()
        .find_map(|class| class.strip_prefix(prefix).map(ToString::to_string))
        .filter(|suffix| !suffix.is_empty())
}

/// Class suffix after `prefix` on the nearest ancestor carrying one.
#[must_use]
pub fn ancestor_class_suffix(el: &ElementRef<'_>, prefix: &str) -> Option<String> {
    let mut current = el.parent();
    while let Some(node) = current {
        if let Some(parent_el) = ElementRef::wrap(node) {
            if let Some(suffix) = element_class_suffix(&parent_el, prefix) {
                return Some(suffix);
            }
        }
        current = node.parent();
    }
    None
}

/// Whether the element carries the given class.
#[must_use]
pub fn has_class(el: &ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}
