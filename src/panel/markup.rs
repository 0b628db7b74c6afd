//! Block and inline transform for the text between embeds.
//!
//! Handles the subset of markdown and tracker wiki syntax tickets actually
//! use: headings (`#` and `h1.`), bullet and numbered lists, quotes, rules,
//! fenced code, `[text|url]` and `[text](url)` links, `[tag]selector[/tag]`
//! cross-references, bold and inline code. Everything else is plain text.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::panel::node::{Element, Node};

static INLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\[tag\](?P<tag>.*?)\[/tag\]",
        r"|\[(?P<wtext>[^\]|\[]+)\|(?P<wurl>[^\]]+)\]",
        r"|\[(?P<mtext>[^\]\[]+)\]\((?P<murl>[^)\s]+)\)",
        r"|\*\*(?P<strong>[^*]+)\*\*",
        r"|\*(?P<bold>[^*\s][^*]*)\*",
        r"|`(?P<code>[^`]+)`",
        r"|\{\{(?P<mono>[^}]+)\}\}",
    ))
    .expect("inline markup pattern")
});

pub fn render_blocks(input: &str) -> Vec<Node> {
    let mut blocks = BlockBuilder::default();
    let mut code: Option<Vec<&str>> = None;

    for raw_line in input.lines() {
        let line = raw_line.trim_end_matches('\r');
        let trimmed = line.trim();

        if trimmed.starts_with("```") || trimmed.starts_with("{code") {
            match code.take() {
                Some(lines) => blocks.push(
                    Element::new("pre")
                        .child(Element::new("code").text(lines.join("\n")))
                        .into(),
                ),
                None => {
                    blocks.flush();
                    code = Some(Vec::new());
                }
            }
            continue;
        }

        if let Some(lines) = code.as_mut() {
            lines.push(line);
            continue;
        }

        if trimmed.is_empty() {
            blocks.flush();
            continue;
        }

        if matches!(trimmed, "---" | "***" | "___" | "----") {
            blocks.push(Element::new("hr").into());
            continue;
        }

        if let Some((level, text)) = split_heading(trimmed) {
            blocks.push(
                Element::new(HEADING_TAGS[level - 1])
                    .children(render_inline(text))
                    .into(),
            );
            continue;
        }

        if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| trimmed.strip_prefix("+ "))
        {
            blocks.list_item(false, item);
            continue;
        }

        if let Some(item) = split_numbered_item(trimmed) {
            blocks.list_item(true, item);
            continue;
        }

        if let Some(quote) = trimmed.strip_prefix("> ").or_else(|| trimmed.strip_prefix("bq. ")) {
            blocks.push(
                Element::new("blockquote")
                    .children(render_inline(quote))
                    .into(),
            );
            continue;
        }

        blocks.paragraph_line(trimmed);
    }

    if let Some(lines) = code {
        blocks.push(
            Element::new("pre")
                .child(Element::new("code").text(lines.join("\n")))
                .into(),
        );
    }
    blocks.finish()
}

const HEADING_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

#[derive(Default)]
struct BlockBuilder<'a> {
    out: Vec<Node>,
    paragraph: Vec<&'a str>,
    list: Option<(bool, Vec<&'a str>)>,
}

impl<'a> BlockBuilder<'a> {
    fn push(&mut self, node: Node) {
        self.flush();
        self.out.push(node);
    }

    fn paragraph_line(&mut self, line: &'a str) {
        self.flush_list();
        self.paragraph.push(line);
    }

    fn list_item(&mut self, ordered: bool, item: &'a str) {
        self.flush_paragraph();
        if self.list.as_ref().is_some_and(|(kind, _)| *kind != ordered) {
            self.flush_list();
        }
        self.list
            .get_or_insert_with(|| (ordered, Vec::new()))
            .1
            .push(item);
    }

    fn flush(&mut self) {
        self.flush_paragraph();
        self.flush_list();
    }

    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let mut p = Element::new("p");
        for (index, line) in self.paragraph.drain(..).enumerate() {
            if index > 0 {
                p = p.child(Element::new("br"));
            }
            p = p.children(render_inline(line));
        }
        self.out.push(p.into());
    }

    fn flush_list(&mut self) {
        let Some((ordered, items)) = self.list.take() else {
            return;
        };
        let list = Element::new(if ordered { "ol" } else { "ul" }).children(
            items
                .into_iter()
                .map(|item| Element::new("li").children(render_inline(item)).into()),
        );
        self.out.push(list.into());
    }

    fn finish(mut self) -> Vec<Node> {
        self.flush();
        self.out
    }
}

fn split_heading(line: &str) -> Option<(usize, &str)> {
    if let Some(rest) = line.strip_prefix('h') {
        let mut chars = rest.chars();
        if let (Some(digit), Some('.')) = (chars.next(), chars.next()) {
            if let Some(level) = digit.to_digit(10).filter(|l| (1..=6).contains(l)) {
                let text = rest[2..].trim_start();
                if !text.is_empty() {
                    return Some((level as usize, text));
                }
            }
        }
        return None;
    }

    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let text = &line[level..];
    if !text.starts_with(' ') {
        return None;
    }
    Some((level, text.trim_start())).filter(|(_, text)| !text.is_empty())
}

fn split_numbered_item(line: &str) -> Option<&str> {
    let dot_idx = line.find(". ")?;
    if dot_idx == 0 || !line[..dot_idx].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(&line[dot_idx + 2..])
}

pub fn render_inline(input: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut last = 0;

    for captures in INLINE.captures_iter(input) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() > last {
            nodes.push(Node::text(&input[last..whole.start()]));
        }
        nodes.push(inline_node(&captures, whole.as_str()));
        last = whole.end();
    }

    if last < input.len() {
        nodes.push(Node::text(&input[last..]));
    }
    nodes
}

fn inline_node(captures: &Captures<'_>, whole: &str) -> Node {
    if let Some(selector) = captures.name("tag") {
        let selector = selector.as_str().trim();
        if selector.is_empty() {
            return Node::text(whole);
        }
        return Element::new("span")
            .class("tag-reference")
            .attr("data-selector", selector)
            .text(selector)
            .into();
    }
    if let (Some(text), Some(url)) = (captures.name("wtext"), captures.name("wurl")) {
        return link(text.as_str(), url.as_str().trim(), whole);
    }
    if let (Some(text), Some(url)) = (captures.name("mtext"), captures.name("murl")) {
        return link(text.as_str(), url.as_str(), whole);
    }
    if let Some(inner) = captures.name("strong").or_else(|| captures.name("bold")) {
        return Element::new("strong")
            .children(render_inline(inner.as_str()))
            .into();
    }
    if let Some(code) = captures.name("code").or_else(|| captures.name("mono")) {
        return Element::new("code").text(code.as_str()).into();
    }
    Node::text(whole)
}

fn link(text: &str, url: &str, whole: &str) -> Node {
    if url.to_ascii_lowercase().starts_with("javascript:") {
        return Node::text(whole);
    }
    let anchor = Element::new("a").attr("href", url);
    let anchor = if url.starts_with("mailto:") {
        anchor
    } else {
        anchor.attr("target", "_blank")
    };
    anchor.text(text).into()
}
