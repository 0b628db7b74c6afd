use std::sync::{Arc, LazyLock};

use base64::prelude::{BASE64_STANDARD, Engine as _};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::AttachmentCache;
use crate::domain::ticket::{AttachmentBlob, AttachmentRef, TicketId, find_attachment};
use crate::error::{AppError, AppResult};
use crate::panel::markup::render_blocks;
use crate::panel::node::{Element, Fragment, Node};
use crate::services::IssueTrackerService;

static EMBED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!(?P<file>[^!|\s][^!|\n]*)\|(?P<params>[^!\n]*)!").expect("embed pattern")
});

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Embed<'a> {
    filename: &'a str,
    params: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Embeds(Vec<Embed<'a>>),
}

pub struct ContentRenderer {
    issue_tracker: Arc<dyn IssueTrackerService>,
    blobs: Mutex<AttachmentCache>,
}

impl ContentRenderer {
    pub fn new(issue_tracker: Arc<dyn IssueTrackerService>) -> Self {
        Self {
            issue_tracker,
            blobs: Mutex::new(AttachmentCache::new()),
        }
    }

    /// Renders `raw` for the ticket `scope`. Never fails: an embed that cannot
    /// be resolved becomes an inline error placeholder.
    pub async fn render(&self, scope: &TicketId, raw: &str, attachments: &[AttachmentRef]) -> Fragment {
        let mut nodes = Vec::new();
        for segment in split_segments(raw) {
            match segment {
                Segment::Text(text) => nodes.extend(render_blocks(text)),
                Segment::Embeds(embeds) if embeds.len() == 1 => {
                    nodes.push(self.embed_node(scope, &embeds[0], attachments).await);
                }
                Segment::Embeds(embeds) => {
                    let mut slides = Vec::with_capacity(embeds.len());
                    for embed in &embeds {
                        slides.push(self.embed_node(scope, embed, attachments).await);
                    }
                    nodes.push(slider(slides));
                }
            }
        }
        Fragment(nodes)
    }

    pub async fn evict_scope(&self, scope: &TicketId) {
        self.blobs.lock().await.evict_scope(scope);
    }

    pub async fn clear(&self) {
        self.blobs.lock().await.clear();
    }

    async fn embed_node(&self, scope: &TicketId, embed: &Embed<'_>, attachments: &[AttachmentRef]) -> Node {
        match self.resolve_embed(scope, embed, attachments).await {
            Ok(node) => node,
            Err(error) => {
                warn!(ticket = %scope, file = embed.filename, error = %error, "failed to render attachment");
                error_placeholder(embed.filename)
            }
        }
    }

    async fn resolve_embed(
        &self,
        scope: &TicketId,
        embed: &Embed<'_>,
        attachments: &[AttachmentRef],
    ) -> AppResult<Node> {
        let attachment = find_attachment(attachments, embed.filename).ok_or_else(|| {
            AppError::Render(format!("attachment not found: {}", embed.filename))
        })?;
        let blob = self.fetch_blob(scope, attachment).await?;
        Ok(attachment_element(embed, &blob))
    }

    async fn fetch_blob(&self, scope: &TicketId, attachment: &AttachmentRef) -> AppResult<Arc<AttachmentBlob>> {
        if let Some(blob) = self.blobs.lock().await.get(scope, &attachment.id) {
            debug!(ticket = %scope, attachment = %attachment.id, "attachment served from cache");
            return Ok(blob);
        }
        let blob = Arc::new(self.issue_tracker.resolve_attachment(&attachment.id).await?);
        self.blobs
            .lock()
            .await
            .insert(scope.clone(), attachment.id.clone(), Arc::clone(&blob));
        Ok(blob)
    }
}

fn split_segments(raw: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut group: Vec<Embed<'_>> = Vec::new();
    let mut last = 0;

    for captures in EMBED.captures_iter(raw) {
        let (Some(whole), Some(file), Some(params)) =
            (captures.get(0), captures.name("file"), captures.name("params"))
        else {
            continue;
        };
        let between = &raw[last..whole.start()];
        if !between.trim().is_empty() {
            if !group.is_empty() {
                segments.push(Segment::Embeds(std::mem::take(&mut group)));
            }
            segments.push(Segment::Text(between));
        }
        group.push(Embed {
            filename: file.as_str(),
            params: params.as_str(),
        });
        last = whole.end();
    }

    if !group.is_empty() {
        segments.push(Segment::Embeds(group));
    }
    let tail = &raw[last..];
    if !tail.trim().is_empty() {
        segments.push(Segment::Text(tail));
    }
    segments
}

fn embed_params(params: &str) -> Vec<(&str, &str)> {
    params
        .split(',')
        .filter_map(|param| param.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .collect()
}

fn extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

fn video_mime(ext: &str) -> String {
    match ext {
        "mp4" => "video/mp4".to_string(),
        "mov" => "video/quicktime".to_string(),
        "avi" => "video/x-msvideo".to_string(),
        other => format!("video/{other}"),
    }
}

fn data_url(blob: &AttachmentBlob, fallback_mime: &str) -> String {
    let mime = blob.content_type.as_deref().unwrap_or(fallback_mime);
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(&blob.bytes))
}

fn attachment_element(embed: &Embed<'_>, blob: &AttachmentBlob) -> Node {
    let ext = extension(embed.filename);
    let container = Element::new("div").class("attachment-container");

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        let src = data_url(blob, &format!("image/{ext}"));
        let mut img = Element::new("img")
            .class("attachment-preview")
            .attr("src", src.clone())
            .attr("alt", embed.filename);
        for (key, value) in embed_params(embed.params) {
            if key == "width" || key == "height" {
                img = img.attr(key, value);
            }
        }
        return container.child(img).child(expand_button(&src)).into();
    }

    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        let mime = video_mime(&ext);
        let src = data_url(blob, &mime);
        let video = Element::new("video")
            .attr("controls", "controls")
            .attr("preload", "metadata")
            .child(Element::new("source").attr("src", src.clone()).attr("type", mime));
        return container
            .child(Element::new("div").class("video-container").child(video))
            .child(expand_button(&src))
            .into();
    }

    let href = data_url(blob, "application/octet-stream");
    container
        .child(
            Element::new("a")
                .class("attachment-link")
                .attr("href", href)
                .attr("download", embed.filename)
                .child(Element::new("span").class("attachment-icon").text("\u{1F4CE}"))
                .text(embed.filename),
        )
        .into()
}

fn expand_button(src: &str) -> Element {
    Element::new("button")
        .class("expand-btn")
        .attr("title", "View full size")
        .attr("data-src", src)
        .text("Expand")
}

fn error_placeholder(filename: &str) -> Node {
    Element::new("span")
        .class("error")
        .text(format!("Error loading attachment: {filename}"))
        .into()
}

fn slider(slides: Vec<Node>) -> Node {
    let count = slides.len();
    let header = Element::new("div")
        .class("attachment-header")
        .child(Element::new("div").class("attachment-title").text("Attachments"))
        .child(
            Element::new("div")
                .class("attachment-nav")
                .child(
                    Element::new("button")
                        .class("nav-button prev")
                        .attr("title", "Previous")
                        .text("Prev"),
                )
                .child(
                    Element::new("button")
                        .class("nav-button next")
                        .attr("title", "Next")
                        .text("Next"),
                ),
        );
    let track = Element::new("div")
        .class("attachment-slider")
        .attr("data-slide-count", count.to_string())
        .children(slides.into_iter().enumerate().map(|(index, slide)| {
            Element::new("div")
                .class("attachment-slide")
                .attr("data-index", index.to_string())
                .child(slide)
                .into()
        }));

    Element::new("div")
        .class("slider-container")
        .child(
            Element::new("div")
                .class("attachment-wrapper")
                .child(header)
                .child(track),
        )
        .into()
}
