use std::borrow::Cow;
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};

use super::{MarkdownDocument, Segment};

const BLANK_LINE: &str = "\n\n";
const RULE: &str = "\n\n-----\n\n";

/// A construct that has been opened in the markup and still owes closing text.
///
/// The sum of [`Open::closer_len`] over the stack is reserved in every
/// segment so that closing markers never push a segment past the limit.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Open {
    Paragraph,
    Emphasis(&'static str),
    Anchor { href: String },
    Heading(usize),
    List { ordered: bool },
    Item,
    Table,
    Row,
}

impl Open {
    fn closer_len(&self) -> usize {
        match self {
            Open::Paragraph | Open::List { .. } | Open::Row => 2,
            // marker plus the space moved out from inside the span
            Open::Emphasis(marker) => marker.len() + 1,
            Open::Anchor { href } => href.chars().count() + 3,
            Open::Heading(level) => level + 3,
            Open::Item | Open::Table => 1,
        }
    }
}

/// Converts a fragment of feed markup into length-bounded markdown segments.
///
/// The scan is a single pass over the `quick-xml` event stream. Each tag in
/// the supported vocabulary maps to a fixed insertion at open and/or close;
/// unknown tags are logged and skipped. Malformed markup never fails the
/// call: unmatched closing tags are ignored, and if the tokenizer gives up
/// the remaining input is emitted as plain text.
///
/// A segment is closed before a run of text that would not fit. Open markers
/// that have no content yet (a list bullet, an emphasis marker, a heading
/// prefix) and a partially written table row travel to the next segment with
/// the text, so constructs are never split across posts. A single text run
/// longer than `max_segment_length` is kept whole in an oversized segment.
pub fn transcode(markup: &str, max_segment_length: usize) -> MarkdownDocument {
    let mut state = Transcoder::new(max_segment_length.max(1));

    let mut reader = Reader::from_str(markup);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.trim_text(false);
    }

    loop {
        match reader.read_event() {
            // `a < b` or `<3` in prose is read as a start tag; keep it as text.
            Ok(Event::Start(e)) if !is_element(&e) => state.data(&literal_tag(&e, ">")),
            Ok(Event::Empty(e)) if !is_element(&e) => state.data(&literal_tag(&e, "/>")),
            Ok(Event::Start(e)) => state.start(&e),
            Ok(Event::Empty(e)) => {
                state.start(&e);
                state.end(&tag_name(e.name().as_ref()));
            }
            Ok(Event::End(e)) => state.end(&tag_name(e.name().as_ref())),
            Ok(Event::Text(e)) => {
                let raw = String::from_utf8_lossy(&e);
                state.data(&unescape_lenient(&raw));
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                state.data(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                let position = usize::try_from(reader.error_position()).unwrap_or(markup.len());
                tracing::warn!(error = %e, position, "Markup tokenizer stopped, keeping the rest as text");
                if let Some(rest) = markup.get(position..) {
                    state.data(rest);
                }
                break;
            }
        }
    }

    state.finish()
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn is_element(e: &BytesStart<'_>) -> bool {
    e.name().as_ref().first().is_some_and(u8::is_ascii_alphabetic)
}

/// The tag's source text, with entities resolved like any other text run.
fn literal_tag(e: &BytesStart<'_>, close: &str) -> String {
    let raw = format!("<{}{close}", String::from_utf8_lossy(e));
    unescape_lenient(&raw).into_owned()
}

fn emphasis_marker(tag: &str) -> Option<&'static str> {
    match tag {
        "em" | "i" => Some("*"),
        "strong" | "b" => Some("**"),
        "strike" | "s" | "del" => Some("~~"),
        _ => None,
    }
}

fn heading_level(tag: &str) -> Option<usize> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// HTML entities seen in feed content beyond the five XML builtins.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "nbsp" => Some(" "),
        "bull" => Some("*"),
        "hellip" => Some("..."),
        "mdash" => Some("\u{2014}"),
        "ndash" => Some("\u{2013}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201c}"),
        "rdquo" => Some("\u{201d}"),
        "copy" => Some("\u{a9}"),
        "reg" => Some("\u{ae}"),
        "trade" => Some("\u{2122}"),
        _ => quick_xml::escape::resolve_predefined_entity(entity),
    }
}

fn entity_pattern() -> &'static Regex {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    ENTITY.get_or_init(|| {
        Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[A-Za-z][A-Za-z0-9]{0,31});")
            .unwrap_or_else(|e| panic!("invalid entity pattern: {e}"))
    })
}

/// Resolves entities one by one. Unknown ones stay as written.
fn unescape_lenient(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    entity_pattern().replace_all(raw, |caps: &Captures<'_>| {
        resolve_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
}

fn resolve_entity(name: &str) -> Option<String> {
    let Some(number) = name.strip_prefix('#') else {
        return resolve_html_entity(name).map(str::to_string);
    };
    let code = match number.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => number.parse().ok()?,
    };
    char::from_u32(code).map(String::from)
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.html_attributes()
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(name))
        .map(|attr| unescape_lenient(&String::from_utf8_lossy(&attr.value)).into_owned())
}

/// Scan state for one `transcode` call.
struct Transcoder {
    max: usize,
    done: Vec<String>,
    current: String,
    /// Length of `current` in chars.
    current_len: usize,
    stack: Vec<Open>,
    /// Byte offset in `current` where open markers with no content yet begin.
    carry_from: Option<usize>,
    /// Byte offset in `current` where the table row being written begins.
    row_start: Option<usize>,
    /// Header separator cells collected while writing a table's first row.
    header: String,
    first_row: bool,
    /// Left-trim the next text run (it directly follows an opening marker).
    trim_next: bool,
}

impl Transcoder {
    fn new(max: usize) -> Self {
        Self {
            max,
            done: Vec::new(),
            current: String::new(),
            current_len: 0,
            stack: Vec::new(),
            carry_from: None,
            row_start: None,
            header: String::new(),
            first_row: false,
            trim_next: false,
        }
    }

    fn in_table(&self) -> bool {
        self.stack.contains(&Open::Table)
    }

    fn in_anchor(&self) -> bool {
        self.stack.iter().any(|o| matches!(o, Open::Anchor { .. }))
    }

    fn at_line_start(&self) -> bool {
        self.current.is_empty() || self.current.ends_with(['\n', ' ']) || self.carry_from.is_some()
    }

    fn reserved(&self) -> usize {
        let closers: usize = self.stack.iter().map(Open::closer_len).sum();
        if self.first_row {
            closers + self.header.len() + 2
        } else {
            closers
        }
    }

    fn push(&mut self, text: &str) {
        self.current.push_str(text);
        self.current_len += text.chars().count();
    }

    fn truncate(&mut self, byte_len: usize) {
        let removed = self.current[byte_len..].chars().count();
        self.current.truncate(byte_len);
        self.current_len -= removed;
        self.carry_from = self.carry_from.filter(|&at| at < byte_len);
        self.row_start = self.row_start.filter(|&at| at <= byte_len);
    }

    /// Opens a construct that writes no text of its own until it closes.
    fn enter(&mut self, construct: Open) {
        self.ensure_room(construct.closer_len());
        self.stack.push(construct);
    }

    /// Appends an opening marker that must stay attached to the content after it.
    fn open_marker(&mut self, marker: &str, construct: Option<Open>) {
        let closer = construct.as_ref().map_or(0, Open::closer_len);
        self.ensure_room(marker.chars().count() + closer);
        if self.carry_from.is_none() {
            self.carry_from = Some(self.current.len());
        }
        self.push(marker);
        self.stack.extend(construct);
    }

    /// Appends closing text. Its length was reserved when the construct opened.
    fn close_marker(&mut self, marker: &str) {
        self.push(marker);
        self.carry_from = None;
    }

    /// Appends an insertion that stands on its own, such as a rule or an image link.
    fn insert(&mut self, text: &str) {
        self.ensure_room(text.chars().count());
        self.push(text);
        self.carry_from = None;
        self.trim_next = false;
    }

    /// Closes the current segment if `incoming` more chars would not fit.
    fn ensure_room(&mut self, incoming: usize) {
        if self.current_len + incoming + self.reserved() < self.max {
            return;
        }

        let mut cut = self.carry_from.unwrap_or(self.current.len());
        if let Some(row) = self.row_start.filter(|_| self.in_table()) {
            let row_len = self.current[row..].chars().count();
            if row < cut && row_len + incoming + self.reserved() < self.max {
                cut = row;
            }
        }
        if cut == 0 {
            return;
        }

        let carried = self.current.split_off(cut);
        let closed = std::mem::replace(&mut self.current, carried);
        self.flush(closed);
        self.current_len = self.current.chars().count();
        self.carry_from = self.carry_from.map(|at| at - cut);
        self.row_start = self.row_start.and_then(|at| at.checked_sub(cut));
    }

    fn flush(&mut self, text: String) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.done.push(trimmed.to_string());
        }
    }

    /// Removes the innermost open construct matching `pred`.
    fn close(&mut self, pred: impl Fn(&Open) -> bool) -> Option<Open> {
        let at = self.stack.iter().rposition(pred)?;
        Some(self.stack.remove(at))
    }

    fn start(&mut self, e: &BytesStart<'_>) {
        let tag = tag_name(e.name().as_ref());

        if let Some(marker) = emphasis_marker(&tag) {
            self.open_marker(marker, Some(Open::Emphasis(marker)));
            self.trim_next = true;
            return;
        }
        if let Some(level) = heading_level(&tag) {
            self.open_marker(&format!("{} ", "#".repeat(level)), Some(Open::Heading(level)));
            self.trim_next = true;
            return;
        }

        match tag.as_str() {
            // A segment already at the limit closes here, at the paragraph boundary.
            "p" => self.enter(Open::Paragraph),
            "br" => {
                if !self.in_table() {
                    self.insert(BLANK_LINE);
                }
            }
            "hr" => self.insert(RULE),
            "sup" => self.open_marker("^", None),
            "ul" | "ol" => self.enter(Open::List {
                ordered: tag == "ol",
            }),
            "li" => {
                let ordered = self
                    .stack
                    .iter()
                    .rev()
                    .find_map(|o| match o {
                        Open::List { ordered } => Some(*ordered),
                        _ => None,
                    })
                    .unwrap_or(false);
                self.open_marker(if ordered { "1. " } else { "* " }, Some(Open::Item));
                self.trim_next = true;
            }
            "a" => {
                let href = attribute(e, b"href").unwrap_or_default();
                self.open_marker("[", Some(Open::Anchor { href }));
            }
            "img" => {
                if self.in_anchor() {
                    self.data("image");
                } else {
                    let src = attribute(e, b"src").unwrap_or_default();
                    self.insert(&format!("[image]({src})"));
                }
            }
            "table" => {
                self.enter(Open::Table);
                self.first_row = true;
                self.header.clear();
            }
            "tr" => {
                self.enter(Open::Row);
                self.row_start = Some(self.current.len());
            }
            "td" | "th" => {
                let header_growth = if self.first_row { 3 } else { 0 };
                self.ensure_room(2 + header_growth);
                if self.row_start.is_none() {
                    self.row_start = Some(self.current.len());
                }
                self.push("| ");
                if self.first_row {
                    self.header.push_str("|:-");
                }
                self.trim_next = true;
            }
            "tbody" | "thead" | "tfoot" | "span" | "font" | "u" | "div" | "html" | "body" => {}
            _ => tracing::warn!(tag = %tag, "Unhandled markup tag, ignoring"),
        }
    }

    fn end(&mut self, tag: &str) {
        self.trim_next = false;

        if let Some(marker) = emphasis_marker(tag) {
            if self
                .close(|o| matches!(o, Open::Emphasis(m) if *m == marker))
                .is_some()
            {
                self.close_emphasis(marker);
            }
            return;
        }
        if let Some(level) = heading_level(tag) {
            if self
                .close(|o| matches!(o, Open::Heading(l) if *l == level))
                .is_some()
            {
                let trimmed = self.current.trim_end().len();
                self.truncate(trimmed);
                self.close_marker(&format!(" {}{}", "#".repeat(level), BLANK_LINE));
            }
            return;
        }

        match tag {
            "p" => {
                if self.close(|o| *o == Open::Paragraph).is_some() && !self.in_table() {
                    self.close_marker(BLANK_LINE);
                }
            }
            "ul" | "ol" => {
                if self.close(|o| matches!(o, Open::List { .. })).is_some() {
                    self.close_marker(BLANK_LINE);
                }
            }
            "li" => {
                if self.close(|o| *o == Open::Item).is_some() {
                    self.close_marker("\n");
                }
            }
            "a" => {
                if let Some(Open::Anchor { href }) =
                    self.close(|o| matches!(o, Open::Anchor { .. }))
                {
                    self.close_marker(&format!("]({href})"));
                }
            }
            "tr" => {
                if self.close(|o| *o == Open::Row).is_some() {
                    self.close_marker("|\n");
                    if self.first_row {
                        let header = std::mem::take(&mut self.header);
                        self.close_marker(&header);
                        self.close_marker("|\n");
                        self.first_row = false;
                    }
                    self.row_start = None;
                }
            }
            "table" => {
                if self.close(|o| *o == Open::Table).is_some() {
                    self.close_marker("\n");
                    self.first_row = false;
                    self.header.clear();
                    self.row_start = None;
                }
            }
            _ => {}
        }
    }

    /// Writes a closing emphasis marker. Whitespace just before the marker is
    /// moved after it, and a span that never received text is dropped.
    fn close_emphasis(&mut self, marker: &str) {
        if self.carry_from.is_some() && self.current.ends_with(marker) {
            let without = self.current.len() - marker.len();
            self.truncate(without);
            return;
        }

        let trimmed = self.current.trim_end().len();
        if trimmed < self.current.len() {
            self.truncate(trimmed);
            self.close_marker(marker);
            self.close_marker(" ");
        } else {
            self.close_marker(marker);
        }
    }

    fn data(&mut self, raw: &str) {
        let stripped = raw.trim_matches(|c| matches!(c, '\n' | '\t' | '\r'));
        let mut text: Cow<'_, str> = if stripped.contains(['\n', '\t', '\r']) {
            Cow::Owned(stripped.replace(['\n', '\t', '\r'], " "))
        } else {
            Cow::Borrowed(stripped)
        };
        if self.trim_next {
            text = match text {
                Cow::Borrowed(s) => Cow::Borrowed(s.trim_start()),
                Cow::Owned(s) => Cow::Owned(s.trim_start().to_string()),
            };
        }
        if text.is_empty() {
            return;
        }

        if text.trim().is_empty() {
            // Whitespace between tags: keep at most one separating space.
            if !self.at_line_start() && self.current_len + 1 + self.reserved() < self.max {
                self.push(" ");
            }
            return;
        }

        self.trim_next = false;
        self.ensure_room(text.chars().count());
        self.push(&text);
        self.carry_from = None;
    }

    fn finish(mut self) -> MarkdownDocument {
        let last = std::mem::take(&mut self.current);
        self.flush(last);
        MarkdownDocument {
            segments: self.done.into_iter().map(Segment::new).collect(),
        }
    }
}
