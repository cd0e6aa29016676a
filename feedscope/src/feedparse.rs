use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use feed_rs::parser;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::LocalName;
use quick_xml::reader::Reader;

/// One feed item reduced to the fields the pipeline cares about.
/// `published` is set when the structured parser understood the date;
/// `date_raw` carries the verbatim string for the fallback ladder.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub date_raw: Option<String>,
}

/// Parse result for one feed document. `warning` is set when the strict
/// parser failed and entries were recovered by the lenient tag scan.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub entries: Vec<RawEntry>,
    pub warning: Option<String>,
}

/// Parse a feed body. Strict parsing first; if the document is malformed
/// enough to reject wholesale, fall back to a lenient scan that salvages
/// whatever item/entry elements it can and reports a warning.
pub fn parse_feed(body: &[u8]) -> ParsedFeed {
    match parser::parse(body) {
        Ok(feed) => {
            let mut entries: Vec<RawEntry> =
                feed.entries.iter().map(entry_from_feed_rs).collect();
            backfill_raw_dates(&mut entries, body);
            ParsedFeed { entries, warning: None }
        }
        Err(err) => {
            let entries = scan_items(body);
            let warning = Some(format!(
                "feed parse error: {}; lenient scan recovered {} items",
                err,
                entries.len()
            ));
            ParsedFeed { entries, warning }
        }
    }
}

fn entry_from_feed_rs(entry: &feed_rs::model::Entry) -> RawEntry {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());
    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| http_url(entry.id.trim()));
    RawEntry { title, link, published: entry.published.or(entry.updated), date_raw: None }
}

/// The structured parser drops date strings it cannot interpret. Rescan the
/// raw document and attach the verbatim date text to entries left without
/// one, matched by link, so the fallback ladder gets a chance at it.
fn backfill_raw_dates(entries: &mut [RawEntry], body: &[u8]) {
    if entries.iter().all(|e| e.published.is_some()) {
        return;
    }
    let mut by_link: HashMap<String, String> = HashMap::new();
    for item in scan_items(body) {
        if let (Some(link), Some(raw)) = (item.link, item.date_raw) {
            by_link.entry(link).or_insert(raw);
        }
    }
    for entry in entries.iter_mut() {
        if entry.published.is_some() || entry.date_raw.is_some() {
            continue;
        }
        if let Some(raw) = entry.link.as_ref().and_then(|l| by_link.get(l)) {
            entry.date_raw = Some(raw.clone());
        }
    }
}

/// Resolve an entry's publication instant, with provenance notes for the
/// lossy fallback steps. `None` means the entry has no usable date.
pub fn resolve_published(entry: &RawEntry) -> Option<(DateTime<Utc>, Vec<&'static str>)> {
    if let Some(published) = entry.published {
        return Some((published, Vec::new()));
    }
    parse_date_string(entry.date_raw.as_deref()?)
}

/// Date ladder: RFC 2822, then RFC 3339, then timezone-less datetime
/// formats assumed UTC, then a bare date assumed midnight UTC.
pub fn parse_date_string(raw: &str) -> Option<(DateTime<Utc>, Vec<&'static str>)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some((dt.with_timezone(&Utc), Vec::new()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some((dt.with_timezone(&Utc), Vec::new()));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some((Utc.from_utc_datetime(&naive), vec!["assumed_utc_no_tz"]));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some((
            Utc.from_utc_datetime(&naive),
            vec!["assumed_utc_no_tz", "date_only_assumed_midnight"],
        ));
    }
    None
}

// Permalink-style guids double as the link when the item has none.
fn http_url(candidate: &str) -> Option<String> {
    (candidate.starts_with("http://") || candidate.starts_with("https://"))
        .then(|| candidate.to_string())
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
    Guid,
    Date,
    Updated,
}

#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    date_raw: Option<String>,
    updated_raw: Option<String>,
}

impl ItemBuilder {
    // First occurrence wins; later duplicates (media:title and the like)
    // are ignored.
    fn set(&mut self, field: Field, text: &str) {
        if text.is_empty() {
            return;
        }
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Guid => &mut self.guid,
            Field::Date => &mut self.date_raw,
            Field::Updated => &mut self.updated_raw,
        };
        if slot.is_none() {
            *slot = Some(text.to_string());
        }
    }

    fn build(self) -> RawEntry {
        RawEntry {
            title: self.title,
            link: self.link.or_else(|| self.guid.as_deref().and_then(http_url)),
            published: None,
            date_raw: self.date_raw.or(self.updated_raw),
        }
    }
}

/// Tolerant scan over item/entry elements. Mismatched end tags and trailing
/// garbage are accepted; the scan keeps whatever complete items it saw
/// before the document fell apart.
pub(crate) fn scan_items(body: &[u8]) -> Vec<RawEntry> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    reader.check_end_names(false);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match tag_name(e.local_name()).as_str() {
                "item" | "entry" => {
                    current = Some(ItemBuilder::default());
                    field = None;
                }
                "title" if current.is_some() => field = Some(Field::Title),
                "link" if current.is_some() => {
                    if let (Some(item), Some(href)) = (current.as_mut(), link_href(&e)) {
                        item.set(Field::Link, &href);
                    }
                    field = Some(Field::Link);
                }
                "guid" | "id" if current.is_some() => field = Some(Field::Guid),
                "pubdate" | "published" | "date" if current.is_some() => {
                    field = Some(Field::Date)
                }
                "updated" if current.is_some() => field = Some(Field::Updated),
                _ => field = None,
            },
            Ok(Event::Empty(e)) => {
                if tag_name(e.local_name()) == "link" {
                    if let (Some(item), Some(href)) = (current.as_mut(), link_href(&e)) {
                        item.set(Field::Link, &href);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = t.unescape().unwrap_or_default();
                    item.set(f, text.trim());
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(item), Some(f)) = (current.as_mut(), field) {
                    let text = String::from_utf8_lossy(&t.into_inner()).to_string();
                    item.set(f, text.trim());
                }
            }
            Ok(Event::End(e)) => match tag_name(e.local_name()).as_str() {
                "item" | "entry" => {
                    if let Some(item) = current.take() {
                        entries.push(item.build());
                    }
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            // Malformed past this point; keep what was recovered.
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    entries
}

fn tag_name(name: LocalName) -> String {
    String::from_utf8_lossy(name.as_ref()).to_ascii_lowercase()
}

// Atom-style link: href attribute, honoring rel when present.
fn link_href(e: &BytesStart) -> Option<String> {
    if let Ok(Some(rel)) = e.try_get_attribute("rel") {
        let rel = rel.unescape_value().ok()?;
        if rel.as_ref() != "alternate" {
            return None;
        }
    }
    e.try_get_attribute("href")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_string())
        .filter(|href| !href.is_empty())
}
