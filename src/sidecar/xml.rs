//! Tag-level surgery on NFO documents.
//!
//! Everything except the root's `tag` children is streamed back out exactly
//! as it was read, so titles, plots, comments and formatting survive a rewrite.

use crate::model::TagSet;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::fmt::Display;

const TAG: &[u8] = b"tag";
const TITLE: &[u8] = b"title";
const PLOT: &[u8] = b"plot";
const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Title,
    Plot,
    RootStart,
}

impl Anchor {
    fn matches(&self, name: &[u8]) -> bool {
        match self {
            Anchor::Title => name == TITLE,
            Anchor::Plot => name == PLOT,
            Anchor::RootStart => false,
        }
    }
}

fn xml_err(e: impl Display) -> String {
    e.to_string()
}

fn is_blank(text: &[u8]) -> bool {
    text.iter().all(|b| b.is_ascii_whitespace())
}

fn split_bom(content: &str) -> (bool, &str) {
    match content.strip_prefix(BOM) {
        Some(rest) => (true, rest),
        None => (false, content),
    }
}

/// Text of every non-empty `tag` element directly under the root.
pub fn parse_tags(content: &str) -> Result<TagSet, String> {
    let (_, body) = split_bom(content);
    let mut reader = Reader::from_str(body);
    let mut tags = TagSet::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                if depth == 0 {
                    if seen_root {
                        return Err("multiple root elements".to_string());
                    }
                    seen_root = true;
                }
                if depth == 1 && e.name().as_ref() == TAG {
                    current = Some(String::new());
                }
                depth += 1;
            }
            Event::Empty(_) => {
                if depth == 0 {
                    if seen_root {
                        return Err("multiple root elements".to_string());
                    }
                    seen_root = true;
                }
            }
            Event::End(e) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced closing element".to_string())?;
                if depth == 1 && e.name().as_ref() == TAG {
                    if let Some(text) = current.take() {
                        if !text.is_empty() {
                            tags.insert(text);
                        }
                    }
                }
            }
            Event::Text(e) => {
                if depth == 0 && !is_blank(&e) {
                    return Err("text outside the root element".to_string());
                }
                if depth == 2 {
                    if let Some(text) = current.as_mut() {
                        text.push_str(&e.unescape().map_err(xml_err)?);
                    }
                }
            }
            Event::CData(e) => {
                if depth == 2 {
                    if let Some(text) = current.as_mut() {
                        text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err("document has no root element".to_string());
    }
    if depth != 0 {
        return Err("unexpected end of document".to_string());
    }
    Ok(tags)
}

struct Layout {
    anchor: Anchor,
    /// Whitespace before the first child of the root, if the document is indented.
    child_indent: String,
}

fn analyze(body: &str) -> Result<Layout, String> {
    let mut reader = Reader::from_str(body);
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut has_title = false;
    let mut has_plot = false;
    let mut last_blank: Option<String> = None;
    let mut child_indent: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                if depth == 0 {
                    if seen_root {
                        return Err("multiple root elements".to_string());
                    }
                    seen_root = true;
                } else if depth == 1 {
                    has_title |= e.name().as_ref() == TITLE;
                    has_plot |= e.name().as_ref() == PLOT;
                    if child_indent.is_none() {
                        child_indent = Some(last_blank.take().unwrap_or_default());
                    }
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced closing element".to_string())?;
            }
            Event::Text(e) => {
                if depth == 0 && !is_blank(e) {
                    return Err("text outside the root element".to_string());
                }
                last_blank = if depth == 1 && is_blank(e) {
                    Some(String::from_utf8_lossy(e).into_owned())
                } else {
                    None
                };
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err("document has no root element".to_string());
    }
    if depth != 0 {
        return Err("unexpected end of document".to_string());
    }

    let anchor = if has_title {
        Anchor::Title
    } else if has_plot {
        Anchor::Plot
    } else {
        Anchor::RootStart
    };
    Ok(Layout {
        anchor,
        child_indent: child_indent.unwrap_or_default(),
    })
}

fn write_tag_block(
    writer: &mut Writer<Vec<u8>>,
    indent: &str,
    tags: &TagSet,
) -> Result<(), String> {
    for tag in tags {
        if !indent.is_empty() {
            writer
                .write_event(Event::Text(BytesText::from_escaped(indent)))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::Start(BytesStart::new("tag")))
            .map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::new(tag)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("tag")))
            .map_err(xml_err)?;
    }
    Ok(())
}

/// Replace every `tag` child of the root with `tags`, placed as one block
/// right after `title`, else after `plot`, else as the root's first children.
pub fn rewrite_tags(content: &str, tags: &TagSet) -> Result<String, String> {
    let (has_bom, body) = split_bom(content);
    let layout = analyze(body)?;

    let mut reader = Reader::from_str(body);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut inserted = false;
    let mut skipping = false;
    let mut pending_blank: Option<String> = None;
    let mut anchor_indent: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(xml_err)?;

        if skipping {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 1 {
                        skipping = false;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Text(ref e) if depth == 1 && is_blank(e) => {
                if let Some(blank) = pending_blank.take() {
                    writer
                        .write_event(Event::Text(BytesText::from_escaped(blank)))
                        .map_err(xml_err)?;
                }
                pending_blank = Some(String::from_utf8_lossy(e).into_owned());
            }
            Event::Start(ref e) if depth == 1 && e.name().as_ref() == TAG => {
                pending_blank = None;
                skipping = true;
                depth += 1;
            }
            Event::Empty(ref e) if depth == 1 && e.name().as_ref() == TAG => {
                pending_blank = None;
            }
            Event::Start(_) if depth == 0 => {
                writer.write_event(event.borrow()).map_err(xml_err)?;
                depth += 1;
                if layout.anchor == Anchor::RootStart && !inserted {
                    write_tag_block(&mut writer, &layout.child_indent, tags)?;
                    inserted = true;
                }
            }
            Event::Empty(ref e) if depth == 0 => {
                if tags.is_empty() {
                    writer.write_event(event.borrow()).map_err(xml_err)?;
                } else {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    writer
                        .write_event(Event::Start(e.borrow()))
                        .map_err(xml_err)?;
                    write_tag_block(&mut writer, "", tags)?;
                    writer
                        .write_event(Event::End(BytesEnd::new(name)))
                        .map_err(xml_err)?;
                }
                inserted = true;
            }
            Event::Start(ref e) if depth == 1 => {
                let blank = pending_blank.take();
                if !inserted && layout.anchor.matches(e.name().as_ref()) {
                    anchor_indent = Some(blank.clone().unwrap_or_default());
                }
                if let Some(blank) = blank {
                    writer
                        .write_event(Event::Text(BytesText::from_escaped(blank)))
                        .map_err(xml_err)?;
                }
                writer.write_event(event.borrow()).map_err(xml_err)?;
                depth += 1;
            }
            Event::Empty(ref e) if depth == 1 => {
                let blank = pending_blank.take().unwrap_or_default();
                let is_anchor = !inserted && layout.anchor.matches(e.name().as_ref());
                if !blank.is_empty() {
                    writer
                        .write_event(Event::Text(BytesText::from_escaped(blank.as_str())))
                        .map_err(xml_err)?;
                }
                writer.write_event(event.borrow()).map_err(xml_err)?;
                if is_anchor {
                    write_tag_block(&mut writer, &blank, tags)?;
                    inserted = true;
                }
            }
            Event::End(ref e) => {
                depth -= 1;
                if depth == 0 {
                    if let Some(blank) = pending_blank.take() {
                        writer
                            .write_event(Event::Text(BytesText::from_escaped(blank)))
                            .map_err(xml_err)?;
                    }
                }
                writer.write_event(event.borrow()).map_err(xml_err)?;
                if depth == 1 && !inserted && layout.anchor.matches(e.name().as_ref()) {
                    let indent = anchor_indent.take().unwrap_or_default();
                    write_tag_block(&mut writer, &indent, tags)?;
                    inserted = true;
                }
            }
            Event::Eof => break,
            other => {
                if depth == 1 {
                    if let Some(blank) = pending_blank.take() {
                        writer
                            .write_event(Event::Text(BytesText::from_escaped(blank)))
                            .map_err(xml_err)?;
                    }
                }
                writer.write_event(other).map_err(xml_err)?;
            }
        }
    }

    let mut out = String::from_utf8(writer.into_inner()).map_err(xml_err)?;
    if has_bom {
        out.insert(0, BOM);
    }
    Ok(out)
}

/// A fresh document for an item that has tags but no sidecar yet.
pub fn scaffold(title: &str, tags: &TagSet) -> Result<String, String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("movie")))
        .map_err(xml_err)?;
    for (name, text) in [("title", title), ("plot", ""), ("rating", "0")] {
        writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_err)?;
    }
    for tag in tags {
        writer
            .write_event(Event::Start(BytesStart::new("tag")))
            .map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::new(tag)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("tag")))
            .map_err(xml_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("movie")))
        .map_err(xml_err)?;

    let mut out = String::from_utf8(writer.into_inner()).map_err(xml_err)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tags: &[&str]) -> TagSet {
        tags.iter().map(|t| t.to_string()).collect()
    }

    const INDENTED: &str = "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\"?>
<movie>
    <plot><![CDATA[A <b>long</b> night]]></plot>
    <tag>old</tag>
    <title>Night &amp; Day</title>
    <rating>7.5</rating>
    <tag>stale</tag>
    <premiered>2021-04-01</premiered>
</movie>
";

    #[test]
    fn test_parse_reads_root_tags_only() {
        let doc = "<movie><title>t</title><tag>a</tag><tag>b &amp; c</tag>\
                   <tag></tag><actor><tag>nested</tag></actor></movie>";
        assert_eq!(parse_tags(doc).unwrap(), set(&["a", "b & c"]));
    }

    #[test]
    fn test_parse_rejects_broken_documents() {
        assert!(parse_tags("").is_err());
        assert!(parse_tags("<movie><title>t</title>").is_err());
        assert!(parse_tags("<movie><title>t</plot></movie>").is_err());
        assert!(parse_tags("just text").is_err());
    }

    #[test]
    fn test_rewrite_places_tags_after_title() {
        let out = rewrite_tags(INDENTED, &set(&["fresh", "new"])).unwrap();
        let expected = "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\"?>
<movie>
    <plot><![CDATA[A <b>long</b> night]]></plot>
    <title>Night &amp; Day</title>
    <tag>fresh</tag>
    <tag>new</tag>
    <rating>7.5</rating>
    <premiered>2021-04-01</premiered>
</movie>
";
        assert_eq!(out, expected);
        assert_eq!(parse_tags(&out).unwrap(), set(&["fresh", "new"]));
    }

    #[test]
    fn test_rewrite_falls_back_to_plot_then_root_start() {
        let doc = "<movie>\n  <rating>1</rating>\n  <plot/>\n  <tag>x</tag>\n</movie>";
        let out = rewrite_tags(doc, &set(&["y"])).unwrap();
        assert_eq!(
            out,
            "<movie>\n  <rating>1</rating>\n  <plot/>\n  <tag>y</tag>\n</movie>"
        );

        let doc = "<movie>\n  <rating>1</rating>\n</movie>";
        let out = rewrite_tags(doc, &set(&["y"])).unwrap();
        assert_eq!(
            out,
            "<movie>\n  <tag>y</tag>\n  <rating>1</rating>\n</movie>"
        );
    }

    #[test]
    fn test_rewrite_with_empty_set_strips_tags() {
        let out = rewrite_tags(INDENTED, &TagSet::new()).unwrap();
        assert!(!out.contains("<tag>"));
        assert!(out.contains("<premiered>2021-04-01</premiered>"));
        assert!(parse_tags(&out).unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_escapes_tag_text() {
        let out = rewrite_tags("<movie><title>t</title></movie>", &set(&["R&B <live>"])).unwrap();
        assert_eq!(
            out,
            "<movie><title>t</title><tag>R&amp;B &lt;live&gt;</tag></movie>"
        );
        assert_eq!(parse_tags(&out).unwrap(), set(&["R&B <live>"]));
    }

    #[test]
    fn test_rewrite_keeps_byte_order_mark() {
        let doc = "\u{feff}<movie><title>t</title></movie>";
        let out = rewrite_tags(doc, &set(&["a"])).unwrap();
        assert!(out.starts_with('\u{feff}'));
        assert_eq!(parse_tags(&out).unwrap(), set(&["a"]));
    }

    #[test]
    fn test_scaffold_contains_fields_and_tags() {
        let out = scaffold("Clip 01", &set(&["b", "a"])).unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(out.contains("<title>Clip 01</title>"));
        assert!(out.contains("<plot></plot>"));
        assert!(out.contains("<rating>0</rating>"));
        assert!(out.find("<tag>a</tag>").unwrap() < out.find("<tag>b</tag>").unwrap());
        assert_eq!(parse_tags(&out).unwrap(), set(&["a", "b"]));
    }
}
