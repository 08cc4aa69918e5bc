use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::importer::SourceString;

/// Parse an Android string-resource document into ordered `(name, value)`
/// pairs.
///
/// Only `<string>` elements are imported; `string-array` and `plurals` are
/// ignored, as are entries marked `translatable="false"`. Inline markup
/// (`<b>`, `<u>`, ...) is preserved verbatim inside the value. Entries are
/// emitted in document order and duplicates are NOT collapsed here; the
/// reconciler decides what a duplicate name means.
pub fn parse(document: &str) -> Result<Vec<SourceString>> {
    let mut reader = Reader::from_str(document);
    let mut strings = Vec::new();

    // Set while inside a <string> element: (name, buffer, translatable)
    let mut current: Option<(String, String, bool)> = None;
    let mut depth_in_string: u32 = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if current.is_none() {
                    if e.name().as_ref() == b"string" {
                        let (name, translatable) = string_attributes(&e)?;
                        let Some(name) = name else {
                            bail!("<string> element without a name attribute");
                        };
                        current = Some((name, String::new(), translatable));
                        depth_in_string = 0;
                    }
                } else if let Some((_, buf, _)) = current.as_mut() {
                    depth_in_string += 1;
                    push_open_tag(buf, &e, false);
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some((_, buf, _)) = current.as_mut() {
                    push_open_tag(buf, &e, true);
                } else if e.name().as_ref() == b"string" {
                    // Self-closing <string name="x"/> is a well-formed entry
                    // with an empty value, not something to drop
                    let (name, translatable) = string_attributes(&e)?;
                    let Some(name) = name else {
                        bail!("<string> element without a name attribute");
                    };
                    if translatable {
                        strings.push(SourceString {
                            name,
                            value: String::new(),
                        });
                    }
                }
            }
            Ok(Event::End(e)) => {
                if depth_in_string == 0 {
                    // Closing the <string> element itself (or a container
                    // element we are not tracking)
                    if let Some((name, buf, translatable)) = current.take() {
                        if translatable {
                            strings.push(SourceString {
                                name,
                                value: finalize_value(&buf),
                            });
                        }
                    }
                } else if let Some((_, buf, _)) = current.as_mut() {
                    depth_in_string -= 1;
                    buf.push_str("</");
                    buf.push_str(&String::from_utf8_lossy(e.name().as_ref()));
                    buf.push('>');
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, buf, _)) = current.as_mut() {
                    let text = t
                        .unescape()
                        .context("Failed to unescape text in string resource")?;
                    buf.push_str(&unescape_android(&text));
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, buf, _)) = current.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => bail!("Malformed string-resource XML: {}", e),
        }
    }

    Ok(strings)
}

/// Extract the `name` and `translatable` attributes of a `<string>` tag.
fn string_attributes(e: &BytesStart<'_>) -> Result<(Option<String>, bool)> {
    let mut name = None;
    let mut translatable = true;

    for attr in e.attributes() {
        let attr = attr.context("Bad attribute in <string> element")?;
        match attr.key.as_ref() {
            b"name" => {
                name = Some(
                    attr.unescape_value()
                        .context("Bad name attribute value")?
                        .into_owned(),
                );
            }
            b"translatable" => {
                translatable = attr
                    .unescape_value()
                    .map(|v| v.as_ref() != "false")
                    .unwrap_or(true);
            }
            _ => {}
        }
    }

    Ok((name, translatable))
}

/// Reconstruct an inline markup tag verbatim into the value buffer.
fn push_open_tag(buf: &mut String, e: &BytesStart<'_>, self_closing: bool) {
    buf.push('<');
    buf.push_str(&String::from_utf8_lossy(e.name().as_ref()));
    for attr in e.attributes().flatten() {
        buf.push(' ');
        buf.push_str(&String::from_utf8_lossy(attr.key.as_ref()));
        buf.push_str("=\"");
        buf.push_str(&String::from_utf8_lossy(&attr.value));
        buf.push('"');
    }
    if self_closing {
        buf.push('/');
    }
    buf.push('>');
}

/// Resolve Android resource escapes (`\'`, `\"`, `\n`, `\t`, `\\`, `\@`).
fn unescape_android(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('@') => out.push('@'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Trim document whitespace; a fully double-quoted value keeps its literal
/// inner whitespace instead.
fn finalize_value(buf: &str) -> String {
    let trimmed = buf.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}
