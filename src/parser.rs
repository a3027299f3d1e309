//! Decoding fetched documents into a channel and its items.
//!
//! RSS 2.0 is read with the `rss` crate so the raw `pubDate` text survives
//! until ingestion. Documents without an `<rss>` root are handed to `feed-rs`
//! (Atom, JSON Feed, RSS 1.0), and its entry dates are rendered back to
//! RFC 2822 so ingestion applies a single date rule.

use std::io::BufReader;

use rss::Channel;

use crate::error::ParseError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub link: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub guid: Option<String>,
    /// Publish date exactly as it appeared in the document.
    pub pub_date: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub channel: ChannelInfo,
    /// Items in document order.
    pub items: Vec<ParsedItem>,
}

pub fn parse_document(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    match Channel::read_from(BufReader::new(bytes)) {
        Ok(channel) => Ok(from_rss(&channel)),
        Err(rss::Error::InvalidStartTag | rss::Error::Eof) => parse_with_feed_rs(bytes),
        Err(e) => Err(ParseError::Rss(e)),
    }
}

fn from_rss(channel: &Channel) -> ParsedFeed {
    let items = channel
        .items()
        .iter()
        .map(|item| ParsedItem {
            title: item.title().unwrap_or_default().to_string(),
            link: non_empty(item.link()),
            description: non_empty(item.description()),
            guid: item.guid().and_then(|g| non_empty(Some(g.value()))),
            pub_date: item.pub_date().map(str::to_string),
        })
        .collect();

    ParsedFeed {
        channel: ChannelInfo {
            title: channel.title().to_string(),
            link: channel.link().to_string(),
            description: channel.description().to_string(),
        },
        items,
    }
}

fn parse_with_feed_rs(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed =
        feed_rs::parser::parse(bytes).map_err(|e| ParseError::Unrecognized(e.to_string()))?;

    let items = feed
        .entries
        .iter()
        .map(|entry| ParsedItem {
            title: entry
                .title
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_default(),
            link: entry.links.first().map(|l| l.href.clone()),
            description: entry.summary.as_ref().map(|s| s.content.clone()),
            guid: non_empty(Some(entry.id.as_str())),
            pub_date: entry.published.or(entry.updated).map(|d| d.to_rfc2822()),
        })
        .collect();

    Ok(ParsedFeed {
        channel: ChannelInfo {
            title: feed.title.map(|t| t.content).unwrap_or_default(),
            link: feed
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            description: feed.description.map(|d| d.content).unwrap_or_default(),
        },
        items,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
